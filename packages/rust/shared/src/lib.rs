//! Shared types, error model, and configuration for metakmer.
//!
//! This crate is the foundation depended on by the other metakmer crates.
//! It provides:
//! - [`MetakmerError`], the unified error type
//! - Domain types ([`CategorySet`], [`BranchMode`], [`ComparisonUnit`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, MAX_KMER_SIZE, RunConfig, ToolsConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{MetakmerError, Result};
pub use types::{
    ALL_UNIT_LABEL, BranchMode, CategoryGroup, CategorySet, ComparisonGroup, ComparisonUnit,
    SampleEntry, sample_basename,
};
