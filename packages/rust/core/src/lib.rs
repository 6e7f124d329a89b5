//! Core pipeline orchestration and domain logic for metakmer.
//!
//! This crate ties together manifest classification, engine command
//! construction, external tool invocation, and feature table assembly into
//! the five-stage run (`run_pipeline`).

pub mod assembler;
pub mod builder;
pub mod classifier;
pub mod pipeline;
pub mod report;
pub mod runner;
