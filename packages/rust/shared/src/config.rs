//! Application configuration for metakmer.
//!
//! User config lives at `~/.metakmer/metakmer.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MetakmerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "metakmer.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".metakmer";

/// Largest k-mer size the engine packs into one machine word.
pub const MAX_KMER_SIZE: u8 = 31;

static MEMORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*[MG]$").expect("valid memory regex"));

// ---------------------------------------------------------------------------
// Config structs (matching metakmer.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// External executables.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Defaults for optional run flags.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// K-mer engine executable (count, stats, components, features, graph).
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Graph-to-contig helper executable.
    #[serde(default = "default_contig_helper")]
    pub contig_helper: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            contig_helper: default_contig_helper(),
        }
    }
}

fn default_engine() -> String {
    "metakmer-engine".into()
}
fn default_contig_helper() -> String {
    "metakmer-contigs".into()
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Working directory for all artifacts.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Erroneous k-mer frequency threshold.
    #[serde(default = "default_one")]
    pub bad_freq: u32,

    /// Graph traversal depth around pivot k-mers.
    #[serde(default = "default_one")]
    pub depth: u32,

    /// Engine thread count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,

    /// Engine memory budget, e.g. `8G`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            bad_freq: default_one(),
            depth: default_one(),
            threads: None,
            memory: None,
        }
    }
}

fn default_work_dir() -> String {
    "workDir".into()
}
fn default_one() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Everything a pipeline run needs, passed explicitly to every component.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// K-mer size.
    pub kmer_size: u8,
    /// Two-column sample manifest.
    pub manifest: PathBuf,
    /// Number of top chi-squared k-mers kept per comparison.
    pub num_kmers: u32,
    /// Low-frequency (erroneous) k-mer threshold.
    pub bad_freq: u32,
    /// Traversal depth for component extraction.
    pub depth: u32,
    /// Pre-computed k-mers directory. Stage 1 is skipped when set.
    pub kmers_dir: Option<PathBuf>,
    /// Skip graph and contig export.
    pub skip_graph: bool,
    pub threads: Option<u32>,
    pub memory: Option<String>,
    /// Root of every artifact the run writes.
    pub work_dir: PathBuf,
    /// Engine executable.
    pub engine: String,
    /// Contig helper executable.
    pub contig_helper: String,
}

impl RunConfig {
    /// Start from the mandatory flags, filling the rest from `config`.
    pub fn new(
        kmer_size: u8,
        manifest: impl Into<PathBuf>,
        num_kmers: u32,
        config: &AppConfig,
    ) -> Self {
        Self {
            kmer_size,
            manifest: manifest.into(),
            num_kmers,
            bad_freq: config.defaults.bad_freq,
            depth: config.defaults.depth,
            kmers_dir: None,
            skip_graph: false,
            threads: config.defaults.threads,
            memory: config.defaults.memory.clone(),
            work_dir: PathBuf::from(&config.defaults.work_dir),
            engine: config.tools.engine.clone(),
            contig_helper: config.tools.contig_helper.clone(),
        }
    }

    /// Check flag ranges before anything touches the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.kmer_size == 0 || self.kmer_size > MAX_KMER_SIZE {
            return Err(MetakmerError::validation(format!(
                "k-mer size must be between 1 and {MAX_KMER_SIZE}, got {}",
                self.kmer_size
            )));
        }
        if self.num_kmers == 0 {
            return Err(MetakmerError::validation(
                "number of k-mers to extract must be greater than 0",
            ));
        }
        if self.threads == Some(0) {
            return Err(MetakmerError::validation("thread count must be greater than 0"));
        }
        if let Some(memory) = &self.memory {
            if !MEMORY_RE.is_match(memory) {
                return Err(MetakmerError::validation(format!(
                    "memory budget '{memory}' must be a number followed by M or G"
                )));
            }
        }
        if self.engine.trim().is_empty() || self.contig_helper.trim().is_empty() {
            return Err(MetakmerError::config("tool executables must not be empty"));
        }
        if !self.manifest.is_file() {
            return Err(MetakmerError::validation(format!(
                "manifest not found: {}",
                self.manifest.display()
            )));
        }
        if let Some(dir) = &self.kmers_dir {
            if !dir.is_dir() {
                return Err(MetakmerError::validation(format!(
                    "pre-computed k-mers directory not found: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.metakmer/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MetakmerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.metakmer/metakmer.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MetakmerError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        MetakmerError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MetakmerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MetakmerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MetakmerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
