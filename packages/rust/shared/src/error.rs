//! Error types for metakmer.
//!
//! Library crates use [`MetakmerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all metakmer operations.
#[derive(Debug, thiserror::Error)]
pub enum MetakmerError {
    /// Configuration loading or parsing error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Invalid or missing run parameter.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A manifest row could not be parsed.
    #[error("malformed manifest {path:?} line {line}: {message}")]
    ManifestFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The manifest describes fewer than two categories.
    #[error("at least 2 categories are required, found {found}")]
    InsufficientCategories { found: usize },

    /// An external engine or helper could not be started or exited non-zero.
    #[error("`{program}` failed (exit code {}): {stderr}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Subprocess {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A prerequisite artifact is absent.
    #[error("missing {what}: {path:?}")]
    PathResolution { what: String, path: PathBuf },

    /// The final feature table could not be merged.
    #[error("assembly error: {message}")]
    Assembly { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A failure inside a pipeline stage, tagged with where it happened.
    #[error("stage {stage} ({name}){} failed: {source}", .unit.as_deref().map(|u| format!(" [{u}]")).unwrap_or_default())]
    Stage {
        stage: u8,
        name: String,
        unit: Option<String>,
        #[source]
        source: Box<MetakmerError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MetakmerError>;

impl MetakmerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an assembly error from any displayable message.
    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly {
            message: msg.into(),
        }
    }

    /// A required artifact does not exist.
    pub fn missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::PathResolution {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach stage context. Errors that already carry a stage are left alone.
    pub fn in_stage(self, stage: u8, name: &str, unit: Option<&str>) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                name: name.to_string(),
                unit: unit.map(String::from),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any stage wrapper removed.
    pub fn root(&self) -> &MetakmerError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is a user-input problem (bad flags or manifest).
    pub fn is_input_validation(&self) -> bool {
        matches!(
            self.root(),
            Self::Config { .. }
                | Self::Validation { .. }
                | Self::ManifestFormat { .. }
                | Self::InsufficientCategories { .. }
        )
    }

    /// Stage number the error was raised in, if any.
    pub fn stage(&self) -> Option<u8> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = MetakmerError::validation("k-mer size must be <= 31");
        assert_eq!(err.to_string(), "validation error: k-mer size must be <= 31");

        let err = MetakmerError::InsufficientCategories { found: 1 };
        assert!(err.to_string().contains("found 1"));
    }

    #[test]
    fn stage_context_names_stage_and_unit() {
        let err = MetakmerError::Subprocess {
            program: "metakmer-engine".into(),
            code: Some(2),
            stderr: "boom".into(),
        }
        .in_stage(3, "components", Some("healthy"));

        let msg = err.to_string();
        assert!(msg.starts_with("stage 3 (components) [healthy] failed"));
        assert!(msg.contains("exit code 2"));
        assert_eq!(err.stage(), Some(3));
        assert!(!err.is_input_validation());
    }

    #[test]
    fn stage_context_is_not_nested() {
        let err = MetakmerError::InsufficientCategories { found: 1 }
            .in_stage(2, "select", None)
            .in_stage(4, "features", None);
        assert_eq!(err.stage(), Some(2));
        assert!(err.is_input_validation());
    }
}
