use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

/// Errors that stop analysis of a file (or the whole run, for registry load).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    InputTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("failed to load pattern registry: {0}")]
    RegistryLoad(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("chart rendering failed: {0}")]
    Chart(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalysisError::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Non-fatal diagnostics
// ---------------------------------------------------------------------------

/// Recoverable conditions recorded while a file is processed. The run keeps
/// going with a partial or sentinel result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    PatternLookupMiss {
        site: String,
        platform: String,
        test_type: String,
    },
    EncodingFallback {
        encoding: String,
        lossy: bool,
    },
    FieldCountShortfall {
        test_item: String,
        found: usize,
        required: usize,
    },
    NumericParseFailure {
        test_item: String,
        field: String,
        raw: String,
    },
    EmptyClassifierInput {
        test_item: String,
    },
    LineSkipped {
        line_number: usize,
        reason: String,
    },
    LinesTruncated {
        kept: usize,
        limit: usize,
    },
    ChartFailed {
        test_item: String,
        message: String,
    },
    BelowMinCount {
        test_item: String,
        count: usize,
        min_count: usize,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::PatternLookupMiss {
                site,
                platform,
                test_type,
            } => write!(f, "no patterns for {site}/{platform}/{test_type}"),
            Diagnostic::EncodingFallback { encoding, lossy } => {
                if *lossy {
                    write!(f, "decoded lossily as {encoding}")
                } else {
                    write!(f, "decoded with fallback encoding {encoding}")
                }
            }
            Diagnostic::FieldCountShortfall {
                test_item,
                found,
                required,
            } => write!(
                f,
                "{test_item}: {found} fields, {required} required; padded with N/A"
            ),
            Diagnostic::NumericParseFailure {
                test_item,
                field,
                raw,
            } => write!(f, "{test_item}: {field} is not numeric ({raw:?})"),
            Diagnostic::EmptyClassifierInput { test_item } => {
                write!(f, "{test_item}: nothing to classify")
            }
            Diagnostic::LineSkipped {
                line_number,
                reason,
            } => write!(f, "line {line_number} skipped: {reason}"),
            Diagnostic::LinesTruncated { kept, limit } => {
                write!(f, "input truncated to {kept} lines (limit {limit})")
            }
            Diagnostic::ChartFailed { test_item, message } => {
                write!(f, "{test_item}: chart failed: {message}")
            }
            Diagnostic::BelowMinCount {
                test_item,
                count,
                min_count,
            } => write!(
                f,
                "{test_item}: downsampled series has {count} points, below {min_count}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = AnalysisError::io(
            "/tmp/missing.log",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing.log"), "got: {msg}");
        assert!(msg.contains("no such file"), "got: {msg}");
    }

    #[test]
    fn test_registry_load_is_distinct_from_io() {
        let err = AnalysisError::RegistryLoad("bad json".into());
        assert!(matches!(err, AnalysisError::RegistryLoad(_)));
        assert_eq!(err.to_string(), "failed to load pattern registry: bad json");
    }

    #[test]
    fn test_diagnostic_serializes_with_kind_tag() {
        let diag = Diagnostic::LinesTruncated {
            kept: 10,
            limit: 10,
        };
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["kind"], "lines_truncated");
        assert_eq!(json["kept"], 10);
    }
}
