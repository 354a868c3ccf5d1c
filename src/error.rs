//! Error types for the wafer map engine.

use thiserror::Error;

/// Errors surfaced to the caller. Malformed coordinates are not errors:
/// such records are dropped during grouping.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("missing required columns: {}; found columns: {}", .missing.join(", "), .found.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("no reference coordinates loaded; merged maps need a reference grid")]
    EmptyDomain,

    #[error("no records match selection {selection}")]
    NoDataForSelection { selection: String },

    #[error("unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("coordinate domain of {cells} cells exceeds limit of {limit}")]
    DomainTooLarge { cells: u64, limit: u64 },

    #[error("could not identify X/Y columns; found columns: {}", .found.join(", "))]
    ReferenceColumnsNotFound { found: Vec<String> },

    #[error("reference set not loaded: {0}")]
    ReferenceSetNotFound(String),

    #[error("cancelled after {processed} of {total} items")]
    Cancelled { processed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_both_sides() {
        let err = EngineError::MissingColumns {
            missing: vec!["HB".into(), "SB".into()],
            found: vec!["stlot".into(), "x".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("HB, SB"));
        assert!(msg.contains("stlot, x"));
    }
}
