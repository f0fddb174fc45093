//! Error types for the editing engine.

use std::path::PathBuf;

use crate::types::NodeKey;

/// Failure of a command or command batch. The caller keeps its previous
/// snapshot whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// An addressed key does not exist in the snapshot the command ran against.
    #[error("node {key} does not exist in this snapshot")]
    StaleReference { key: NodeKey },

    /// The schema repair loop exceeded its iteration bound. This is a defect
    /// in the rule set, not a user error.
    #[error("normalization did not reach a fixed point after {iterations} repairs")]
    NormalizationNonTermination { iterations: usize },

    /// The addressed node exists but is the wrong kind for the operation.
    #[error("node {key} cannot be used here: expected {expected}")]
    InvalidTarget { key: NodeKey, expected: &'static str },
}

/// Failure to load an [`EditorConfig`](crate::config::EditorConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid editor config: {0}")]
    Parse(#[from] serde_json::Error),
}
