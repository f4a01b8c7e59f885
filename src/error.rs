//! Error taxonomy for ingestion, indexing, and answering.
//!
//! Ingestion and index-lifecycle failures propagate to the caller as
//! [`RagError`]. The agent is the one place where errors are absorbed and
//! turned into a user-facing message (see [`crate::agent`]).

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// A document path or index location does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file extension is not handled by any registered loader.
    #[error("unsupported document format: {} (extension {extension:?})", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// A recognized document could not be parsed.
    #[error("failed to extract text from {}: {cause}", path.display())]
    Extraction { path: PathBuf, cause: String },

    /// No extractable text in any of the input documents.
    #[error("no extractable text found in {documents} document(s)")]
    EmptyCorpus { documents: usize },

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("persistence error at {}: {cause}", location.display())]
    Persistence { location: PathBuf, cause: String },

    #[error("corrupt index at {}: {cause}", location.display())]
    CorruptIndex { location: PathBuf, cause: String },

    /// The index was built with a different provider, model, or dimension.
    #[error("index at {} was built with {stored}, but the live provider is {live}", location.display())]
    IncompatibleProvider {
        location: PathBuf,
        stored: String,
        live: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The language model rejected the request or returned something unusable.
    #[error("model error: {0}")]
    Model(String),
}

impl RagError {
    pub fn persistence(location: impl Into<PathBuf>, cause: impl ToString) -> Self {
        Self::Persistence {
            location: location.into(),
            cause: cause.to_string(),
        }
    }

    pub fn corrupt(location: impl Into<PathBuf>, cause: impl ToString) -> Self {
        Self::CorruptIndex {
            location: location.into(),
            cause: cause.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }
}
