use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by an external collaborator (embedding or generation).
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("transient collaborator failure: {0}")]
    Transient(String),

    #[error("collaborator failure: {0}")]
    Fatal(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("source document not found: {0}")]
    MissingSource(PathBuf),

    #[error("failed to extract text from {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("page {page_number} of '{doc_id}' is unusable: {reason}")]
    InvalidPage {
        doc_id: String,
        page_number: u32,
        reason: String,
    },

    #[error("invalid chunker configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store query failed")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored entry '{chunk_id}' is corrupt: {reason}")]
    Corrupt { chunk_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("chunk '{chunk_id}' is invalid: {reason}")]
    InvalidChunk { chunk_id: String, reason: String },

    #[error("duplicate chunk_id '{0}' in chunk set")]
    DuplicateChunkId(String),

    #[error("embedding collaborator unavailable")]
    EmbedderUnavailable(#[source] CollaboratorError),

    #[error("embedding failed for {failed} of {total} chunks (max error rate {max_error_rate})")]
    ErrorRateExceeded {
        failed: usize,
        total: usize,
        max_error_rate: f64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("invalid doc_id filter '{0}'")]
    InvalidDocFilter(String),

    #[error("index was built with embedding model '{indexed}' but queries use '{query}'")]
    ModelMismatch { indexed: String, query: String },

    #[error("failed to embed question")]
    Embedding(#[source] CollaboratorError),

    #[error("vector store unavailable")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation failed after {attempts} attempt(s)")]
    Failed {
        attempts: usize,
        #[source]
        source: CollaboratorError,
    },

    #[error("generation collaborator returned an empty answer")]
    EmptyResponse,
}

/// Failure of a full question round-trip; a refusal is not one of these.
#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}
