use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used across the workspace and surfaced to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(codes::CONFIG_INVALID, message)
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(d) = self.details.as_deref() {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

/// Stable error codes. Codes are part of the public contract; messages are not.
pub mod codes {
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const REMOTE_NOT_ALLOWED: &str = "AI_REMOTE_NOT_ALLOWED";

    pub const EMBEDDINGS_FAILED: &str = "AI_EMBEDDINGS_FAILED";
    pub const EMBEDDINGS_TIMEOUT: &str = "AI_EMBEDDINGS_TIMEOUT";

    pub const LLM_FAILED: &str = "AI_LLM_FAILED";
    pub const LLM_TIMEOUT: &str = "AI_LLM_TIMEOUT";
    pub const CITATION_INVALID: &str = "AI_CITATION_INVALID";
    pub const CITATION_REQUIRED: &str = "AI_CITATION_REQUIRED";

    pub const INDEX_VERSION_MISMATCH: &str = "AI_INDEX_VERSION_MISMATCH";
    pub const INDEX_NOT_READY: &str = "AI_INDEX_NOT_READY";
    pub const INDEX_INCOMPLETE: &str = "AI_INDEX_INCOMPLETE";
    pub const INDEX_STORE_FAILED: &str = "AI_INDEX_STORE_FAILED";

    pub const REQUEST_CANCELLED: &str = "AI_REQUEST_CANCELLED";

    pub const QUESTION_INVALID: &str = "AI_QUESTION_INVALID";
    pub const DOCUMENT_INVALID: &str = "AI_DOCUMENT_INVALID";
}

/// Coarse classification of [`AppError`] codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    EmbeddingService,
    LanguageModel,
    IndexVersionMismatch,
    NotReady,
    Cancelled,
    InvalidInput,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            codes::CONFIG_INVALID | codes::REMOTE_NOT_ALLOWED => ErrorKind::Config,
            codes::EMBEDDINGS_FAILED | codes::EMBEDDINGS_TIMEOUT => ErrorKind::EmbeddingService,
            codes::LLM_FAILED
            | codes::LLM_TIMEOUT
            | codes::CITATION_INVALID
            | codes::CITATION_REQUIRED => ErrorKind::LanguageModel,
            codes::INDEX_VERSION_MISMATCH => ErrorKind::IndexVersionMismatch,
            codes::INDEX_NOT_READY | codes::INDEX_INCOMPLETE => ErrorKind::NotReady,
            codes::REQUEST_CANCELLED => ErrorKind::Cancelled,
            codes::QUESTION_INVALID | codes::DOCUMENT_INVALID => ErrorKind::InvalidInput,
            codes::INDEX_STORE_FAILED => ErrorKind::Storage,
            c if c.starts_with("DB_") => ErrorKind::Storage,
            _ => ErrorKind::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::EmbeddingService => "embedding_service",
            ErrorKind::LanguageModel => "language_model",
            ErrorKind::IndexVersionMismatch => "index_version_mismatch",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
