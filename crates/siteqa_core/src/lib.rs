pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod normalize;

#[cfg(test)]
mod tests {
    use super::error::{AppError, ErrorKind};

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("AI_EMBEDDINGS_TIMEOUT", "embedder timed out").with_retryable(true);
        assert_eq!(err.code, "AI_EMBEDDINGS_TIMEOUT");
        assert_eq!(err.message, "embedder timed out");
        assert!(err.retryable);
        assert_eq!(err.kind(), ErrorKind::EmbeddingService);
    }

    #[test]
    fn unknown_codes_classify_as_internal_and_db_codes_as_storage() {
        assert_eq!(AppError::new("WAT", "x").kind(), ErrorKind::Internal);
        assert_eq!(AppError::new("DB_OPEN_FAILED", "x").kind(), ErrorKind::Storage);
    }

    #[test]
    fn app_error_serializes_for_presentation_layers() {
        let err = AppError::config("top_k must be greater than zero").with_details("top_k=0");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["code"], "CONFIG_INVALID");
        assert_eq!(v["details"], "top_k=0");
        assert_eq!(v["retryable"], false);
        assert_eq!(serde_json::to_value(err.kind()).unwrap(), "config");
    }
}
