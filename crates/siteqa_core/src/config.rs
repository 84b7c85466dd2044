use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Prefix for environment overrides, e.g. `SITEQA_TOP_K=6`.
pub const ENV_PREFIX: &str = "SITEQA";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Ollama,
    /// Deterministic token-hash vectors; no model server required.
    Hash,
}

/// What ingestion does when one document fails to chunk or embed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentErrorPolicy {
    Abort,
    Skip,
}

/// Process-wide configuration. Built once at startup, validated, then passed explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    pub embedding_model_id: String,
    pub language_model_id: String,
    pub request_timeout_seconds: f64,

    pub metric: DistanceMetric,
    pub index_dir: PathBuf,
    pub ollama_base_url: String,
    pub temperature: f32,
    pub embedding_backend: EmbeddingBackend,
    pub hash_dimensions: usize,
    pub on_document_error: DocumentErrorPolicy,
    pub require_citations: bool,
    pub snippet_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 4,
            score_threshold: Some(0.25),
            embedding_model_id: "all-minilm".to_string(),
            language_model_id: "llama3.2".to_string(),
            request_timeout_seconds: 30.0,
            metric: DistanceMetric::Cosine,
            index_dir: PathBuf::from("siteqa_index"),
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            temperature: 0.1,
            embedding_backend: EmbeddingBackend::Ollama,
            hash_dimensions: 512,
            on_document_error: DocumentErrorPolicy::Abort,
            require_citations: false,
            snippet_chars: 200,
        }
    }
}

impl Settings {
    /// Layer defaults, an optional config file (JSON/TOML by extension) and `SITEQA_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        if let Some(p) = path {
            if !p.exists() {
                return Err(AppError::config("Config file does not exist")
                    .with_details(format!("path={}", p.display())));
            }
            builder = builder.add_source(File::from(p.to_path_buf()));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let raw = builder.build().map_err(|e| {
            AppError::config("Failed to read configuration").with_details(e.to_string())
        })?;
        let settings: Settings = raw.try_deserialize().map_err(|e| {
            AppError::config("Failed to decode configuration").with_details(e.to_string())
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_chunk_params(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(AppError::config("top_k must be greater than zero"));
        }
        if let Some(t) = self.score_threshold {
            if !t.is_finite() {
                return Err(AppError::config("score_threshold must be a finite number")
                    .with_details(format!("score_threshold={t}")));
            }
        }
        if self.embedding_model_id.trim().is_empty() {
            return Err(AppError::config("embedding_model_id is required"));
        }
        if self.language_model_id.trim().is_empty() {
            return Err(AppError::config("language_model_id is required"));
        }
        if !(self.request_timeout_seconds.is_finite() && self.request_timeout_seconds > 0.0) {
            return Err(AppError::config("request_timeout_seconds must be positive")
                .with_details(format!(
                    "request_timeout_seconds={}",
                    self.request_timeout_seconds
                )));
        }
        if self.embedding_backend == EmbeddingBackend::Hash && self.hash_dimensions == 0 {
            return Err(AppError::config("hash_dimensions must be greater than zero"));
        }
        if self.index_dir.as_os_str().is_empty() {
            return Err(AppError::config("index_dir is required"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds)
    }
}

/// `chunk_size > overlap >= 0`, and overlap is bounded by half a chunk.
pub fn validate_chunk_params(chunk_size: usize, overlap: usize) -> Result<(), AppError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(AppError::config("chunk_size must be greater than chunk_overlap")
            .with_details(format!("chunk_size={chunk_size}; chunk_overlap={overlap}")));
    }
    if overlap > chunk_size / 2 {
        return Err(AppError::config("chunk_overlap must not exceed half of chunk_size")
            .with_details(format!("chunk_size={chunk_size}; chunk_overlap={overlap}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().expect("defaults validate");
    }

    #[test]
    fn rejects_overlap_not_below_chunk_size() {
        let err = validate_chunk_params(50, 50).unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
        assert!(validate_chunk_params(0, 0).is_err());
        assert!(validate_chunk_params(20, 11).is_err());
        assert!(validate_chunk_params(20, 10).is_ok());
        assert!(validate_chunk_params(20, 0).is_ok());
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let s = Settings {
            request_timeout_seconds: 0.0,
            ..Settings::default()
        };
        assert_eq!(s.validate().unwrap_err().code, codes::CONFIG_INVALID);
    }
}
