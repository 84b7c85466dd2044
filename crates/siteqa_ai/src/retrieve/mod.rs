use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use siteqa_core::error::{codes, AppError};
use tracing::debug;

use crate::deadline::CancelToken;
use crate::embeddings::{embed_with_deadline, Embedder};
use crate::index::{RetrievedChunk, VectorIndex};

/// Passages retrieved for one question, by non-decreasing distance. May be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.chunk.chunk_id.as_str()).collect()
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    /// Embed `question`, take the `k` nearest passages, and drop those scoring below `threshold`.
    ///
    /// The query is embedded with the index's own model id so both sides share one vector space.
    pub fn retrieve(
        &self,
        index: &VectorIndex,
        question: &str,
        k: usize,
        threshold: Option<f32>,
        cancel: Option<&CancelToken>,
    ) -> Result<RetrievalResult, AppError> {
        let q = question.trim();
        if q.is_empty() {
            return Err(AppError::new(
                codes::QUESTION_INVALID,
                "Question must not be empty",
            ));
        }
        if index.is_empty() || k == 0 {
            return Ok(RetrievalResult::default());
        }

        let qv = embed_with_deadline(
            &self.embedder,
            index.embedding_model_id(),
            q,
            self.timeout,
            cancel,
        )?;

        let hits = index.query(&qv, k)?;
        let before = hits.len();
        let chunks: Vec<RetrievedChunk> = match threshold {
            Some(t) => hits.into_iter().filter(|h| h.score >= t).collect(),
            None => hits,
        };

        debug!(
            k,
            candidates = before,
            kept = chunks.len(),
            threshold = ?threshold,
            "retrieved passages"
        );
        Ok(RetrievalResult { chunks })
    }
}
