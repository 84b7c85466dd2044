use sha2::{Digest, Sha256};
use siteqa_core::error::{codes, AppError};

use super::Embedder;

/// Deterministic bag-of-words embedder: each lowercase token is hashed into one of
/// `dimensions` buckets and the counts are L2-normalized.
///
/// Not semantic. It keeps ingestion and serving usable without a model server and gives
/// tests stable vectors where lexical overlap decides similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model: String,
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Result<Self, AppError> {
        if dimensions == 0 {
            return Err(AppError::config("hash embedder dimensions must be greater than zero"));
        }
        Ok(Self {
            model: model.into(),
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut b = [0u8; 8];
        b.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(b) % self.dimensions as u64) as usize
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

impl Embedder for HashEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        if model != self.model {
            return Err(AppError::new(
                codes::EMBEDDINGS_FAILED,
                "Hash embedder initialised for a different model id",
            )
            .with_details(format!("configured={}; requested={model}", self.model)));
        }

        let mut v = vec![0.0f32; self.dimensions];
        let mut seen = 0usize;
        for t in tokens(input) {
            v[self.bucket(&t)] += 1.0;
            seen += 1;
        }
        if seen == 0 {
            return Err(AppError::new(
                codes::EMBEDDINGS_FAILED,
                "Input has no tokens to embed",
            ));
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
        Ok(v)
    }
}
