use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{codes, AppError};
use crate::normalize::normalize_text;

/// Source descriptor shared by every chunk cut from one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMeta {
    pub source_id: String,
    pub url: String,
    pub title: String,
}

/// A page of site text ready for ingestion.
///
/// Notes:
/// - `text` is normalized once at construction; chunk offsets refer to this normalized text.
/// - `source_id` is derived from the URL so re-ingesting the same page maps onto the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub source: SourceMeta,
    pub text: String,
}

impl Document {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        text: &str,
    ) -> Result<Self, AppError> {
        let url = url.into().trim().to_string();
        if url.is_empty() {
            return Err(AppError::new(
                codes::DOCUMENT_INVALID,
                "Document URL/source tag is required",
            ));
        }
        let source_id = source_id_for_url(&url);
        Ok(Self {
            source: SourceMeta {
                source_id,
                url,
                title: title.into().trim().to_string(),
            },
            text: normalize_text(text),
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source.source_id
    }
}

pub fn source_id_for_url(url: &str) -> String {
    let digest = Sha256::digest(format!("source|{}", url.trim()).as_bytes());
    // 16 bytes keeps ids readable in logs; collisions are irrelevant at site scale.
    hex::encode(&digest[..16])
}

/// A contiguous slice of a document's normalized text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub ordinal: u32,
    /// Byte offset into the normalized document text (inclusive).
    pub start_offset: usize,
    /// Byte offset into the normalized document text (exclusive).
    pub end_offset: usize,
    pub text: String,
    pub text_sha256: String,
}
