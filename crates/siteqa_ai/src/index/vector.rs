use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use siteqa_core::config::DistanceMetric;
use siteqa_core::domain::{Chunk, SourceMeta};
use siteqa_core::error::{codes, AppError};

use super::similarity;

/// One embedded chunk plus the document it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
    pub source: SourceMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// Insertion position inside the index.
    pub position: usize,
    pub chunk: Chunk,
    pub source: SourceMeta,
    /// Smaller is closer. Cosine: `1 - similarity`; Euclidean: L2 distance.
    pub distance: f32,
    /// Larger is more relevant. Cosine: similarity; Euclidean: `1 / (1 + distance)`.
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceStats {
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub embedding_model_id: String,
    pub metric: DistanceMetric,
    pub dims: Option<u32>,
    pub entry_count: u32,
    pub sources: Vec<SourceStats>,
}

/// Exact (flat scan) nearest-neighbour index over one embedding model's vectors.
///
/// Entries are append-only. A chunk id already present is skipped on insert, so re-ingesting
/// an unchanged document leaves the index as it was.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedding_model_id: String,
    metric: DistanceMetric,
    dims: Option<usize>,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
    ids: HashSet<String>,
}

impl VectorIndex {
    pub fn new(embedding_model_id: impl Into<String>, metric: DistanceMetric) -> Self {
        Self {
            embedding_model_id: embedding_model_id.into(),
            metric,
            dims: None,
            entries: Vec::new(),
            norms: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn embedding_model_id(&self) -> &str {
        &self.embedding_model_id
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.ids.contains(chunk_id)
    }

    /// Append entries. The batch is validated as a whole; on error nothing is inserted.
    /// Returns how many entries were new.
    pub fn insert(&mut self, entries: Vec<IndexEntry>) -> Result<usize, AppError> {
        let mut dims = self.dims;
        for e in entries.iter() {
            if e.vector.is_empty() || e.vector.iter().any(|x| !x.is_finite()) {
                return Err(AppError::new(
                    codes::EMBEDDINGS_FAILED,
                    "Refusing to index an empty or non-finite embedding",
                )
                .with_details(format!("chunk_id={}", e.chunk.chunk_id)));
            }
            if e.chunk.source_id != e.source.source_id {
                return Err(AppError::new(
                    codes::INDEX_STORE_FAILED,
                    "Chunk source does not match entry source",
                )
                .with_details(format!(
                    "chunk_id={}; chunk_source={}; entry_source={}",
                    e.chunk.chunk_id, e.chunk.source_id, e.source.source_id
                )));
            }
            match dims {
                Some(d) if d != e.vector.len() => {
                    return Err(AppError::new(
                        codes::INDEX_VERSION_MISMATCH,
                        "Embedding dimension mismatch across index entries",
                    )
                    .with_details(format!(
                        "expected={d}; got={}; chunk_id={}",
                        e.vector.len(),
                        e.chunk.chunk_id
                    )));
                }
                Some(_) => {}
                None => dims = Some(e.vector.len()),
            }
        }

        let mut added = 0usize;
        for e in entries {
            if self.ids.contains(&e.chunk.chunk_id) {
                continue;
            }
            self.ids.insert(e.chunk.chunk_id.clone());
            self.norms.push(similarity::l2_norm(&e.vector));
            self.entries.push(e);
            added += 1;
        }
        if added > 0 {
            self.dims = dims;
        }
        Ok(added)
    }

    /// The `k` entries closest to `vector`, by non-decreasing distance.
    /// Equal distances keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, AppError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(d) = self.dims {
            if vector.len() != d {
                return Err(AppError::new(
                    codes::INDEX_VERSION_MISMATCH,
                    "Query embedding dims do not match index dims",
                )
                .with_details(format!("index_dims={d}; query_dims={}", vector.len())));
            }
        }

        let qnorm = similarity::l2_norm(vector);
        let mut scored: Vec<(f32, f32, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| {
                let (distance, score) = match self.metric {
                    DistanceMetric::Cosine => {
                        let sim = similarity::cosine_similarity(
                            vector,
                            &e.vector,
                            qnorm,
                            self.norms[pos],
                        );
                        (1.0 - sim, sim)
                    }
                    DistanceMetric::Euclidean => {
                        let d = similarity::euclidean_distance(vector, &e.vector);
                        (d, 1.0 / (1.0 + d))
                    }
                };
                (distance, score, pos)
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.2.cmp(&b.2)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, score, pos)| {
                let e = &self.entries[pos];
                RetrievedChunk {
                    position: pos,
                    chunk: e.chunk.clone(),
                    source: e.source.clone(),
                    distance,
                    score,
                }
            })
            .collect())
    }

    pub fn stats(&self) -> IndexStats {
        let mut by_source: BTreeMap<&str, SourceStats> = BTreeMap::new();
        for e in self.entries.iter() {
            by_source
                .entry(e.source.source_id.as_str())
                .or_insert_with(|| SourceStats {
                    source_id: e.source.source_id.clone(),
                    url: e.source.url.clone(),
                    title: e.source.title.clone(),
                    chunk_count: 0,
                })
                .chunk_count += 1;
        }
        IndexStats {
            embedding_model_id: self.embedding_model_id.clone(),
            metric: self.metric,
            dims: self.dims.map(|d| d as u32),
            entry_count: self.entries.len() as u32,
            sources: by_source.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, v: Vec<f32>) -> IndexEntry {
        let source = SourceMeta {
            source_id: "s".to_string(),
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
        };
        IndexEntry {
            vector: v,
            chunk: Chunk {
                chunk_id: id.to_string(),
                source_id: "s".to_string(),
                ordinal: 0,
                start_offset: 0,
                end_offset: 1,
                text: id.to_string(),
                text_sha256: String::new(),
            },
            source,
        }
    }

    #[test]
    fn query_returns_min_k_n_sorted_by_distance() {
        let mut idx = VectorIndex::new("m", DistanceMetric::Cosine);
        idx.insert(vec![
            entry("far", vec![0.0, 1.0]),
            entry("near", vec![1.0, 0.1]),
            entry("mid", vec![1.0, 1.0]),
        ])
        .unwrap();

        let hits = idx.query(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        assert_eq!(idx.query(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert!(idx.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut idx = VectorIndex::new("m", DistanceMetric::Euclidean);
        idx.insert(vec![
            entry("b", vec![2.0, 0.0]),
            entry("a", vec![0.0, 2.0]),
            entry("c", vec![-2.0, 0.0]),
        ])
        .unwrap();
        let hits = idx.query(&[0.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!((hits[0].score - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_index_returns_empty_result() {
        let idx = VectorIndex::new("m", DistanceMetric::Cosine);
        assert!(idx.query(&[1.0, 2.0, 3.0], 4).unwrap().is_empty());
    }

    #[test]
    fn duplicate_chunk_ids_are_skipped() {
        let mut idx = VectorIndex::new("m", DistanceMetric::Cosine);
        assert_eq!(idx.insert(vec![entry("x", vec![1.0])]).unwrap(), 1);
        assert_eq!(idx.insert(vec![entry("x", vec![1.0]), entry("y", vec![0.5])]).unwrap(), 1);
        assert_eq!(idx.size(), 2);
    }

    #[test]
    fn rejects_dims_mismatch_atomically() {
        let mut idx = VectorIndex::new("m", DistanceMetric::Cosine);
        idx.insert(vec![entry("x", vec![1.0, 0.0])]).unwrap();
        let err = idx
            .insert(vec![entry("y", vec![1.0, 0.0]), entry("z", vec![1.0])])
            .unwrap_err();
        assert_eq!(err.code, codes::INDEX_VERSION_MISMATCH);
        assert_eq!(idx.size(), 1);

        let err = idx.query(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err.code, codes::INDEX_VERSION_MISMATCH);
    }

    #[test]
    fn zero_vectors_score_zero_under_cosine() {
        let mut idx = VectorIndex::new("m", DistanceMetric::Cosine);
        idx.insert(vec![entry("zero", vec![0.0, 0.0]), entry("one", vec![1.0, 0.0])])
            .unwrap();
        let hits = idx.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].chunk.chunk_id, "one");
        assert_eq!(hits[1].score, 0.0);
    }
}
