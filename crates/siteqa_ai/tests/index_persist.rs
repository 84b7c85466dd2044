use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use siteqa_ai::chunking::chunk_document;
use siteqa_ai::embeddings::{Embedder, HashEmbedder};
use siteqa_ai::index::{IndexStore, VectorIndex};
use siteqa_ai::llm::Llm;
use siteqa_ai::{AskOptions, Pipeline, ScoreThreshold};
use siteqa_core::config::{DistanceMetric, DocumentErrorPolicy, EmbeddingBackend, Settings};
use siteqa_core::domain::Document;
use siteqa_core::error::{codes, AppError, ErrorKind};

const MODEL: &str = "hash-test";

fn settings(dir: &Path) -> Settings {
    Settings {
        index_dir: dir.to_path_buf(),
        embedding_model_id: MODEL.to_string(),
        embedding_backend: EmbeddingBackend::Hash,
        request_timeout_seconds: 5.0,
        ..Settings::default()
    }
}

struct EchoLlm;

impl Llm for EchoLlm {
    fn generate(&self, _model: &str, _prompt: &str) -> Result<String, AppError> {
        Ok("ok".to_string())
    }
}

/// Hash embeddings, counting calls, failing for any input containing "poison".
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(MODEL, 256).unwrap(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl Embedder for CountingEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.contains("poison") {
            return Err(AppError::new(codes::EMBEDDINGS_FAILED, "embedder refused input"));
        }
        self.inner.embed(model, input)
    }
}

/// Hash embeddings with a fixed pause before every call.
struct PacedEmbedder {
    inner: HashEmbedder,
    pause: Duration,
    calls: AtomicUsize,
}

impl Embedder for PacedEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.pause);
        self.inner.embed(model, input)
    }
}

fn docs() -> Vec<Document> {
    vec![
        Document::new(
            "https://example.com/about",
            "About",
            "We build bicycles in a small workshop.\n\nEvery frame is welded by hand and tested on local hills.",
        )
        .unwrap(),
        Document::new(
            "https://example.com/shipping",
            "Shipping",
            "Orders ship within five business days. International shipping is available to most countries.",
        )
        .unwrap(),
    ]
}

fn pipeline(s: Settings, embedder: Arc<CountingEmbedder>) -> Pipeline {
    Pipeline::new(s, embedder, Arc::new(EchoLlm)).unwrap()
}

fn chunk_ids(p: &Pipeline) -> Vec<String> {
    let dir = p.settings().index_dir.clone();
    IndexStore::open(dir)
        .load(MODEL, DistanceMetric::Cosine)
        .unwrap()
        .entries()
        .iter()
        .map(|e| e.chunk.chunk_id.clone())
        .collect()
}

#[test]
fn reingesting_unchanged_documents_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = CountingEmbedder::new();
    let p = pipeline(settings(dir.path()), embedder.clone());

    let first = p.ingest(&docs(), 60, 10).unwrap();
    assert!(first.chunks_added > 0);
    let ids = chunk_ids(&p);
    let calls = embedder.calls.load(Ordering::SeqCst);

    let second = p.ingest(&docs(), 60, 10).unwrap();
    assert_eq!(second.chunks_added, 0);
    assert_eq!(second.chunks_total, first.chunks_total);
    assert_eq!(chunk_ids(&p), ids);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);

    // A fresh process appends to the persisted index rather than replacing it.
    let p2 = pipeline(settings(dir.path()), CountingEmbedder::new());
    let third = p2.ingest(&docs(), 60, 10).unwrap();
    assert_eq!(third.chunks_added, 0);
    assert_eq!(third.chunks_total, first.chunks_total);
}

#[test]
fn persisted_index_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(settings(dir.path()), CountingEmbedder::new());
    let report = p.ingest(&docs(), 60, 10).unwrap();
    assert!(report.manifest.complete);
    assert_eq!(report.manifest.entry_count, report.chunks_total);
    let before = p.stats().unwrap();

    let p2 = pipeline(settings(dir.path()), CountingEmbedder::new());
    let loaded = p2.load().unwrap();
    assert_eq!(loaded, before);
    assert_eq!(loaded.sources.len(), 2);
    assert_eq!(loaded.dims, Some(256));

    let answer = p2
        .ask(
            "Orders ship within five business days",
            AskOptions {
                threshold: ScoreThreshold::Off,
                ..AskOptions::default()
            },
        )
        .unwrap();
    assert!(!answer.fallback);
    assert_eq!(answer.sources[0].title, "Shipping");
}

#[test]
fn load_rejects_model_or_metric_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    pipeline(settings(dir.path()), CountingEmbedder::new())
        .ingest(&docs(), 60, 10)
        .unwrap();

    let store = IndexStore::open(dir.path().to_path_buf());
    let err = store.load("other-model", DistanceMetric::Cosine).unwrap_err();
    assert_eq!(err.code, codes::INDEX_VERSION_MISMATCH);
    assert_eq!(err.kind(), ErrorKind::IndexVersionMismatch);

    let err = store.load(MODEL, DistanceMetric::Euclidean).unwrap_err();
    assert_eq!(err.code, codes::INDEX_VERSION_MISMATCH);

    let mut s = settings(dir.path());
    s.metric = DistanceMetric::Euclidean;
    let err = pipeline(s, CountingEmbedder::new()).ingest(&docs(), 60, 10).unwrap_err();
    assert_eq!(err.code, codes::INDEX_VERSION_MISMATCH);
}

#[test]
fn incomplete_manifest_blocks_serving() {
    let dir = tempfile::tempdir().unwrap();
    pipeline(settings(dir.path()), CountingEmbedder::new())
        .ingest(&docs(), 60, 10)
        .unwrap();

    let manifest_path = dir.path().join("manifest.json");
    let mut manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
    manifest["complete"] = serde_json::Value::Bool(false);
    fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

    let p = pipeline(settings(dir.path()), CountingEmbedder::new());
    let err = p.load().unwrap_err();
    assert_eq!(err.code, codes::INDEX_INCOMPLETE);
    assert_eq!(err.kind(), ErrorKind::NotReady);

    // Ingestion starts over from an incomplete index.
    let report = p.ingest(&docs(), 60, 10).unwrap();
    assert!(report.manifest.complete);
    p.load().unwrap();
}

#[test]
fn tampered_vectors_fail_checksum() {
    let dir = tempfile::tempdir().unwrap();
    pipeline(settings(dir.path()), CountingEmbedder::new())
        .ingest(&docs(), 60, 10)
        .unwrap();
    fs::write(dir.path().join("vectors.json"), b"[[0.5]]").unwrap();

    let err = IndexStore::open(dir.path().to_path_buf())
        .load(MODEL, DistanceMetric::Cosine)
        .unwrap_err();
    assert_eq!(err.code, codes::INDEX_STORE_FAILED);
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn missing_chunk_store_fails_without_recreating_it() {
    let dir = tempfile::tempdir().unwrap();
    pipeline(settings(dir.path()), CountingEmbedder::new())
        .ingest(&docs(), 60, 10)
        .unwrap();
    let chunks_db = dir.path().join("chunks.sqlite");
    fs::remove_file(&chunks_db).unwrap();

    let err = IndexStore::open(dir.path().to_path_buf())
        .load(MODEL, DistanceMetric::Cosine)
        .unwrap_err();
    assert_eq!(err.code, codes::INDEX_STORE_FAILED);
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(!chunks_db.exists());
}

#[test]
fn missing_index_is_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let err = IndexStore::open(dir.path().join("nothing-here"))
        .load(MODEL, DistanceMetric::Cosine)
        .unwrap_err();
    assert_eq!(err.code, codes::INDEX_NOT_READY);
}

#[test]
fn skip_policy_reports_failed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(dir.path());
    s.on_document_error = DocumentErrorPolicy::Skip;
    let p = pipeline(s, CountingEmbedder::new());

    let mut all = docs();
    all.push(Document::new("https://example.com/bad", "Bad", "poison pill page").unwrap());
    let report = p.ingest(&all, 60, 10).unwrap();

    assert_eq!(report.documents_ingested, 2);
    assert_eq!(report.documents_skipped.len(), 1);
    assert_eq!(report.documents_skipped[0].url, "https://example.com/bad");
    assert_eq!(report.documents_skipped[0].code, codes::EMBEDDINGS_FAILED);
    assert!(report.manifest.complete);
}

#[test]
fn abort_policy_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(settings(dir.path()), CountingEmbedder::new());

    let mut all = docs();
    all.push(Document::new("https://example.com/bad", "Bad", "poison pill page").unwrap());
    let err = p.ingest(&all, 60, 10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmbeddingService);
    assert!(!p.store().exists());
    assert!(!p.is_ready());
}

#[test]
fn clear_removes_index_and_unloads() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(settings(dir.path()), CountingEmbedder::new());
    p.ingest(&docs(), 60, 10).unwrap();
    assert!(p.store().exists());

    p.clear().unwrap();
    assert!(!p.store().exists());
    assert_eq!(p.stats().unwrap_err().code, codes::INDEX_NOT_READY);
    p.clear().unwrap();
}

#[test]
fn with_index_rejects_foreign_model() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(settings(dir.path()), CountingEmbedder::new());
    let err = p
        .with_index(VectorIndex::new("other-model", DistanceMetric::Cosine))
        .unwrap_err();
    assert_eq!(err.code, codes::INDEX_VERSION_MISMATCH);

    p.with_index(VectorIndex::new(MODEL, DistanceMetric::Cosine)).unwrap();
    assert!(p.is_ready());
}

#[test]
fn long_document_ingests_when_each_embedding_call_fits_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(dir.path());
    s.request_timeout_seconds = 0.5;
    s.on_document_error = DocumentErrorPolicy::Abort;

    let text: String = (0..300)
        .map(|i| format!("Paragraph {i} covers workshop step {i} in detail. "))
        .collect();
    let doc = Document::new("https://example.com/manual", "Manual", &text).unwrap();
    let expected = chunk_document(&doc, 500, 50).unwrap().len();
    assert!(expected >= 20);

    let paced = Arc::new(PacedEmbedder {
        inner: HashEmbedder::new(MODEL, 256).unwrap(),
        pause: Duration::from_millis(50),
        calls: AtomicUsize::new(0),
    });
    let p = Pipeline::new(s, paced.clone(), Arc::new(EchoLlm)).unwrap();

    let report = p.ingest(&[doc], 500, 50).unwrap();
    assert_eq!(report.documents_ingested, 1);
    assert_eq!(report.chunks_added as usize, expected);
    assert_eq!(paced.calls.load(Ordering::SeqCst), expected);
}
