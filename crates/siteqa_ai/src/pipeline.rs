//! Ingest and serve orchestration.
//!
//! Ingest mode turns documents into chunks, embeds each chunk under its own deadline,
//! appends them to a copy of the current index and persists the result. Serve mode loads
//! a persisted index (or accepts one via [`Pipeline::with_index`]) and answers questions.
//!
//! The live index is an immutable snapshot behind a lock: `ask` clones the `Arc` and
//! queries without holding the lock, ingestion swaps in a new snapshot when it is done.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use siteqa_core::config::{validate_chunk_params, DocumentErrorPolicy, Settings};
use siteqa_core::domain::Document;
use siteqa_core::error::{codes, AppError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::answer::{Answer, SynthesisOptions, Synthesizer};
use crate::chunking::chunk_document;
use crate::deadline::CancelToken;
use crate::embeddings::{embed_many_with_deadline, Embedder};
use crate::index::{IndexEntry, IndexManifest, IndexStats, IndexStore, VectorIndex};
use crate::llm::Llm;
use crate::retrieve::{RetrievalResult, Retriever};

/// Per-call score cutoff for retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum ScoreThreshold {
    /// Use `Settings::score_threshold` (which may itself be unset).
    #[default]
    Configured,
    /// Keep every top-k passage regardless of the configured threshold.
    Off,
    /// Drop passages scoring below this value.
    Min(f32),
}

impl ScoreThreshold {
    fn resolve(self, configured: Option<f32>) -> Option<f32> {
        match self {
            ScoreThreshold::Configured => configured,
            ScoreThreshold::Off => None,
            ScoreThreshold::Min(t) => Some(t),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Falls back to `Settings::top_k`.
    pub k: Option<usize>,
    pub threshold: ScoreThreshold,
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedDocument {
    pub url: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub documents_ingested: u32,
    pub documents_skipped: Vec<SkippedDocument>,
    pub chunks_added: u32,
    pub chunks_total: u32,
    pub manifest: IndexManifest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AskError {
    pub kind: String,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Always well-formed: exactly one of `answer` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub ok: bool,
    pub answer: Option<Answer>,
    pub error: Option<AskError>,
}

impl AskResponse {
    pub fn from_error(e: AppError) -> Self {
        Self {
            ok: false,
            answer: None,
            error: Some(AskError {
                kind: e.kind().as_str().to_string(),
                code: e.code,
                message: e.message,
                retryable: e.retryable,
            }),
        }
    }
}

pub struct Pipeline {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
    retriever: Retriever,
    synthesizer: Synthesizer,
    index: RwLock<Option<Arc<VectorIndex>>>,
    ingest_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
    ) -> Result<Self, AppError> {
        settings.validate()?;
        let timeout = settings.request_timeout();
        let synthesizer = Synthesizer::new(
            llm,
            SynthesisOptions {
                language_model_id: settings.language_model_id.clone(),
                timeout,
                require_citations: settings.require_citations,
                snippet_chars: settings.snippet_chars,
            },
        );
        Ok(Self {
            store: IndexStore::open(settings.index_dir.clone()),
            retriever: Retriever::new(Arc::clone(&embedder), timeout),
            synthesizer,
            embedder,
            settings,
            index: RwLock::new(None),
            ingest_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<VectorIndex>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, next: Option<Arc<VectorIndex>>) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn snapshot(&self) -> Result<Arc<VectorIndex>, AppError> {
        self.current().ok_or_else(|| {
            AppError::new(
                codes::INDEX_NOT_READY,
                "Index not loaded; run ingestion or load the index before asking",
            )
        })
    }

    /// Load the persisted index from `index_dir` and make it the live snapshot.
    pub fn load(&self) -> Result<IndexStats, AppError> {
        let index = self
            .store
            .load(&self.settings.embedding_model_id, self.settings.metric)?;
        let stats = index.stats();
        info!(
            entries = stats.entry_count,
            model = %stats.embedding_model_id,
            "index loaded"
        );
        self.swap(Some(Arc::new(index)));
        Ok(stats)
    }

    /// Serve from an index built elsewhere in-process.
    pub fn with_index(&self, index: VectorIndex) -> Result<(), AppError> {
        if index.embedding_model_id() != self.settings.embedding_model_id
            || index.metric() != self.settings.metric
        {
            return Err(AppError::new(
                codes::INDEX_VERSION_MISMATCH,
                "Index was built with a different embedding model or metric",
            )
            .with_details(format!(
                "index_model={}; index_metric={}; configured_model={}; configured_metric={}",
                index.embedding_model_id(),
                index.metric().as_str(),
                self.settings.embedding_model_id,
                self.settings.metric.as_str()
            )));
        }
        self.swap(Some(Arc::new(index)));
        Ok(())
    }

    /// Chunk, embed and index `documents`, then persist.
    ///
    /// New entries are appended to the live index (or the persisted one when nothing is
    /// loaded). Chunk ids already present are skipped, so re-ingesting unchanged pages
    /// is a no-op. On abort nothing is persisted and the live snapshot is unchanged.
    pub fn ingest(
        &self,
        documents: &[Document],
        chunk_size: usize,
        overlap: usize,
    ) -> Result<IngestReport, AppError> {
        validate_chunk_params(chunk_size, overlap)?;
        let _guard = self.ingest_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut working = self.base_index_for_ingest()?;
        let before = working.size();
        let mut ingested = 0u32;
        let mut skipped: Vec<SkippedDocument> = Vec::new();

        for doc in documents {
            match self.ingest_one(&mut working, doc, chunk_size, overlap) {
                Ok(added) => {
                    ingested += 1;
                    info!(url = %doc.source.url, chunks_added = added, "ingested document");
                }
                Err(e) => match self.settings.on_document_error {
                    DocumentErrorPolicy::Abort => {
                        error!(url = %doc.source.url, error = %e, "ingestion aborted");
                        return Err(e);
                    }
                    DocumentErrorPolicy::Skip => {
                        warn!(url = %doc.source.url, error = %e, "skipping document");
                        skipped.push(SkippedDocument {
                            url: doc.source.url.clone(),
                            code: e.code.clone(),
                            message: e.message.clone(),
                        });
                    }
                },
            }
        }

        let built_at = OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
            AppError::new(codes::INDEX_STORE_FAILED, "Failed to format build timestamp")
                .with_details(e.to_string())
        })?;
        let manifest = self.store.persist(&working, &built_at)?;

        let chunks_added = (working.size() - before) as u32;
        let chunks_total = working.size() as u32;
        self.swap(Some(Arc::new(working)));

        info!(
            documents = ingested,
            skipped = skipped.len(),
            chunks_added,
            chunks_total,
            "ingestion complete"
        );
        Ok(IngestReport {
            documents_ingested: ingested,
            documents_skipped: skipped,
            chunks_added,
            chunks_total,
            manifest,
        })
    }

    fn base_index_for_ingest(&self) -> Result<VectorIndex, AppError> {
        if let Some(live) = self.current() {
            return Ok((*live).clone());
        }
        match self
            .store
            .load(&self.settings.embedding_model_id, self.settings.metric)
        {
            Ok(index) => Ok(index),
            Err(e) if e.code == codes::INDEX_NOT_READY => Ok(self.empty_index()),
            Err(e) if e.code == codes::INDEX_INCOMPLETE => {
                warn!(path = %self.store.root().display(), "discarding incomplete index");
                Ok(self.empty_index())
            }
            Err(e) => Err(e),
        }
    }

    fn empty_index(&self) -> VectorIndex {
        VectorIndex::new(self.settings.embedding_model_id.clone(), self.settings.metric)
    }

    fn ingest_one(
        &self,
        working: &mut VectorIndex,
        doc: &Document,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<usize, AppError> {
        let chunks: Vec<_> = chunk_document(doc, chunk_size, overlap)?
            .into_iter()
            .filter(|c| !working.contains(&c.chunk_id))
            .collect();
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_many_with_deadline(
            &self.embedder,
            &self.settings.embedding_model_id,
            &texts,
            self.settings.request_timeout(),
            None,
        )?;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                vector,
                chunk,
                source: doc.source.clone(),
            })
            .collect();
        working.insert(entries)
    }

    /// Rank passages for `question` without calling the language model.
    pub fn retrieve(
        &self,
        question: &str,
        opts: &AskOptions,
    ) -> Result<RetrievalResult, AppError> {
        let index = self.snapshot()?;
        let k = opts.k.unwrap_or(self.settings.top_k);
        let threshold = opts.threshold.resolve(self.settings.score_threshold);
        self.retriever
            .retrieve(&index, question, k, threshold, opts.cancel.as_ref())
    }

    pub fn ask(&self, question: &str, opts: AskOptions) -> Result<Answer, AppError> {
        let retrieval = self.retrieve(question, &opts)?;
        self.synthesizer
            .synthesize(question, retrieval, opts.cancel.as_ref())
    }

    /// [`Pipeline::ask`] for a serving loop: failures become a classified error payload.
    pub fn ask_response(&self, question: &str, opts: AskOptions) -> AskResponse {
        match self.ask(question, opts) {
            Ok(answer) => AskResponse {
                ok: true,
                answer: Some(answer),
                error: None,
            },
            Err(e) => {
                warn!(kind = %e.kind(), code = %e.code, error = %e, "ask failed");
                AskResponse::from_error(e)
            }
        }
    }

    pub fn stats(&self) -> Result<IndexStats, AppError> {
        Ok(self.snapshot()?.stats())
    }

    /// Drop the live snapshot and delete the persisted index.
    pub fn clear(&self) -> Result<(), AppError> {
        let _guard = self.ingest_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.clear()?;
        self.swap(None);
        Ok(())
    }
}
