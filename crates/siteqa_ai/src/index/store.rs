use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use siteqa_core::config::DistanceMetric;
use siteqa_core::db;
use siteqa_core::domain::{Chunk, SourceMeta};
use siteqa_core::error::{codes, AppError};
use tracing::{debug, info, warn};

use super::manifest::{IndexManifest, MANIFEST_VERSION};
use super::vector::{IndexEntry, VectorIndex};

/// On-disk layout of a persisted [`VectorIndex`]:
///
/// - `manifest.json`: model id, metric, dims, counts, completion flag, vectors checksum
/// - `vectors.json`: vectors in insertion order
/// - `chunks.sqlite`: position -> chunk text, offsets and source metadata
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    fn vectors_path(&self) -> PathBuf {
        self.root.join("vectors.json")
    }

    fn chunks_db_path(&self) -> PathBuf {
        self.root.join("chunks.sqlite")
    }

    fn ensure_dirs(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            store_error("Failed to create index directory")
                .with_details(format!("path={}; err={}", self.root.display(), e))
        })
    }

    pub fn exists(&self) -> bool {
        self.manifest_path().exists()
    }

    pub fn read_manifest(&self) -> Result<Option<IndexManifest>, AppError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| {
            store_error("Failed to read index manifest")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let manifest = serde_json::from_slice(&bytes).map_err(|e| {
            store_error("Failed to decode index manifest")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Ok(Some(manifest))
    }

    fn write_manifest(&self, manifest: &IndexManifest) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| {
            store_error("Failed to encode index manifest").with_details(e.to_string())
        })?;
        write_atomic(&self.manifest_path(), &json)
    }

    /// Persist `index`. Any previous manifest is first re-marked incomplete so a crash
    /// mid-write never leaves a manifest claiming a finished index.
    pub fn persist(&self, index: &VectorIndex, built_at: &str) -> Result<IndexManifest, AppError> {
        self.ensure_dirs()?;

        let stats = index.stats();
        let mut manifest = IndexManifest {
            manifest_version: MANIFEST_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            embedding_model_id: stats.embedding_model_id,
            metric: stats.metric,
            dims: stats.dims,
            entry_count: stats.entry_count,
            complete: false,
            built_at: built_at.to_string(),
            vectors_sha256: None,
            sources: stats.sources,
        };
        self.write_manifest(&manifest)?;

        let vectors: Vec<&[f32]> = index.entries().iter().map(|e| e.vector.as_slice()).collect();
        let vectors_json = serde_json::to_vec(&vectors).map_err(|e| {
            store_error("Failed to encode index vectors").with_details(e.to_string())
        })?;
        write_atomic(&self.vectors_path(), &vectors_json)?;

        self.write_chunks_db(index.entries())?;

        manifest.vectors_sha256 = Some(hex::encode(Sha256::digest(&vectors_json)));
        manifest.complete = true;
        self.write_manifest(&manifest)?;

        info!(
            path = %self.root.display(),
            entries = manifest.entry_count,
            sources = manifest.sources.len(),
            "persisted index"
        );
        Ok(manifest)
    }

    fn write_chunks_db(&self, entries: &[IndexEntry]) -> Result<(), AppError> {
        let path = self.chunks_db_path();
        let tmp = path.with_extension("sqlite.tmp");
        if tmp.exists() {
            fs::remove_file(&tmp).map_err(|e| {
                store_error("Failed to remove stale chunk store temp file")
                    .with_details(format!("path={}; err={}", tmp.display(), e))
            })?;
        }

        {
            let mut conn = db::open(&tmp)?;
            db::migrate(&mut conn)?;
            insert_entries(&mut conn, entries)?;
        }

        fs::rename(&tmp, &path).map_err(|e| {
            store_error("Failed to finalize chunk store write")
                .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
        })
    }

    /// Load and validate against the configured model and metric.
    pub fn load(
        &self,
        embedding_model_id: &str,
        metric: DistanceMetric,
    ) -> Result<VectorIndex, AppError> {
        let manifest = self.read_manifest()?.ok_or_else(|| {
            AppError::new(codes::INDEX_NOT_READY, "No persisted index found; run ingestion first")
                .with_details(format!("path={}", self.root.display()))
        })?;

        if manifest.manifest_version != MANIFEST_VERSION {
            return Err(AppError::new(
                codes::INDEX_VERSION_MISMATCH,
                "Unsupported index manifest version; rebuild the index",
            )
            .with_details(format!(
                "expected={MANIFEST_VERSION}; got={}",
                manifest.manifest_version
            )));
        }
        if !manifest.complete {
            return Err(AppError::new(
                codes::INDEX_INCOMPLETE,
                "Persisted index is incomplete; rerun ingestion",
            )
            .with_details(format!("path={}", self.root.display())));
        }
        if manifest.embedding_model_id != embedding_model_id || manifest.metric != metric {
            return Err(AppError::new(
                codes::INDEX_VERSION_MISMATCH,
                "Persisted index was built with a different embedding model or metric",
            )
            .with_details(format!(
                "index_model={}; index_metric={}; configured_model={}; configured_metric={}",
                manifest.embedding_model_id,
                manifest.metric.as_str(),
                embedding_model_id,
                metric.as_str()
            )));
        }

        let vectors_path = self.vectors_path();
        let vectors_json = fs::read(&vectors_path).map_err(|e| {
            store_error("Failed to read index vectors")
                .with_details(format!("path={}; err={}", vectors_path.display(), e))
        })?;
        let sha = hex::encode(Sha256::digest(&vectors_json));
        if manifest.vectors_sha256.as_deref() != Some(sha.as_str()) {
            return Err(store_error("Index vectors do not match manifest checksum")
                .with_details(format!("path={}", vectors_path.display())));
        }
        let vectors: Vec<Vec<f32>> = serde_json::from_slice(&vectors_json).map_err(|e| {
            store_error("Failed to decode index vectors")
                .with_details(format!("path={}; err={}", vectors_path.display(), e))
        })?;

        let chunks_path = self.chunks_db_path();
        if !chunks_path.exists() {
            return Err(store_error("Index chunk store is missing; rerun ingestion")
                .with_details(format!("path={}", chunks_path.display())));
        }
        let conn = db::open_read_only(&chunks_path)?;
        let chunks = read_chunks(&conn)?;

        if chunks.len() != vectors.len() || vectors.len() != manifest.entry_count as usize {
            return Err(store_error("Index files disagree on entry count").with_details(format!(
                "manifest={}; vectors={}; chunks={}",
                manifest.entry_count,
                vectors.len(),
                chunks.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|((chunk, source), vector)| IndexEntry {
                vector,
                chunk,
                source,
            })
            .collect();

        let mut index = VectorIndex::new(manifest.embedding_model_id.clone(), manifest.metric);
        index.insert(entries)?;
        if index.dims().map(|d| d as u32) != manifest.dims {
            return Err(AppError::new(
                codes::INDEX_VERSION_MISMATCH,
                "Index vector dims do not match manifest",
            )
            .with_details(format!("manifest={:?}; vectors={:?}", manifest.dims, index.dims())));
        }

        debug!(path = %self.root.display(), entries = index.size(), "loaded index");
        Ok(index)
    }

    /// Remove every persisted file. A missing index is not an error.
    pub fn clear(&self) -> Result<(), AppError> {
        for path in [
            self.manifest_path(),
            self.vectors_path(),
            self.chunks_db_path(),
        ] {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    store_error("Failed to remove index file")
                        .with_details(format!("path={}; err={}", path.display(), e))
                })?;
            }
        }
        warn!(path = %self.root.display(), "cleared persisted index");
        Ok(())
    }
}

fn store_error(message: &str) -> AppError {
    AppError::new(codes::INDEX_STORE_FAILED, message)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| {
        store_error("Failed to write index file")
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        store_error("Failed to finalize index file write")
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })
}

fn insert_entries(conn: &mut Connection, entries: &[IndexEntry]) -> Result<(), AppError> {
    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start chunk store transaction")
            .with_details(e.to_string())
    })?;
    {
        let mut src_stmt = tx
            .prepare("INSERT OR REPLACE INTO sources(source_id, url, title) VALUES (?1, ?2, ?3)")
            .map_err(|e| {
                AppError::new("DB_INSERT_FAILED", "Failed to prepare source insert")
                    .with_details(e.to_string())
            })?;
        let mut chunk_stmt = tx
            .prepare(
                "INSERT INTO chunks(position, chunk_id, source_id, ordinal, start_offset, end_offset, text, text_sha256)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(|e| {
                AppError::new("DB_INSERT_FAILED", "Failed to prepare chunk insert")
                    .with_details(e.to_string())
            })?;

        for (pos, e) in entries.iter().enumerate() {
            src_stmt
                .execute(params![e.source.source_id, e.source.url, e.source.title])
                .map_err(|err| {
                    AppError::new("DB_INSERT_FAILED", "Failed to insert source")
                        .with_details(format!("source_id={}; err={}", e.source.source_id, err))
                })?;
            chunk_stmt
                .execute(params![
                    pos as i64,
                    e.chunk.chunk_id,
                    e.chunk.source_id,
                    e.chunk.ordinal as i64,
                    e.chunk.start_offset as i64,
                    e.chunk.end_offset as i64,
                    e.chunk.text,
                    e.chunk.text_sha256,
                ])
                .map_err(|err| {
                    AppError::new("DB_INSERT_FAILED", "Failed to insert chunk")
                        .with_details(format!("chunk_id={}; err={}", e.chunk.chunk_id, err))
                })?;
        }
    }
    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit chunk store transaction")
            .with_details(e.to_string())
    })
}

fn read_chunks(conn: &Connection) -> Result<Vec<(Chunk, SourceMeta)>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT c.chunk_id, c.source_id, c.ordinal, c.start_offset, c.end_offset, c.text, c.text_sha256,
                    s.url, s.title
             FROM chunks c JOIN sources s ON s.source_id = c.source_id
             ORDER BY c.position ASC",
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare chunk query")
                .with_details(e.to_string())
        })?;
    let rows = stmt
        .query_map([], |row| {
            let source_id: String = row.get(1)?;
            Ok((
                Chunk {
                    chunk_id: row.get(0)?,
                    source_id: source_id.clone(),
                    ordinal: row.get::<_, i64>(2)? as u32,
                    start_offset: row.get::<_, i64>(3)? as usize,
                    end_offset: row.get::<_, i64>(4)? as usize,
                    text: row.get(5)?,
                    text_sha256: row.get(6)?,
                },
                SourceMeta {
                    source_id,
                    url: row.get(7)?,
                    title: row.get(8)?,
                },
            ))
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to read chunks")
                .with_details(e.to_string())
        })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to read chunk row").with_details(e.to_string())
    })
}
