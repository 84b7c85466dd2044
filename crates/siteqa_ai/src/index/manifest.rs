use serde::{Deserialize, Serialize};
use siteqa_core::config::DistanceMetric;

use super::vector::SourceStats;

pub const MANIFEST_VERSION: u32 = 1;

/// Written last during persist; `complete` only flips to true once every data file is on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexManifest {
    pub manifest_version: u32,
    pub app_version: String,
    pub embedding_model_id: String,
    pub metric: DistanceMetric,
    pub dims: Option<u32>,
    pub entry_count: u32,
    pub complete: bool,
    pub built_at: String, // RFC3339
    pub vectors_sha256: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceStats>,
}
