pub mod manifest;
pub mod similarity;
pub mod store;
pub mod vector;

pub use manifest::{IndexManifest, MANIFEST_VERSION};
pub use store::IndexStore;
pub use vector::{IndexEntry, IndexStats, RetrievedChunk, SourceStats, VectorIndex};
