//! Fixed-`k` similarity lookup over one loaded index.

use crate::error::Result;
use crate::index::IndexHandle;
use crate::models::Fragment;

/// Default number of fragments returned per query.
pub const DEFAULT_TOP_K: usize = 3;

/// Read-only view over an [`IndexHandle`]. Clones share the same index.
#[derive(Clone)]
pub struct Retriever {
    handle: IndexHandle,
    k: usize,
}

impl Retriever {
    /// `k` is clamped to at least 1.
    pub fn new(handle: IndexHandle, k: usize) -> Self {
        Self { handle, k: k.max(1) }
    }

    /// The `k` fragments most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Fragment>> {
        self.handle.query(query, self.k).await
    }
}
