//! Persisted vector index: build, load, delete, and k-nearest-neighbour query.
//!
//! An index lives in one directory:
//!
//! ```text
//! <location>/
//!   manifest.json   format version, build id, provider fingerprint, counts
//!   fragments.json  fragments in insertion order
//!   vectors.bin     row-major little-endian f32, one L2-normalized row per fragment
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! absent ──build──▶ built ──load──▶ loaded (IndexHandle)
//!    ▲                │
//!    └─────delete─────┘
//! ```
//!
//! There is no update: rebuilding means [`VectorIndex::delete`] followed by
//! [`VectorIndex::build`]. A build is staged in a hidden sibling directory
//! and renamed onto `location` only once every file is written, so an
//! interrupted build never leaves a loadable-looking index behind.
//!
//! Builds are exclusive per location; callers serialize build, load, and
//! delete on the same location. Queries against a loaded [`IndexHandle`]
//! are read-only and may run concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{self, EmbeddingProvider, ProviderFingerprint};
use crate::error::{RagError, Result};
use crate::models::Fragment;

/// On-disk format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const FRAGMENTS_FILE: &str = "fragments.json";
const VECTORS_FILE: &str = "vectors.bin";

/// Metadata stored alongside the vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub build_id: String,
    pub created_at: DateTime<Utc>,
    /// Provider and model the vectors were produced with.
    pub fingerprint: ProviderFingerprint,
    pub fragment_count: usize,
    pub dims: usize,
}

/// A named on-disk index bound to the provider used to embed into it.
pub struct VectorIndex {
    location: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
}

impl VectorIndex {
    pub fn new(
        location: impl Into<PathBuf>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            location: location.into(),
            provider,
            batch_size: config.batch_size.max(1),
            // HTTP providers bound each attempt themselves and retry on timeout.
            timeout: embedding::retry_budget(config.timeout(), config.max_retries),
        }
    }

    /// Index at `config.index.path`.
    pub fn from_config(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(config.index.path.clone(), provider, &config.embedding)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// True if anything is persisted at `location`. No side effects.
    pub fn exists(location: &Path) -> bool {
        location.exists()
    }

    /// Remove everything persisted at `location`.
    ///
    /// Returns `false` (not an error) when nothing was there.
    pub async fn delete(location: &Path) -> Result<bool> {
        let meta = match tokio::fs::symlink_metadata(location).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(location = %location.display(), "no index to delete");
                return Ok(false);
            }
            Err(e) => return Err(RagError::persistence(location, e)),
        };

        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(location).await
        } else {
            tokio::fs::remove_file(location).await
        };
        removed.map_err(|e| RagError::persistence(location, e))?;

        tracing::info!(location = %location.display(), "deleted index");
        Ok(true)
    }

    /// Embed `fragments` and persist them atomically at this index's location.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyInput`] if `fragments` is empty.
    /// - [`RagError::Persistence`] if the location is already occupied or
    ///   writing fails.
    /// - [`RagError::EmbeddingProvider`] / [`RagError::Timeout`] from embedding.
    pub async fn build(&self, fragments: Vec<Fragment>) -> Result<()> {
        if fragments.is_empty() {
            return Err(RagError::EmptyInput(
                "cannot build an index from zero fragments".to_string(),
            ));
        }
        if Self::exists(&self.location) {
            return Err(RagError::persistence(
                &self.location,
                "an index already exists here; delete it before rebuilding",
            ));
        }

        let (vectors, dims) = self.embed_fragments(&fragments).await?;

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            build_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            fingerprint: ProviderFingerprint {
                dims,
                ..self.provider.fingerprint()
            },
            fragment_count: fragments.len(),
            dims,
        };

        self.persist(&manifest, &fragments, &vectors).await?;

        tracing::info!(
            location = %self.location.display(),
            fragments = manifest.fragment_count,
            dims,
            build_id = %manifest.build_id,
            "built index"
        );
        Ok(())
    }

    /// Embed in order-preserving batches; returns flattened normalized rows.
    async fn embed_fragments(&self, fragments: &[Fragment]) -> Result<(Vec<f32>, usize)> {
        let expected_dims = self.provider.dims();
        let mut dims = expected_dims;
        let mut flat: Vec<f32> = Vec::new();

        let batches = fragments.chunks(self.batch_size);
        let batch_count = batches.len();
        for (batch_no, batch) in batches.enumerate() {
            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();
            let vectors = embed_with_timeout(self.provider.as_ref(), &texts, self.timeout).await?;
            if vectors.len() != texts.len() {
                return Err(RagError::EmbeddingProvider(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            for mut v in vectors {
                if dims == 0 {
                    dims = v.len();
                }
                if v.is_empty() || v.len() != dims {
                    return Err(RagError::EmbeddingProvider(format!(
                        "inconsistent embedding dimension: expected {}, got {}",
                        dims,
                        v.len()
                    )));
                }
                embedding::normalize(&mut v);
                flat.extend_from_slice(&v);
            }
            tracing::debug!(batch = batch_no + 1, of = batch_count, "embedded batch");
        }

        Ok((flat, dims))
    }

    async fn persist(
        &self,
        manifest: &IndexManifest,
        fragments: &[Fragment],
        vectors: &[f32],
    ) -> Result<()> {
        let parent = self
            .location
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = self
            .location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        let staging = parent.join(format!(".{}.staging-{}", name, manifest.build_id));

        let result = async {
            tokio::fs::create_dir_all(&staging).await?;
            let fragments_json = serde_json::to_vec(fragments)?;
            tokio::fs::write(staging.join(FRAGMENTS_FILE), fragments_json).await?;
            tokio::fs::write(staging.join(VECTORS_FILE), embedding::vec_to_blob(vectors)).await?;
            let manifest_json = serde_json::to_vec_pretty(manifest)?;
            tokio::fs::write(staging.join(MANIFEST_FILE), manifest_json).await?;
            tokio::fs::rename(&staging, &self.location).await?;
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(staging = %staging.display(), error = %cleanup, "failed to remove staging directory");
                }
            }
            return Err(RagError::persistence(&self.location, e));
        }
        Ok(())
    }

    /// Read the persisted index into memory.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotFound`] if nothing is persisted at the location.
    /// - [`RagError::CorruptIndex`] if any file is missing, unreadable, or
    ///   inconsistent with the manifest.
    /// - [`RagError::IncompatibleProvider`] if the index was built with a
    ///   different provider, model, or dimension than the live provider.
    pub async fn load(&self) -> Result<IndexHandle> {
        let location = &self.location;
        if !Self::exists(location) {
            return Err(RagError::NotFound(location.clone()));
        }

        let manifest_bytes = tokio::fs::read(location.join(MANIFEST_FILE))
            .await
            .map_err(|e| RagError::corrupt(location, format!("{}: {}", MANIFEST_FILE, e)))?;
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| RagError::corrupt(location, format!("{}: {}", MANIFEST_FILE, e)))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::corrupt(
                location,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let live = self.provider.fingerprint();
        if !manifest.fingerprint.is_compatible_with(&live) {
            return Err(RagError::IncompatibleProvider {
                location: location.clone(),
                stored: manifest.fingerprint.to_string(),
                live: live.to_string(),
            });
        }

        let fragments_bytes = tokio::fs::read(location.join(FRAGMENTS_FILE))
            .await
            .map_err(|e| RagError::corrupt(location, format!("{}: {}", FRAGMENTS_FILE, e)))?;
        let fragments: Vec<Fragment> = serde_json::from_slice(&fragments_bytes)
            .map_err(|e| RagError::corrupt(location, format!("{}: {}", FRAGMENTS_FILE, e)))?;
        if fragments.len() != manifest.fragment_count || fragments.is_empty() {
            return Err(RagError::corrupt(
                location,
                format!(
                    "manifest lists {} fragments, found {}",
                    manifest.fragment_count,
                    fragments.len()
                ),
            ));
        }

        let blob = tokio::fs::read(location.join(VECTORS_FILE))
            .await
            .map_err(|e| RagError::corrupt(location, format!("{}: {}", VECTORS_FILE, e)))?;
        let expected_len = manifest.fragment_count * manifest.dims * 4;
        if manifest.dims == 0 || blob.len() != expected_len {
            return Err(RagError::corrupt(
                location,
                format!(
                    "{} is {} bytes, expected {}",
                    VECTORS_FILE,
                    blob.len(),
                    expected_len
                ),
            ));
        }
        let vectors = embedding::blob_to_vec(&blob);

        tracing::info!(
            location = %location.display(),
            fragments = fragments.len(),
            dims = manifest.dims,
            "loaded index"
        );

        Ok(IndexHandle {
            inner: Arc::new(HandleInner {
                location: location.clone(),
                manifest,
                fragments,
                vectors,
                provider: self.provider.clone(),
                timeout: self.timeout,
            }),
        })
    }

    /// Top-`k` fragments for `text` from a loaded handle.
    pub async fn query(&self, handle: &IndexHandle, text: &str, k: usize) -> Result<Vec<Fragment>> {
        handle.query(text, k).await
    }
}

async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    match tokio::time::timeout(timeout, provider.embed(texts)).await {
        Ok(result) => result,
        Err(_) => Err(RagError::timeout(
            format!("embedding request to {}", provider.name()),
            timeout.as_secs(),
        )),
    }
}

struct HandleInner {
    location: PathBuf,
    manifest: IndexManifest,
    fragments: Vec<Fragment>,
    /// `fragments.len() * manifest.dims` normalized components.
    vectors: Vec<f32>,
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

/// A loaded, immutable index. Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<HandleInner>,
}

/// Summary of a loaded index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub location: PathBuf,
    pub fragments: usize,
    pub documents: usize,
    pub dims: usize,
    pub fingerprint: ProviderFingerprint,
    pub build_id: String,
    pub created_at: DateTime<Utc>,
}

impl IndexHandle {
    pub fn len(&self) -> usize {
        self.inner.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fragments.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.inner.manifest.dims
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.inner.manifest
    }

    /// All stored fragments in insertion order.
    pub fn fragments(&self) -> &[Fragment] {
        &self.inner.fragments
    }

    pub fn stats(&self) -> IndexStats {
        let mut documents: Vec<&str> = self
            .inner
            .fragments
            .iter()
            .map(|f| f.source.document_id.as_str())
            .collect();
        documents.sort_unstable();
        documents.dedup();

        let manifest = &self.inner.manifest;
        IndexStats {
            location: self.inner.location.clone(),
            fragments: self.len(),
            documents: documents.len(),
            dims: manifest.dims,
            fingerprint: manifest.fingerprint.clone(),
            build_id: manifest.build_id.clone(),
            created_at: manifest.created_at,
        }
    }

    /// The `k` fragments most similar to `text`, best first.
    ///
    /// Similarity is cosine (dot product of normalized vectors). Equal
    /// scores keep insertion order. Returns fewer than `k` results when the
    /// index is smaller than `k`.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Fragment>> {
        if k == 0 {
            return Err(RagError::EmptyInput("k must be at least 1".to_string()));
        }
        let inner = &self.inner;
        let dims = inner.manifest.dims;

        let mut vectors =
            embed_with_timeout(inner.provider.as_ref(), &[text.to_string()], inner.timeout).await?;
        let mut query = vectors
            .pop()
            .filter(|_| vectors.is_empty())
            .ok_or_else(|| {
                RagError::EmbeddingProvider("expected exactly one query vector".to_string())
            })?;
        if query.len() != dims {
            return Err(RagError::EmbeddingProvider(format!(
                "query vector has {} dims, index has {}",
                query.len(),
                dims
            )));
        }
        embedding::normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = inner
            .vectors
            .chunks_exact(dims)
            .map(|row| embedding::dot(row, &query))
            .enumerate()
            .collect();
        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let results: Vec<Fragment> = scored
            .into_iter()
            .take(k)
            .map(|(row, _)| inner.fragments[row].clone())
            .collect();

        tracing::debug!(k, returned = results.len(), "queried index");
        Ok(results)
    }
}
