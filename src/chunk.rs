//! Recursive-separator text chunker with overlap.
//!
//! Documents are split into [`Fragment`]s of at most `chunk_size` chars.
//! Each cut is placed after the last occurrence of the highest-priority
//! separator (paragraph break, line break, sentence end, space) inside the
//! window; when no separator fits, the window is cut hard. Every fragment
//! except a document's last is followed by one that starts `chunk_overlap`
//! chars before it ended.
//!
//! Pages of a document are joined with a paragraph break, so fragments may
//! span pages; each fragment records the page range it touches.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::extract::LoaderRegistry;
use crate::models::{Document, Fragment, FragmentSource};

/// Joins consecutive pages before splitting.
const PAGE_JOINER: &str = "\n\n";

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    /// Separators as char sequences, highest priority first.
    separators: Vec<Vec<char>>,
    loaders: LoaderRegistry,
}

impl Chunker {
    /// Build a chunker with the default loaders (PDF, DOCX, text).
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        Self::with_loaders(config, LoaderRegistry::default())
    }

    pub fn with_loaders(config: &ChunkingConfig, loaders: LoaderRegistry) -> Result<Self> {
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Configuration(format!(
                "invalid chunking: size {} overlap {}",
                config.chunk_size, config.chunk_overlap
            )));
        }
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: config
                .separators
                .iter()
                .map(|s| s.chars().collect())
                .collect(),
            loaders,
        })
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    /// Load every path and split the documents into one flat, ordered list.
    ///
    /// Fragments follow input order, then position within each document.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyInput`] if `paths` is empty.
    /// - [`RagError::NotFound`] / [`RagError::UnsupportedFormat`] /
    ///   [`RagError::Extraction`] from loading.
    /// - [`RagError::EmptyCorpus`] if no document has extractable text.
    pub fn split<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<Fragment>> {
        if paths.is_empty() {
            return Err(RagError::EmptyInput("no document paths given".to_string()));
        }

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let doc = self.loaders.load(path.as_ref())?;
            tracing::debug!(document = %doc.id, pages = doc.pages.len(), "loaded document");
            documents.push(doc);
        }

        if documents.iter().all(Document::is_blank) {
            return Err(RagError::EmptyCorpus {
                documents: documents.len(),
            });
        }

        let fragments: Vec<Fragment> = documents
            .iter()
            .flat_map(|doc| self.split_document(doc))
            .collect();

        tracing::info!(
            documents = documents.len(),
            fragments = fragments.len(),
            "split documents into fragments"
        );
        Ok(fragments)
    }

    /// Split one already-loaded document.
    pub fn split_document(&self, doc: &Document) -> Vec<Fragment> {
        let mut chars: Vec<char> = Vec::new();
        // (char offset where the page starts, page index)
        let mut page_starts: Vec<(usize, usize)> = Vec::with_capacity(doc.pages.len());
        for (i, page) in doc.pages.iter().enumerate() {
            if i > 0 {
                chars.extend(PAGE_JOINER.chars());
            }
            page_starts.push((chars.len(), page.index));
            chars.extend(page.text.chars());
        }

        let page_at = |offset: usize| -> usize {
            let pos = page_starts.partition_point(|&(start, _)| start <= offset);
            page_starts[pos.saturating_sub(1)].1
        };

        let mut fragments = Vec::new();
        for (start, end) in self.spans(&chars) {
            let text: String = chars[start..end].iter().collect();
            if text.trim().is_empty() {
                continue;
            }
            let index = fragments.len();
            fragments.push(make_fragment(
                doc,
                index,
                text,
                end - start,
                page_at(start),
                page_at(end - 1),
            ));
        }
        fragments
    }

    /// Compute `[start, end)` char spans covering `chars`.
    fn spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::new();
        let mut start = 0;

        while start < len {
            if len - start <= self.chunk_size {
                spans.push((start, len));
                break;
            }
            let window_end = start + self.chunk_size;
            let end = self
                .find_break(chars, start, window_end)
                .unwrap_or(window_end);
            spans.push((start, end));
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        spans
    }

    /// Cut position after the last highest-priority separator in the window.
    ///
    /// A cut must leave the fragment longer than the overlap so the next
    /// fragment starts strictly after this one. `None` means hard cut.
    fn find_break(&self, chars: &[char], start: usize, window_end: usize) -> Option<usize> {
        let min_cut = start + self.chunk_overlap + 1;
        for sep in &self.separators {
            if sep.is_empty() {
                return None;
            }
            if window_end < start + sep.len() {
                continue;
            }
            let mut pos = window_end - sep.len();
            loop {
                let cut = pos + sep.len();
                if cut < min_cut {
                    break;
                }
                if chars[pos..cut] == sep[..] {
                    return Some(cut);
                }
                if pos == start {
                    break;
                }
                pos -= 1;
            }
        }
        None
    }
}

fn make_fragment(
    doc: &Document,
    index: usize,
    text: String,
    length: usize,
    page_start: usize,
    page_end: usize,
) -> Fragment {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Fragment {
        id: format!("{}#{}", doc.id, index),
        index,
        text,
        length,
        source: FragmentSource {
            document_id: doc.id.clone(),
            page_start,
            page_end,
        },
        hash,
    }
}
