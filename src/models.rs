//! Core data models used throughout the pipeline.
//!
//! These types represent the documents and fragments that flow from the
//! loaders through the chunker into the vector index.

use serde::{Deserialize, Serialize};

/// One page of extracted text.
#[derive(Debug, Clone)]
pub struct Page {
    /// Zero-based page index within the document.
    pub index: usize,
    pub text: String,
}

/// A loaded document: ordered pages plus the identifier of its source.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub pages: Vec<Page>,
}

impl Document {
    /// True when no page carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// Where a fragment came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSource {
    pub document_id: String,
    /// First page (zero-based) the fragment touches.
    pub page_start: usize,
    /// Last page (zero-based, inclusive) the fragment touches.
    pub page_end: usize,
}

/// A bounded span of document text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Deterministic id: `{document_id}#{index}`.
    pub id: String,
    /// Position of this fragment within its document.
    pub index: usize,
    pub text: String,
    /// Length of `text` in chars.
    pub length: usize,
    pub source: FragmentSource,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}
