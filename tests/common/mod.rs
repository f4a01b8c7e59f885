//! Deterministic in-process fakes shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pdf_rag::embedding::EmbeddingProvider;
use pdf_rag::llm::{ChatMessage, ChatModel, ModelResponse, ToolCall, ToolSpec};
use pdf_rag::Result;
use serde_json::json;

pub const VOCABULARY: &[&str] = &["lease", "rent", "pet", "deposit", "month"];

/// Bag-of-words embedding over [`VOCABULARY`] plus a constant bias term.
pub struct KeywordProvider {
    model: String,
    pub calls: AtomicUsize,
}

impl KeywordProvider {
    pub fn new() -> Self {
        Self::with_model("keywords-v1")
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn name(&self) -> &str {
        "keywords"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = VOCABULARY
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

/// Chat model following the retrieval policy: questions mentioning a
/// vocabulary word go to the tool, everything else is answered directly.
pub struct PolicyModel {
    pub calls: AtomicUsize,
}

impl PolicyModel {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for PolicyModel {
    fn model_name(&self) -> &str {
        "policy"
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = match messages.last() {
            Some(ChatMessage::Tool { content, .. }) => {
                ModelResponse::FinalAnswer(format!("From the documents: {}", content))
            }
            Some(ChatMessage::User(question))
                if VOCABULARY.iter().any(|w| question.to_lowercase().contains(w)) =>
            {
                ModelResponse::ToolCalls(vec![ToolCall {
                    id: "call_0".to_string(),
                    name: tools[0].name.clone(),
                    arguments: json!({ "query": question }),
                }])
            }
            _ => ModelResponse::FinalAnswer("I can answer that directly: 4.".to_string()),
        };
        Ok(response)
    }
}

pub const LEASE_TEXT: &str = "Residential lease agreement. The lease term is 12 months starting in March. \
Rent is paid on the first day of every month by bank transfer.\n\n\
Either party may end the lease with sixty days written notice before the term ends.";

pub const PETS_TEXT: &str = "House rules. Pets are not allowed in the apartment without written consent.\n\n\
A security deposit of 500 dollars is held by the landlord and returned at move out.";

pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Minimal valid single-page PDF showing `phrase` in Helvetica.
/// Byte offsets in the xref table are computed as the body is written.
pub fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
