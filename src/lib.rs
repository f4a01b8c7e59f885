//! # pdf-rag
//!
//! Retrieval-augmented question answering over PDF documents.
//!
//! Documents are split into overlapping fragments, embedded, and stored in
//! an on-disk vector index. At question time an agent lets a language model
//! decide whether to search that index through a single retrieval tool, and
//! answers from the passages it gets back.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────────┐
//! │  Loaders  │──▶│ Chunker  │──▶│ VectorIndex │
//! │ PDF/DOCX  │   │ overlap  │   │ build/load  │
//! └───────────┘   └──────────┘   └──────┬──────┘
//!                                       │ IndexHandle
//!                                       ▼
//!                ┌───────────┐    ┌───────────┐
//!   question ───▶│   Agent   │◀──▶│ Retriever │
//!                │ ChatModel │    │  top-k    │
//!                └───────────┘    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag build ./docs                 # split and index every supported file
//! rag status                       # inspect the persisted index
//! rag ask "How long is the lease?"
//! rag chat                         # one question per stdin line
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Documents, pages, fragments |
//! | [`extract`] | Per-format document loaders |
//! | [`chunk`] | Overlapping text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`retriever`] | Fixed-`k` lookup |
//! | [`llm`] | Chat model with tool calling |
//! | [`agent`] | Question answering loop |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod models;
pub mod retriever;

pub use agent::{Agent, AgentTurn, RetrievalTool, BLANK_QUESTION_MESSAGE, FAILURE_MARKER};
pub use chunk::Chunker;
pub use config::{load_config, Config};
pub use error::{RagError, Result};
pub use index::{IndexHandle, VectorIndex};
pub use retriever::Retriever;
