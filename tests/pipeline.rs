//! End-to-end tests: split → build → load → retrieve → answer.
//!
//! Everything runs offline against the fakes in `common`.

mod common;

use std::sync::Arc;

use common::{minimal_pdf, write_file, KeywordProvider, PolicyModel, LEASE_TEXT, PETS_TEXT};
use pdf_rag::config::{AgentConfig, ChunkingConfig, EmbeddingConfig};
use pdf_rag::models::Fragment;
use pdf_rag::{
    Agent, Chunker, IndexHandle, RagError, RetrievalTool, Retriever, VectorIndex,
    BLANK_QUESTION_MESSAGE,
};
use tempfile::TempDir;

fn corpus(tmp: &TempDir) -> Vec<Fragment> {
    let lease = write_file(tmp.path(), "lease.txt", LEASE_TEXT.as_bytes());
    let pets = write_file(tmp.path(), "pets.md", PETS_TEXT.as_bytes());
    Chunker::new(&ChunkingConfig::default())
        .unwrap()
        .split(&[lease, pets])
        .unwrap()
}

fn index_at(tmp: &TempDir, provider: KeywordProvider) -> VectorIndex {
    VectorIndex::new(
        tmp.path().join("rag_index"),
        Arc::new(provider),
        &EmbeddingConfig::default(),
    )
}

async fn built_handle(tmp: &TempDir) -> (Vec<Fragment>, IndexHandle) {
    let fragments = corpus(tmp);
    let index = index_at(tmp, KeywordProvider::new());
    index.build(fragments.clone()).await.unwrap();
    let handle = index.load().await.unwrap();
    (fragments, handle)
}

fn agent(handle: IndexHandle, model: Arc<PolicyModel>) -> Agent {
    let config = AgentConfig::default();
    let tool = RetrievalTool::from_config(&config, Retriever::new(handle, 3));
    Agent::new(model, tool, &config)
}

#[test]
fn split_respects_size_and_order() {
    let tmp = TempDir::new().unwrap();
    let fragments = corpus(&tmp);

    assert!(fragments.len() > 2);
    assert!(fragments.iter().all(|f| f.length <= 100 && f.length > 0));
    assert!(fragments[0].source.document_id.ends_with("lease.txt"));
    assert!(fragments
        .last()
        .unwrap()
        .source
        .document_id
        .ends_with("pets.md"));
    assert!(fragments.iter().any(|f| f.text.contains("12 months")));
}

#[test]
fn split_reports_input_errors() {
    let tmp = TempDir::new().unwrap();
    let chunker = Chunker::new(&ChunkingConfig::default()).unwrap();

    let none: [&str; 0] = [];
    assert!(matches!(chunker.split(&none), Err(RagError::EmptyInput(_))));

    let missing = tmp.path().join("missing.pdf");
    assert!(matches!(
        chunker.split(&[missing]),
        Err(RagError::NotFound(_))
    ));

    let sheet = write_file(tmp.path(), "table.XLSX", b"not really");
    match chunker.split(&[sheet]) {
        Err(RagError::UnsupportedFormat { extension, .. }) => assert_eq!(extension, "xlsx"),
        other => panic!("expected UnsupportedFormat, got {:?}", other),
    }

    let blank = write_file(tmp.path(), "blank.txt", b"   \n\n  ");
    assert!(matches!(
        chunker.split(&[blank]),
        Err(RagError::EmptyCorpus { documents: 1 })
    ));
}

#[test]
fn split_extracts_pdf_text() {
    let tmp = TempDir::new().unwrap();
    let pdf = write_file(
        tmp.path(),
        "lease.pdf",
        &minimal_pdf("The lease term is twelve months"),
    );
    let fragments = Chunker::new(&ChunkingConfig::default())
        .unwrap()
        .split(&[pdf])
        .unwrap();

    assert!(!fragments.is_empty());
    let joined: String = fragments
        .iter()
        .flat_map(|f| f.text.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    assert!(joined.contains("leasetermistwelvemonths"), "got {:?}", joined);
    assert_eq!(fragments[0].source.page_start, 0);
}

#[tokio::test]
async fn index_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let fragments = corpus(&tmp);
    let index = index_at(&tmp, KeywordProvider::new());
    let location = index.location().to_path_buf();

    assert!(!VectorIndex::exists(&location));
    assert!(matches!(index.load().await.err(), Some(RagError::NotFound(_))));
    assert!(!VectorIndex::delete(&location).await.unwrap());

    index.build(fragments.clone()).await.unwrap();
    assert!(VectorIndex::exists(&location));

    // Occupied location: no silent overwrite.
    assert!(matches!(
        index.build(fragments.clone()).await,
        Err(RagError::Persistence { .. })
    ));

    let handle = index.load().await.unwrap();
    assert_eq!(handle.fragments(), fragments.as_slice());
    let stats = handle.stats();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.fragments, fragments.len());

    assert!(VectorIndex::delete(&location).await.unwrap());
    assert!(!VectorIndex::exists(&location));
    assert!(matches!(index.load().await.err(), Some(RagError::NotFound(_))));
}

#[tokio::test]
async fn build_rejects_empty_input() {
    let tmp = TempDir::new().unwrap();
    let index = index_at(&tmp, KeywordProvider::new());
    assert!(matches!(
        index.build(Vec::new()).await,
        Err(RagError::EmptyInput(_))
    ));
    assert!(!VectorIndex::exists(index.location()));
}

#[tokio::test]
async fn rebuild_replaces_contents() {
    let tmp = TempDir::new().unwrap();
    let (_, old) = built_handle(&tmp).await;
    let index = index_at(&tmp, KeywordProvider::new());

    let only_pets = write_file(tmp.path(), "only_pets.txt", PETS_TEXT.as_bytes());
    let fresh = Chunker::new(&ChunkingConfig::default())
        .unwrap()
        .split(&[only_pets])
        .unwrap();

    VectorIndex::delete(index.location()).await.unwrap();
    index.build(fresh.clone()).await.unwrap();
    let handle = index.load().await.unwrap();

    assert_ne!(handle.manifest().build_id, old.manifest().build_id);
    let hits = handle.query("lease", 3).await.unwrap();
    assert!(hits.iter().all(|f| fresh.contains(f)));
    assert!(hits.iter().all(|f| !f.text.contains("lease")));
}

#[tokio::test]
async fn load_rejects_other_provider() {
    let tmp = TempDir::new().unwrap();
    index_at(&tmp, KeywordProvider::new())
        .build(corpus(&tmp))
        .await
        .unwrap();

    let other = index_at(&tmp, KeywordProvider::with_model("keywords-v2"));
    assert!(matches!(
        other.load().await.err(),
        Some(RagError::IncompatibleProvider { .. })
    ));
}

#[tokio::test]
async fn load_rejects_damaged_files() {
    let tmp = TempDir::new().unwrap();
    let index = index_at(&tmp, KeywordProvider::new());
    index.build(corpus(&tmp)).await.unwrap();

    std::fs::write(index.location().join("fragments.json"), b"{ not json").unwrap();
    assert!(matches!(
        index.load().await.err(),
        Some(RagError::CorruptIndex { .. })
    ));
}

#[tokio::test]
async fn query_is_ranked_and_deterministic() {
    let tmp = TempDir::new().unwrap();
    let (fragments, handle) = built_handle(&tmp).await;

    let first = handle.query("What is the lease term?", 3).await.unwrap();
    let second = handle.query("What is the lease term?", 3).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert!(first[0].text.to_lowercase().contains("lease"));
    assert!(first.iter().all(|f| fragments.contains(f)));

    let all = handle.query("deposit", 1000).await.unwrap();
    assert_eq!(all.len(), fragments.len());
    assert!(all[0].text.contains("deposit"));

    assert!(matches!(
        handle.query("deposit", 0).await,
        Err(RagError::EmptyInput(_))
    ));
}

#[tokio::test]
async fn concurrent_queries_share_one_handle() {
    let tmp = TempDir::new().unwrap();
    let (_, handle) = built_handle(&tmp).await;
    let retriever = Retriever::new(handle, 2);

    let tasks: Vec<_> = ["lease", "rent", "pets", "deposit"]
        .into_iter()
        .map(|q| {
            let retriever = retriever.clone();
            tokio::spawn(async move { retriever.retrieve(q).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn domain_question_uses_retrieval_once() {
    let tmp = TempDir::new().unwrap();
    let (_, handle) = built_handle(&tmp).await;
    let model = Arc::new(PolicyModel::new());
    let agent = agent(handle, model.clone());

    let turn = agent.run_turn("How long is the lease term?").await;

    assert_eq!(turn.retrievals.len(), 1);
    assert!(turn.retrievals[0].fragments <= 3);
    assert!(turn.answer.contains("12 months"), "answer: {}", turn.answer);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn general_question_skips_retrieval() {
    let tmp = TempDir::new().unwrap();
    let (_, handle) = built_handle(&tmp).await;
    let model = Arc::new(PolicyModel::new());
    let agent = agent(handle, model.clone());

    let turn = agent.run_turn("What is 2+2?").await;

    assert!(turn.retrievals.is_empty());
    assert!(turn.answer.contains('4'));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn blank_question_never_reaches_model() {
    let tmp = TempDir::new().unwrap();
    let (_, handle) = built_handle(&tmp).await;
    let model = Arc::new(PolicyModel::new());
    let agent = agent(handle, model.clone());

    assert_eq!(agent.answer("").await, BLANK_QUESTION_MESSAGE);
    assert_eq!(agent.answer("   ").await, BLANK_QUESTION_MESSAGE);
    assert_eq!(model.calls(), 0);
}
