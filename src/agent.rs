//! Question-answering agent with a single retrieval tool.
//!
//! The agent hands each question to the language model together with a
//! system policy and one tool that searches the document index. The model
//! decides whether to call the tool; the agent executes requested calls
//! against its [`Retriever`], feeds the passages back, and repeats until
//! the model produces a final answer or the step bound is reached.
//!
//! # Turn flow
//!
//! ```text
//! question ──▶ model ──FinalAnswer──▶ answer
//!                │  ▲
//!       ToolCall │  │ passages
//!                ▼  │
//!             Retriever
//! ```
//!
//! [`Agent::answer`] never fails: blank questions get
//! [`BLANK_QUESTION_MESSAGE`] without any model call, and every model or
//! tool failure comes back as text starting with [`FAILURE_MARKER`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{AgentConfig, Config};
use crate::error::{RagError, Result};
use crate::llm::{ChatMessage, ChatModel, ModelResponse, OpenAiChatModel, ToolSpec};
use crate::models::Fragment;
use crate::retriever::Retriever;

/// Prefix of every answer that reports a failure.
pub const FAILURE_MARKER: &str = "❌";

/// Returned for empty or whitespace-only questions.
pub const BLANK_QUESTION_MESSAGE: &str = "❌ The question is empty. Please enter a valid question.";

// ═══════════════════════════════════════════════════════════════════════
// Retrieval Tool
// ═══════════════════════════════════════════════════════════════════════

/// The one tool the agent offers: top-k passage search over the index.
///
/// Arguments: `{"query": "<text>"}`.
pub struct RetrievalTool {
    name: String,
    description: String,
    retriever: Retriever,
}

impl RetrievalTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, retriever: Retriever) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            retriever,
        }
    }

    pub fn from_config(config: &AgentConfig, retriever: Retriever) -> Self {
        Self::new(
            config.tool_name.clone(),
            config.tool_description.clone(),
            retriever,
        )
    }

    /// Descriptor sent to the model.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look up in the documents"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    /// Pull the query text out of the model-supplied arguments.
    fn query_from(arguments: &Value) -> std::result::Result<String, String> {
        let query = match arguments {
            Value::String(s) => Some(s.as_str()),
            other => other.get("query").and_then(|q| q.as_str()),
        };
        match query.map(str::trim) {
            Some(q) if !q.is_empty() => Ok(q.to_string()),
            _ => Err("expected arguments of the form {\"query\": \"...\"}".to_string()),
        }
    }
}

/// Render fragments as numbered passages for the model.
fn render_passages(fragments: &[Fragment]) -> String {
    if fragments.is_empty() {
        return "No relevant passages found.".to_string();
    }
    fragments
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let pages = if f.source.page_start == f.source.page_end {
                format!("page {}", f.source.page_start + 1)
            } else {
                format!("pages {}-{}", f.source.page_start + 1, f.source.page_end + 1)
            };
            format!("[{}] {} ({})\n{}", i + 1, f.source.document_id, pages, f.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ═══════════════════════════════════════════════════════════════════════
// Agent
// ═══════════════════════════════════════════════════════════════════════

/// One retrieval performed during a turn.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievalRecord {
    pub query: String,
    pub fragments: usize,
}

/// Outcome of one question: the answer text and the retrievals behind it.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTurn {
    pub answer: String,
    pub retrievals: Vec<RetrievalRecord>,
    /// Number of model calls made.
    pub steps: usize,
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tool: RetrievalTool,
    system_prompt: String,
    max_steps: usize,
    model_timeout: Duration,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tool: RetrievalTool, config: &AgentConfig) -> Self {
        Self {
            model,
            tool,
            system_prompt: config.system_prompt.clone(),
            max_steps: config.max_steps.max(1),
            model_timeout: Duration::from_secs(30),
        }
    }

    /// Bound every model call by `timeout`.
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Connect the configured language model and bind `retriever` as the tool.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if credentials are missing,
    /// [`RagError::Initialization`] if the model handle cannot be set up.
    pub async fn from_config(config: &Config, retriever: Retriever) -> Result<Self> {
        let model = OpenAiChatModel::connect(&config.llm).await?;
        let tool = RetrievalTool::from_config(&config.agent, retriever);
        Ok(Self::new(Arc::new(model), tool, &config.agent).with_model_timeout(config.llm.timeout()))
    }

    /// Answer one question. Always returns text; see the module docs.
    pub async fn answer(&self, question: &str) -> String {
        self.run_turn(question).await.answer
    }

    /// Answer one question and report which retrievals were made.
    pub async fn run_turn(&self, question: &str) -> AgentTurn {
        let mut turn = AgentTurn {
            answer: String::new(),
            retrievals: Vec::new(),
            steps: 0,
        };

        let question = question.trim();
        if question.is_empty() {
            turn.answer = BLANK_QUESTION_MESSAGE.to_string();
            return turn;
        }

        let outcome = self.converse(question, &mut turn).await;
        turn.answer = match outcome {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, steps = turn.steps, "answer failed");
                format!("{} Failed to generate an answer: {}", FAILURE_MARKER, e)
            }
        };
        turn
    }

    async fn converse(&self, question: &str, turn: &mut AgentTurn) -> Result<String> {
        let tools = [self.tool.spec()];
        let mut messages = vec![
            ChatMessage::System(self.system_prompt.clone()),
            ChatMessage::User(question.to_string()),
        ];

        while turn.steps < self.max_steps {
            turn.steps += 1;
            let response = self.complete(&messages, &tools).await?;

            let calls = match response {
                ModelResponse::FinalAnswer(text) => {
                    tracing::info!(
                        steps = turn.steps,
                        retrievals = turn.retrievals.len(),
                        "answered question"
                    );
                    return Ok(text);
                }
                ModelResponse::ToolCalls(calls) => calls,
            };
            if turn.steps == self.max_steps {
                // No model call left to read the results.
                break;
            }

            messages.push(ChatMessage::Assistant {
                content: None,
                tool_calls: calls.clone(),
            });
            for call in calls {
                let content = if call.name != self.tool.name {
                    format!(
                        "error: unknown tool '{}'; the only tool is '{}'",
                        call.name, self.tool.name
                    )
                } else {
                    match RetrievalTool::query_from(&call.arguments) {
                        Ok(query) => {
                            let fragments = self.tool.retriever.retrieve(&query).await?;
                            tracing::debug!(%query, fragments = fragments.len(), "retrieved passages");
                            turn.retrievals.push(RetrievalRecord {
                                query,
                                fragments: fragments.len(),
                            });
                            render_passages(&fragments)
                        }
                        Err(msg) => format!("error: {}", msg),
                    }
                };
                messages.push(ChatMessage::Tool {
                    call_id: call.id,
                    content,
                });
            }
        }

        Err(RagError::Model(format!(
            "no final answer after {} model calls",
            self.max_steps
        )))
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelResponse> {
        match tokio::time::timeout(self.model_timeout, self.model.complete(messages, tools)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::timeout(
                format!("chat completion with {}", self.model.model_name()),
                self.model_timeout.as_secs(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::EmbeddingProvider;
    use crate::index::VectorIndex;
    use crate::llm::ToolCall;
    use crate::models::FragmentSource;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct OneHot;

    #[async_trait]
    impl EmbeddingProvider for OneHot {
        fn name(&self) -> &str {
            "onehot"
        }
        fn model_name(&self) -> &str {
            "onehot"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("lease") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    /// Replays canned responses and records how many messages each call saw.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelResponse>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::FinalAnswer("done".into())))
        }
    }

    fn fragment(i: usize, text: &str) -> Fragment {
        Fragment {
            id: format!("lease.pdf#{}", i),
            index: i,
            text: text.to_string(),
            length: text.chars().count(),
            source: FragmentSource {
                document_id: "lease.pdf".to_string(),
                page_start: i,
                page_end: i,
            },
            hash: String::new(),
        }
    }

    async fn retriever(tmp: &TempDir) -> Retriever {
        let index = VectorIndex::new(tmp.path().join("idx"), Arc::new(OneHot), &EmbeddingConfig::default());
        index
            .build(vec![
                fragment(0, "The lease term is 12 months."),
                fragment(1, "Pets are not allowed."),
            ])
            .await
            .unwrap();
        Retriever::new(index.load().await.unwrap(), 3)
    }

    fn agent(model: Arc<ScriptedModel>, retriever: Retriever, max_steps: usize) -> Agent {
        let config = AgentConfig {
            max_steps,
            ..AgentConfig::default()
        };
        let tool = RetrievalTool::from_config(&config, retriever);
        Agent::new(model, tool, &config)
    }

    fn call(name: &str, args: Value) -> ModelResponse {
        ModelResponse::ToolCalls(vec![ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args,
        }])
    }

    #[tokio::test]
    async fn blank_question_skips_model() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![]);
        let agent = agent(model.clone(), retriever(&tmp).await, 4);
        assert_eq!(agent.answer("").await, BLANK_QUESTION_MESSAGE);
        assert_eq!(agent.answer("   \n\t").await, BLANK_QUESTION_MESSAGE);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn direct_answer_without_retrieval() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![Ok(ModelResponse::FinalAnswer("4".into()))]);
        let agent = agent(model.clone(), retriever(&tmp).await, 4);
        let turn = agent.run_turn("what is 2+2").await;
        assert_eq!(turn.answer, "4");
        assert!(turn.retrievals.is_empty());
        assert_eq!(turn.steps, 1);
    }

    #[tokio::test]
    async fn tool_call_feeds_passages_back() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![
            Ok(call("pdf_extractor", json!({ "query": "lease term" }))),
            Ok(ModelResponse::FinalAnswer("12 months".into())),
        ]);
        let agent = agent(model.clone(), retriever(&tmp).await, 4);
        let turn = agent.run_turn("  How long is the lease?  ").await;

        assert_eq!(turn.answer, "12 months");
        assert_eq!(
            turn.retrievals,
            vec![RetrievalRecord {
                query: "lease term".into(),
                fragments: 2
            }]
        );

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0][1], ChatMessage::User("How long is the lease?".into()));
        match seen[1].last().unwrap() {
            ChatMessage::Tool { call_id, content } => {
                assert_eq!(call_id, "call_1");
                assert!(content.starts_with("[1] lease.pdf (page 1)\nThe lease term is 12 months."));
            }
            other => panic!("expected tool message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![
            Ok(call("web_search", json!({ "query": "x" }))),
            Ok(ModelResponse::FinalAnswer("ok".into())),
        ]);
        let agent = agent(model.clone(), retriever(&tmp).await, 4);
        let turn = agent.run_turn("q").await;
        assert_eq!(turn.answer, "ok");
        assert!(turn.retrievals.is_empty());
        let seen = model.seen.lock().unwrap();
        assert!(matches!(
            seen[1].last(),
            Some(ChatMessage::Tool { content, .. }) if content.contains("unknown tool 'web_search'")
        ));
    }

    #[tokio::test]
    async fn bad_arguments_are_reported_to_model() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![
            Ok(call("pdf_extractor", json!({ "q": 1 }))),
            Ok(ModelResponse::FinalAnswer("sorry".into())),
        ]);
        let agent = agent(model.clone(), retriever(&tmp).await, 4);
        let turn = agent.run_turn("q").await;
        assert_eq!(turn.answer, "sorry");
        assert!(turn.retrievals.is_empty());
    }

    #[tokio::test]
    async fn step_bound_stops_runaway_tool_calls() {
        let tmp = TempDir::new().unwrap();
        let script = (0..10)
            .map(|_| Ok(call("pdf_extractor", json!({ "query": "lease" }))))
            .collect();
        let model = ScriptedModel::new(script);
        let agent = agent(model.clone(), retriever(&tmp).await, 3);
        let turn = agent.run_turn("q").await;
        assert!(turn.answer.starts_with(FAILURE_MARKER));
        assert_eq!(turn.steps, 3);
        // the calls requested in the final step are not executed
        assert_eq!(turn.retrievals.len(), 2);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn single_step_budget_runs_no_retrieval() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![Ok(call("pdf_extractor", json!({ "query": "lease" })))]);
        let agent = agent(model.clone(), retriever(&tmp).await, 1);
        let turn = agent.run_turn("q").await;
        assert!(turn.answer.starts_with(FAILURE_MARKER));
        assert!(turn.retrievals.is_empty());
        assert_eq!(model.calls(), 1);
    }

    struct HangingModel;

    #[async_trait]
    impl ChatModel for HangingModel {
        fn model_name(&self) -> &str {
            "hang"
        }
        async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelResponse> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_model_times_out_into_failure_text() {
        let tmp = TempDir::new().unwrap();
        let config = AgentConfig::default();
        let tool = RetrievalTool::from_config(&config, retriever(&tmp).await);
        let agent = Agent::new(Arc::new(HangingModel), tool, &config)
            .with_model_timeout(Duration::from_secs(2));

        let turn = agent.run_turn("How long is the lease?").await;
        assert!(turn.answer.starts_with(FAILURE_MARKER));
        assert!(turn.answer.contains("timed out after 2s"), "answer: {}", turn.answer);
        assert_eq!(turn.steps, 1);
        assert!(turn.retrievals.is_empty());
    }

    #[tokio::test]
    async fn model_errors_become_failure_text() {
        let tmp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![Err(RagError::Model("API error 401".into()))]);
        let agent = agent(model, retriever(&tmp).await, 4);
        let answer = agent.answer("q").await;
        assert!(answer.starts_with(FAILURE_MARKER));
        assert!(answer.contains("API error 401"));
    }

    #[test]
    fn query_argument_forms() {
        assert_eq!(
            RetrievalTool::query_from(&json!({ "query": " rent " })).unwrap(),
            "rent"
        );
        assert_eq!(RetrievalTool::query_from(&json!("rent")).unwrap(), "rent");
        assert!(RetrievalTool::query_from(&json!({ "query": "  " })).is_err());
        assert!(RetrievalTool::query_from(&json!(null)).is_err());
    }

    #[test]
    fn empty_passages_are_explicit() {
        assert_eq!(render_passages(&[]), "No relevant passages found.");
    }
}
