//! Language-model abstraction with tool calling.
//!
//! A [`ChatModel`] receives the conversation so far plus the tools it may
//! call, and answers with a [`ModelResponse`]: either final text or a
//! request to invoke one or more tools. [`OpenAiChatModel`] implements the
//! OpenAI-compatible `/chat/completions` protocol (DeepSeek by default).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{require_env, LlmConfig};
use crate::error::{RagError, Result};

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    /// A model turn, echoed back so tool results can refer to its calls.
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// The result of a tool call.
    Tool { call_id: String, content: String },
}

/// A model's request to invoke a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Tool description offered to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalAnswer(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one completion over `messages`, offering `tools`.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelResponse>;
}

/// Chat model speaking the OpenAI-compatible chat completions API.
pub struct OpenAiChatModel {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    /// Create a model handle from configuration.
    ///
    /// # Errors
    ///
    /// - [`RagError::Configuration`] if the API key variable is unset.
    /// - [`RagError::Initialization`] if the HTTP client cannot be built, or
    ///   if `verify_on_connect` is set and `GET {base_url}/models` fails.
    pub async fn connect(config: &LlmConfig) -> Result<Self> {
        let api_key = require_env(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RagError::Initialization(format!("failed to build HTTP client: {}", e)))?;

        let model = Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            client,
        };

        if config.verify_on_connect {
            model.verify().await?;
        }

        tracing::info!(model = %model.model, base_url = %model.base_url, "language model ready");
        Ok(model)
    }

    async fn verify(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| RagError::Initialization(format!("{} unreachable: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Initialization(format!(
                "{} rejected credentials ({}): {}",
                url, status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelResponse> {
        let body = completion_request(&self.model, self.temperature, messages, tools);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::timeout(format!("chat completion with {}", self.model), self.timeout_secs)
                } else {
                    RagError::Model(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Model(format!("API error {}: {}", status, body)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| RagError::Model(format!("invalid response body: {}", e)))?;
        parse_completion(&json)
    }
}

fn completion_request(
    model: &str,
    temperature: f32,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
    });
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn message_to_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(content) => json!({ "role": "system", "content": content }),
        ChatMessage::User(content) => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut msg = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            msg
        }
        ChatMessage::Tool { call_id, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

/// Interpret `choices[0].message` of a chat completion.
fn parse_completion(json: &Value) -> Result<ModelResponse> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| RagError::Model("response has no choices".to_string()))?;

    let calls = message
        .get("tool_calls")
        .and_then(|c| c.as_array())
        .map(|calls| calls.iter().map(parse_tool_call).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();
    if !calls.is_empty() {
        return Ok(ModelResponse::ToolCalls(calls));
    }

    message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|c| ModelResponse::FinalAnswer(c.to_string()))
        .ok_or_else(|| RagError::Model("response has neither content nor tool calls".to_string()))
}

fn parse_tool_call(call: &Value) -> Result<ToolCall> {
    let name = call
        .pointer("/function/name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| RagError::Model("tool call without a function name".to_string()))?;
    let raw_args = call
        .pointer("/function/arguments")
        .and_then(|a| a.as_str())
        .unwrap_or("{}");
    // Malformed argument JSON is passed on verbatim for the tool to reject.
    let arguments =
        serde_json::from_str(raw_args).unwrap_or_else(|_| Value::String(raw_args.to_string()));
    Ok(ToolCall {
        id: call
            .get("id")
            .and_then(|i| i.as_str())
            .unwrap_or_default()
            .to_string(),
        name: name.to_string(),
        arguments,
    })
}
