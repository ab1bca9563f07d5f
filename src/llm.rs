use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::config::LlmConfig;

/// Thin client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    cfg: LlmConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: "system".into(), content: Some(text.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: "user".into(), content: Some(text.into()), tool_calls: None, tool_call_id: None }
    }

    /// Echo of an assistant turn that requested tool calls; must precede the
    /// corresponding tool results in the transcript.
    pub fn assistant_calls(content: Option<String>, calls: &[ToolCall]) -> Self {
        Self {
            role: "assistant".into(),
            content,
            tool_calls: Some(
                calls
                    .iter()
                    .map(|c| AssistantToolCall {
                        id: c.id.clone(),
                        r#type: "function".into(),
                        function: FunctionCall { name: c.name.clone(), arguments: c.arguments.clone() },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(output.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A callable function advertised to the model.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A function invocation requested by the model. `arguments` is the raw
/// JSON-encoded argument object.
#[derive(Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Default)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<AssistantToolCall>>,
}

impl LlmClient {
    /// A missing API key is not checked here; the backend rejects it at call
    /// time and the loop's retry handling sees that like any other failure.
    pub fn new(cfg: LlmConfig) -> Self {
        Self { http: Client::new(), cfg }
    }

    /// One round trip. Upstream errors keep their status line and body text
    /// so callers can recognize overload responses by substring.
    pub async fn chat(&self, messages: &[ChatMessage], tools: Option<&[ToolSpec]>) -> Result<ChatReply> {
        let url = format!("{}/chat/completions", self.cfg.api_base);
        let req = ChatRequest {
            model: &self.cfg.model,
            messages,
            temperature: self.cfg.temperature,
            tools: tools.map(|ts| ts.iter().map(tool_spec_json).collect()),
        };

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&req)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            bail!("model backend error {}: {}", status, text);
        }
        let parsed: ChatResponse =
            serde_json::from_str(&text).context("failed to parse chat completion JSON")?;
        Ok(Self::into_reply(parsed))
    }

    fn into_reply(resp: ChatResponse) -> ChatReply {
        let Some(choice) = resp.choices.into_iter().next() else {
            return ChatReply::default();
        };
        ChatReply {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|c| ToolCall { id: c.id, name: c.function.name, arguments: c.function.arguments })
                .collect(),
        }
    }
}

fn tool_spec_json(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}
