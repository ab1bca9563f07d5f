use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserConfig};
use crate::llm::{ChatMessage, LlmClient, ToolCall, ToolSpec};

const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard cap on tool-result text fed back into the transcript, so a large
/// download cannot blow the context window.
const TOOL_OUTPUT_LIMIT: usize = 20_000;

const DEFAULT_MAX_TURNS: usize = 16;

#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// Backend failure. The message keeps the upstream status line and body
    /// text, which callers match on to recognize overload.
    #[error("model error: {0}")]
    Model(String),
    #[error("task incomplete: {0}")]
    Incomplete(String),
}

/// Loads a URL in a browser environment and returns its content as text.
/// Implementations report failures as errors; callers decide whether those
/// become typed failures or plain text for the model.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> anyhow::Result<String>;
}

/// The narrow seam the quiz loop depends on: task description in, free-form
/// result text out. Swapping the reasoning backend means swapping this.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &str) -> Result<String, AgentError>;
}

/// Renders each URL in a fresh headless Chromium with an overall time
/// budget. Launch-per-call keeps renders isolated from one another.
pub struct ChromiumRenderer {
    cfg: BrowserConfig,
}

impl ChromiumRenderer {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str) -> anyhow::Result<String> {
        let bundle = timeout(RENDER_TIMEOUT, async {
            let browser = Browser::launch(self.cfg.clone()).await?;
            let result = browser.render_bundle(url).await;
            let _ = browser.close().await;
            result
        })
        .await
        .map_err(|_| anyhow::anyhow!("page load timed out after {}s", RENDER_TIMEOUT.as_secs()))??;
        Ok(bundle)
    }
}

const SYSTEM_PROMPT: &str = "You are an autonomous quiz-solving agent. You may use tabular data \
processing, numeric computation, HTTP requests, HTML parsing, charting, basic statistics, and \
spreadsheet/PDF reading to solve tasks. Interact with the world only through the provided tools: \
`visit_page` to read a rendered web page, `http_get` to download raw files or call APIs, and \
`post_json` to submit JSON payloads. Work step by step and reply with plain text only when the \
task is finished.";

/// LLM-driven task executor: a bounded tool-calling loop over the chat
/// backend, with page rendering and plain HTTP as its tools.
pub struct ToolAgent {
    llm: LlmClient,
    renderer: Arc<dyn PageRenderer>,
    http: reqwest::Client,
    max_turns: usize,
}

impl ToolAgent {
    pub fn new(llm: LlmClient, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            llm,
            renderer,
            http: reqwest::Client::new(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    fn tools() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "visit_page".into(),
                description: "Load a URL in a headless browser, render its scripts, and return \
                    the visible text plus the leading raw HTML. Use this to read quiz pages."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "url": { "type": "string" } },
                    "required": ["url"]
                }),
            },
            ToolSpec {
                name: "http_get".into(),
                description: "Fetch a URL directly and return the response body as text. Use \
                    this for file downloads and JSON APIs."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "url": { "type": "string" } },
                    "required": ["url"]
                }),
            },
            ToolSpec {
                name: "post_json".into(),
                description: "POST a JSON body to a URL and return the response status and \
                    body. Use this to submit answers."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "url": { "type": "string" },
                        "body": { "type": "object" }
                    },
                    "required": ["url", "body"]
                }),
            },
        ]
    }

    /// Tool failures come back as descriptive text, never as errors: the
    /// model is expected to read them and adjust.
    async fn dispatch(&self, call: &ToolCall) -> String {
        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => return format!("invalid arguments for {}: {}", call.name, e),
        };
        match call.name.as_str() {
            "visit_page" => {
                let url = args["url"].as_str().unwrap_or_default();
                match self.renderer.render(url).await {
                    Ok(bundle) => bundle,
                    Err(e) => format!("Error extracting text from {}: {}", url, e),
                }
            }
            "http_get" => {
                let url = args["url"].as_str().unwrap_or_default();
                match self.fetch_text(url).await {
                    Ok(body) => body,
                    Err(e) => format!("request to {} failed: {}", url, e),
                }
            }
            "post_json" => {
                let url = args["url"].as_str().unwrap_or_default();
                match self.post_json(url, &args["body"]).await {
                    Ok(out) => out,
                    Err(e) => format!("submission to {} failed: {}", url, e),
                }
            }
            other => format!("unknown tool: {}", other),
        }
    }

    async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Ok(format!("status {}: {}", status, clip(&body)));
        }
        Ok(clip(&body).to_string())
    }

    async fn post_json(&self, url: &str, body: &Value) -> anyhow::Result<String> {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Ok(format!("status {}: {}", status, clip(&text)))
    }
}

fn clip(s: &str) -> &str {
    match s.char_indices().nth(TOOL_OUTPUT_LIMIT) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl TaskRunner for ToolAgent {
    async fn run_task(&self, task: &str) -> Result<String, AgentError> {
        let tools = Self::tools();
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(task)];

        for turn in 0..self.max_turns {
            let reply = self
                .llm
                .chat(&messages, Some(&tools))
                .await
                .map_err(|e| AgentError::Model(e.to_string()))?;

            if !reply.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant_calls(
                    reply.content.clone(),
                    &reply.tool_calls,
                ));
                for call in &reply.tool_calls {
                    info!(turn, tool = %call.name, "executing tool call");
                    let output = self.dispatch(call).await;
                    debug!(turn, tool = %call.name, bytes = output.len(), "tool output");
                    messages.push(ChatMessage::tool_result(call.id.clone(), output));
                }
                continue;
            }

            if let Some(content) = reply.content {
                return Ok(content);
            }
            warn!(turn, "model returned neither text nor tool calls");
            return Err(AgentError::Incomplete(
                "model returned neither text nor tool calls".into(),
            ));
        }
        Err(AgentError::Incomplete(format!(
            "no final answer after {} turns",
            self.max_turns
        )))
    }
}
