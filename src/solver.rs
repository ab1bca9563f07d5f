use nanoid::nanoid;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::agent::{AgentError, TaskRunner};

/// Upper bound on chain length; multi-step chains stay well under this.
pub const MAX_STEPS: usize = 12;
const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Only URLs belonging to the quiz service are worth following.
const DOMAIN_MARKER: &str = "tds-llm-analysis";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"']+"#).unwrap());

/// Identity embedded in every submission. The secret is the same value that
/// gates the inbound endpoint.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub email: String,
    pub secret: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// The agent reported no further URL to follow.
    Completed,
    /// Twelve steps ran without the chain ending on its own.
    BudgetExhausted,
    /// An error escaped the final retry attempt.
    Failed,
}

/// Terminal record of one quiz session. Never sent anywhere; the caller that
/// scheduled the session already got its acknowledgment, so this exists for
/// logs and inspection only.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub steps: usize,
    pub last_url: String,
}

/// Drives the visit / solve / submit / follow chain from `start_url` until
/// the agent stops reporting follow-up URLs, the step budget runs out, or an
/// iteration fails its final retry. Errors never propagate: this runs
/// detached from the request that scheduled it.
pub async fn solve_quiz_chain(
    runner: Arc<dyn TaskRunner>,
    creds: &Credentials,
    start_url: String,
) -> SessionReport {
    let session_id = nanoid!();
    let mut current_url = start_url;

    for step in 0..MAX_STEPS {
        info!(session = %session_id, step = step + 1, url = %current_url, "processing quiz page");
        let task = build_task_prompt(creds, &current_url);

        match run_task_with_retry(runner.as_ref(), &task).await {
            Ok(Some(result)) => {
                info!(session = %session_id, "agent result: {result}");
                if let Some(next) = next_url_from(&result, &current_url) {
                    current_url = next;
                    continue;
                }
                info!(session = %session_id, "quiz chain ended or completed");
                return SessionReport {
                    session_id,
                    status: SessionStatus::Completed,
                    steps: step + 1,
                    last_url: current_url,
                };
            }
            Ok(None) => {
                info!(session = %session_id, "no agent result after retries; quiz chain ended");
                return SessionReport {
                    session_id,
                    status: SessionStatus::Completed,
                    steps: step + 1,
                    last_url: current_url,
                };
            }
            Err(err) => {
                error!(session = %session_id, step = step + 1, "session aborted: {err}");
                return SessionReport {
                    session_id,
                    status: SessionStatus::Failed,
                    steps: step + 1,
                    last_url: current_url,
                };
            }
        }
    }

    warn!(session = %session_id, "step budget exhausted");
    SessionReport {
        session_id,
        status: SessionStatus::BudgetExhausted,
        steps: MAX_STEPS,
        last_url: current_url,
    }
}

/// Up to three attempts per step. Overload responses sleep and retry;
/// other failures are logged and only re-raised on the last attempt. If
/// every attempt was an overload, the step simply has no result and the
/// chain ends on its own.
async fn run_task_with_retry(
    runner: &dyn TaskRunner,
    task: &str,
) -> Result<Option<String>, AgentError> {
    for attempt in 0..MAX_ATTEMPTS {
        match runner.run_task(task).await {
            Ok(text) => return Ok(Some(text)),
            Err(err) if is_transient(&err) => {
                warn!(attempt = attempt + 1, "model overloaded, retrying: {err}");
                sleep(RETRY_DELAY).await;
            }
            Err(err) => {
                warn!(attempt = attempt + 1, "agent attempt failed: {err}");
                if attempt + 1 == MAX_ATTEMPTS {
                    return Err(err);
                }
            }
        }
    }
    Ok(None)
}

fn is_transient(err: &AgentError) -> bool {
    let text = err.to_string();
    text.contains("503") || text.contains("Overloaded")
}

/// Follow-up URL heuristic: the result must mention the quiz domain at all,
/// and the first URL-shaped substring that is neither the page we just
/// solved nor a submission endpoint wins.
fn next_url_from(result: &str, current_url: &str) -> Option<String> {
    if !result.contains("http") || !result.contains(DOMAIN_MARKER) {
        return None;
    }
    URL_PATTERN
        .find_iter(result)
        .map(|m| m.as_str())
        .find(|u| *u != current_url && !u.contains("submit"))
        .map(str::to_string)
}

fn build_task_prompt(creds: &Credentials, url: &str) -> String {
    format!(
        r#"You are an Expert Quiz Solver.

GOAL: Solve the quiz at {url}

---------------------------------------------------
PHASE 1: ANALYZE & SOLVE
1. READ the page with the `visit_page` tool.
2. DETERMINE the task type and SOLVE it:

   [TYPE A: SIMPLE INSTRUCTION]
   - Trigger: the page contains a JSON block with "answer": "...".
   - Action: extract that exact answer text (e.g. "anything you want", "42").

   [TYPE B: DATA ANALYSIS / FILES]
   - Trigger: mentions "CSV", "Excel", "PDF", or "Download".
   - Action: find the file link (href) in the HTML content, download it
     with `http_get`, and perform the requested math (sum, filter,
     regression, etc.).

   [TYPE C: SOURCING / API]
   - Trigger: "Fetch data from API", "Source from ...".
   - Action: call the API with `http_get` and parse the JSON.

   [TYPE D: VISUALIZATION]
   - Trigger: "Generate a chart", "Plot".
   - Action: calculate the requested data points or chart values.

   [TYPE E: SCRAPING]
   - Trigger: "Find the email", "Count items", "Secret code is ...".
   - Action: read the answer straight from the page content.

---------------------------------------------------
PHASE 2: SUBMISSION
1. FIND the submission URL (look for "Post your answer to ...").
2. PREPARE the JSON payload:
{{
    "email": "{email}",
    "secret": "{secret}",
    "url": "{url}",
    "answer": <THE_RESULT>
}}
3. SUBMIT it with the `post_json` tool.
4. CHECK THE RESPONSE: if it is {{ "correct": true, "url": "..." }}, reply
   with that new URL string as your final answer."#,
        url = url,
        email = creds.email,
        secret = creds.secret,
    )
}
