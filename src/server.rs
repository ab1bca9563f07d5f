use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::agent::TaskRunner;
use crate::solver::{solve_quiz_chain, Credentials, SessionReport};

/// Terminal session reports, keyed by session id. Sessions are
/// fire-and-forget toward the caller; this is where their outcomes land.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, SessionReport>>>,
}

impl SessionRegistry {
    pub fn record(&self, report: SessionReport) {
        self.inner
            .lock()
            .expect("session registry lock poisoned")
            .insert(report.session_id.clone(), report);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionReport> {
        self.inner
            .lock()
            .expect("session registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct AppState {
    creds: Credentials,
    runner: Arc<dyn TaskRunner>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(creds: Credentials, runner: Arc<dyn TaskRunner>) -> Self {
        Self { creds, runner, sessions: SessionRegistry::default() }
    }
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    email: String,
    secret: String,
    url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/run", post(run_handler)).with_state(state)
}

/// Accepts a quiz request, checks the shared secret, and schedules the
/// solving loop detached. The response never waits on the loop. Only the
/// secret gates access; the email rides along into submissions unchecked.
async fn run_handler(State(state): State<AppState>, Json(req): Json<RunRequest>) -> Response {
    if req.secret != state.creds.secret {
        warn!("rejected /run request: secret mismatch");
        return (StatusCode::FORBIDDEN, Json(json!({ "detail": "Invalid secret" }))).into_response();
    }

    info!(url = %req.url, email = %req.email, "starting quiz session");
    let runner = Arc::clone(&state.runner);
    let creds = state.creds.clone();
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let report = solve_quiz_chain(runner, &creds, req.url).await;
        info!(
            session = %report.session_id,
            status = ?report.status,
            steps = report.steps,
            "quiz session finished"
        );
        sessions.record(report);
    });

    (
        StatusCode::OK,
        Json(json!({ "message": "Universal Agent started", "status": "ok" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct CountingRunner {
        calls: AtomicUsize,
        park: bool,
    }

    #[async_trait]
    impl TaskRunner for CountingRunner {
        async fn run_task(&self, _task: &str) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.park {
                // Hold the session open so tests can observe the response
                // arriving while the loop is still running.
                std::future::pending::<()>().await;
            }
            Ok("done, nothing further".into())
        }
    }

    fn state_with(park: bool) -> (AppState, Arc<CountingRunner>) {
        let runner = Arc::new(CountingRunner { calls: AtomicUsize::new(0), park });
        let creds = Credentials { email: "a@b.com".into(), secret: "match".into() };
        (AppState::new(creds, runner.clone()), runner)
    }

    fn run_request(secret: &str) -> Request<Body> {
        let body = json!({
            "email": "a@b.com",
            "secret": secret,
            "url": "https://tds-llm-analysis.example/quiz/1"
        });
        Request::builder()
            .method("POST")
            .uri("/run")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected_and_no_loop_starts() {
        let (state, runner) = state_with(false);
        let resp = router(state.clone()).oneshot(run_request("wrong")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await, json!({ "detail": "Invalid secret" }));

        tokio::task::yield_now().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn valid_request_is_acknowledged_before_the_loop_finishes() {
        let (state, runner) = state_with(true);
        let resp = router(state).oneshot(run_request("match")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({ "message": "Universal Agent started", "status": "ok" })
        );
        // The parked runner never returns, yet the response already came back.
        tokio::task::yield_now().await;
        assert!(runner.calls.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn finished_sessions_land_in_the_registry() {
        let (state, _runner) = state_with(false);
        let resp = router(state.clone()).oneshot(run_request("match")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(1), async {
            while state.sessions.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session report was never recorded");
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn malformed_bodies_never_schedule_a_session() {
        let (state, runner) = state_with(false);
        let req = Request::builder()
            .method("POST")
            .uri("/run")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"email": "a@b.com"}"#))
            .unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());

        tokio::task::yield_now().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(state.sessions.is_empty());
    }
}
