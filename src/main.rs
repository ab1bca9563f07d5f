use anyhow::Result;
use quizrunner::agent::{ChromiumRenderer, TaskRunner, ToolAgent};
use quizrunner::browser::BrowserConfig;
use quizrunner::config::AppConfig;
use quizrunner::llm::LlmClient;
use quizrunner::server::{router, AppState};
use quizrunner::solver::Credentials;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;

    let llm = LlmClient::new(config.llm.clone());
    let renderer = Arc::new(ChromiumRenderer::new(BrowserConfig::default()));
    let runner: Arc<dyn TaskRunner> = Arc::new(ToolAgent::new(llm, renderer));
    let creds = Credentials { email: config.email.clone(), secret: config.secret.clone() };
    let app = router(AppState::new(creds, runner));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
