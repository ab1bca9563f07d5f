pub mod agent;
pub mod browser;
pub mod config;
pub mod llm;
pub mod server;
pub mod solver;

pub use agent::{AgentError, ChromiumRenderer, PageRenderer, TaskRunner, ToolAgent};
pub use browser::{Browser, BrowserConfig};
pub use config::{AppConfig, LlmConfig};
pub use llm::LlmClient;
pub use server::{router, AppState, SessionRegistry};
pub use solver::{solve_quiz_chain, Credentials, SessionReport, SessionStatus};
