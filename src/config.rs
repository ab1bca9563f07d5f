use anyhow::{bail, Result};
use std::env;

/// Chat backend settings. Defaults target Gemini's OpenAI-compatible
/// endpoint with a fast, low-temperature model.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta/openai".into()),
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-lite".into()),
            temperature: 0.1,
        }
    }
}

/// Process-wide configuration, read once at startup and passed down
/// explicitly. The secret gates inbound requests and is embedded in every
/// outbound submission, so both sides must see the same value.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub email: String,
    pub secret: String,
    pub port: u16,
    pub llm: LlmConfig,
}

const DEFAULT_EMAIL: &str = "23f3004176@ds.study.iitm.ac.in";
const DEFAULT_PORT: u16 = 7860;

impl AppConfig {
    /// Reads configuration from the environment. A missing `STUDENT_SECRET`
    /// is fatal; the model API key is left for the backend to reject.
    pub fn from_env() -> Result<Self> {
        let email = env::var("STUDENT_EMAIL").unwrap_or_else(|_| DEFAULT_EMAIL.into());
        let secret = match env::var("STUDENT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => bail!("CRITICAL: STUDENT_SECRET is missing. Set it in the environment."),
        };
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Ok(Self {
            email,
            secret,
            port,
            llm: LlmConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_defaults_point_at_gemini() {
        let cfg = LlmConfig {
            api_key: "k".into(),
            ..Default::default()
        };
        assert!(cfg.api_base.contains("openai"));
        assert_eq!(cfg.temperature, 0.1);
    }
}
