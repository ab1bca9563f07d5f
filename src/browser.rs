use anyhow::Result;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

/// How much raw markup is handed to the model alongside the visible text.
const MARKUP_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None }
    }
}

pub struct Browser {
    page: Page,
    browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Use a unique user data dir per run to avoid ProcessSingleton profile lock
        // conflicts when several renders overlap or restart rapidly.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("quizrunner-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder.user_data_dir(profile_dir.clone());
        builder = builder
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        // Non-zero viewport so script-generated layouts render normally
        let _ = page
            .execute(
                SetDeviceMetricsOverrideParams::builder()
                    .width(1280)
                    .height(800)
                    .device_scale_factor(1.0)
                    .mobile(false)
                    .build()
                    .unwrap(),
            )
            .await;
        Ok(Self { page, browser })
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// Visible text plus the leading slice of raw markup, under labeled
    /// sections. The markup slice keeps link hrefs reachable even when the
    /// rendered text omits them.
    pub async fn render_bundle(&self, url: &str) -> Result<String> {
        self.goto(url).await?;
        self.wait_for_stable().await?;
        let text: String = self
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await?
            .into_value()
            .unwrap_or_default();
        let html = self.page.content().await?;
        Ok(format!(
            "--- TEXT CONTENT ---\n{}\n\n--- HTML CONTENT ---\n{}",
            text,
            truncate_chars(&html, MARKUP_LIMIT)
        ))
    }

    pub async fn wait_for_stable(&self) -> Result<()> {
        sleep(Duration::from_millis(400)).await;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "héllo wörld";
        assert_eq!(truncate_chars(s, 3), "hél");
        assert_eq!(truncate_chars(s, 100), s);
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let s = "é".repeat(20);
        assert_eq!(truncate_chars(&s, 10).chars().count(), 10);
    }
}
