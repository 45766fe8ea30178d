//! Concrete browser driver. Everything above this module talks to the
//! [`Page`] trait; only the session setup knows about CDP.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page as CdpPage;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use punch_core::config::BrowserConfig;
use punch_core::error::{PunchError, Result};

use crate::page::Page;

/// A running browser process plus its CDP event pump.
pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    options: BrowserConfig,
}

impl ChromeSession {
    pub async fn launch(options: &BrowserConfig) -> Result<Self> {
        let mut builder = CdpBrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if options.no_sandbox {
            builder = builder.args(["--no-sandbox", "--disable-setuid-sandbox"]);
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(PunchError::Session)?;

        let (browser, mut events) = Browser::launch(config).await.map_err(session_err)?;
        // The event pump must run for the lifetime of the browser or every
        // CDP command hangs.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        info!(headless = options.headless, "browser launched");

        Ok(Self {
            browser,
            handler,
            options: options.clone(),
        })
    }

    /// Open the portal page, retrying navigation up to the configured
    /// bound at a fixed delay.
    pub async fn open(&self, url: &str) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(session_err)?;

        let retries = self.options.nav_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(attempt, max = retries, %url, "loading target page");
            match self.try_goto(&page, url).await {
                Ok(()) => {
                    info!("target page loaded");
                    return Ok(ChromePage { inner: page });
                }
                Err(e) if attempt < retries => {
                    warn!(attempt, "page load failed: {e} — retrying");
                    tokio::time::sleep(Duration::from_secs(self.options.nav_retry_delay_secs))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_goto(&self, page: &CdpPage, url: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.options.nav_timeout_secs.max(1));
        let navigate = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, navigate).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(session_err(e)),
            Err(_) => Err(PunchError::Session(format!(
                "navigation timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Close the browser and reap the process.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// A live portal page.
pub struct ChromePage {
    inner: CdpPage,
}

impl ChromePage {
    /// Document title, for the attempt report.
    pub async fn title(&self) -> Option<String> {
        self.inner.get_title().await.ok().flatten()
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn evaluate(&self, script: &str) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(PunchError::Session)?;
        let result = self.inner.evaluate(params).await.map_err(session_err)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }
}

fn session_err(err: chromiumoxide::error::CdpError) -> PunchError {
    PunchError::Session(err.to_string())
}
