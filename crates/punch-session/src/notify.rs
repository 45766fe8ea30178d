//! User-facing result notification.
//!
//! The pipeline reports the remote `message` through an injected
//! [`Notifier`]; the page-backed implementation renders a transient
//! toast on the portal page itself, auto-dismissed after a fixed delay.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::page::Page;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, page: &dyn Page, message: &str);
}

/// Renders a fixed-position toast on the host page.
pub struct PageNotifier {
    pub dismiss_secs: u64,
}

impl Default for PageNotifier {
    fn default() -> Self {
        Self { dismiss_secs: 5 }
    }
}

#[async_trait]
impl Notifier for PageNotifier {
    async fn notify(&self, page: &dyn Page, message: &str) {
        match toast_script(message, self.dismiss_secs) {
            Ok(script) => {
                if let Err(e) = page.evaluate(&script).await {
                    warn!("toast notification failed: {e}");
                }
            }
            Err(e) => warn!("toast script build failed: {e}"),
        }
    }
}

/// Logs the message instead of touching the page.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, _page: &dyn Page, message: &str) {
        info!(%message, "punch result");
    }
}

fn toast_script(message: &str, dismiss_secs: u64) -> punch_core::error::Result<String> {
    let message = serde_json::to_string(message)?;
    let dismiss_ms = dismiss_secs.saturating_mul(1000);
    Ok(format!(
        r#"(() => {{
  const existing = document.getElementById('punch-toast');
  if (existing) existing.remove();
  const toast = document.createElement('div');
  toast.id = 'punch-toast';
  toast.textContent = {message};
  toast.style.cssText = 'position:fixed;top:20px;right:20px;z-index:999999;' +
    'max-width:400px;padding:16px 20px;border-radius:8px;color:#fff;' +
    'background:linear-gradient(135deg,#667eea 0%,#764ba2 100%);' +
    'box-shadow:0 4px 20px rgba(0,0,0,0.15);font-size:14px;line-height:1.5;' +
    'word-break:break-word;';
  const attach = () => {{
    if (document.body) {{
      document.body.appendChild(toast);
      setTimeout(() => toast.remove(), {dismiss_ms});
    }} else {{
      setTimeout(attach, 100);
    }}
  }};
  attach();
}})()"#
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::page::testing::FakePage;

    #[tokio::test]
    async fn toast_embeds_message_and_dismiss_delay() {
        let page = FakePage::new(|_| Ok(Value::Null));
        let notifier = PageNotifier::default();
        notifier.notify(&page, "打卡成功").await;

        let scripts = page.scripts.lock().unwrap();
        let script = scripts.last().unwrap();
        assert!(script.contains("打卡成功"));
        assert!(script.contains("5000"));
        assert!(script.contains("punch-toast"));
    }

    #[tokio::test]
    async fn log_notifier_leaves_the_page_alone() {
        let page = FakePage::new(|_| Ok(json!(null)));
        LogNotifier.notify(&page, "msg").await;
        assert!(page.scripts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_toast_is_swallowed() {
        let page =
            FakePage::new(|_| Err(punch_core::error::PunchError::Session("page gone".into())));
        // Must not propagate — notification is best-effort.
        PageNotifier::default().notify(&page, "msg").await;
        assert_eq!(page.script_count("punch-toast"), 1);
    }
}
