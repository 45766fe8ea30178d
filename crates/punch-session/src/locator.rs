//! Multi-strategy discovery of the page's attendance control object.
//!
//! The portal exposes its API bridge (`callApi`) in several places
//! depending on build and page state. Discovery walks a fixed, ordered
//! candidate list; the first candidate exposing a callable `callApi` —
//! directly or through a nested `WeaTools` member — wins. Missing on every
//! strategy is an expected outcome, not an error.

use serde_json::Value;
use tracing::debug;

use punch_core::error::Result;

use crate::page::Page;

/// One discovery strategy: a label for logging and a page-context
/// expression that resolves the candidate object (or a falsy value).
struct Strategy {
    name: &'static str,
    resolver: &'static str,
}

/// Walks the sign button's framework-internal fiber chain upwards, looking
/// for a node whose props carry the sign action.
const FIBER_WALK: &str = r#"(() => {
  try {
    const btn = document.querySelector('button[name="signBtn"]');
    if (!btn) return null;
    const key = Object.keys(btn).find((k) =>
      k.startsWith('__reactInternalInstance') ||
      k.startsWith('__reactFiber') ||
      k.startsWith('_react'));
    if (!key) return null;
    let node = btn[key];
    for (let i = 0; i < 10 && node; i++) {
      if (node.memoizedProps && node.memoizedProps.sign) return node;
      node = node.return || node._owner;
    }
  } catch (e) {}
  return null;
})()"#;

/// Last resort: scan enumerable globals for anything carrying a usable
/// `WeaTools` member.
const GLOBAL_SCAN: &str = r#"(() => {
  for (const key in window) {
    try {
      const obj = window[key];
      if (obj && typeof obj === 'object' &&
          obj.WeaTools && typeof obj.WeaTools.callApi === 'function') {
        return obj.WeaTools;
      }
    } catch (e) {}
  }
  return null;
})()"#;

/// Candidate sources in priority order. Earlier entries always win;
/// recency and specificity never break ties.
const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "global",
        resolver: "window.WeaTools",
    },
    Strategy {
        name: "namespaced",
        resolver: "window.ecCom && window.ecCom.WeaTools",
    },
    Strategy {
        name: "namespace-root",
        resolver: "window.ecCom",
    },
    // The binding name (typo included) is what the portal actually ships.
    Strategy {
        name: "sign-plugin",
        resolver: "window.weaHrmSignPlguin",
    },
    Strategy {
        name: "fiber-walk",
        resolver: FIBER_WALK,
    },
    Strategy {
        name: "global-scan",
        resolver: GLOBAL_SCAN,
    },
];

fn probe_script(resolver: &str) -> String {
    format!(
        r#"(() => {{
  try {{
    const c = ({resolver});
    if (c && typeof c.callApi === 'function') return true;
    if (c && c.WeaTools && typeof c.WeaTools.callApi === 'function') return true;
  }} catch (e) {{}}
  return false;
}})()"#
    )
}

fn call_script(resolver: &str, path: &str, method: &str, body: &Value) -> Result<String> {
    let path = serde_json::to_string(path)?;
    let method = serde_json::to_string(method)?;
    let body = serde_json::to_string(body)?;
    Ok(format!(
        r#"(async () => {{
  const c = ({resolver});
  const target = (c && typeof c.callApi === 'function') ? c : c.WeaTools;
  return await target.callApi({path}, {method}, {body});
}})()"#
    ))
}

/// Capability reference to the discovered control object.
///
/// Holds the winning strategy's resolver rather than any page-side value:
/// the portal may replace the object on re-render, so every call
/// re-resolves in page context and handles are never cached across
/// attempts.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    strategy: &'static str,
    resolver: &'static str,
}

impl ControlHandle {
    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    /// Invoke the remote API through the control object.
    pub async fn call_api<P: Page + ?Sized>(
        &self,
        page: &P,
        path: &str,
        method: &str,
        body: &Value,
    ) -> Result<Value> {
        let script = call_script(self.resolver, path, method, body)?;
        page.evaluate(&script).await
    }
}

/// Ordered-fallback discovery over the page's globals.
pub struct TargetLocator;

impl TargetLocator {
    /// Probe each strategy in order; the first candidate passing the
    /// capability test wins. Returns `None` when every strategy misses —
    /// a recoverable outcome the caller may retry. Pure inspection; the
    /// page is never mutated.
    pub async fn locate<P: Page + ?Sized>(page: &P) -> Result<Option<ControlHandle>> {
        for strategy in STRATEGIES {
            let found = page.evaluate(&probe_script(strategy.resolver)).await?;
            if found.as_bool() == Some(true) {
                debug!(strategy = strategy.name, "control object found");
                return Ok(Some(ControlHandle {
                    strategy: strategy.name,
                    resolver: strategy.resolver,
                }));
            }
        }
        debug!("no discovery strategy matched");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::page::testing::FakePage;

    /// Probes embed the resolver in parentheses, so matching on
    /// `(<resolver>)` pins an exact strategy.
    fn probed(script: &str, resolver: &str) -> bool {
        script.contains(&format!("({resolver})"))
    }

    #[tokio::test]
    async fn earliest_matching_strategy_wins() {
        // Both the namespaced binding and the sign plugin are valid; the
        // namespaced one comes first in the candidate list.
        let page = FakePage::new(|script| {
            let hit = probed(script, "window.ecCom && window.ecCom.WeaTools")
                || probed(script, "window.weaHrmSignPlguin");
            Ok(Value::Bool(hit))
        });
        let handle = TargetLocator::locate(&page).await.unwrap().unwrap();
        assert_eq!(handle.strategy(), "namespaced");
    }

    #[tokio::test]
    async fn falls_through_to_the_global_scan() {
        let page = FakePage::new(|script| {
            Ok(Value::Bool(script.contains("for (const key in window)")))
        });
        let handle = TargetLocator::locate(&page).await.unwrap().unwrap();
        assert_eq!(handle.strategy(), "global-scan");
    }

    #[tokio::test]
    async fn missing_everywhere_is_not_an_error() {
        let page = FakePage::new(|_| Ok(Value::Bool(false)));
        assert!(TargetLocator::locate(&page).await.unwrap().is_none());
        // All six strategies were probed.
        assert_eq!(page.scripts.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn call_api_embeds_path_method_and_body() {
        let page = FakePage::new(|_| Ok(json!({"status": "1"})));
        let handle = ControlHandle {
            strategy: "global",
            resolver: "window.WeaTools",
        };
        let result = handle
            .call_api(&page, "/api/x", "POST", &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(result["status"], "1");

        let scripts = page.scripts.lock().unwrap();
        let script = scripts.last().unwrap();
        assert!(script.contains(r#"callApi("/api/x", "POST", {"a":1})"#));
        assert!(script.contains("(window.WeaTools)"));
    }
}
