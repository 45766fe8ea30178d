use async_trait::async_trait;
use serde_json::Value;

use punch_core::error::Result;

/// The one capability the discovery, client and pipeline layers need from
/// the host page: evaluate a script in page context and get its
/// JSON-serialised result back. Promises are awaited before returning.
#[async_trait]
pub trait Page: Send + Sync {
    async fn evaluate(&self, script: &str) -> Result<Value>;
}
