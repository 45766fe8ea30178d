//! Portal login flow.
//!
//! A visible login form on the page *is* the unauthenticated-state
//! signal. The form itself varies between portal builds, so every field
//! is discovered through an ordered selector fallback list, with a
//! text-content fallback for the submit button.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use punch_core::config::LoginConfig;
use punch_core::error::{PunchError, Result};

use crate::page::Page;

const USERNAME_SELECTORS: &[&str] = &[
    "#loginid",
    r#"input[name="username"]"#,
    r#"input[name="user"]"#,
    r#"input[name="account"]"#,
    r#"input[type="text"]"#,
    r#"input[placeholder*="账号"]"#,
    r#"input[placeholder*="用户名"]"#,
    r#"input[id*="user"]"#,
    r#"input[id*="account"]"#,
    "#username",
    "#user",
    "#account",
];

const PASSWORD_SELECTORS: &[&str] = &[
    "#userpassword",
    r#"input[name="password"]"#,
    r#"input[type="password"]"#,
    r#"input[placeholder*="密码"]"#,
    r#"input[id*="password"]"#,
    "#password",
    "#pwd",
];

const BUTTON_SELECTORS: &[&str] = &[
    "#submit",
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
    "button.login",
    "button.btn-login",
    ".login-btn",
    "#loginBtn",
    "#login",
];

/// Texts the portal uses on its submit button across skins.
const BUTTON_TEXTS: &[&str] = &["登录", "登陆", "Login", "LOGIN", "登 录"];

#[derive(Debug, Deserialize)]
struct LoginScriptResult {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    username_selector: Option<String>,
    #[serde(default)]
    password_selector: Option<String>,
    #[serde(default)]
    button_selector: Option<String>,
}

pub struct LoginFlow;

impl LoginFlow {
    /// Whether the page is currently showing the login form.
    pub async fn login_required<P: Page + ?Sized>(page: &P) -> Result<bool> {
        let script = "(() => { \
             const el = document.getElementById('submit'); \
             return !!(el && el.offsetParent !== null); \
         })()";
        let value = page.evaluate(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Fill and submit the login form. A missing field is an
    /// authentication failure carrying the script's own description.
    pub async fn login<P: Page + ?Sized>(page: &P, credentials: &LoginConfig) -> Result<()> {
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            warn!("login form present but no credentials configured");
            return Err(PunchError::Auth(
                "login required but no credentials configured".to_string(),
            ));
        };

        let script = login_script(username, password)?;
        let raw = page.evaluate(&script).await?;
        let result: LoginScriptResult = serde_json::from_value(raw)
            .map_err(|e| PunchError::Auth(format!("malformed login result: {e}")))?;

        if result.success {
            info!(
                username_selector = result.username_selector.as_deref().unwrap_or("?"),
                password_selector = result.password_selector.as_deref().unwrap_or("?"),
                button_selector = result.button_selector.as_deref().unwrap_or("?"),
                "login form submitted"
            );
            Ok(())
        } else {
            Err(PunchError::Auth(
                result
                    .error
                    .unwrap_or_else(|| "login form fields not found".to_string()),
            ))
        }
    }
}

fn login_script(username: &str, password: &str) -> Result<String> {
    let username = serde_json::to_string(username)?;
    let password = serde_json::to_string(password)?;
    let username_selectors = serde_json::to_string(USERNAME_SELECTORS)?;
    let password_selectors = serde_json::to_string(PASSWORD_SELECTORS)?;
    let button_selectors = serde_json::to_string(BUTTON_SELECTORS)?;
    let button_texts = serde_json::to_string(BUTTON_TEXTS)?;

    Ok(format!(
        r#"(async () => {{
  const usernameSelectors = {username_selectors};
  const passwordSelectors = {password_selectors};
  const buttonSelectors = {button_selectors};
  const buttonTexts = {button_texts};
  const username = {username};
  const password = {password};

  const firstVisible = (selectors) => {{
    for (const selector of selectors) {{
      try {{
        const el = document.querySelector(selector);
        if (el && el.offsetParent !== null) return [el, selector];
      }} catch (e) {{}}
    }}
    return [null, null];
  }};
  const byText = () => {{
    const buttons = document.querySelectorAll('button, input[type="submit"], a.btn, .btn');
    for (const button of buttons) {{
      const text = button.textContent || button.value || button.innerText || '';
      if (buttonTexts.some((t) => text.includes(t))) return button;
    }}
    return null;
  }};
  const fill = (input, value) => {{
    input.focus();
    input.value = value;
    input.dispatchEvent(new Event('input', {{ bubbles: true }}));
    input.dispatchEvent(new Event('change', {{ bubbles: true }}));
    input.dispatchEvent(new KeyboardEvent('keydown', {{ bubbles: true }}));
    input.dispatchEvent(new KeyboardEvent('keyup', {{ bubbles: true }}));
  }};

  const [userInput, usernameSelector] = firstVisible(usernameSelectors);
  const [passInput, passwordSelector] = firstVisible(passwordSelectors);
  let [button, buttonSelector] = firstVisible(buttonSelectors);
  if (!button) {{
    button = byText();
    if (button) buttonSelector = 'text-content';
  }}

  if (!userInput) return {{ success: false, error: 'username input not found' }};
  if (!passInput) return {{ success: false, error: 'password input not found' }};
  if (!button) return {{ success: false, error: 'login button not found' }};

  fill(userInput, username);
  fill(passInput, password);
  await new Promise((resolve) => setTimeout(resolve, 2000));
  button.click();
  return {{
    success: true,
    username_selector: usernameSelector,
    password_selector: passwordSelector,
    button_selector: buttonSelector
  }};
}})()"#
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::page::testing::FakePage;

    fn credentials() -> LoginConfig {
        LoginConfig {
            username: Some("user-1".to_string()),
            password: Some("s3cret".to_string()),
        }
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_touching_the_page() {
        let page = FakePage::new(|_| panic!("page must not be evaluated"));
        let err = LoginFlow::login(&page, &LoginConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PunchError::Auth(_)));
    }

    #[tokio::test]
    async fn successful_submit_reports_ok() {
        let page = FakePage::new(|_| {
            Ok(json!({
                "success": true,
                "username_selector": "#loginid",
                "password_selector": "#userpassword",
                "button_selector": "#submit"
            }))
        });
        LoginFlow::login(&page, &credentials()).await.unwrap();

        let scripts = page.scripts.lock().unwrap();
        let script = scripts.last().unwrap();
        // Credentials and fallback lists are embedded as JSON literals.
        assert!(script.contains(r#""user-1""#));
        assert!(script.contains("#loginid"));
        assert!(script.contains("#userpassword"));
    }

    #[tokio::test]
    async fn missing_field_is_an_auth_error_with_the_script_reason() {
        let page =
            FakePage::new(|_| Ok(json!({"success": false, "error": "password input not found"})));
        let err = LoginFlow::login(&page, &credentials()).await.unwrap_err();
        assert!(matches!(err, PunchError::Auth(ref m) if m == "password input not found"));
    }

    #[tokio::test]
    async fn login_required_mirrors_form_visibility() {
        let page = FakePage::new(|_| Ok(json!(true)));
        assert!(LoginFlow::login_required(&page).await.unwrap());
        let page = FakePage::new(|_| Ok(json!(false)));
        assert!(!LoginFlow::login_required(&page).await.unwrap());
    }
}
