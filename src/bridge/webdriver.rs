//! [`BrowserDriver`] over the W3C WebDriver HTTP protocol (chromedriver).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::driver::{BrowserDriver, Cookie, Key, KeyChord, Locator};
use crate::error::{Error, Result};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Resolves a serialized [`Locator`] (`arguments[0]`) in the current document.
const RESOLVER: &str = r#"
const norm = (s) => (s || '').trim().toLowerCase();
const visible = (el) => !!el && el.getClientRects().length > 0
  && getComputedStyle(el).visibility !== 'hidden';
const hasText = (el, text, exact) => exact
  ? norm(el.textContent) === norm(text)
  : norm(el.textContent).includes(norm(text));
const innermost = (els) => els.find((el) => !els.some((o) => o !== el && el.contains(o))) || null;
const resolve = (loc) => {
  switch (loc.kind) {
    case 'css': {
      const els = Array.from(document.querySelectorAll(loc.selector));
      return els.find(visible) || els[0] || null;
    }
    case 'text': {
      const scopes = loc.within ? Array.from(document.querySelectorAll(loc.within)) : [document];
      const els = scopes
        .flatMap((s) => Array.from(s.querySelectorAll(loc.tag)))
        .filter((el) => hasText(el, loc.text, loc.exact));
      return innermost(els.filter(visible)) || innermost(els);
    }
    case 'entryButton': {
      for (const entry of document.querySelectorAll(loc.entries)) {
        if (!hasText(entry, loc.entryText, false)) continue;
        const btn = Array.from(entry.querySelectorAll('button'))
          .find((b) => hasText(b, loc.buttonText, true));
        if (btn) return btn;
      }
      return null;
    }
    case 'anyOf': {
      for (const inner of loc.locators) {
        const el = resolve(inner);
        if (visible(el)) return el;
      }
      return null;
    }
  }
  return null;
};
const el = resolve(arguments[0]);
"#;

fn script(tail: &str) -> String {
    format!("{RESOLVER}{tail}")
}

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run without a window.
    pub headless: bool,
    /// Viewport size.
    pub window: (u32, u32),
    /// Page load deadline.
    pub page_load_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window: (1400, 900),
            page_load_timeout: Duration::from_secs(30),
        }
    }
}

impl BrowserOptions {
    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-web-security".to_string(),
            "--disable-features=IsolateOrigins,site-per-process".to_string(),
            format!("--window-size={},{}", self.window.0, self.window.1),
        ];
        if self.headless {
            args.insert(0, "--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "eager",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

/// A WebDriver session.
pub struct WebDriverSession {
    http: reqwest::Client,
    base: String,
    session_id: String,
    /// Held across frame switches so top-level commands never run inside a frame.
    context: Mutex<()>,
}

impl WebDriverSession {
    /// Start a new browser session at `webdriver_url`.
    pub async fn start(webdriver_url: &str, options: &BrowserOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.page_load_timeout + Duration::from_secs(30))
            .build()?;
        let base = webdriver_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{base}/session"))
            .json(&options.capabilities())
            .send()
            .await?;
        let value = unwrap_value(response).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Automation("WebDriver returned no session id".into()))?
            .to_string();
        tracing::info!(session = %session_id, headless = options.headless, "Browser session started");

        let session = Self {
            http,
            base,
            session_id,
            context: Mutex::new(()),
        };
        session
            .command(
                Method::POST,
                "timeouts",
                Some(json!({ "pageLoad": options.page_load_timeout.as_millis() as u64 })),
            )
            .await?;
        Ok(session)
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = if path.is_empty() {
            format!("{}/session/{}", self.base, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.base, self.session_id, path)
        };
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        unwrap_value(request.send().await?).await
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn element(&self, locator: &Locator) -> Result<Option<String>> {
        let value = self
            .execute(&script("return el;"), vec![serde_json::to_value(locator)?])
            .await?;
        Ok(value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn require(&self, locator: &Locator) -> Result<String> {
        self.element(locator)
            .await?
            .ok_or_else(|| Error::Automation(format!("element not found: {locator}")))
    }

    async fn visible_here(&self, locator: &Locator) -> Result<bool> {
        let value = self
            .execute(
                &script("return !!el && visible(el);"),
                vec![serde_json::to_value(locator)?],
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click_here(&self, locator: &Locator) -> Result<()> {
        let id = self.require(locator).await?;
        self.command(Method::POST, &format!("element/{id}/click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn switch_to_frame(&self, frame: Option<usize>) -> Result<()> {
        self.command(Method::POST, "frame", Some(json!({ "id": frame })))
            .await?;
        Ok(())
    }

    /// Run `op` inside child frame `frame`, then return to the top document.
    async fn in_frame<T, F, Fut>(&self, frame: usize, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let _guard = self.context.lock().await;
        self.switch_to_frame(Some(frame)).await?;
        let outcome = op().await;
        if let Err(e) = self.switch_to_frame(None).await {
            tracing::warn!("Cannot return to top-level document: {}", e);
        }
        outcome
    }
}

/// Extract `value` from a WebDriver response, mapping protocol errors.
async fn unwrap_value(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let mut body: Value = response.json().await?;
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    let kind = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    Err(Error::Automation(format!("WebDriver {kind}: {message}")))
}

fn key_value(key: Key) -> String {
    match key {
        Key::Control => "\u{E009}".into(),
        Key::Alt => "\u{E00A}".into(),
        Key::Escape => "\u{E00C}".into(),
        Key::Char(c) => c.to_string(),
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        let _guard = self.context.lock().await;
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let _guard = self.context.lock().await;
        self.command(Method::POST, "refresh", Some(json!({}))).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let _guard = self.context.lock().await;
        let value = self.command(Method::GET, "url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        let _guard = self.context.lock().await;
        self.visible_here(locator).await
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let _guard = self.context.lock().await;
        self.click_here(locator).await
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let _guard = self.context.lock().await;
        let id = self.require(locator).await?;
        self.command(Method::POST, &format!("element/{id}/clear"), Some(json!({})))
            .await?;
        self.command(
            Method::POST,
            &format!("element/{id}/value"),
            Some(json!({ "text": value })),
        )
        .await?;
        Ok(())
    }

    async fn press(&self, chord: &KeyChord) -> Result<()> {
        let _guard = self.context.lock().await;
        let mut actions: Vec<Value> = chord
            .0
            .iter()
            .map(|k| json!({ "type": "keyDown", "value": key_value(*k) }))
            .collect();
        actions.extend(
            chord
                .0
                .iter()
                .rev()
                .map(|k| json!({ "type": "keyUp", "value": key_value(*k) })),
        );
        self.command(
            Method::POST,
            "actions",
            Some(json!({
                "actions": [{ "type": "key", "id": "keyboard", "actions": actions }]
            })),
        )
        .await?;
        self.command(Method::DELETE, "actions", None).await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let _guard = self.context.lock().await;
        self.execute(script, Vec::new()).await
    }

    async fn frame_count(&self) -> Result<usize> {
        let _guard = self.context.lock().await;
        let value = self.execute("return window.frames.length;", Vec::new()).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn frame_click(&self, frame: usize, locator: &Locator) -> Result<bool> {
        self.in_frame(frame, || async {
            if !self.visible_here(locator).await? {
                return Ok(false);
            }
            self.click_here(locator).await?;
            Ok(true)
        })
        .await
    }

    async fn frame_text(&self, frame: usize, locator: &Locator) -> Result<Option<String>> {
        let args = vec![serde_json::to_value(locator)?];
        self.in_frame(frame, || async {
            let value = self
                .execute(&script("return el ? el.textContent : null;"), args)
                .await?;
            Ok(value.as_str().map(str::to_string))
        })
        .await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let _guard = self.context.lock().await;
        let value = self.command(Method::GET, "cookie", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let _guard = self.context.lock().await;
        let value = self.command(Method::GET, "screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| Error::Automation("screenshot is not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Automation(format!("invalid screenshot encoding: {e}")))
    }

    async fn page_source(&self) -> Result<String> {
        let _guard = self.context.lock().await;
        let value = self.command(Method::GET, "source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_alive(&self) -> bool {
        self.command(Method::GET, "window", None).await.is_ok()
    }

    async fn close(&self) {
        if let Err(e) = self.command(Method::DELETE, "", None).await {
            tracing::debug!("Closing browser session failed: {}", e);
        }
    }
}
