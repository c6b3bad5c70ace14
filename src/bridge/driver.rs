//! Browser automation seam.
//!
//! The connect sequence only needs a handful of primitives, so it is written
//! against [`BrowserDriver`] rather than a concrete automation protocol.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{Error, Result};

const POLL: Duration = Duration::from_millis(250);

/// How to find an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Locator {
    /// CSS selector list; the first visible match wins.
    Css {
        /// Selector.
        selector: String,
    },
    /// Innermost `tag` element whose text matches, case-insensitively.
    Text {
        /// Restrict the search to descendants of this selector.
        within: Option<String>,
        /// Tag name or `*`.
        tag: String,
        /// Text to look for.
        text: String,
        /// Whole trimmed text must match rather than contain.
        exact: bool,
    },
    /// A button inside the entry whose text contains `entry_text`.
    EntryButton {
        /// Selector list for entries.
        entries: String,
        /// Text identifying the entry.
        entry_text: String,
        /// Button label.
        button_text: String,
    },
    /// First locator yielding a visible element.
    AnyOf {
        /// Candidates in priority order.
        locators: Vec<Locator>,
    },
}

impl Locator {
    /// CSS locator.
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css {
            selector: selector.into(),
        }
    }

    /// Button with exactly this label, optionally inside `within`.
    pub fn button(within: Option<&str>, label: impl Into<String>) -> Self {
        Locator::Text {
            within: within.map(str::to_string),
            tag: "button".into(),
            text: label.into(),
            exact: true,
        }
    }

    /// Any element containing `text` inside `within`.
    pub fn containing(within: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::Text {
            within: Some(within.into()),
            tag: "*".into(),
            text: text.into(),
            exact: false,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css { selector } => write!(f, "`{selector}`"),
            Locator::Text { within, tag, text, .. } => match within {
                Some(scope) => write!(f, "{tag} \"{text}\" in `{scope}`"),
                None => write!(f, "{tag} \"{text}\""),
            },
            Locator::EntryButton {
                entry_text,
                button_text,
                ..
            } => write!(f, "button \"{button_text}\" of entry \"{entry_text}\""),
            Locator::AnyOf { locators } => {
                let parts: Vec<String> = locators.iter().map(ToString::to_string).collect();
                write!(f, "any of [{}]", parts.join(", "))
            }
        }
    }
}

/// A key, for chords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Control modifier.
    Control,
    /// Alt modifier.
    Alt,
    /// Escape.
    Escape,
    /// A printable character.
    Char(char),
}

/// Keys pressed together, released in reverse order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord(pub Vec<Key>);

impl KeyChord {
    /// Ctrl+Alt+P: toggles the plugin manager.
    pub fn plugin_manager() -> Self {
        KeyChord(vec![Key::Control, Key::Alt, Key::Char('p')])
    }

    /// Escape.
    pub fn escape() -> Self {
        KeyChord(vec![Key::Escape])
    }
}

/// A browser cookie.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Cookie {
    /// Name.
    pub name: String,
    /// Value.
    pub value: String,
}

/// `Cookie` request header value for a cookie jar.
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Primitives the connect sequence needs from a browser.
///
/// Element operations address the top-level document; the `frame_*` methods
/// address the child frame with the given index.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load a URL.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Reload the current page.
    async fn reload(&self) -> Result<()>;

    /// URL of the top-level document.
    async fn current_url(&self) -> Result<String>;

    /// Whether the locator resolves to a visible element.
    async fn is_visible(&self, locator: &Locator) -> Result<bool>;

    /// Click the element.
    async fn click(&self, locator: &Locator) -> Result<()>;

    /// Replace the value of an input.
    async fn fill(&self, locator: &Locator, value: &str) -> Result<()>;

    /// Press a key chord on the focused element.
    async fn press(&self, chord: &KeyChord) -> Result<()>;

    /// Evaluate a script in the top-level document.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Number of child frames of the top-level document.
    async fn frame_count(&self) -> Result<usize>;

    /// Click the element in a frame if it is visible; `false` when absent.
    async fn frame_click(&self, frame: usize, locator: &Locator) -> Result<bool>;

    /// Text content of the element in a frame.
    async fn frame_text(&self, frame: usize, locator: &Locator) -> Result<Option<String>>;

    /// Cookies of the top-level document.
    async fn cookies(&self) -> Result<Vec<Cookie>>;

    /// PNG screenshot.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Serialized DOM.
    async fn page_source(&self) -> Result<String>;

    /// Whether the browser still answers.
    async fn is_alive(&self) -> bool;

    /// End the browser session. Never fails.
    async fn close(&self);

    /// Poll until the locator is visible.
    async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_visible(locator).await.unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() + POLL > deadline {
                return Err(Error::Timeout {
                    operation: format!("waiting for {locator}"),
                    ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }

    /// Poll until the current URL satisfies `accept`.
    async fn wait_url(
        &self,
        accept: &(dyn for<'u> Fn(&'u str) -> bool + Sync),
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(url) = self.current_url().await {
                if accept(&url) {
                    return Ok(());
                }
            }
            if Instant::now() + POLL > deadline {
                return Err(Error::Timeout {
                    operation: "waiting for navigation".into(),
                    ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }
}
