//! WebDriver-backed browser
//!
//! Talks W3C WebDriver to a running chromedriver (or any compatible server)
//! through `fantoccini`. Every page is its own WebDriver session, so
//! concurrent attempts never fight over window focus.
//!
//! The session blob uses the storage-state layout
//! `{"cookies": [{name, value, domain, path, expires, httpOnly, secure, sameSite}], "origins": [...]}`.
//! Cookies are injected after visiting the editor origin (WebDriver only
//! accepts cookies for the current domain) and read back when a page closes.
//! `sameSite` is written on export but left to the browser's default on
//! import.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fantoccini::cookies::Cookie;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{json, Map, Value};

use super::{Browser, Candidates, Page, Selector};
use crate::config::WebDriverConfig;
use crate::error::UiError;
use crate::session::SessionState;

const ENTER_KEY: &str = "\u{E007}";

const RESOURCE_PROBE: &str = "return [document.readyState, \
     performance.getEntriesByType('resource').length];";

/// Browser backed by a WebDriver server
pub struct WebDriverBrowser {
    settings: WebDriverConfig,
    /// Origin that session cookies belong to
    origin: String,
    session: Option<SessionState>,
    /// Cookies observed by the most recently closed page
    snapshot: Arc<Mutex<Option<Vec<Value>>>>,
}

impl WebDriverBrowser {
    /// `session` is `None` for a fresh, unauthenticated browser (login)
    pub fn new(settings: WebDriverConfig, origin: String, session: Option<SessionState>) -> Self {
        Self {
            settings,
            origin,
            session,
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a page without erasing its concrete type
    ///
    /// Session cookies are restored by the page's first navigation, so the
    /// caller's navigation timeout and retry cover the restore too.
    pub async fn open(&self) -> Result<WebDriverPage, UiError> {
        let client = ClientBuilder::native()
            .capabilities(capabilities(&self.settings))
            .connect(&self.settings.url)
            .await
            .map_err(|e| {
                UiError::Driver(format!(
                    "Cannot start a browser session at {}: {}",
                    self.settings.url, e
                ))
            })?;

        let pending = self
            .session
            .as_ref()
            .map(|session| (self.origin.clone(), session.clone()));

        Ok(WebDriverPage {
            client,
            snapshot: Arc::clone(&self.snapshot),
            resources: Mutex::new(None),
            pending_restore: Mutex::new(pending),
        })
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn open_page(&self) -> Result<Box<dyn Page>, UiError> {
        Ok(Box::new(self.open().await?))
    }

    async fn refreshed_session(&self) -> Option<SessionState> {
        let cookies = self.snapshot.lock().ok()?.clone()?;
        let origins = self
            .session
            .as_ref()
            .and_then(|s| s.as_value().get("origins").cloned())
            .unwrap_or_else(|| json!([]));
        Some(SessionState::new(json!({ "cookies": cookies, "origins": origins })))
    }
}

/// One WebDriver session showing one tab
pub struct WebDriverPage {
    client: Client,
    snapshot: Arc<Mutex<Option<Vec<Value>>>>,
    /// Resource count seen by the previous idle probe
    resources: Mutex<Option<u64>>,
    /// Origin and session still to restore before the first navigation
    pending_restore: Mutex<Option<(String, SessionState)>>,
}

impl WebDriverPage {
    /// Restore the session once, ahead of the first real navigation
    ///
    /// The pending restore is cleared only after it succeeded, so a failed
    /// or cancelled restore runs again on the next `goto`.
    async fn restore_pending(&self) -> Result<(), UiError> {
        let pending = self
            .pending_restore
            .lock()
            .map_err(|_| UiError::Driver("session restore state poisoned".to_string()))?
            .clone();

        if let Some((origin, session)) = pending {
            self.restore(&origin, &session).await?;
            if let Ok(mut slot) = self.pending_restore.lock() {
                *slot = None;
            }
        }
        Ok(())
    }

    async fn restore(&self, origin: &str, session: &SessionState) -> Result<(), UiError> {
        self.client
            .goto(origin)
            .await
            .map_err(|e| UiError::Navigation(format!("{}: {}", origin, e)))?;

        let cookies = cookies_from_session(session);
        tracing::debug!("Restoring {} session cookies for {}", cookies.len(), origin);
        for cookie in cookies {
            let name = cookie.name().to_string();
            if let Err(e) = self.client.add_cookie(cookie).await {
                // Cookies of third-party domains are rejected here
                tracing::trace!("Skipped cookie {}: {}", name, e);
            }
        }
        Ok(())
    }

    /// Current cookies in session-blob form
    pub async fn cookies(&self) -> Result<Vec<Value>, UiError> {
        let cookies = self
            .client
            .get_all_cookies()
            .await
            .map_err(|e| UiError::Driver(e.to_string()))?;
        Ok(cookies.iter().map(cookie_to_json).collect())
    }

    /// Remember the current cookies as the browser's latest snapshot
    pub async fn snapshot_cookies(&self) -> Result<(), UiError> {
        let cookies = self.cookies().await?;
        if let Ok(mut slot) = self.snapshot.lock() {
            *slot = Some(cookies);
        }
        Ok(())
    }

    /// Whether the user still has the window open
    pub async fn is_window_open(&self) -> bool {
        matches!(self.client.windows().await, Ok(handles) if !handles.is_empty())
    }

    /// All elements matched by the first candidate that matches anything
    async fn resolve(&self, target: &Candidates) -> Result<Vec<Element>, UiError> {
        for selector in target.iter() {
            let locator = match selector {
                Selector::Css(css) => Locator::Css(css),
                Selector::XPath(xpath) => Locator::XPath(xpath),
            };
            let found = self
                .client
                .find_all(locator)
                .await
                .map_err(|e| UiError::Driver(e.to_string()))?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    async fn first(&self, target: &Candidates) -> Result<Element, UiError> {
        self.resolve(target)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| UiError::ElementNotFound(target.to_string()))
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), UiError> {
        self.restore_pending().await?;
        tracing::debug!("Navigating to {}", url);
        self.client
            .goto(url)
            .await
            .map_err(|e| UiError::Navigation(format!("{}: {}", url, e)))
    }

    async fn current_url(&self) -> Result<String, UiError> {
        self.client
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| UiError::Driver(e.to_string()))
    }

    async fn count(&self, target: &Candidates) -> Result<usize, UiError> {
        Ok(self.resolve(target).await?.len())
    }

    async fn fill(&self, target: &Candidates, value: &str) -> Result<(), UiError> {
        let element = self.first(target).await?;
        element
            .clear()
            .await
            .map_err(|e| UiError::Interaction(format!("clear {}: {}", target, e)))?;
        element
            .send_keys(value)
            .await
            .map_err(|e| UiError::Interaction(format!("type into {}: {}", target, e)))?;
        tracing::trace!("Filled {} with {:?}", target, value);
        Ok(())
    }

    async fn press_enter(&self, target: &Candidates) -> Result<(), UiError> {
        let element = self.first(target).await?;
        element
            .send_keys(ENTER_KEY)
            .await
            .map_err(|e| UiError::Interaction(format!("press Enter in {}: {}", target, e)))
    }

    async fn set_files(
        &self,
        target: &Candidates,
        index: usize,
        files: &[PathBuf],
    ) -> Result<(), UiError> {
        let controls = self.resolve(target).await?;
        let control = controls
            .get(index)
            .ok_or_else(|| UiError::ElementNotFound(format!("{} [nth={}]", target, index)))?;

        // One newline-separated value hands every file over in one interaction
        let paths = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!("Attaching {} files to control #{}", files.len(), index);
        control
            .send_keys(&paths)
            .await
            .map_err(|e| UiError::Interaction(format!("file control #{}: {}", index, e)))
    }

    async fn click(&self, target: &Candidates) -> Result<(), UiError> {
        let element = self.first(target).await?;
        element
            .click()
            .await
            .map_err(|e| UiError::Interaction(format!("click {}: {}", target, e)))
    }

    async fn is_network_idle(&self) -> Result<bool, UiError> {
        let probe = self
            .client
            .execute(RESOURCE_PROBE, Vec::new())
            .await
            .map_err(|e| UiError::Driver(e.to_string()))?;

        let ready = probe.get(0).and_then(Value::as_str) == Some("complete");
        let count = probe.get(1).and_then(Value::as_u64);

        let mut previous = self
            .resources
            .lock()
            .map_err(|_| UiError::Driver("resource probe state poisoned".to_string()))?;
        let stable = count.is_some() && *previous == count;
        *previous = count;

        Ok(ready && stable)
    }

    async fn close(self: Box<Self>) -> Result<(), UiError> {
        if let Err(e) = self.snapshot_cookies().await {
            tracing::debug!("Could not snapshot cookies before closing: {}", e);
        }
        self.client
            .close()
            .await
            .map_err(|e| UiError::Driver(e.to_string()))
    }
}

/// WebDriver capabilities for a Chromium-family browser
pub fn capabilities(settings: &WebDriverConfig) -> Map<String, Value> {
    let mut args = settings.browser_args.clone();
    if settings.headless {
        args.push("--headless=new".to_string());
    }
    if settings.minimized {
        args.push("--start-minimized".to_string());
    }

    let mut caps = Map::new();
    caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
    caps
}

/// Cookies stored in a session blob
///
/// Entries without a name or value are skipped.
pub fn cookies_from_session(session: &SessionState) -> Vec<Cookie<'static>> {
    let Some(entries) = session.as_value().get("cookies").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let value = entry.get("value")?.as_str()?.to_string();
            let mut cookie = Cookie::new(name, value);

            if let Some(domain) = entry.get("domain").and_then(Value::as_str) {
                cookie.set_domain(domain.to_string());
            }
            if let Some(path) = entry.get("path").and_then(Value::as_str) {
                cookie.set_path(path.to_string());
            }
            if let Some(secure) = entry.get("secure").and_then(Value::as_bool) {
                cookie.set_secure(secure);
            }
            if let Some(http_only) = entry.get("httpOnly").and_then(Value::as_bool) {
                cookie.set_http_only(http_only);
            }
            Some(cookie)
        })
        .collect()
}

/// One cookie in session-blob form
pub fn cookie_to_json(cookie: &Cookie<'_>) -> Value {
    let expires = cookie
        .expires_datetime()
        .map(|t| t.unix_timestamp() as f64)
        .unwrap_or(-1.0);

    let mut entry = json!({
        "name": cookie.name(),
        "value": cookie.value(),
        "domain": cookie.domain().unwrap_or_default(),
        "path": cookie.path().unwrap_or("/"),
        "expires": expires,
        "httpOnly": cookie.http_only().unwrap_or(false),
        "secure": cookie.secure().unwrap_or(false),
    });
    if let Some(same_site) = cookie.same_site() {
        entry["sameSite"] = json!(same_site.to_string());
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_include_flags() {
        let settings = WebDriverConfig {
            headless: true,
            minimized: true,
            ..Default::default()
        };
        let caps = capabilities(&settings);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        let args: Vec<&str> = args.iter().filter_map(Value::as_str).collect();

        assert!(args.contains(&"--headless=new"));
        assert!(args.contains(&"--start-minimized"));
        assert!(args.contains(&"--lang=en-US"));
    }

    #[test]
    fn test_visible_browser_has_no_headless_flag() {
        let caps = capabilities(&WebDriverConfig::default());
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn test_cookies_from_session() {
        let session = SessionState::new(json!({
            "cookies": [
                {
                    "name": "__Secure-civitai-token",
                    "value": "abc",
                    "domain": ".civitai.com",
                    "path": "/",
                    "expires": 1900000000.0,
                    "httpOnly": true,
                    "secure": true,
                    "sameSite": "Lax"
                },
                { "name": "incomplete" }
            ],
            "origins": []
        }));

        let cookies = cookies_from_session(&session);
        assert_eq!(cookies.len(), 1);

        let cookie = &cookies[0];
        assert_eq!(cookie.name(), "__Secure-civitai-token");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(
            cookie.domain().map(|d| d.trim_start_matches('.')),
            Some("civitai.com")
        );
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[test]
    fn test_cookie_to_json_round_trips_fields() {
        let mut cookie = Cookie::new("sid", "xyz");
        cookie.set_domain("example.com");
        cookie.set_path("/app");
        cookie.set_secure(true);

        let entry = cookie_to_json(&cookie);
        assert_eq!(entry["name"], "sid");
        assert_eq!(entry["value"], "xyz");
        assert_eq!(entry["domain"], "example.com");
        assert_eq!(entry["path"], "/app");
        assert_eq!(entry["secure"], true);
        assert_eq!(entry["httpOnly"], false);
        assert_eq!(entry["expires"], -1.0);
    }

    #[test]
    fn test_session_without_cookies() {
        let session = SessionState::new(json!({ "origins": [] }));
        assert!(cookies_from_session(&session).is_empty());
    }
}
