//! Remote UI abstraction
//!
//! The post state machine talks to the remote web application only through
//! the [`Browser`] and [`Page`] traits. [`webdriver`] drives a real browser;
//! [`mock`] is a scriptable stand-in used by the tests.
//!
//! # Examples
//!
//! ```no_run
//! use libimgcast::ui::{Browser, Candidates};
//!
//! # async fn example(browser: &dyn Browser) -> Result<(), libimgcast::error::UiError> {
//! let page = browser.open_page().await?;
//! page.goto("https://example.com/posts/create").await?;
//!
//! let title = Candidates::new(["textarea[name*='title']", "input[name*='title']"]);
//! page.fill(&title, "Summer trip").await?;
//! page.close().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::UiError;
use crate::session::SessionState;

pub mod contract;
pub mod webdriver;

// Mock UI is available for all builds (not just tests) to support integration tests
pub mod mock;

pub use contract::{ConfirmationPattern, UiContract};

/// How a single candidate addresses elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl<'a> Selector<'a> {
    /// Entries prefixed with `xpath:` are XPath expressions, everything else is CSS
    pub fn parse(raw: &'a str) -> Self {
        match raw.strip_prefix("xpath:") {
            Some(expr) => Selector::XPath(expr.trim()),
            None => Selector::Css(raw),
        }
    }
}

/// Ordered list of selectors for one logical control
///
/// Consumers try the entries in order and use the first one that matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Candidates(Vec<String>);

impl Candidates {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(selectors.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Selector<'_>> {
        self.0.iter().map(|s| Selector::parse(s))
    }

    pub fn raw(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Candidates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" | "))
    }
}

/// Source of pages bound to the persisted session
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh page that carries the session's authentication
    ///
    /// Every page is independent; concurrent attempts each open their own.
    async fn open_page(&self) -> Result<Box<dyn Page>, UiError>;

    /// The session as last observed by a closed page, if it changed
    ///
    /// Callers persist this after a run so the login stays fresh.
    async fn refreshed_session(&self) -> Option<SessionState> {
        None
    }
}

/// One browser page
///
/// Every method acts on the current state of the page and returns
/// immediately; waiting and bounding is up to the caller (see
/// [`crate::wait`]).
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to `url` and wait for the document to load
    async fn goto(&self, url: &str) -> Result<(), UiError>;

    /// Location currently shown by the page
    async fn current_url(&self) -> Result<String, UiError>;

    /// Number of elements matching the first candidate that matches anything
    async fn count(&self, target: &Candidates) -> Result<usize, UiError>;

    /// Replace the value of the first matching field with `value`
    async fn fill(&self, target: &Candidates, value: &str) -> Result<(), UiError>;

    /// Send the Enter key to the first matching field
    async fn press_enter(&self, target: &Candidates) -> Result<(), UiError>;

    /// Hand `files` to the `index`-th matching file control in one call
    async fn set_files(
        &self,
        target: &Candidates,
        index: usize,
        files: &[PathBuf],
    ) -> Result<(), UiError>;

    /// Click the first matching element
    async fn click(&self, target: &Candidates) -> Result<(), UiError>;

    /// Whether the page has stopped loading resources
    async fn is_network_idle(&self) -> Result<bool, UiError>;

    /// Release the page and everything bound to it
    async fn close(self: Box<Self>) -> Result<(), UiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            Selector::parse("input[type='file']"),
            Selector::Css("input[type='file']")
        );
        assert_eq!(
            Selector::parse("xpath://button[contains(., 'Publish')]"),
            Selector::XPath("//button[contains(., 'Publish')]")
        );
    }

    #[test]
    fn test_candidates_keep_order() {
        let candidates = Candidates::new(["a", "xpath://b", "c"]);
        let parsed: Vec<_> = candidates.iter().collect();
        assert_eq!(
            parsed,
            vec![Selector::Css("a"), Selector::XPath("//b"), Selector::Css("c")]
        );
        assert_eq!(candidates.to_string(), "a | xpath://b | c");
    }
}
