//! Mock browser for testing
//!
//! A scriptable in-process stand-in for the remote post editor. It can
//! simulate flaky navigation, missing controls, slow thumbnails, and publish
//! clicks that never lead anywhere, and it records every interaction so
//! tests can assert on what the state machine actually did.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{Browser, Candidates, Page, UiContract};
use crate::error::UiError;
use crate::session::SessionState;

/// When the title field accepts input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleField {
    /// Editable as soon as the editor opens
    Ready,
    /// Only editable once files have been attached
    AfterUpload,
    /// Never present
    Missing,
}

/// Configuration for mock browser behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Selectors the mock recognises
    pub contract: UiContract,

    /// Whether opening a page fails outright
    pub open_fails: bool,

    /// Number of leading `open_page` calls that fail with a driver error
    pub open_failures: u32,

    /// Delay inside every `open_page` (simulates a slow session restore)
    pub open_delay: Duration,

    /// Number of leading `goto` calls that fail with a navigation error
    pub navigation_failures: u32,

    /// Delay inside every `goto` (simulates network latency)
    pub navigation_delay: Duration,

    /// Number of file controls on the editor page
    pub file_controls: usize,

    /// Index of the control that accepts files; `None` means all reject
    pub accepting_control: Option<usize>,

    pub title_field: TitleField,

    /// Whether the tag field exists
    pub tags_field: bool,

    /// Delay inside every tag `fill` (simulates a hung autocomplete)
    pub tags_delay: Duration,

    /// Whether thumbnails render after files are attached
    pub thumbnails: bool,

    /// Whether the publish button exists and can be clicked
    pub publish_clickable: bool,

    /// The n-th publish click (1-based) navigates to the created post
    pub confirm_on_click: Option<u32>,

    /// Id of the created post
    pub post_id: u64,

    /// Session reported back after pages close
    pub refreshed_session: Option<SessionState>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            contract: UiContract::default(),
            open_fails: false,
            open_failures: 0,
            open_delay: Duration::ZERO,
            navigation_failures: 0,
            navigation_delay: Duration::ZERO,
            file_controls: 1,
            accepting_control: Some(0),
            title_field: TitleField::Ready,
            tags_field: true,
            tags_delay: Duration::ZERO,
            thumbnails: true,
            publish_clickable: true,
            confirm_on_click: Some(1),
            post_id: 4242,
            refreshed_session: None,
        }
    }
}

/// Everything that happened across all pages of one mock browser
#[derive(Debug, Clone, Default)]
pub struct MockEvents {
    pub open_calls: u32,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub open_pages: usize,
    pub max_open_pages: usize,
    pub goto_calls: u32,
    pub title_fills: Vec<String>,
    pub title_fill_attempts: u32,
    pub tags_entered: Vec<String>,
    pub set_files_attempts: Vec<usize>,
    pub uploaded: Vec<Vec<PathBuf>>,
    pub publish_clicks: u32,
}

/// Mock browser
#[derive(Clone)]
pub struct MockBrowser {
    config: Arc<MockConfig>,
    events: Arc<Mutex<MockEvents>>,
}

impl MockBrowser {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            events: Arc::new(Mutex::new(MockEvents::default())),
        }
    }

    /// An editor where everything works on the first try
    pub fn success() -> Self {
        Self::new(MockConfig::default())
    }

    /// An editor with no file control at all
    pub fn without_file_control() -> Self {
        Self::new(MockConfig {
            file_controls: 0,
            accepting_control: None,
            ..Default::default()
        })
    }

    /// An editor whose publish button never leads to a created post
    pub fn never_confirms() -> Self {
        Self::new(MockConfig {
            confirm_on_click: None,
            ..Default::default()
        })
    }

    /// An editor whose first `failures` navigations fail
    pub fn flaky_navigation(failures: u32) -> Self {
        Self::new(MockConfig {
            navigation_failures: failures,
            ..Default::default()
        })
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> MockEvents {
        self.events.lock().unwrap().clone()
    }

    pub fn publish_clicks(&self) -> u32 {
        self.events.lock().unwrap().publish_clicks
    }

    pub fn pages_opened(&self) -> usize {
        self.events.lock().unwrap().pages_opened
    }

    pub fn pages_closed(&self) -> usize {
        self.events.lock().unwrap().pages_closed
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn open_page(&self) -> Result<Box<dyn Page>, UiError> {
        if !self.config.open_delay.is_zero() {
            sleep(self.config.open_delay).await;
        }

        let call = {
            let mut events = self.events.lock().unwrap();
            events.open_calls += 1;
            events.open_calls
        };

        if self.config.open_fails || call <= self.config.open_failures {
            return Err(UiError::Driver("mock browser refused to open a page".to_string()));
        }

        {
            let mut events = self.events.lock().unwrap();
            events.pages_opened += 1;
            events.open_pages += 1;
            events.max_open_pages = events.max_open_pages.max(events.open_pages);
        }

        Ok(Box::new(MockPage {
            config: Arc::clone(&self.config),
            events: Arc::clone(&self.events),
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                files_attached: false,
                last_tag: None,
            }),
        }))
    }

    async fn refreshed_session(&self) -> Option<SessionState> {
        self.config.refreshed_session.clone()
    }
}

struct PageState {
    url: String,
    files_attached: bool,
    last_tag: Option<String>,
}

/// Mock page handed out by [`MockBrowser`]
pub struct MockPage {
    config: Arc<MockConfig>,
    events: Arc<Mutex<MockEvents>>,
    state: Mutex<PageState>,
}

impl MockPage {
    fn contract(&self) -> &UiContract {
        &self.config.contract
    }

    fn title_editable(&self) -> bool {
        match self.config.title_field {
            TitleField::Ready => true,
            TitleField::AfterUpload => self.state.lock().unwrap().files_attached,
            TitleField::Missing => false,
        }
    }
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&self, url: &str) -> Result<(), UiError> {
        if !self.config.navigation_delay.is_zero() {
            sleep(self.config.navigation_delay).await;
        }

        let call = {
            let mut events = self.events.lock().unwrap();
            events.goto_calls += 1;
            events.goto_calls
        };

        if call <= self.config.navigation_failures {
            return Err(UiError::Navigation(format!(
                "net::ERR_CONNECTION_RESET at {}",
                url
            )));
        }

        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, UiError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn count(&self, target: &Candidates) -> Result<usize, UiError> {
        let contract = self.contract();
        let n = if *target == contract.file_input {
            self.config.file_controls
        } else if *target == contract.thumbnail {
            let attached = self.state.lock().unwrap().files_attached;
            usize::from(self.config.thumbnails && attached)
        } else if *target == contract.title_input {
            usize::from(self.title_editable())
        } else if *target == contract.tags_input {
            usize::from(self.config.tags_field)
        } else if *target == contract.publish_button {
            usize::from(self.config.publish_clickable)
        } else {
            0
        };
        Ok(n)
    }

    async fn fill(&self, target: &Candidates, value: &str) -> Result<(), UiError> {
        let contract = self.contract();
        if *target == contract.title_input {
            self.events.lock().unwrap().title_fill_attempts += 1;
            if !self.title_editable() {
                return Err(UiError::ElementNotFound(target.to_string()));
            }
            self.events.lock().unwrap().title_fills.push(value.to_string());
            Ok(())
        } else if *target == contract.tags_input {
            if !self.config.tags_delay.is_zero() {
                sleep(self.config.tags_delay).await;
            }
            if !self.config.tags_field {
                return Err(UiError::ElementNotFound(target.to_string()));
            }
            self.state.lock().unwrap().last_tag = Some(value.to_string());
            Ok(())
        } else {
            Err(UiError::ElementNotFound(target.to_string()))
        }
    }

    async fn press_enter(&self, target: &Candidates) -> Result<(), UiError> {
        if *target != self.contract().tags_input || !self.config.tags_field {
            return Err(UiError::ElementNotFound(target.to_string()));
        }

        let tag = self.state.lock().unwrap().last_tag.take();
        if let Some(tag) = tag {
            self.events.lock().unwrap().tags_entered.push(tag);
        }
        Ok(())
    }

    async fn set_files(
        &self,
        target: &Candidates,
        index: usize,
        files: &[PathBuf],
    ) -> Result<(), UiError> {
        if *target != self.contract().file_input || index >= self.config.file_controls {
            return Err(UiError::ElementNotFound(format!("{} [nth={}]", target, index)));
        }

        self.events.lock().unwrap().set_files_attempts.push(index);

        if self.config.accepting_control != Some(index) {
            return Err(UiError::Interaction(format!(
                "file control #{} is not interactable",
                index
            )));
        }

        self.state.lock().unwrap().files_attached = true;
        self.events.lock().unwrap().uploaded.push(files.to_vec());
        Ok(())
    }

    async fn click(&self, target: &Candidates) -> Result<(), UiError> {
        if *target != self.contract().publish_button || !self.config.publish_clickable {
            return Err(UiError::ElementNotFound(target.to_string()));
        }

        let click = {
            let mut events = self.events.lock().unwrap();
            events.publish_clicks += 1;
            events.publish_clicks
        };

        if self.config.confirm_on_click.is_some_and(|n| click >= n) {
            let origin = self.contract().editor_origin().unwrap_or_default();
            let collection = &self.contract().confirmation.collection;
            self.state.lock().unwrap().url =
                format!("{}/{}/{}/edit", origin, collection, self.config.post_id);
        }
        Ok(())
    }

    async fn is_network_idle(&self) -> Result<bool, UiError> {
        Ok(true)
    }

    async fn close(self: Box<Self>) -> Result<(), UiError> {
        let mut events = self.events.lock().unwrap();
        events.pages_closed += 1;
        events.open_pages = events.open_pages.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flaky_navigation_recovers() {
        let browser = MockBrowser::flaky_navigation(2);
        let page = browser.open_page().await.unwrap();
        let url = "https://civitai.com/posts/create";

        assert!(page.goto(url).await.is_err());
        assert!(page.goto(url).await.is_err());
        assert!(page.goto(url).await.is_ok());
        assert_eq!(page.current_url().await.unwrap(), url);
    }

    #[tokio::test]
    async fn test_thumbnails_appear_only_after_upload() {
        let browser = MockBrowser::success();
        let contract = UiContract::default();
        let page = browser.open_page().await.unwrap();

        assert_eq!(page.count(&contract.thumbnail).await.unwrap(), 0);
        page.set_files(&contract.file_input, 0, &[PathBuf::from("/a.png")])
            .await
            .unwrap();
        assert_eq!(page.count(&contract.thumbnail).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_click_moves_to_post() {
        let browser = MockBrowser::success();
        let contract = UiContract::default();
        let page = browser.open_page().await.unwrap();

        page.click(&contract.publish_button).await.unwrap();
        let url = page.current_url().await.unwrap();
        assert!(contract.confirmation.matches(&url), "unexpected url {url}");
        assert_eq!(browser.publish_clicks(), 1);
    }

    #[tokio::test]
    async fn test_close_is_counted() {
        let browser = MockBrowser::success();
        let page = browser.open_page().await.unwrap();
        page.close().await.unwrap();

        let events = browser.events();
        assert_eq!(events.pages_opened, 1);
        assert_eq!(events.pages_closed, 1);
        assert_eq!(events.open_pages, 0);
    }
}
