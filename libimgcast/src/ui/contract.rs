//! The remote service's UI contract
//!
//! Everything the state machine needs to know about the remote page lives in
//! one immutable [`UiContract`] value. It is the most fragile dependency of
//! the system: when the remote redesigns its editor, only this changes.

use serde::{Deserialize, Serialize};
use url::Url;

use super::Candidates;

/// Recognises the location of a freshly created post
///
/// Matches paths containing `/{collection}/{numeric id}`, optionally followed
/// by `/{suffix}`, e.g. `/posts/12345` or `/posts/12345/edit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPattern {
    pub collection: String,
    pub suffix: Option<String>,
}

impl ConfirmationPattern {
    pub fn new(collection: impl Into<String>, suffix: Option<String>) -> Self {
        Self {
            collection: collection.into(),
            suffix,
        }
    }

    pub fn matches(&self, location: &str) -> bool {
        self.post_id(location).is_some()
    }

    /// Extract the numeric post id from a matching location
    pub fn post_id(&self, location: &str) -> Option<u64> {
        let path = match Url::parse(location) {
            Ok(url) => url.path().to_string(),
            Err(_) => location.to_string(),
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments.windows(2).enumerate().find_map(|(i, pair)| {
            if pair[0] != self.collection || !is_numeric(pair[1]) {
                return None;
            }
            match segments.get(i + 2) {
                None => pair[1].parse().ok(),
                Some(next) if self.suffix.as_deref() == Some(*next) => pair[1].parse().ok(),
                Some(_) => None,
            }
        })
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Endpoints and element candidates of the remote post editor
#[derive(Debug, Clone)]
pub struct UiContract {
    pub editor_url: String,
    pub file_input: Candidates,
    pub title_input: Candidates,
    pub tags_input: Candidates,
    pub publish_button: Candidates,
    pub thumbnail: Candidates,
    pub confirmation: ConfirmationPattern,
}

impl UiContract {
    /// Build from the `[remote]` configuration section
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            editor_url: remote.editor_url.clone(),
            file_input: Candidates::new(remote.file_input.clone()),
            title_input: Candidates::new(remote.title_input.clone()),
            tags_input: Candidates::new(remote.tags_input.clone()),
            publish_button: Candidates::new(remote.publish_button.clone()),
            thumbnail: Candidates::new(remote.thumbnail.clone()),
            confirmation: ConfirmationPattern::new(
                remote.confirmation_collection.clone(),
                remote.confirmation_suffix.clone(),
            ),
        }
    }

    /// Origin of the editor endpoint, used to scope session cookies
    pub fn editor_origin(&self) -> Option<String> {
        Url::parse(&self.editor_url)
            .ok()
            .map(|u| u.origin().ascii_serialization())
    }
}

impl Default for UiContract {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// `[remote]` section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub editor_url: String,
    pub file_input: Vec<String>,
    pub title_input: Vec<String>,
    pub tags_input: Vec<String>,
    pub publish_button: Vec<String>,
    pub thumbnail: Vec<String>,
    pub confirmation_collection: String,
    pub confirmation_suffix: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            editor_url: "https://civitai.com/posts/create".to_string(),
            file_input: list(&["input[type='file']"]),
            title_input: list(&[
                "textarea[placeholder*='Title']",
                "input[placeholder*='Title']",
                "textarea[name*='title']",
                "input[name*='title']",
            ]),
            tags_input: list(&["input[placeholder*='Tags']", "input[aria-label*='Tags']"]),
            publish_button: list(&[
                "xpath://button[contains(normalize-space(.), 'Publish')]",
                "xpath://button[contains(normalize-space(.), 'Post')]",
            ]),
            thumbnail: list(&[
                "[data-testid*='image']",
                "[class*='image']:not([aria-hidden='true']) img",
            ]),
            confirmation_collection: "posts".to_string(),
            confirmation_suffix: Some("edit".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> ConfirmationPattern {
        ConfirmationPattern::new("posts", Some("edit".to_string()))
    }

    #[test]
    fn test_matches_created_post() {
        let p = pattern();
        assert!(p.matches("https://civitai.com/posts/12345"));
        assert!(p.matches("https://civitai.com/posts/12345/edit"));
        assert!(p.matches("https://civitai.com/posts/12345?tab=images"));
        assert_eq!(p.post_id("https://civitai.com/posts/987/edit"), Some(987));
    }

    #[test]
    fn test_rejects_editor_and_other_pages() {
        let p = pattern();
        assert!(!p.matches("https://civitai.com/posts/create"));
        assert!(!p.matches("https://civitai.com/posts"));
        assert!(!p.matches("https://civitai.com/images/12345"));
        assert!(!p.matches("https://civitai.com/posts/12a45"));
        assert!(!p.matches("https://civitai.com/posts/12345/delete"));
        assert!(!p.matches("about:blank"));
    }

    #[test]
    fn test_relative_location() {
        assert!(pattern().matches("/posts/42"));
    }

    #[test]
    fn test_default_contract_is_complete() {
        let contract = UiContract::default();
        assert!(!contract.file_input.is_empty());
        assert!(!contract.title_input.is_empty());
        assert!(!contract.tags_input.is_empty());
        assert!(!contract.publish_button.is_empty());
        assert!(!contract.thumbnail.is_empty());
        assert_eq!(
            contract.editor_origin().as_deref(),
            Some("https://civitai.com")
        );
    }
}
