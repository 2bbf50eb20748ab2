//! Persisted browser session
//!
//! The session blob is produced by `imgcast-login` and consumed by every
//! upload run. Nothing outside the browser adapter looks inside it.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, SessionError};

/// Opaque authentication context (cookies and storage)
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState(Value);

impl SessionState {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Well-known location of the session blob
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: PathBuf::from(shellexpand::tilde(path.as_ref()).to_string()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the saved session
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Missing`] when no session has been saved yet.
    pub fn load(&self) -> Result<SessionState> {
        if !self.exists() {
            return Err(SessionError::Missing(self.path.clone()).into());
        }

        let content = std::fs::read_to_string(&self.path).map_err(SessionError::Read)?;
        let value: Value = serde_json::from_str(&content).map_err(SessionError::Parse)?;
        Ok(SessionState(value))
    }

    /// Save `state`, replacing any previous session
    ///
    /// The blob is written to a sibling temp file first and renamed into
    /// place, so a crash never leaves a half-written session behind.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(SessionError::Write)?;
            }
        }

        let content = serde_json::to_string_pretty(&state.0).map_err(SessionError::Parse)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(SessionError::Write)?;
        std::fs::rename(&tmp, &self.path).map_err(SessionError::Write)?;

        tracing::debug!("Saved session to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImgcastError;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_fails_fast() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path().join("session.json").to_string_lossy());

        assert!(!store.exists());
        match store.load() {
            Err(ImgcastError::Session(SessionError::Missing(path))) => {
                assert_eq!(path, temp.path().join("session.json"));
            }
            other => panic!("Expected missing session, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path().join("nested/session.json").to_string_lossy());
        let state = SessionState::new(json!({
            "cookies": [{"name": "token", "value": "abc", "domain": ".example.com", "path": "/"}],
            "origins": []
        }));

        store.save(&state).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), state);

        // No temp file left behind
        assert!(!temp.path().join("nested/session.json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = SessionStore::new(path.to_string_lossy());
        assert!(matches!(
            store.load(),
            Err(ImgcastError::Session(SessionError::Parse(_)))
        ));
    }
}
