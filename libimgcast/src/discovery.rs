//! Image discovery
//!
//! Recursively enumerates eligible image files under a root directory in a
//! stable order, so an unchanged tree always batches the same way.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{DiscoveryError, Result};
use crate::hasher::ContentFingerprint;

/// Image kinds accepted by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Png,
    Jpeg,
    Webp,
}

impl FileKind {
    /// Detect the kind from a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// A discovered image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: FileKind,
    /// Filled in once the file has been hashed
    pub fingerprint: Option<ContentFingerprint>,
}

impl SourceFile {
    pub fn new(path: PathBuf, kind: FileKind) -> Self {
        Self {
            path,
            kind,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: ContentFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Name of the directory containing this file
    pub fn folder_name(&self) -> Option<String> {
        self.path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }

    /// File name without its extension
    pub fn stem(&self) -> Option<String> {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
    }
}

/// Find every eligible image under `root`, sorted by path
///
/// Entries that cannot be read while walking are logged and skipped.
pub fn discover(root: &Path) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()).into());
    }
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()).into());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(kind) = FileKind::from_path(entry.path()) {
            files.push(SourceFile::new(entry.into_path(), kind));
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!("Discovered {} image(s) under {}", files.len(), root.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, path.to_string_lossy().as_bytes()).unwrap();
    }

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_extension("png"), Some(FileKind::Png));
        assert_eq!(FileKind::from_extension("JPG"), Some(FileKind::Jpeg));
        assert_eq!(FileKind::from_extension("jpeg"), Some(FileKind::Jpeg));
        assert_eq!(FileKind::from_extension("WebP"), Some(FileKind::Webp));
        assert_eq!(FileKind::from_extension("gif"), None);
        assert_eq!(FileKind::from_extension("txt"), None);
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("b/2.png"));
        touch(&root.join("a/1.JPG"));
        touch(&root.join("a/notes.txt"));
        touch(&root.join("c.webp"));
        touch(&root.join("b/anim.gif"));

        let files = discover(root).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("a/1.JPG"),
                PathBuf::from("b/2.png"),
                PathBuf::from("c.webp"),
            ]
        );
        assert_eq!(files[0].kind, FileKind::Jpeg);
        assert!(files.iter().all(|f| f.fingerprint.is_none()));
    }

    #[test]
    fn test_discover_empty_tree() {
        let temp = TempDir::new().unwrap();
        assert!(discover(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_discover_is_stable_across_runs() {
        let temp = TempDir::new().unwrap();
        for i in 0..10 {
            touch(&temp.path().join(format!("set{}/img{}.png", i % 3, i)));
        }

        let first = discover(temp.path()).unwrap();
        let second = discover(temp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_discover_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = discover(&temp.path().join("missing"));
        assert!(matches!(
            result,
            Err(crate::ImgcastError::Discovery(DiscoveryError::RootNotFound(_)))
        ));
    }

    #[test]
    fn test_discover_root_is_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("x.png");
        touch(&file);
        assert!(matches!(
            discover(&file),
            Err(crate::ImgcastError::Discovery(DiscoveryError::NotADirectory(_)))
        ));
    }

    #[test]
    fn test_folder_name_and_stem() {
        let file = SourceFile::new(PathBuf::from("/imgs/Summer Trip/IMG_001.png"), FileKind::Png);
        assert_eq!(file.folder_name().as_deref(), Some("Summer Trip"));
        assert_eq!(file.stem().as_deref(), Some("IMG_001"));
    }
}
