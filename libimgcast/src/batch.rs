//! Batching policy
//!
//! Groups discovered files into posts and derives each post's title.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::discovery::SourceFile;
use crate::error::{ImgcastError, Result};

/// How files are grouped into posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Never mix files from different parent directories
    #[default]
    Folder,
    /// Chunk the whole discovery order, ignoring directories
    Flat,
}

impl FromStr for GroupPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "folder" => Ok(GroupPolicy::Folder),
            "flat" => Ok(GroupPolicy::Flat),
            _ => Err(format!(
                "Invalid grouping mode: '{}'. Valid options: folder, flat",
                s
            )),
        }
    }
}

/// Where a post's title comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TitleSource {
    /// Name of the first file's parent directory
    #[default]
    Folder,
    /// Stem of the first file
    File,
    /// A generated timestamp label
    Auto,
}

impl FromStr for TitleSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "folder" => Ok(TitleSource::Folder),
            "file" => Ok(TitleSource::File),
            "auto" => Ok(TitleSource::Auto),
            _ => Err(format!(
                "Invalid title source: '{}'. Valid options: folder, file, auto",
                s
            )),
        }
    }
}

/// A bounded, non-empty group of files published as one post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    files: Vec<SourceFile>,
}

impl Batch {
    /// Returns `None` for an empty file list
    pub fn new(files: Vec<SourceFile>) -> Option<Self> {
        if files.is_empty() {
            None
        } else {
            Some(Self { files })
        }
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Derive this batch's title
    ///
    /// Falls back to the generated label when the requested source has no
    /// usable name (e.g. a file directly under the filesystem root).
    pub fn title(&self, source: TitleSource, auto_prefix: &str) -> String {
        let first = &self.files[0];
        let derived = match source {
            TitleSource::Folder => first.folder_name(),
            TitleSource::File => first.stem(),
            TitleSource::Auto => None,
        };

        derived
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| auto_title(auto_prefix))
    }
}

/// Generated title of the form `"{prefix} YYYY-MM-DD HH:MM"`
pub fn auto_title(prefix: &str) -> String {
    format!("{} {}", prefix, chrono::Local::now().format("%Y-%m-%d %H:%M"))
}

/// Split `files` into batches of at most `max_size`
///
/// Input order is preserved within every batch. Under [`GroupPolicy::Folder`]
/// directories appear in the order their first file was discovered.
pub fn batch(files: Vec<SourceFile>, policy: GroupPolicy, max_size: usize) -> Result<Vec<Batch>> {
    if max_size == 0 {
        return Err(ImgcastError::InvalidInput(
            "Post size must be at least 1".to_string(),
        ));
    }

    let partitions = match policy {
        GroupPolicy::Flat => vec![files],
        GroupPolicy::Folder => partition_by_parent(files),
    };

    let mut batches = Vec::new();
    for partition in partitions {
        let mut iter = partition.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<SourceFile> = iter.by_ref().take(max_size).collect();
            if let Some(b) = Batch::new(chunk) {
                batches.push(b);
            }
        }
    }

    Ok(batches)
}

fn partition_by_parent(files: Vec<SourceFile>) -> Vec<Vec<SourceFile>> {
    let mut index: HashMap<PathBuf, usize> = HashMap::new();
    let mut partitions: Vec<Vec<SourceFile>> = Vec::new();

    for file in files {
        let parent = file.path.parent().map(PathBuf::from).unwrap_or_default();
        let slot = *index.entry(parent).or_insert_with(|| {
            partitions.push(Vec::new());
            partitions.len() - 1
        });
        partitions[slot].push(file);
    }

    partitions
}

/// Parse a comma-separated tag list, dropping empty entries
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
