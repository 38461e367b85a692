//! mbox archive source.
//!
//! Either a single mbox file (labelled with its absolute path) or a directory
//! of mbox files in the Thunderbird layout, where a folder `Inbox` keeps its
//! sub-folders in a sibling directory `Inbox.sbd`. Labels are built from the
//! path relative to the root with container suffixes stripped, so
//! `Inbox.sbd/Work` becomes `Inbox/Work`.
//!
//! Files are opened one at a time as the iterator advances. A file that
//! cannot be opened or parsed is logged and skipped.

use super::{SourceError, SourceItem};
use mbox_reader::MboxFile;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DEFAULT_BOUNDARY_SUFFIXES: &[&str] = &[".sbd"];

const DEFAULT_SKIP_SUFFIXES: &[&str] = &[
    ".msf",
    ".dat",
    ".json",
    ".sqlite",
    ".sqlite-journal",
    ".sqlite-wal",
    ".sqlite-shm",
    ".lock",
    ".tmp",
    ".html",
    ".mozlz4",
];

/// Describes how an archive tree encodes folders and which files to ignore.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    boundary_suffixes: Vec<String>,
    skip_suffixes: Vec<String>,
}

impl Default for ArchiveLayout {
    fn default() -> Self {
        Self {
            boundary_suffixes: DEFAULT_BOUNDARY_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_suffixes: DEFAULT_SKIP_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ArchiveLayout {
    /// Replace the directory suffixes that mark a sub-folder container.
    pub fn with_boundary_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.boundary_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Add file suffixes to ignore on top of the defaults.
    pub fn with_skip_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_suffixes
            .extend(suffixes.into_iter().map(Into::into));
        self
    }

    /// Index files, client state and hidden files are not mail.
    pub fn is_skipped(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return true;
        };
        if name.starts_with('.') {
            return true;
        }
        let lower = name.to_ascii_lowercase();
        self.skip_suffixes
            .iter()
            .any(|suffix| lower.ends_with(&suffix.to_ascii_lowercase()))
    }

    /// Strip a boundary suffix from one path component.
    pub fn container_name<'a>(&self, component: &'a str) -> &'a str {
        self.boundary_suffixes
            .iter()
            .find_map(|suffix| component.strip_suffix(suffix.as_str()))
            .filter(|stripped| !stripped.is_empty())
            .unwrap_or(component)
    }

    /// Folder label for `file` found under `root`.
    pub fn folder_label(&self, root: &Path, file: &Path) -> String {
        let relative = file.strip_prefix(root).unwrap_or(file);
        relative
            .components()
            .filter_map(|component| component.as_os_str().to_str())
            .map(|component| self.container_name(component))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Lazily reads messages from a list of mbox files.
pub struct ArchiveSource {
    files: VecDeque<(PathBuf, String)>,
    current: VecDeque<Vec<u8>>,
    current_label: String,
}

impl ArchiveSource {
    /// Read `root` as one archive file, or scan it as a directory.
    pub fn open(root: &Path, recursive: bool, layout: &ArchiveLayout) -> Result<Self, SourceError> {
        if root.is_file() {
            Self::single_file(root)
        } else {
            Self::scan(root, recursive, layout)
        }
    }

    /// Every message of `path`, labelled with the file's absolute path.
    pub fn single_file(path: &Path) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::MissingPath(path.to_path_buf()));
        }
        let absolute = std::fs::canonicalize(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let label = absolute.display().to_string();
        Ok(Self::from_files(vec![(absolute, label)]))
    }

    /// Collect the mail files under `root`; only its direct children unless `recursive`.
    pub fn scan(root: &Path, recursive: bool, layout: &ArchiveLayout) -> Result<Self, SourceError> {
        if !root.exists() {
            return Err(SourceError::MissingPath(root.to_path_buf()));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("skipping unreadable entry under {}: {}", root.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || layout.is_skipped(entry.path()) {
                continue;
            }
            let label = layout.folder_label(root, entry.path());
            log::trace!("found archive {} as {}", entry.path().display(), label);
            files.push((entry.into_path(), label));
        }

        log::info!("found {} archive files under {}", files.len(), root.display());
        Ok(Self::from_files(files))
    }

    fn from_files(files: Vec<(PathBuf, String)>) -> Self {
        Self {
            files: files.into(),
            current: VecDeque::new(),
            current_label: String::new(),
        }
    }

    /// Labels of the files not yet opened, in enumeration order.
    pub fn pending_labels(&self) -> Vec<&str> {
        self.files.iter().map(|(_, label)| label.as_str()).collect()
    }
}

fn read_mbox(path: &Path) -> std::io::Result<VecDeque<Vec<u8>>> {
    let mbox = MboxFile::from_file(path)?;
    let mut messages = VecDeque::new();
    for entry in mbox.iter() {
        match entry.message() {
            Some(message) => messages.push_back(message.to_vec()),
            None => log::warn!(
                "skipping undelimited message at offset {} in {}",
                entry.offset(),
                path.display()
            ),
        }
    }
    Ok(messages)
}

impl Iterator for ArchiveSource {
    type Item = SourceItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bytes) = self.current.pop_front() {
                return Some(SourceItem::mime(bytes, self.current_label.clone()));
            }

            let (path, label) = self.files.pop_front()?;
            match read_mbox(&path) {
                Ok(messages) => {
                    log::debug!("read {} messages from {}", messages.len(), path.display());
                    self.current = messages;
                    self.current_label = label;
                }
                Err(err) => log::warn!("skipping archive {}: {}", path.display(), err),
            }
        }
    }
}
