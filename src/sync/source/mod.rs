//! Mail sources.
//!
//! Each source is a lazy, single-pass iterator of [`SourceItem`]s. Starting
//! over means constructing a new source. Failures that only affect one unit
//! (an archive file, a database page) are logged inside the iterator and the
//! unit is skipped; failures that make the whole source unusable are returned
//! from the constructor.

pub mod archive;
pub mod mailbox;
pub mod store;

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub use archive::{ArchiveLayout, ArchiveSource};
pub use mailbox::{ImapSource, MailboxSession};
pub use store::StoreSource;

/// One message and the folder it was found in.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub message: RawMessage,
    pub folder: String,
}

impl SourceItem {
    pub fn mime(bytes: Vec<u8>, folder: impl Into<String>) -> Self {
        Self {
            message: RawMessage::Mime(bytes),
            folder: folder.into(),
        }
    }
}

/// Message payload as delivered by a source.
#[derive(Debug, Clone)]
pub enum RawMessage {
    /// RFC 5322 bytes from IMAP or an mbox archive.
    Mime(Vec<u8>),
    /// A row from the Mailspring store, already split into fields.
    Store(StoreMessage),
}

/// A `Message` row joined with its `MessageBody`.
#[derive(Debug, Clone)]
pub struct StoreMessage {
    pub id: String,
    pub subject: String,
    pub data: StoreMessageData,
    pub body: Option<String>,
}

/// The JSON `data` column of a Mailspring `Message` row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreMessageData {
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub folder: Option<StoreFolder>,
    #[serde(default)]
    pub from: Vec<StoreContact>,
    #[serde(default)]
    pub to: Vec<StoreContact>,
    #[serde(default)]
    pub cc: Vec<StoreContact>,
    #[serde(default)]
    pub bcc: Vec<StoreContact>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreFolder {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreContact {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl StoreContact {
    /// Name when known, address otherwise.
    pub fn display(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            self.email.trim().to_string()
        } else {
            name.to_string()
        }
    }
}

/// Errors that make a source unusable.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("imap error: {0}")]
    Imap(#[from] imap::Error),
    #[error("mailbox {mailbox} could not be selected: {reason}")]
    Select { mailbox: String, reason: String },
    #[error("mailbox error: {0}")]
    Mailbox(String),
    #[error("path {0} does not exist")]
    MissingPath(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("mail store error: {0}")]
    Database(#[from] sqlx::Error),
}
