use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Folder label used when a source provides none.
pub const UNFILED_FOLDER: &str = "Unfiled";

// ===== Identity =====

/// Backend primary key for a source identifier: lowercase SHA-256 hex.
pub fn mail_uid(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identifier for a MIME message that carries no Message-ID header.
pub fn content_id(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("sha256:{:x}", hasher.finalize())
}

/// Trim trailing separators and fall back to [`UNFILED_FOLDER`] for empty labels.
pub fn normalize_folder(label: &str) -> String {
    let trimmed = label.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        UNFILED_FOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

// ===== Mail Record =====

/// A message from any source, normalized for indexing.
///
/// `uid` and `id` are fixed at construction so the key always matches the
/// identifier, and attachments are only appended in (name, payload) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct MailRecord {
    uid: String,
    id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    folder: String,
    attachments: Vec<Vec<u8>>,
    attachment_names: Vec<String>,
}

impl MailRecord {
    pub fn new(id: impl Into<String>, folder: &str) -> Self {
        let id = id.into();
        Self {
            uid: mail_uid(&id),
            id,
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            folder: normalize_folder(folder),
            attachments: Vec::new(),
            attachment_names: Vec::new(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn attachments(&self) -> &[Vec<u8>] {
        &self.attachments
    }

    pub fn attachment_names(&self) -> &[String] {
        &self.attachment_names
    }

    pub fn push_attachment(&mut self, name: impl Into<String>, payload: Vec<u8>) {
        self.attachment_names.push(name.into());
        self.attachments.push(payload);
    }
}
