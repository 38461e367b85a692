//! IMAP mailbox source.
//!
//! The mailbox is opened read-only with `EXAMINE` and requested in a single
//! `FETCH 1:N (RFC822)`. Connection, login, examine and fetch failures abort
//! the run. Every session ends with `LOGOUT`.

use super::{SourceError, SourceItem};
use crate::config::ImapConfig;
use imap::{ClientBuilder, ConnectionMode, TlsKind};
use std::collections::VecDeque;
use std::io::{Read, Write};

/// Server-side name of the default mailbox.
pub const DEFAULT_MAILBOX: &str = "INBOX";
/// Folder label used for [`DEFAULT_MAILBOX`].
pub const DEFAULT_MAILBOX_LABEL: &str = "Inbox";

/// The subset of an IMAP session the source needs.
pub trait MailboxSession {
    /// Open `mailbox` read-only and return its message count.
    fn examine_mailbox(&mut self, mailbox: &str) -> Result<u32, SourceError>;

    /// Fetch full bodies for sequence numbers `1..=count`. Entries are `None`
    /// when the server returned no body for that message.
    fn fetch_all(&mut self, count: u32) -> Result<Vec<Option<Vec<u8>>>, SourceError>;

    fn list_mailboxes(&mut self) -> Result<Vec<String>, SourceError>;

    /// End the session with `LOGOUT`.
    fn logout_session(&mut self) -> Result<(), SourceError>;
}

impl<T: Read + Write> MailboxSession for imap::Session<T> {
    fn examine_mailbox(&mut self, mailbox: &str) -> Result<u32, SourceError> {
        let examined = self.examine(mailbox)?;
        Ok(examined.exists)
    }

    fn fetch_all(&mut self, count: u32) -> Result<Vec<Option<Vec<u8>>>, SourceError> {
        let fetches = self.fetch(format!("1:{count}"), "RFC822")?;
        Ok(fetches
            .iter()
            .map(|fetch| fetch.body().map(|body| body.to_vec()))
            .collect())
    }

    fn list_mailboxes(&mut self) -> Result<Vec<String>, SourceError> {
        let names = self.list(None, Some("*"))?;
        Ok(names.iter().map(|name| name.name().to_string()).collect())
    }

    fn logout_session(&mut self) -> Result<(), SourceError> {
        self.logout()?;
        Ok(())
    }
}

fn logout_quietly<S: MailboxSession + ?Sized>(session: &mut S) {
    if let Err(err) = session.logout_session() {
        log::warn!("imap logout failed: {}", err);
    }
}

/// Open a logged-in session for the configured account.
pub fn connect(config: &ImapConfig) -> Result<imap::Session<imap::Connection>, SourceError> {
    let mode = if config.tls {
        ConnectionMode::Tls
    } else {
        ConnectionMode::StartTls
    };

    log::debug!("imap connect: {}:{}", config.host, config.port);
    let client = ClientBuilder::new(config.host.as_str(), config.port)
        .tls_kind(TlsKind::Native)
        .mode(mode)
        .danger_skip_tls_verify(config.skip_tls_verification)
        .connect()?;

    let session = client
        .login(&config.username, &config.password)
        .map_err(|e| e.0)?;
    log::info!("imap login ok for {}", config.username);
    Ok(session)
}

/// Human label for a mailbox name.
pub fn mailbox_label(mailbox: &str) -> String {
    if mailbox.eq_ignore_ascii_case(DEFAULT_MAILBOX) {
        DEFAULT_MAILBOX_LABEL.to_string()
    } else {
        mailbox.to_string()
    }
}

/// Messages of one mailbox, fetched up front and yielded in sequence order.
pub struct ImapSource {
    label: String,
    pending: VecDeque<Option<Vec<u8>>>,
}

impl ImapSource {
    /// Examine `mailbox` on `session` and fetch its full contents.
    pub fn open<S>(session: &mut S, mailbox: &str) -> Result<Self, SourceError>
    where
        S: MailboxSession + ?Sized,
    {
        let exists = session
            .examine_mailbox(mailbox)
            .map_err(|err| SourceError::Select {
                mailbox: mailbox.to_string(),
                reason: err.to_string(),
            })?;

        let messages = if exists == 0 {
            Vec::new()
        } else {
            session.fetch_all(exists)?
        };
        log::info!("fetched {} of {} messages from {}", messages.len(), exists, mailbox);

        Ok(Self {
            label: mailbox_label(mailbox),
            pending: messages.into(),
        })
    }

    /// Connect with `config`, fetch `mailbox` and log out.
    pub fn fetch(config: &ImapConfig, mailbox: &str) -> Result<Self, SourceError> {
        let mut session = connect(config)?;
        Self::read_and_logout(&mut session, mailbox)
    }

    /// [`ImapSource::open`] followed by `LOGOUT`, which is sent whether or
    /// not the mailbox could be read.
    pub fn read_and_logout<S>(session: &mut S, mailbox: &str) -> Result<Self, SourceError>
    where
        S: MailboxSession + ?Sized,
    {
        let source = Self::open(session, mailbox);
        logout_quietly(session);
        source
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Iterator for ImapSource {
    type Item = SourceItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pending.pop_front()? {
                Some(bytes) => return Some(SourceItem::mime(bytes, self.label.clone())),
                None => log::warn!("skipping message without body in {}", self.label),
            }
        }
    }
}

/// List every mailbox visible to the configured account.
pub fn list_mailboxes(config: &ImapConfig) -> Result<Vec<String>, SourceError> {
    let mut session = connect(config)?;
    let names = session.list_mailboxes();
    logout_quietly(&mut session);
    names
}
