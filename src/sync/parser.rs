//! Mail normalization.
//!
//! Turns whatever a source yields into a [`MailRecord`]. MIME messages from
//! IMAP and mbox archives are decoded with `mailparse`; Mailspring rows are
//! already split into fields and only need their contacts flattened and
//! their HTML body converted.
//!
//! # Identity
//!
//! The record id is the Message-ID without angle brackets. Messages without
//! one get `sha256:<digest of the raw bytes>` so that unrelated messages
//! never share a key. Mailspring rows use their row id.
//!
//! # Body and attachments
//!
//! The MIME tree is flattened to its leaf parts in document order. The first
//! leaf that is inline `text/*` becomes the body (HTML converted to text).
//! Every other leaf, including later inline text such as the HTML half of a
//! `multipart/alternative`, is recorded as an attachment. Attachment names
//! come from the `filename` disposition parameter, then the `name` content
//! type parameter, then the raw `Content-Type` header.
//!
//! # Dates
//!
//! A missing or unparsable `Date` header is logged and the record gets the
//! Unix epoch; it is never a reason to drop the message.

use super::address::{join_addresses, normalize_addresses};
use super::source::{RawMessage, SourceItem, StoreContact, StoreMessage};
use super::text::{html_to_text, is_html, sanitize_text};
use crate::models::{MailRecord, content_id};
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{
    DispositionType, MailHeaderMap, ParsedContentDisposition, ParsedMail, parse_mail,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseMailError {
    #[error("MIME parsing failed: {0}")]
    MimeParse(#[from] mailparse::MailParseError),
}

/// Normalize one source item.
pub fn normalize(item: SourceItem) -> Result<MailRecord, ParseMailError> {
    match item.message {
        RawMessage::Mime(bytes) => parse_mail_record(&bytes, &item.folder),
        RawMessage::Store(message) => Ok(store_record(message, &item.folder)),
    }
}

/// Clean and normalize message IDs by removing angle brackets and whitespace
fn normalize_message_id(msg_id: Option<String>) -> Option<String> {
    msg_id.and_then(|id| {
        let cleaned = id.trim().trim_matches(&['<', '>'][..]).trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(sanitize_text(cleaned))
        }
    })
}

/// Decode a raw RFC 5322 message found in `folder`.
pub fn parse_mail_record(raw: &[u8], folder: &str) -> Result<MailRecord, ParseMailError> {
    let parsed = parse_mail(raw).map_err(|e| {
        log::debug!("failed to parse MIME in {}: {}", folder, e);
        ParseMailError::MimeParse(e)
    })?;

    let id = normalize_message_id(parsed.headers.get_first_value("Message-ID"))
        .unwrap_or_else(|| {
            let id = content_id(raw);
            log::debug!("message in {} has no Message-ID, using {}", folder, id);
            id
        });

    let mut record = MailRecord::new(id, folder);
    record.subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| sanitize_text(&s))
        .unwrap_or_default();
    record.from = parsed
        .headers
        .get_first_value("From")
        .map(|v| sanitize_text(&join_addresses(&v)))
        .unwrap_or_default();
    record.to = recipients(&parsed, "To");
    record.cc = recipients(&parsed, "Cc");
    record.timestamp = parse_mail_date(parsed.headers.get_first_value("Date"), record.id());

    let mut leaves = Vec::new();
    collect_leaves(&parsed, &mut leaves);

    let mut has_body = false;
    for part in leaves {
        let disposition = part.get_content_disposition();
        let inline_text = !matches!(disposition.disposition, DispositionType::Attachment)
            && part.ctype.mimetype.to_ascii_lowercase().starts_with("text/");

        if inline_text && !has_body {
            record.body = part_text(part, record.id());
            has_body = true;
            continue;
        }

        let payload = part.get_body_raw().unwrap_or_else(|err| {
            log::warn!("email {} has undecodable part: {}", record.id(), err);
            Vec::new()
        });
        record.push_attachment(attachment_name(part, &disposition), payload);
    }

    log::trace!("parsed: {} - {}", record.id(), record.subject);
    Ok(record)
}

fn recipients(parsed: &ParsedMail<'_>, header: &str) -> Vec<String> {
    parsed
        .headers
        .get_first_value(header)
        .map(|value| {
            normalize_addresses(&value)
                .iter()
                .map(|entry| sanitize_text(entry))
                .collect()
        })
        .unwrap_or_default()
}

fn collect_leaves<'a>(part: &'a ParsedMail<'a>, leaves: &mut Vec<&'a ParsedMail<'a>>) {
    if part.subparts.is_empty() {
        leaves.push(part);
    } else {
        for sub in &part.subparts {
            collect_leaves(sub, leaves);
        }
    }
}

fn part_text(part: &ParsedMail<'_>, message_id: &str) -> String {
    let text = match part.get_body() {
        Ok(text) => text,
        Err(err) => {
            log::warn!("email {} has undecodable body: {}", message_id, err);
            return String::new();
        }
    };
    if is_html(&part.ctype.mimetype) {
        html_to_text(&text)
    } else {
        sanitize_text(&text)
    }
}

fn attachment_name(part: &ParsedMail<'_>, disposition: &ParsedContentDisposition) -> String {
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
        .or_else(|| part.headers.get_first_value("Content-Type"))
        .map(|name| sanitize_text(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| part.ctype.mimetype.clone())
}

fn parse_mail_date(raw_date: Option<String>, message_id: &str) -> DateTime<Utc> {
    let raw = raw_date.unwrap_or_default();
    if raw.trim().is_empty() {
        log::warn!("email {} missing Date header, using epoch", message_id);
        return DateTime::<Utc>::UNIX_EPOCH;
    }

    match dateparser::parse(raw.trim()) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(err) => {
            log::warn!(
                "email {} has invalid date `{}`, using epoch: {}",
                message_id,
                raw,
                err
            );
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

/// Build a record from a Mailspring row found in `folder`.
pub fn store_record(message: StoreMessage, folder: &str) -> MailRecord {
    let StoreMessage {
        id,
        subject,
        data,
        body,
    } = message;

    let mut record = MailRecord::new(id, folder);
    record.subject = sanitize_text(&subject);
    record.from = data
        .from
        .first()
        .map(StoreContact::display)
        .unwrap_or_default();
    record.to = data.to.iter().map(StoreContact::display).collect();
    record.cc = data.cc.iter().map(StoreContact::display).collect();
    record.timestamp = Utc
        .timestamp_opt(data.date, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    record.body = body.as_deref().map(html_to_text).unwrap_or_default();
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::source::{StoreFolder, StoreMessageData};

    #[test]
    fn test_normalize_message_id() {
        assert_eq!(
            normalize_message_id(Some("<test@example.com>".to_string())),
            Some("test@example.com".to_string())
        );
        assert_eq!(normalize_message_id(Some(" <> ".to_string())), None);
        assert_eq!(normalize_message_id(None), None);
    }

    #[test]
    fn test_parse_plain_message() {
        let raw = concat!(
            "Message-ID: <plain@example.com>\r\n",
            "From: \"Mickey Mouse\" <mickey.mouse@gmail.com>\r\n",
            "To: a@x.com, b@y.com\r\n",
            "Subject: Hello\r\n",
            "Date: Thu, 02 Jan 2020 00:00:00 +0000\r\n",
            "\r\n",
            "Just text.\r\n"
        );

        let record = parse_mail_record(raw.as_bytes(), "Inbox").unwrap();
        assert_eq!(record.id(), "plain@example.com");
        assert_eq!(record.from, "Mickey Mouse");
        assert_eq!(record.to, vec!["a@x.com", "b@y.com"]);
        assert!(record.cc.is_empty());
        assert_eq!(record.subject, "Hello");
        assert_eq!(record.body, "Just text.");
        assert_eq!(record.timestamp.timestamp(), 1577923200);
        assert_eq!(record.folder(), "Inbox");
        assert!(record.attachments().is_empty());
    }

    #[test]
    fn test_first_inline_text_wins() {
        let raw = concat!(
            "Message-ID: <multi@example.com>\r\n",
            "From: alice@example.com\r\n",
            "Cc: \"Dan\" <dan@example.com>\r\n",
            "Subject: Report\r\n",
            "Date: Thu, 02 Jan 2020 00:00:00 +0000\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "Plain body\r\n",
            "--inner\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>Html body</p>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERg==\r\n",
            "--outer\r\n",
            "Content-Type: image/png\r\n",
            "\r\n",
            "iVBO\r\n",
            "--outer--\r\n"
        );

        let record = parse_mail_record(raw.as_bytes(), "Inbox").unwrap();
        assert_eq!(record.body, "Plain body");
        assert_eq!(record.cc, vec!["Dan"]);
        assert_eq!(
            record.attachment_names(),
            ["text/html; charset=utf-8", "report.pdf", "image/png"]
        );
        assert_eq!(record.attachments().len(), 3);
        assert_eq!(record.attachments()[1], b"%PDF");
    }

    #[test]
    fn test_html_only_body_is_converted() {
        let raw = concat!(
            "Message-ID: <html@example.com>\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "Date: Thu, 02 Jan 2020 00:00:00 +0000\r\n",
            "\r\n",
            "<html><body><p>Hello <b>world</b></p></body></html>\r\n"
        );

        let record = parse_mail_record(raw.as_bytes(), "Inbox").unwrap();
        assert!(record.body.contains("Hello"));
        assert!(!record.body.contains("<p>"));
    }

    #[test]
    fn test_missing_date_falls_back_to_epoch() {
        let raw = concat!(
            "Message-ID: <nodate@example.com>\r\n",
            "Subject: Undated\r\n",
            "\r\n",
            "Body\r\n"
        );
        let record = parse_mail_record(raw.as_bytes(), "Inbox").unwrap();
        assert_eq!(record.timestamp.timestamp(), 0);

        let raw = concat!(
            "Message-ID: <baddate@example.com>\r\n",
            "Date: sometime last week\r\n",
            "\r\n",
            "Body\r\n"
        );
        let record = parse_mail_record(raw.as_bytes(), "Inbox").unwrap();
        assert_eq!(record.timestamp.timestamp(), 0);
    }

    #[test]
    fn test_missing_message_id_uses_content_hash() {
        let raw = concat!("Subject: Anonymous\r\n", "\r\n", "Body\r\n");
        let record = parse_mail_record(raw.as_bytes(), "").unwrap();
        assert_eq!(record.id(), content_id(raw.as_bytes()));
        assert_eq!(record.folder(), crate::models::UNFILED_FOLDER);

        let other = concat!("Subject: Anonymous too\r\n", "\r\n", "Body\r\n");
        let other = parse_mail_record(other.as_bytes(), "").unwrap();
        assert_ne!(record.uid(), other.uid());
    }

    #[test]
    fn test_store_record() {
        let message = StoreMessage {
            id: "m1".to_string(),
            subject: " Hello ".to_string(),
            data: StoreMessageData {
                date: 1577923200,
                folder: Some(StoreFolder {
                    path: "INBOX".to_string(),
                }),
                from: vec![StoreContact {
                    email: "a@x.com".to_string(),
                    name: "Ann".to_string(),
                }],
                to: vec![StoreContact {
                    email: "b@x.com".to_string(),
                    name: String::new(),
                }],
                ..Default::default()
            },
            body: Some("<p>Hi Bob</p>".to_string()),
        };

        let record = normalize(SourceItem {
            message: RawMessage::Store(message),
            folder: "INBOX".to_string(),
        })
        .unwrap();

        assert_eq!(record.id(), "m1");
        assert_eq!(record.subject, "Hello");
        assert_eq!(record.from, "Ann");
        assert_eq!(record.to, vec!["b@x.com"]);
        assert_eq!(record.timestamp.timestamp(), 1577923200);
        assert!(record.body.contains("Hi Bob"));
        assert_eq!(record.folder(), "INBOX");
    }
}
