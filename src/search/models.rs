use crate::models::MailRecord;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Representation of a mail document stored in Meilisearch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MailDocument {
    pub uid: String,
    pub id: String,
    pub date: i64,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub message: String,
    pub folder: String,
    #[serde(default)]
    pub attachments: String,
}

impl MailDocument {
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.date, 0).single()
    }
}

impl From<&MailRecord> for MailDocument {
    fn from(record: &MailRecord) -> Self {
        Self {
            uid: record.uid().to_string(),
            id: record.id().to_string(),
            date: record.timestamp.timestamp(),
            from: record.from.clone(),
            to: record.to.clone(),
            cc: record.cc.clone(),
            subject: record.subject.clone(),
            message: record.body.clone(),
            folder: record.folder().to_string(),
            attachments: record.attachment_names().join(","),
        }
    }
}

impl From<MailRecord> for MailDocument {
    fn from(record: MailRecord) -> Self {
        let attachments = record.attachment_names().join(",");
        let uid = record.uid().to_string();
        let id = record.id().to_string();
        let folder = record.folder().to_string();
        Self {
            uid,
            id,
            date: record.timestamp.timestamp(),
            from: record.from,
            to: record.to,
            cc: record.cc,
            subject: record.subject,
            message: record.body,
            folder,
            attachments,
        }
    }
}

/// Index statistics as reported by `stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub number_of_documents: u64,
    pub is_indexing: bool,
    pub server_version: String,
}

// ===== Settings files =====

/// `{"stop_words": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopWordsFile {
    #[serde(default)]
    pub stop_words: Vec<String>,
}

/// `{"rankings": [...]}`, most significant rule first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingRulesFile {
    #[serde(default)]
    pub rankings: Vec<String>,
}

/// `{"synonyms": {"term": ["alternative", ...]}}`; an empty map clears all synonyms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymsFile {
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> MailRecord {
        let mut record = MailRecord::new("abc@example.com", "Inbox/Work");
        record.from = "Alice".to_string();
        record.to = vec!["Bob".to_string(), "carol@example.com".to_string()];
        record.subject = "Quarterly numbers".to_string();
        record.body = "See attached.".to_string();
        record.timestamp = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        record.push_attachment("report.pdf", b"%PDF".to_vec());
        record.push_attachment("image/png", Vec::new());
        record
    }

    #[test]
    fn test_document_field_set() {
        let document = MailDocument::from(&sample_record());
        let value = serde_json::to_value(&document).unwrap();

        assert_eq!(
            value,
            json!({
                "uid": crate::models::mail_uid("abc@example.com"),
                "id": "abc@example.com",
                "date": 1577923200,
                "from": "Alice",
                "to": ["Bob", "carol@example.com"],
                "cc": [],
                "subject": "Quarterly numbers",
                "message": "See attached.",
                "folder": "Inbox/Work",
                "attachments": "report.pdf,image/png",
            })
        );
    }

    #[test]
    fn test_owned_and_borrowed_conversion_agree() {
        let record = sample_record();
        assert_eq!(MailDocument::from(&record), MailDocument::from(record));
    }

    #[test]
    fn test_settings_files_decode() {
        let stop: StopWordsFile = serde_json::from_str(r#"{"stop_words": ["the", "a"]}"#).unwrap();
        assert_eq!(stop.stop_words, vec!["the", "a"]);

        let ranking: RankingRulesFile =
            serde_json::from_str(r#"{"rankings": ["words", "date:desc"]}"#).unwrap();
        assert_eq!(ranking.rankings, vec!["words", "date:desc"]);

        let synonyms: SynonymsFile = serde_json::from_str(r#"{"synonyms": {}}"#).unwrap();
        assert!(synonyms.synonyms.is_empty());
    }
}
