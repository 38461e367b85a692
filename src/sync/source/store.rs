//! Mailspring mail-store source.
//!
//! Reads `Message` rows joined with `MessageBody` from the Mailspring SQLite
//! database, one page at a time in `id` order. Sender, recipients, date and
//! folder live in the JSON `data` column.
//!
//! Pages are fetched by blocking on the runtime captured in [`StoreSource::open`],
//! so the iterator must be driven from a blocking thread such as
//! `tokio::task::spawn_blocking`, never from inside an async task.

use super::{RawMessage, SourceError, SourceItem, StoreMessage, StoreMessageData};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::VecDeque;
use std::path::Path;
use tokio::runtime::Handle;

const COUNT_QUERY: &str = "SELECT COUNT(*) FROM Message";

const PAGE_QUERY: &str = "SELECT m.id, m.subject, m.data, body.value AS body \
     FROM Message AS m \
     LEFT JOIN MessageBody AS body ON m.id = body.id \
     ORDER BY m.id ASC \
     LIMIT ? OFFSET ?";

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: String,
    subject: Option<String>,
    data: Option<Vec<u8>>,
    body: Option<String>,
}

/// Pages through a Mailspring store.
pub struct StoreSource {
    pool: SqlitePool,
    handle: Handle,
    page_size: usize,
    total: i64,
    next_offset: i64,
    current: VecDeque<SourceItem>,
}

impl StoreSource {
    /// Open the database at `path` read-only.
    pub async fn open(path: &Path, page_size: usize) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::MissingPath(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, page_size).await
    }

    /// Use an existing pool; counts the rows up front.
    pub async fn from_pool(pool: SqlitePool, page_size: usize) -> Result<Self, SourceError> {
        let total: i64 = sqlx::query_scalar(COUNT_QUERY).fetch_one(&pool).await?;
        log::info!("mail store holds {} messages", total);

        Ok(Self {
            pool,
            handle: Handle::current(),
            page_size: page_size.max(1),
            total,
            next_offset: 0,
            current: VecDeque::new(),
        })
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}

async fn fetch_page(
    pool: &SqlitePool,
    limit: usize,
    offset: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(PAGE_QUERY)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(pool)
        .await
}

fn decode_row(row: MessageRow) -> Option<SourceItem> {
    let data: StoreMessageData = match row.data.as_deref() {
        Some(raw) => match serde_json::from_slice(raw) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("skipping store message {}: bad data column: {}", row.id, err);
                return None;
            }
        },
        None => StoreMessageData::default(),
    };

    let folder = data
        .folder
        .as_ref()
        .map(|folder| folder.path.clone())
        .unwrap_or_default();

    Some(SourceItem {
        message: RawMessage::Store(StoreMessage {
            id: row.id,
            subject: row.subject.unwrap_or_default(),
            data,
            body: row.body,
        }),
        folder,
    })
}

impl Iterator for StoreSource {
    type Item = SourceItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.pop_front() {
                return Some(item);
            }
            if self.next_offset >= self.total {
                return None;
            }

            let offset = self.next_offset;
            self.next_offset += self.page_size as i64;

            match self
                .handle
                .block_on(fetch_page(&self.pool, self.page_size, offset))
            {
                Ok(rows) => {
                    log::debug!("store page at offset {}: {} rows", offset, rows.len());
                    self.current = rows.into_iter().filter_map(decode_row).collect();
                }
                Err(err) => log::warn!("skipping store page at offset {}: {}", offset, err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_store(path: &Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE Message (id VARCHAR(40) PRIMARY KEY, headerMessageId VARCHAR(255), subject TEXT, data TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("CREATE TABLE MessageBody (id VARCHAR(40) PRIMARY KEY, value TEXT)")
            .execute(&pool)
            .await
            .unwrap();

        let rows = [
            (
                "m1",
                "Hello",
                r#"{"date": 1577923200, "folder": {"path": "INBOX"}, "from": [{"email": "a@x.com", "name": "Ann"}], "to": [{"email": "b@x.com", "name": ""}]}"#,
            ),
            ("m2", "Broken", "not json"),
            (
                "m3",
                "Later",
                r#"{"date": 1580601600, "folder": {"path": "Archive"}, "from": [{"email": "c@x.com"}]}"#,
            ),
        ];
        for (id, subject, data) in rows {
            sqlx::query("INSERT INTO Message (id, headerMessageId, subject, data) VALUES (?, ?, ?, ?)")
                .bind(id)
                .bind(format!("<{id}@x.com>"))
                .bind(subject)
                .bind(data)
                .execute(&pool)
                .await
                .unwrap();
        }
        sqlx::query("INSERT INTO MessageBody (id, value) VALUES ('m1', '<p>Hi Bob</p>')")
            .execute(&pool)
            .await
            .unwrap();

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pages_in_id_order_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edgehill.db");
        seed_store(&path).await;

        let source = StoreSource::open(&path, 2).await.unwrap();
        assert_eq!(source.total(), 3);

        let items = tokio::task::spawn_blocking(move || source.collect::<Vec<_>>())
            .await
            .unwrap();

        let ids: Vec<&str> = items
            .iter()
            .map(|item| match &item.message {
                RawMessage::Store(message) => message.id.as_str(),
                RawMessage::Mime(_) => "",
            })
            .collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        assert_eq!(items[0].folder, "INBOX");
        assert_eq!(items[1].folder, "Archive");

        match &items[0].message {
            RawMessage::Store(message) => {
                assert_eq!(message.body.as_deref(), Some("<p>Hi Bob</p>"));
                assert_eq!(message.data.from[0].display(), "Ann");
                assert_eq!(message.data.to[0].display(), "b@x.com");
            }
            RawMessage::Mime(_) => panic!("expected a store row"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_page_is_skipped_and_later_pages_follow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edgehill.db");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        // A BLOB column keeps the integer as stored, so decoding `data` as
        // bytes fails for the whole page holding m2.
        sqlx::query("CREATE TABLE Message (id VARCHAR(40) PRIMARY KEY, subject TEXT, data BLOB)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE MessageBody (id VARCHAR(40) PRIMARY KEY, value TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"INSERT INTO Message (id, subject, data) VALUES
                ('m1', 'First', '{"folder": {"path": "INBOX"}}'),
                ('m2', 'Odd', 42),
                ('m3', 'Third', '{"folder": {"path": "Sent"}}')"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let source = StoreSource::from_pool(pool, 1).await.unwrap();
        assert_eq!(source.total(), 3);

        let items = tokio::task::spawn_blocking(move || source.collect::<Vec<_>>())
            .await
            .unwrap();
        let folders: Vec<&str> = items.iter().map(|item| item.folder.as_str()).collect();
        assert_eq!(folders, vec!["INBOX", "Sent"]);
    }

    #[tokio::test]
    async fn test_missing_database() {
        let err = StoreSource::open(Path::new("/nonexistent/edgehill.db"), 10)
            .await
            .err()
            .expect("missing store should fail");
        assert!(matches!(err, SourceError::MissingPath(_)));
    }
}
