use crate::config::SearchConfig;
use crate::search::error::SearchError;
use crate::search::models::{IndexStats, MailDocument};
use log::{debug, info, warn};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::{Duration, sleep};

const TASK_POLL_INTERVAL_MS: u64 = 200;
const TASK_TIMEOUT_MS: u64 = 60_000;
const CONNECT_TIMEOUT_MS: u64 = 10_000;
const PRIMARY_KEY: &str = "uid";
const HIGHLIGHT_ATTRIBUTES: [&str; 2] = ["message", "subject"];
const FILTERABLE_ATTRIBUTES: [&str; 5] = ["date", "folder", "from", "to", "cc"];
const SORTABLE_ATTRIBUTES: [&str; 1] = ["date"];

/// Client for the Meilisearch mail index.
#[derive(Clone)]
pub struct SearchService {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    index_uid: String,
}

#[derive(Debug, Clone)]
pub struct MailSearchResults {
    pub hits: Vec<MailHit>,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct MailHit {
    /// The stored document with highlighted `message`/`subject` when available.
    pub document: MailDocument,
}

impl SearchService {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS))
            .user_agent(concat!("mailindex/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SearchError::MeilisearchHttp)?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            index_uid: config.index.clone(),
        })
    }

    /// Build the client, report the server version and make sure the index exists.
    pub async fn connect(config: &SearchConfig) -> Result<Self, SearchError> {
        let service = Self::new(config)?;
        let version = service.version().await?;
        info!("connected to meilisearch {} at {}", version, service.base_url);
        service.ensure_mail_index().await?;
        Ok(service)
    }

    pub fn index_uid(&self) -> &str {
        &self.index_uid
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url_for(path);
        let builder = self.http.request(method, url);
        self.apply_auth(builder)
    }

    fn apply_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder
                .bearer_auth(key)
                .header("X-Meili-API-Key", key.as_str()),
            None => builder,
        }
    }

    fn settings_path(&self, setting: &str) -> String {
        format!("/indexes/{}/settings/{}", self.index_uid, setting)
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<reqwest::Response, SearchError> {
        let response = self
            .request(method, path)
            .json(payload)
            .send()
            .await
            .map_err(SearchError::MeilisearchHttp)?;

        ensure_success(response).await
    }

    async fn send(&self, method: Method, path: &str) -> Result<reqwest::Response, SearchError> {
        let response = self
            .request(method, path)
            .send()
            .await
            .map_err(SearchError::MeilisearchHttp)?;

        ensure_success(response).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, SearchError> {
        self.send(Method::GET, path)
            .await?
            .json()
            .await
            .map_err(SearchError::MeilisearchHttp)
    }

    async fn submit_task<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<u64, SearchError> {
        debug!("meilisearch submit_task: {method} {path}");
        let response = self.send_json(method, path, payload).await?;
        let task: TaskInfo = response
            .json()
            .await
            .map_err(SearchError::MeilisearchHttp)?;
        Ok(task.task_uid)
    }

    async fn wait_for_task(&self, task_uid: u64) -> Result<(), SearchError> {
        let mut elapsed_ms: u64 = 0;
        debug!("meilisearch wait_for_task: awaiting task {task_uid}");

        loop {
            let status: TaskStatus = self.get_json(&format!("/tasks/{}", task_uid)).await?;

            match status.status.as_str() {
                "succeeded" => {
                    debug!(
                        "meilisearch wait_for_task: task {task_uid} succeeded after {elapsed_ms} ms"
                    );
                    return Ok(());
                }
                "failed" | "canceled" => {
                    let message = status
                        .error
                        .and_then(|err| err.message)
                        .unwrap_or_else(|| format!("task {}", status.status));
                    return Err(SearchError::TaskFailed { task_uid, message });
                }
                "enqueued" | "processing" | "pending" => {
                    if elapsed_ms >= TASK_TIMEOUT_MS {
                        return Err(SearchError::TaskTimeout {
                            task_uid,
                            timeout: Duration::from_millis(TASK_TIMEOUT_MS),
                        });
                    }
                    sleep(Duration::from_millis(TASK_POLL_INTERVAL_MS)).await;
                    elapsed_ms += TASK_POLL_INTERVAL_MS;
                }
                other => {
                    return Err(SearchError::TaskFailed {
                        task_uid,
                        message: format!("unexpected task status '{}'", other),
                    });
                }
            }
        }
    }

    async fn index_exists(&self) -> Result<bool, SearchError> {
        let response = self
            .request(Method::GET, &format!("/indexes/{}", self.index_uid))
            .send()
            .await
            .map_err(SearchError::MeilisearchHttp)?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(SearchError::meili_status(other, error_body(response).await)),
        }
    }

    async fn create_index_if_missing(&self) -> Result<(), SearchError> {
        if self.index_exists().await? {
            return Ok(());
        }

        let payload = CreateIndexRequest {
            uid: &self.index_uid,
            primary_key: PRIMARY_KEY,
        };

        let response = self
            .request(Method::POST, "/indexes")
            .json(&payload)
            .send()
            .await
            .map_err(SearchError::MeilisearchHttp)?;

        match response.status() {
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => {
                let task: TaskInfo = response
                    .json()
                    .await
                    .map_err(SearchError::MeilisearchHttp)?;
                info!("creating index {}", self.index_uid);
                match self.wait_for_task(task.task_uid).await {
                    Err(SearchError::TaskFailed { message, .. })
                        if message.contains("already exists") =>
                    {
                        Ok(())
                    }
                    other => other,
                }
            }
            status => {
                let body = error_body(response).await;
                if body.contains("already exists") {
                    Ok(())
                } else {
                    Err(SearchError::meili_status(status, body))
                }
            }
        }
    }

    /// Create the index keyed by `uid` and declare the attributes used for filtering.
    pub async fn ensure_mail_index(&self) -> Result<(), SearchError> {
        self.create_index_if_missing().await?;

        let filterable_task = self
            .submit_task(
                Method::PUT,
                &self.settings_path("filterable-attributes"),
                &FILTERABLE_ATTRIBUTES,
            )
            .await?;
        self.wait_for_task(filterable_task).await?;

        let sortable_task = self
            .submit_task(
                Method::PUT,
                &self.settings_path("sortable-attributes"),
                &SORTABLE_ATTRIBUTES,
            )
            .await?;
        self.wait_for_task(sortable_task).await?;

        Ok(())
    }

    /// Add or replace documents; returns once the task is enqueued.
    pub async fn upsert_mails(&self, documents: &[MailDocument]) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }

        let task = self
            .submit_task(
                Method::POST,
                &format!(
                    "/indexes/{}/documents?primaryKey={}",
                    self.index_uid, PRIMARY_KEY
                ),
                documents,
            )
            .await?;
        debug!(
            "meilisearch upsert_mails: enqueued {} documents as task {}",
            documents.len(),
            task
        );
        Ok(())
    }

    pub async fn version(&self) -> Result<String, SearchError> {
        let version: VersionResponse = self.get_json("/version").await?;
        Ok(version.pkg_version)
    }

    pub async fn stats(&self) -> Result<IndexStats, SearchError> {
        let stats: IndexStatsResponse = self
            .get_json(&format!("/indexes/{}/stats", self.index_uid))
            .await?;

        let server_version = match self.version().await {
            Ok(version) => version,
            Err(err) => {
                warn!("could not read meilisearch version: {}", err);
                "-".to_string()
            }
        };

        Ok(IndexStats {
            number_of_documents: stats.number_of_documents,
            is_indexing: stats.is_indexing,
            server_version,
        })
    }

    pub async fn search(
        &self,
        query: &str,
        filter: Option<&str>,
        limit: usize,
    ) -> Result<MailSearchResults, SearchError> {
        let payload = MailSearchRequest {
            q: query,
            limit,
            filter: filter.filter(|f| !f.trim().is_empty()),
            attributes_to_highlight: &HIGHLIGHT_ATTRIBUTES,
        };

        let response = self
            .send_json(
                Method::POST,
                &format!("/indexes/{}/search", self.index_uid),
                &payload,
            )
            .await?;

        let payload: MeiliSearchResponse<MailDocument> = response
            .json()
            .await
            .map_err(SearchError::MeilisearchHttp)?;

        let total = payload
            .total_hits
            .or(payload.estimated_total_hits)
            .unwrap_or(payload.hits.len() as u64);

        let hits = payload
            .hits
            .into_iter()
            .map(|hit| MailHit {
                document: apply_highlights(hit.document, hit.formatted),
            })
            .collect();

        Ok(MailSearchResults { hits, total })
    }

    // ===== Settings =====

    pub async fn stop_words(&self) -> Result<Vec<String>, SearchError> {
        self.get_json(&self.settings_path("stop-words")).await
    }

    pub async fn set_stop_words(&self, words: &[String]) -> Result<(), SearchError> {
        let task = self
            .submit_task(Method::PUT, &self.settings_path("stop-words"), words)
            .await?;
        self.wait_for_task(task).await
    }

    pub async fn ranking_rules(&self) -> Result<Vec<String>, SearchError> {
        self.get_json(&self.settings_path("ranking-rules")).await
    }

    pub async fn set_ranking_rules(&self, rules: &[String]) -> Result<(), SearchError> {
        let task = self
            .submit_task(Method::PUT, &self.settings_path("ranking-rules"), rules)
            .await?;
        self.wait_for_task(task).await
    }

    pub async fn synonyms(&self) -> Result<BTreeMap<String, Vec<String>>, SearchError> {
        self.get_json(&self.settings_path("synonyms")).await
    }

    /// Replace the synonym table; an empty map clears it.
    pub async fn set_synonyms(
        &self,
        synonyms: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), SearchError> {
        if synonyms.is_empty() {
            info!("clearing synonyms on {}", self.index_uid);
        }
        let task = self
            .submit_task(Method::PUT, &self.settings_path("synonyms"), synonyms)
            .await?;
        self.wait_for_task(task).await
    }
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SearchError::meili_status(status, error_body(response).await))
    }
}

/// Prefer highlighted `message` and `subject` from `_formatted`.
fn apply_highlights(mut document: MailDocument, formatted: Option<serde_json::Value>) -> MailDocument {
    let Some(formatted) = formatted else {
        return document;
    };
    if let Some(message) = formatted.get("message").and_then(|v| v.as_str()) {
        document.message = message.to_string();
    }
    if let Some(subject) = formatted.get("subject").and_then(|v| v.as_str()) {
        document.subject = subject.to_string();
    }
    document
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MailSearchRequest<'a> {
    q: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    attributes_to_highlight: &'a [&'a str],
}

#[derive(Deserialize)]
struct MeiliSearchResponse<T> {
    hits: Vec<MeiliHit<T>>,
    #[serde(rename = "estimatedTotalHits")]
    estimated_total_hits: Option<u64>,
    #[serde(rename = "totalHits")]
    total_hits: Option<u64>,
}

#[derive(Deserialize)]
struct MeiliHit<T> {
    #[serde(flatten)]
    document: T,
    #[serde(rename = "_formatted")]
    formatted: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct TaskInfo {
    #[serde(rename = "taskUid")]
    task_uid: u64,
}

#[derive(Deserialize)]
struct TaskStatus {
    status: String,
    error: Option<TaskError>,
}

#[derive(Deserialize)]
struct TaskError {
    message: Option<String>,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    uid: &'a str,
    #[serde(rename = "primaryKey")]
    primary_key: &'a str,
}

#[derive(Deserialize)]
struct VersionResponse {
    #[serde(rename = "pkgVersion")]
    pkg_version: String,
}

#[derive(Deserialize)]
struct IndexStatsResponse {
    #[serde(rename = "numberOfDocuments")]
    number_of_documents: u64,
    #[serde(rename = "isIndexing")]
    is_indexing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(url: &str) -> SearchConfig {
        SearchConfig {
            url: url.to_string(),
            index: "mail".to_string(),
            api_key: Some("masterKey".to_string()),
            request_timeout: std::time::Duration::from_secs(1),
        }
    }

    #[test]
    fn test_url_building_trims_trailing_slash() {
        let service = SearchService::new(&config("http://localhost:7700/")).unwrap();
        assert_eq!(service.url_for("/version"), "http://localhost:7700/version");
        assert_eq!(
            service.settings_path("stop-words"),
            "/indexes/mail/settings/stop-words"
        );
    }

    #[test]
    fn test_search_request_shape() {
        let request = MailSearchRequest {
            q: "invoice",
            limit: 100,
            filter: Some("date>1577923200"),
            attributes_to_highlight: &HIGHLIGHT_ATTRIBUTES,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "q": "invoice",
                "limit": 100,
                "filter": "date>1577923200",
                "attributesToHighlight": ["message", "subject"],
            })
        );
    }

    #[test]
    fn test_search_response_prefers_highlights() {
        let raw = json!({
            "hits": [{
                "uid": "u1",
                "id": "m1",
                "date": 0,
                "from": "Ann",
                "to": ["Bob"],
                "cc": [],
                "subject": "Invoice",
                "message": "Your invoice",
                "folder": "Inbox",
                "attachments": "",
                "_formatted": {"subject": "<em>Invoice</em>", "message": "Your <em>invoice</em>"}
            }],
            "estimatedTotalHits": 1
        });

        let response: MeiliSearchResponse<MailDocument> = serde_json::from_value(raw).unwrap();
        let hit = response.hits.into_iter().next().unwrap();
        let document = apply_highlights(hit.document, hit.formatted);
        assert_eq!(document.subject, "<em>Invoice</em>");
        assert_eq!(document.message, "Your <em>invoice</em>");
        assert_eq!(response.estimated_total_hits, Some(1));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let service = SearchService::new(&config("http://127.0.0.1:9")).unwrap();
        let err = service.version().await.unwrap_err();
        assert!(matches!(err, SearchError::MeilisearchHttp(_)));
    }
}
