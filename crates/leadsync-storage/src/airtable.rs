//! REST client for the hosted record store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use leadsync_core::RemoteRecord;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::record_store::{ListQuery, RecordPage, RecordStore, RemoteError};
use crate::throttle::{
    classify_reqwest_error, classify_status, BackoffPolicy, RetryDisposition, SlidingWindowLimiter,
};

pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_url: String,
    pub base_id: String,
    pub api_key: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl AirtableConfig {
    pub fn new(base_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            base_id: base_id.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct AirtableClient {
    client: reqwest::Client,
    config: AirtableConfig,
    limiter: Arc<SlidingWindowLimiter>,
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    #[serde(default)]
    records: Vec<RemoteRecord>,
}

#[derive(Debug, Deserialize)]
struct DeletedEntry {
    id: String,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct DeletedEnvelope {
    #[serde(default)]
    records: Vec<DeletedEntry>,
}

impl AirtableClient {
    pub fn new(config: AirtableConfig, limiter: Arc<SlidingWindowLimiter>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Self::with_http_client(config, limiter, client)
    }

    /// Use a caller-built HTTP client; `config.timeout` is then the caller's concern.
    pub fn with_http_client(
        config: AirtableConfig,
        limiter: Arc<SlidingWindowLimiter>,
        client: reqwest::Client,
    ) -> anyhow::Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RemoteError::MissingCredential("AIRTABLE_API_KEY").into());
        }
        if config.base_id.trim().is_empty() {
            return Err(RemoteError::MissingCredential("AIRTABLE_BASE_ID").into());
        }
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn table_url(&self, table: &str, id: Option<&str>) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.config.api_url)
            .map_err(|err| RemoteError::InvalidUrl(format!("{}: {err}", self.config.api_url)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RemoteError::InvalidUrl(self.config.api_url.clone()))?;
            segments.pop_if_empty().push(&self.config.base_id).push(table);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Send one request. Only GETs are retried; writes surface their first failure.
    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, RemoteError> {
        let retries = if method == Method::GET {
            self.config.backoff.max_retries
        } else {
            0
        };

        for attempt in 0..=retries {
            self.limiter.acquire().await;
            debug!(%method, url = %url, attempt, "remote call");

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(&self.config.api_key)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < retries
                    {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(RemoteError::Request(err));
                }
            };

            let status = response.status();
            if status.is_success() {
                let value = response.json::<Value>().await.map_err(|err| RemoteError::Decode {
                    url: url.to_string(),
                    message: err.to_string(),
                })?;
                return Ok(Some(value));
            }
            if status == StatusCode::NOT_FOUND && method == Method::GET {
                return Ok(None);
            }
            if classify_status(status) == RetryDisposition::Retryable && attempt < retries {
                tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                continue;
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(url = %url, "remote store rate limit hit");
                return Err(RemoteError::RateLimited {
                    url: url.to_string(),
                });
            }
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), url = %url, body = %body, "remote call failed");
            return Err(RemoteError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        Err(RemoteError::Unavailable(format!("retries exhausted for {url}")))
    }

    fn decode<T: for<'de> Deserialize<'de>>(url: &Url, value: Value) -> Result<T, RemoteError> {
        serde_json::from_value(value).map_err(|err| RemoteError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn get_record(&self, table: &str, id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        let url = self.table_url(table, Some(id))?;
        match self.send(Method::GET, url.clone(), &[], None).await? {
            Some(value) => Ok(Some(Self::decode(&url, value)?)),
            None => Ok(None),
        }
    }

    async fn create_records(
        &self,
        table: &str,
        records: Vec<Map<String, Value>>,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let url = self.table_url(table, None)?;
        let body = json!({
            "records": records.into_iter().map(|fields| json!({ "fields": fields })).collect::<Vec<_>>(),
        });
        let value = self
            .send(Method::POST, url.clone(), &[], Some(&body))
            .await?
            .unwrap_or(Value::Null);
        let envelope: RecordsEnvelope = Self::decode(&url, value)?;
        Ok(envelope.records)
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<RemoteRecord, RemoteError> {
        let url = self.table_url(table, Some(id))?;
        let body = json!({ "fields": fields });
        let value = self
            .send(Method::PATCH, url.clone(), &[], Some(&body))
            .await?
            .unwrap_or(Value::Null);
        Self::decode(&url, value)
    }

    async fn delete_records(&self, table: &str, ids: &[String]) -> Result<Vec<String>, RemoteError> {
        let url = self.table_url(table, None)?;
        let query: Vec<(&str, String)> = ids.iter().map(|id| ("records[]", id.clone())).collect();
        let value = self
            .send(Method::DELETE, url.clone(), &query, None)
            .await?
            .unwrap_or(Value::Null);
        let envelope: DeletedEnvelope = Self::decode(&url, value)?;
        Ok(envelope
            .records
            .into_iter()
            .filter(|entry| entry.deleted)
            .map(|entry| entry.id)
            .collect())
    }

    async fn list_records(&self, table: &str, query: &ListQuery) -> Result<RecordPage, RemoteError> {
        let url = self.table_url(table, None)?;
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(formula) = &query.filter_formula {
            params.push(("filterByFormula", formula.clone()));
        }
        for field in &query.fields {
            params.push(("fields[]", field.clone()));
        }
        if let Some(offset) = &query.offset {
            params.push(("offset", offset.clone()));
        }
        let value = self
            .send(Method::GET, url.clone(), &params, None)
            .await?
            .unwrap_or(Value::Null);
        Self::decode(&url, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client(api_url: &str) -> AirtableClient {
        let mut config = AirtableConfig::new("appBase", "keySecret");
        config.api_url = api_url.to_string();
        AirtableClient::new(
            config,
            Arc::new(SlidingWindowLimiter::new(5, Duration::from_secs(1))),
        )
        .expect("client")
    }

    #[test]
    fn table_urls_escape_table_names() {
        let client = client("https://api.airtable.com/v0");
        let url = client.table_url("Archived Leads", Some("rec1")).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/appBase/Archived%20Leads/rec1"
        );

        let trailing = self::client("https://example.test/v0/");
        assert_eq!(
            trailing.table_url("Leads", None).expect("url").as_str(),
            "https://example.test/v0/appBase/Leads"
        );
    }

    #[test]
    fn blank_credentials_are_rejected() {
        let limiter = Arc::new(SlidingWindowLimiter::new(5, Duration::from_secs(1)));
        let err = AirtableClient::new(AirtableConfig::new("appBase", "  "), limiter)
            .expect_err("missing key");
        assert!(err.to_string().contains("AIRTABLE_API_KEY"));
    }

    #[test]
    fn deleted_envelope_keeps_only_confirmed_ids() {
        let envelope: DeletedEnvelope = serde_json::from_value(json!({
            "records": [{"id": "rec1", "deleted": true}, {"id": "rec2", "deleted": false}]
        }))
        .expect("decode");
        let ids: Vec<_> = envelope
            .records
            .into_iter()
            .filter(|e| e.deleted)
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["rec1".to_string()]);
    }

    /// Answers one connection per canned `(status, body)` and keeps each request head.
    struct CannedServer {
        url: String,
        heads: Arc<Mutex<Vec<String>>>,
    }

    impl CannedServer {
        async fn start(replies: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("addr");
            let heads = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&heads);
            tokio::spawn(async move {
                for (status, body) in replies {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let head = read_head(&mut socket).await;
                    seen.lock().expect("heads").push(head);
                    let reply = format!(
                        "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
            Self {
                url: format!("http://{addr}/v0"),
                heads,
            }
        }

        fn request_lines(&self) -> Vec<String> {
            self.heads
                .lock()
                .expect("heads")
                .iter()
                .map(|head| head.lines().next().unwrap_or_default().to_string())
                .collect()
        }

        fn client(&self) -> AirtableClient {
            let mut config = AirtableConfig::new("appBase", "keySecret");
            config.api_url = self.url.clone();
            config.backoff = BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            };
            let http = reqwest::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("http client");
            AirtableClient::with_http_client(
                config,
                Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(1))),
                http,
            )
            .expect("client")
        }
    }

    /// Request line and headers; the body is drained so the client sees a clean reply.
    async fn read_head(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return String::from_utf8_lossy(&buf).into_owned();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).into_owned();
                let body_len = head
                    .lines()
                    .find_map(|line| {
                        let line = line.to_ascii_lowercase();
                        line.strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                while buf.len() < end + 4 + body_len {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                return head;
            }
        }
    }

    #[tokio::test]
    async fn missing_record_reads_as_none() {
        let server = CannedServer::start(vec![(404, r#"{"error":"NOT_FOUND"}"#)]).await;

        let record = server.client().get_record("Leads", "recGone").await.expect("get");

        assert!(record.is_none());
        assert_eq!(server.request_lines(), ["GET /v0/appBase/Leads/recGone HTTP/1.1"]);
        let head = server.heads.lock().expect("heads")[0].to_ascii_lowercase();
        assert!(head.contains("authorization: bearer keysecret"));
    }

    #[tokio::test]
    async fn reads_retry_server_errors() {
        let server = CannedServer::start(vec![
            (503, "{}"),
            (200, r#"{"id":"rec1","createdTime":"2025-07-31T00:00:00.000Z","fields":{"Company Name":"Acme"}}"#),
        ])
        .await;

        let record = server
            .client()
            .get_record("Leads", "rec1")
            .await
            .expect("get")
            .expect("found");

        assert_eq!(record.id, "rec1");
        assert_eq!(record.text("Company Name").as_deref(), Some("Acme"));
        assert_eq!(server.request_lines().len(), 2);
    }

    #[tokio::test]
    async fn read_rate_limit_surfaces_once_retries_run_out() {
        let server = CannedServer::start(vec![(429, "{}"), (429, "{}"), (429, "{}")]).await;

        let err = server.client().get_record("Leads", "rec1").await.expect_err("limited");

        assert!(err.is_rate_limited(), "{err}");
        assert_eq!(server.request_lines().len(), 3);
    }

    #[tokio::test]
    async fn writes_are_sent_once() {
        let server = CannedServer::start(vec![(429, "{}")]).await;
        let mut fields = Map::new();
        fields.insert("Company Name".into(), json!("Acme"));

        let err = server
            .client()
            .create_records("Leads", vec![fields])
            .await
            .expect_err("limited");

        assert!(err.is_rate_limited(), "{err}");
        assert_eq!(server.request_lines(), ["POST /v0/appBase/Leads HTTP/1.1"]);

        let server = CannedServer::start(vec![(503, r#"{"error":"busy"}"#)]).await;
        let err = server
            .client()
            .update_fields("Leads", "rec1", Map::new())
            .await
            .expect_err("unavailable");

        assert!(matches!(err, RemoteError::HttpStatus { status: 503, .. }), "{err}");
        assert_eq!(server.request_lines(), ["PATCH /v0/appBase/Leads/rec1 HTTP/1.1"]);
    }

    #[tokio::test]
    async fn bulk_delete_sends_ids_as_repeated_query_pairs() {
        let server = CannedServer::start(vec![(
            200,
            r#"{"records":[{"id":"rec1","deleted":true},{"id":"rec2","deleted":true}]}"#,
        )])
        .await;

        let deleted = server
            .client()
            .delete_records("Leads", &["rec1".to_string(), "rec2".to_string()])
            .await
            .expect("delete");

        assert_eq!(deleted, ["rec1", "rec2"]);
        assert_eq!(
            server.request_lines(),
            ["DELETE /v0/appBase/Leads?records%5B%5D=rec1&records%5B%5D=rec2 HTTP/1.1"]
        );
    }
}
