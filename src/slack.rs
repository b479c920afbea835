use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::paginate::Page;
use crate::settings::SlackSettings;
use crate::{AppError, Result};

const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Bearer-authenticated GET client for the Slack Web API.
///
/// Responses are kept as raw JSON so the exported files carry every field
/// Slack sent, not just the ones this crate knows about.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: u32,
    cancel: CancellationToken,
}

impl SlackClient {
    pub fn new(settings: &SlackSettings, token: String, cancel: CancellationToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            token,
            max_retries: settings.max_retries,
            cancel,
        })
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn method_url(&self, method: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, method);
        let mut url = Url::parse(&raw).map_err(|e| AppError::Http(format!("{}: {}", raw, e)))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    /// Issues a GET, retrying on HTTP 429 after the advertised delay.
    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let response = self
                .http
                .get(url.clone())
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .send()
                .await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

            if attempt >= self.max_retries {
                return Err(AppError::SlackRateLimit { retry_after_secs });
            }
            attempt += 1;
            warn!(
                path = url.path(),
                retry_after_secs, attempt, "rate limited by Slack, backing off"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(retry_after_secs)) => {}
            }
        }
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = self.method_url(method, params)?;
        debug!(method, "calling Slack API");
        let response = self.get(url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::SlackApi(format!("{} returned HTTP {}", method, status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::JsonParse(format!("{}: {}", method, e)))
    }

    /// Calls a cursor-paginated method and splits the envelope into a [`Page`].
    async fn call_page(
        &self,
        method: &str,
        params: &[(&str, &str)],
        items_key: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Value>> {
        let mut params = params.to_vec();
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            params.push(("cursor", cursor));
        }
        let envelope = self.call(method, &params).await?;
        Ok(page_from_envelope(envelope, items_key))
    }

    pub async fn conversations_list(
        &self,
        types: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<Value>> {
        let limit = limit.to_string();
        self.call_page(
            "conversations.list",
            &[("limit", limit.as_str()), ("types", types)],
            "channels",
            cursor.as_deref(),
        )
        .await
    }

    pub async fn conversations_history(
        &self,
        channel: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<Value>> {
        let limit = limit.to_string();
        self.call_page(
            "conversations.history",
            &[("channel", channel), ("limit", limit.as_str())],
            "messages",
            cursor.as_deref(),
        )
        .await
    }

    pub async fn conversations_replies(
        &self,
        channel: &str,
        ts: &str,
        cursor: Option<String>,
    ) -> Result<Page<Value>> {
        self.call_page(
            "conversations.replies",
            &[("channel", channel), ("ts", ts)],
            "messages",
            cursor.as_deref(),
        )
        .await
    }

    pub async fn conversations_members(
        &self,
        channel: &str,
        cursor: Option<String>,
    ) -> Result<Page<Value>> {
        self.call_page(
            "conversations.members",
            &[("channel", channel)],
            "members",
            cursor.as_deref(),
        )
        .await
    }

    pub async fn users_list(&self, cursor: Option<String>) -> Result<Page<Value>> {
        self.call_page("users.list", &[], "members", cursor.as_deref())
            .await
    }

    pub async fn users_info(&self, user: &str) -> Result<Value> {
        let envelope = self.call("users.info", &[("user", user)]).await?;
        if !envelope_ok(&envelope) {
            return Err(AppError::SlackApi(format!(
                "users.info {}: {}",
                user,
                envelope_error(&envelope)
            )));
        }
        envelope
            .get("user")
            .cloned()
            .ok_or_else(|| AppError::SlackApi(format!("users.info {}: missing user", user)))
    }

    /// Fetches a private file URL with the same bearer token.
    pub async fn download(&self, file_url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(file_url).map_err(|e| AppError::Http(format!("{}: {}", file_url, e)))?;
        let response = self.get(url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Http(format!("HTTP {} for {}", status, file_url)));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

fn envelope_ok(envelope: &Value) -> bool {
    envelope.get("ok").and_then(Value::as_bool).unwrap_or(false)
}

fn envelope_error(envelope: &Value) -> String {
    envelope
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error")
        .to_string()
}

/// Endpoints such as `users.list` only signal continuation through
/// `response_metadata.next_cursor`; `has_more` is honored when present.
fn page_from_envelope(envelope: Value, items_key: &str) -> Page<Value> {
    if !envelope_ok(&envelope) {
        return Page::failed(envelope_error(&envelope));
    }

    let next_cursor = envelope
        .get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let has_more = envelope
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(next_cursor.is_some());

    let items = match envelope {
        Value::Object(mut map) => match map.remove(items_key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Page {
        ok: true,
        error: None,
        items,
        has_more,
        next_cursor,
    }
}

/// Client pointed at a mock server, shared by the tests of every stage.
#[cfg(test)]
pub(crate) fn test_client(base_url: &str) -> SlackClient {
    let settings = SlackSettings {
        token: String::new(),
        api_base_url: base_url.to_string(),
        request_timeout_secs: 5,
        max_retries: 1,
    };
    SlackClient::new(&settings, "xoxb-test".to_string(), CancellationToken::new())
        .unwrap_or_else(|e| unreachable!("test client: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_page_from_envelope_with_has_more() {
        let page = page_from_envelope(
            json!({
                "ok": true,
                "channels": [{"id": "C1"}, {"id": "C2"}],
                "has_more": true,
                "response_metadata": {"next_cursor": "dXNlcjpVMDYxTkZUVDI="}
            }),
            "channels",
        );

        assert!(page.ok);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("dXNlcjpVMDYxTkZUVDI="));
    }

    #[test]
    fn test_page_from_envelope_cursor_only() {
        let page = page_from_envelope(
            json!({
                "ok": true,
                "members": [{"id": "U1"}],
                "response_metadata": {"next_cursor": "abc"}
            }),
            "members",
        );
        assert!(page.has_more);

        let page = page_from_envelope(
            json!({"ok": true, "members": [], "response_metadata": {"next_cursor": ""}}),
            "members",
        );
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_page_from_envelope_not_ok() {
        let page = page_from_envelope(json!({"ok": false, "error": "invalid_auth"}), "channels");
        assert!(!page.ok);
        assert_eq!(page.error.as_deref(), Some("invalid_auth"));
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_conversations_list_sends_auth_and_params() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .and(header("Authorization", "Bearer xoxb-test"))
            .and(query_param("types", "im"))
            .and(query_param("limit", "1000"))
            .and(query_param("cursor", "next-page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channels": [{"id": "D1", "is_archived": false}],
                "response_metadata": {"next_cursor": ""}
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let page = client
            .conversations_list("im", 1000, Some("next-page".to_string()))
            .await
            .unwrap();

        assert_eq!(page.items, vec![json!({"id": "D1", "is_archived": false})]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_retries_after_rate_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "members": [{"id": "U1"}]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let page = client.users_list(None).await.unwrap();

        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_retries() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.users_list(None).await;

        assert!(matches!(
            result,
            Err(AppError::SlackRateLimit { retry_after_secs: 0 })
        ));
    }

    #[tokio::test]
    async fn test_users_info_not_ok() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U404"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "user_not_found"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.users_info("U404").await;

        assert!(
            matches!(&result, Err(AppError::SlackApi(msg)) if msg.contains("user_not_found")),
            "unexpected result: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files-pri/T1-F1/download/report.pdf"))
            .and(header("Authorization", "Bearer xoxb-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let bytes = client
            .download(&format!("{}/files-pri/T1-F1/download/report.pdf", server.uri()))
            .await
            .unwrap();

        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.download(&format!("{}/missing", server.uri())).await;

        assert!(matches!(result, Err(AppError::Http(_))));
    }

    #[tokio::test]
    async fn test_cancelled_client_does_not_send() {
        let server = MockServer::start().await;
        let client = test_client(&server.uri());
        client.cancellation().cancel();

        let result = client.users_list(None).await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
