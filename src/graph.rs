//! Resilient Microsoft Graph caller.
//!
//! Every request goes through [`GraphClient::send`], which:
//!
//! 1. loads the stored token (no token means no request at all),
//! 2. issues the request with `Authorization: Bearer <token>`,
//! 3. on `401` refreshes the token once, persists it and retries once,
//! 4. escalates any remaining failure to the [`ErrorEscalator`] and still returns it.
//!
//! At most two HTTP requests are made per call. There is no backoff and no queueing.

use crate::auth::AuthorizationFlow;
use crate::config::GraphConfig;
use crate::error::ApiError;
use crate::escalation::{ErrorEscalator, report_escalation};
use crate::progress::ProgressSink;
use crate::token_store::TokenStore;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Longest response body kept in an escalation context
const MAX_CONTEXT_BODY: usize = 2000;

/// Optional request parts for [`GraphClient::call`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query string parameters
    pub query: Vec<(String, String)>,
    /// JSON request body
    pub body: Option<Value>,
    /// Extra headers (the `Authorization` header is always set by the caller)
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    /// Add a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// What is known about a failed call, handed to the escalator as-is
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCallContext {
    /// Endpoint (relative to the Graph base) or absolute URL
    pub endpoint: String,
    /// HTTP method
    pub method: String,
    /// Final status code, if a response arrived
    pub status_code: Option<u16>,
    /// Final response body (truncated), if any
    pub response_body: Option<String>,
}

impl ApiCallContext {
    fn new(endpoint: &str, method: &Method) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            status_code: None,
            response_body: None,
        }
    }

    fn with_response(mut self, status: StatusCode, body: String) -> Self {
        self.status_code = Some(status.as_u16());
        self.response_body = Some(truncate(body, MAX_CONTEXT_BODY));
        self
    }

    /// JSON form sent to the reasoning service
    pub fn to_value(&self) -> Value {
        json!({
            "endpoint": self.endpoint,
            "method": self.method,
            "status_code": self.status_code,
            "response_body": self.response_body,
        })
    }

    fn details(&self) -> Vec<(&'static str, String)> {
        let mut details = vec![
            ("Method", self.method.clone()),
            ("Endpoint", self.endpoint.clone()),
        ];
        if let Some(status) = self.status_code {
            details.push(("Response status", status.to_string()));
        }
        if let Some(body) = self.response_body.as_ref().filter(|b| !b.is_empty()) {
            details.push(("Response body", body.clone()));
        }
        details
    }
}

/// Authenticated Graph API client with one-shot token refresh
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tokens: TokenStore,
    auth: AuthorizationFlow,
    scopes: Vec<String>,
    escalator: Arc<ErrorEscalator>,
    progress: ProgressSink,
}

impl GraphClient {
    /// Create a caller. The token is read from `tokens` on every call, never cached here.
    pub fn new(
        client: reqwest::Client,
        config: &GraphConfig,
        tokens: TokenStore,
        auth: AuthorizationFlow,
        scopes: Vec<String>,
        escalator: Arc<ErrorEscalator>,
        progress: ProgressSink,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            tokens,
            auth,
            scopes,
            escalator,
            progress,
        }
    }

    /// Versioned base URL, without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether `url` is served by the Graph API (and therefore needs the bearer token)
    pub fn is_graph_url(&self, url: &str) -> bool {
        url.strip_prefix(&self.base_url)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Call `endpoint` and decode the JSON body. An empty body decodes to `null`.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        let response = self.send(endpoint, method, &options).await?;
        let bytes = response.bytes().await.map_err(|e| ApiError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            self.progress
                .record(format!("Invalid JSON response from {endpoint}: {e}"));
            ApiError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// `GET` `endpoint` as JSON
    pub async fn get_json(&self, endpoint: &str) -> Result<Value, ApiError> {
        self.call(endpoint, Method::GET, RequestOptions::default())
            .await
    }

    /// `GET` `endpoint` as text (page content HTML)
    pub async fn get_text(&self, endpoint: &str) -> Result<String, ApiError> {
        let response = self
            .send(endpoint, Method::GET, &RequestOptions::default())
            .await?;
        response.text().await.map_err(|e| ApiError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    /// `GET` `endpoint` as raw bytes plus the response content type
    pub async fn get_bytes(&self, endpoint: &str) -> Result<(Vec<u8>, Option<String>), ApiError> {
        let response = self
            .send(endpoint, Method::GET, &RequestOptions::default())
            .await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| ApiError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        Ok((bytes.to_vec(), content_type))
    }

    /// Issue the request chain and return the successful response
    #[instrument(skip(self, options), fields(method = %method))]
    async fn send(
        &self,
        endpoint: &str,
        method: Method,
        options: &RequestOptions,
    ) -> Result<reqwest::Response, ApiError> {
        let Some(record) = self.tokens.load() else {
            self.progress.record("No access token available");
            return Err(ApiError::NoToken);
        };

        let context = ApiCallContext::new(endpoint, &method);
        let url = match self.resolve_url(endpoint) {
            Ok(url) => url,
            Err(error) => {
                self.escalate("request_error", &error, context).await;
                return Err(error);
            }
        };

        self.progress
            .record(format!("Making API call to: {endpoint}"));

        let mut response = match self
            .dispatch(&url, &method, options, &record.access_token)
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.transport_failure(context, e).await),
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            self.progress.record("Token expired, attempting to refresh...");

            let Some(refresh_token) = record.refresh_token() else {
                let context = context.with_response(StatusCode::UNAUTHORIZED, String::new());
                self.escalate("refresh_unavailable", &ApiError::AuthExpired, context)
                    .await;
                return Err(ApiError::AuthExpired);
            };

            let refreshed = match self.auth.refresh(refresh_token, &self.scopes).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    warn!(error = %e, "token refresh failed");
                    let context = context.with_response(StatusCode::UNAUTHORIZED, e.to_string());
                    self.escalate("refresh_failed", &ApiError::AuthExpired, context)
                        .await;
                    return Err(ApiError::AuthExpired);
                }
            };

            if let Err(e) = self.tokens.save(&refreshed) {
                warn!(error = %e, "failed to persist refreshed token");
                self.progress
                    .record(format!("Failed to save refreshed token: {e}"));
            }
            self.progress.record("Token refresh successful");

            response = match self
                .dispatch(&url, &method, options, &refreshed.access_token)
                .await
            {
                Ok(response) => response,
                Err(e) => return Err(self.transport_failure(context, e).await),
            };
        }

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Graph call succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = ApiError::HttpError {
            status: status.as_u16(),
        };
        let category = format!("http_{}", status.as_u16());
        self.escalate(&category, &error, context.with_response(status, body))
            .await;
        Err(error)
    }

    async fn dispatch(
        &self,
        url: &str,
        method: &Method,
        options: &RequestOptions,
        access_token: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(access_token)
            .timeout(self.timeout);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }
        request.send().await
    }

    /// Absolute URL for `endpoint`. Absolute URLs are only accepted under the Graph base.
    fn resolve_url(&self, endpoint: &str) -> Result<String, ApiError> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            if self.is_graph_url(endpoint) {
                return Ok(endpoint.to_string());
            }
            return Err(ApiError::Transport {
                endpoint: endpoint.to_string(),
                reason: format!("URL is outside the Graph API base {}", self.base_url),
            });
        }
        Ok(format!(
            "{}/{}",
            self.base_url,
            endpoint.trim_start_matches('/')
        ))
    }

    async fn transport_failure(&self, context: ApiCallContext, e: reqwest::Error) -> ApiError {
        let error = ApiError::Transport {
            endpoint: context.endpoint.clone(),
            reason: e.to_string(),
        };
        self.escalate("request_error", &error, context).await;
        error
    }

    async fn escalate(&self, category: &str, error: &ApiError, context: ApiCallContext) {
        self.progress.record(format!("Error occurred: {error}"));
        if self.escalator.is_enabled() {
            self.progress
                .record("Analyzing error and attempting self-healing...");
        }
        let escalation = self.escalator.evaluate(category, &context.to_value()).await;
        report_escalation(
            &self.progress,
            &escalation,
            &error.to_string(),
            &context.details(),
        );
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CountingBackend, TestGraph, sample_token};
    use std::sync::atomic::Ordering;
    use crate::token_store::TokenRecord;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn messages(progress: &ProgressSink) -> Vec<String> {
        progress.snapshot().into_iter().map(|e| e.message).collect()
    }

    #[tokio::test]
    async fn test_no_token_issues_no_request() {
        let graph = TestGraph::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/notebooks")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::NoToken);
        assert!(graph.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_call_returns_json_and_records_progress() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", Some("refresh-1")));
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/notebooks"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&graph.server)
            .await;

        let value = graph.client().get_json("me/onenote/notebooks").await.unwrap();

        assert_eq!(value, json!({"value": []}));
        assert!(
            messages(&graph.progress).contains(&"Making API call to: me/onenote/notebooks".into())
        );
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_retries() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("old", Some("refresh-1")));

        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/notebooks"))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&graph.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/notebooks"))
            .and(header("authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [1]})))
            .expect(1)
            .mount(&graph.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new",
                "expires_in": 3599,
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&graph.server)
            .await;

        let value = graph.client().get_json("me/onenote/notebooks").await.unwrap();

        assert_eq!(value, json!({"value": [1]}));
        assert_eq!(graph.graph_requests().await, 2);
        assert_eq!(
            graph.tokens.load(),
            Some(TokenRecord {
                access_token: "new".into(),
                expires_in_seconds: 3599,
                refresh_token: Some("refresh-2".into()),
            })
        );
        let messages = messages(&graph.progress);
        assert!(messages.contains(&"Token expired, attempting to refresh...".into()));
        assert!(messages.contains(&"Token refresh successful".into()));
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token_is_auth_expired() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("old", None));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&graph.server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/notebooks")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::AuthExpired);
        assert_eq!(graph.escalator.attempts("refresh_unavailable"), 0);
        assert!(
            messages(&graph.progress)
                .iter()
                .any(|m| m.starts_with("Self-healing is disabled"))
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_is_auth_expired_and_keeps_old_token() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("old", Some("revoked")));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&graph.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/notebooks")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::AuthExpired);
        assert_eq!(graph.tokens.load().unwrap().access_token, "old");
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_not_retried_again() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("old", Some("refresh-1")));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&graph.server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/notebooks")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::HttpError { status: 401 });
        assert_eq!(graph.graph_requests().await, 2);
    }

    #[tokio::test]
    async fn test_server_error_is_escalated_and_returned() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", Some("refresh-1")));
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/sections/s1/pages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/sections/s1/pages")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::HttpError { status: 500 });
        let messages = messages(&graph.progress);
        assert!(messages.contains(&"Error occurred: Graph API returned HTTP 500".into()));
        assert!(messages.contains(&"Response status: 500".into()));
        assert!(messages.contains(&"Response body: boom".into()));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_reaches_escalator() {
        let backend = CountingBackend::new(false);
        let graph = TestGraph::with_backend(backend.clone()).await;
        graph.store_token(sample_token("old", None));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/notebooks")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::AuthExpired);
        assert_eq!(graph.escalator.attempts("refresh_unavailable"), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let messages = messages(&graph.progress);
        assert!(messages.contains(&"Analyzing error and attempting self-healing...".into()));
        assert!(messages.contains(&"Error Analysis: token scope missing".into()));
    }

    #[tokio::test]
    async fn test_rejected_refresh_reaches_escalator() {
        let backend = CountingBackend::new(false);
        let graph = TestGraph::with_backend(backend.clone()).await;
        graph.store_token(sample_token("old", Some("revoked")));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&graph.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/notebooks")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::AuthExpired);
        assert_eq!(graph.escalator.attempts("refresh_failed"), 1);
        assert_eq!(graph.escalator.attempts("refresh_unavailable"), 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_reaches_escalator() {
        let backend = CountingBackend::new(false);
        let graph = TestGraph::with_backend(backend.clone()).await;
        graph.store_token(sample_token("abc", Some("refresh-1")));
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/sections/s1/pages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&graph.server)
            .await;

        let err = graph
            .client()
            .get_json("me/onenote/sections/s1/pages")
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::HttpError { status: 500 });
        assert_eq!(graph.escalator.attempts("http_500"), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_foreign_url_is_recorded_and_not_requested() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", Some("refresh-1")));

        let err = graph
            .client()
            .get_bytes("https://evil.example/x.png")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Transport { .. }));
        assert!(graph.server.received_requests().await.unwrap().is_empty());
        let messages = messages(&graph.progress);
        assert!(messages.iter().any(|m| m.starts_with(
            "Error occurred: request to https://evil.example/x.png failed: URL is outside the Graph API base"
        )));
        assert!(!messages.iter().any(|m| m.starts_with("Making API call to")));
    }

    #[tokio::test]
    async fn test_get_text_and_bytes() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", None));
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/pages/p1/content"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&graph.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/resources/r1/$value"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xFF, 0xD8, 0xFF]),
            )
            .mount(&graph.server)
            .await;

        let client = graph.client();
        let html = client.get_text("me/onenote/pages/p1/content").await.unwrap();
        let resource = format!("{}/me/onenote/resources/r1/$value", client.base_url());
        let (bytes, content_type) = client.get_bytes(&resource).await.unwrap();

        assert_eq!(html, "<html></html>");
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_empty_body_decodes_to_null() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", None));
        Mock::given(method("DELETE"))
            .and(path("/v1.0/me/onenote/pages/p1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&graph.server)
            .await;

        let value = graph
            .client()
            .call("me/onenote/pages/p1", Method::DELETE, RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_query_parameters_are_sent() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", None));
        Mock::given(method("GET"))
            .and(path("/v1.0/me/onenote/notebooks"))
            .and(wiremock::matchers::query_param("$select", "id,displayName"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&graph.server)
            .await;

        graph
            .client()
            .call(
                "me/onenote/notebooks",
                Method::GET,
                RequestOptions::default().query("$select", "id,displayName"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_foreign_url_is_rejected_without_request() {
        let graph = TestGraph::start().await;
        graph.store_token(sample_token("abc", None));

        let err = graph
            .client()
            .get_bytes("https://evil.example.com/steal")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Transport { .. }));
        assert!(graph.server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_is_graph_url() {
        let client = crate::test_helpers::graph_client_for("https://graph.example.com/v1.0");
        assert!(client.is_graph_url("https://graph.example.com/v1.0/me/onenote/resources/1"));
        assert!(!client.is_graph_url("https://graph.example.com/v1.0evil/x"));
        assert!(!client.is_graph_url("https://cdn.example.com/image.png"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("äöü".to_string(), 3), "ä");
        assert_eq!(truncate("short".to_string(), 100), "short");
    }
}
