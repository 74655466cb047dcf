//! Process-wide context and the capability interface used by the hierarchy walk.
//!
//! [`Session`] is built once at startup and shared by `Arc`. It owns the configuration, the
//! shared HTTP client, the token store, the authorization flow, the resilient Graph caller,
//! the escalator and the progress sink. The walker only sees it through [`GraphSession`], so
//! nothing here depends on the walker.

use crate::auth::AuthorizationFlow;
use crate::config::Config;
use crate::error::{ApiError, AuthError, Result};
use crate::escalation::{ErrorEscalator, report_escalation};
use crate::graph::GraphClient;
use crate::progress::ProgressSink;
use crate::token_store::{TokenRecord, TokenStore};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Downloaded resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Response body
    pub bytes: Vec<u8>,
    /// `Content-Type` header, if the server sent one
    pub content_type: Option<String>,
}

/// What the hierarchy walk needs from its environment
#[async_trait]
pub trait GraphSession: Send + Sync {
    /// `GET` a Graph endpoint as JSON
    async fn call(&self, endpoint: &str) -> std::result::Result<Value, ApiError>;

    /// `GET` a Graph endpoint as text
    async fn call_text(&self, endpoint: &str) -> std::result::Result<String, ApiError>;

    /// Fetch a resource by absolute URL (authenticated when it is a Graph URL)
    async fn download(&self, url: &str) -> std::result::Result<Download, ApiError>;

    /// Append a progress message
    fn report_progress(&self, message: &str);

    /// Ask the user to pick one of `options`
    fn prompt(&self, message: &str, options: &[String]);

    /// Escalate a walk-level failure and relay the verdict to the progress log
    async fn escalate(&self, category: &str, context: Value);
}

/// Shared application context
#[derive(Debug)]
pub struct Session {
    config: Config,
    http: reqwest::Client,
    tokens: TokenStore,
    auth: AuthorizationFlow,
    graph: GraphClient,
    escalator: Arc<ErrorEscalator>,
    progress: ProgressSink,
}

impl Session {
    /// Build the context. Escalation is enabled when a reasoning key is configured.
    pub fn new(config: Config) -> Result<Self> {
        let http = build_http_client()?;
        let escalator = Arc::new(ErrorEscalator::from_config(
            http.clone(),
            &config.escalation,
        ));
        Ok(Self::assemble(config, http, escalator))
    }

    /// Build the context around an existing escalator
    pub fn with_escalator(config: Config, escalator: Arc<ErrorEscalator>) -> Result<Self> {
        let http = build_http_client()?;
        Ok(Self::assemble(config, http, escalator))
    }

    fn assemble(
        config: Config,
        http: reqwest::Client,
        escalator: Arc<ErrorEscalator>,
    ) -> Self {
        let tokens = TokenStore::new(&config.auth.token_cache_path);
        let auth = AuthorizationFlow::new(http.clone(), &config.auth);
        let progress = ProgressSink::new();
        let graph = GraphClient::new(
            http.clone(),
            &config.graph,
            tokens.clone(),
            auth.clone(),
            config.auth.scopes.clone(),
            escalator.clone(),
            progress.clone(),
        );

        Self {
            config,
            http,
            tokens,
            auth,
            graph,
            escalator,
            progress,
        }
    }

    /// Configuration this session was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Progress log shared with the web server
    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Resilient Graph caller
    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    /// Token persistence
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Error escalator
    pub fn escalator(&self) -> &Arc<ErrorEscalator> {
        &self.escalator
    }

    /// Whether a token is stored
    pub fn has_token(&self) -> bool {
        self.tokens.load().is_some()
    }

    /// URL the user visits to sign in
    pub fn authorization_url(&self, state: Option<&str>) -> Result<Url> {
        self.auth.build_authorization_url(
            &self.config.auth.scopes,
            &self.config.auth.redirect_uri,
            state,
        )
    }

    /// Exchange the callback `code` and persist the resulting token
    pub async fn complete_authorization(&self, code: &str) -> Result<TokenRecord> {
        self.progress.record("Acquiring access token...");
        let record = match self
            .auth
            .exchange_code(
                code,
                &self.config.auth.scopes,
                &self.config.auth.redirect_uri,
            )
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let reason = match &e {
                    AuthError::ProviderRejected { description } => description.clone(),
                    other => other.to_string(),
                };
                self.progress
                    .record(format!("Token acquisition failed: {reason}"));
                return Err(e.into());
            }
        };

        self.tokens.save(&record)?;
        self.progress.record("Access token acquired successfully!");
        Ok(record)
    }

    /// Forget the stored token
    pub fn logout(&self) -> Result<()> {
        self.tokens.clear()?;
        info!(path = %self.tokens.path().display(), "signed out");
        Ok(())
    }

    async fn fetch_plain(&self, url: &str) -> std::result::Result<Download, ApiError> {
        let transport = |e: reqwest::Error| ApiError::Transport {
            endpoint: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .http
            .get(url)
            .timeout(self.config.graph.request_timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "image download failed");
            return Err(ApiError::HttpError {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(transport)?;

        Ok(Download {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl GraphSession for Session {
    async fn call(&self, endpoint: &str) -> std::result::Result<Value, ApiError> {
        self.graph.get_json(endpoint).await
    }

    async fn call_text(&self, endpoint: &str) -> std::result::Result<String, ApiError> {
        self.graph.get_text(endpoint).await
    }

    async fn download(&self, url: &str) -> std::result::Result<Download, ApiError> {
        if self.graph.is_graph_url(url) {
            let (bytes, content_type) = self.graph.get_bytes(url).await?;
            return Ok(Download {
                bytes,
                content_type,
            });
        }
        self.fetch_plain(url).await
    }

    fn report_progress(&self, message: &str) {
        self.progress.record(message);
    }

    fn prompt(&self, message: &str, options: &[String]) {
        self.progress.record_prompt(message, options.to_vec());
    }

    async fn escalate(&self, category: &str, context: Value) {
        if self.escalator.is_enabled() {
            self.progress
                .record("Analyzing error and attempting self-healing...");
        }
        let escalation = self.escalator.evaluate(category, &context).await;
        let message = context
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default();
        report_escalation(&self.progress, &escalation, message, &context_details(&context));
    }
}

/// Scalar fields of an escalation context, for the disabled-escalator report
fn context_details(context: &Value) -> Vec<(&str, String)> {
    let Some(fields) = context.as_object() else {
        return Vec::new();
    };
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != "error")
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(items) if items.iter().all(Value::is_string) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => return None,
            };
            Some((key.as_str(), text))
        })
        .collect()
}

fn build_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("onenote-image-fetcher/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
