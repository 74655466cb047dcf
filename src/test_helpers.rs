//! Shared test helpers: a mock identity provider + Graph API on one wiremock server.

use crate::auth::AuthorizationFlow;
use crate::config::{AuthConfig, Config, EscalationConfig, GraphConfig};
use crate::escalation::{ErrorEscalator, ReasoningBackend, ReasoningError, Verdict};
use crate::graph::GraphClient;
use crate::progress::ProgressSink;
use crate::session::Session;
use crate::token_store::{TokenRecord, TokenStore};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::MockServer;

/// Token record with a one-hour lifetime
pub(crate) fn sample_token(access_token: &str, refresh_token: Option<&str>) -> TokenRecord {
    TokenRecord {
        access_token: access_token.to_string(),
        expires_in_seconds: 3600,
        refresh_token: refresh_token.map(str::to_string),
    }
}

/// Configuration pointing the identity provider and Graph API at `server_uri`,
/// with all local state inside `temp_dir`.
pub(crate) fn test_config(server_uri: &str, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.auth = AuthConfig {
        client_id: "client-123".to_string(),
        client_secret: "secret".to_string(),
        tenant_id: "tenant-abc".to_string(),
        authority_host: server_uri.to_string(),
        token_cache_path: temp_dir.path().join("token_cache.json"),
        ..Default::default()
    };
    config.graph.base_url = format!("{server_uri}/v1.0");
    config.escalation.log_file = temp_dir.path().join("app.log");
    config.walk.output_dir = temp_dir.path().join("downloaded_images");
    config
}

/// Graph client that is never expected to send anything
pub(crate) fn graph_client_for(base_url: &str) -> GraphClient {
    let config = GraphConfig {
        base_url: base_url.to_string(),
        ..Default::default()
    };
    let http = reqwest::Client::new();
    GraphClient::new(
        http.clone(),
        &config,
        TokenStore::new("unused_token_cache.json"),
        AuthorizationFlow::new(http, &AuthConfig::default()),
        vec!["Notes.Read".to_string()],
        Arc::new(ErrorEscalator::disabled()),
        ProgressSink::new(),
    )
}

/// Backend that counts calls and returns a canned verdict (or an error)
pub(crate) struct CountingBackend {
    pub calls: AtomicUsize,
    pub last_logs: Mutex<String>,
    fail: bool,
}

impl CountingBackend {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            last_logs: Mutex::new(String::new()),
            fail,
        })
    }
}

#[async_trait]
impl ReasoningBackend for CountingBackend {
    async fn analyze(
        &self,
        _category: &str,
        _context: &Value,
        logs: &str,
    ) -> std::result::Result<Verdict, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_logs.lock().unwrap() = logs.to_string();
        if self.fail {
            return Err(ReasoningError::EmptyResponse);
        }
        Ok(Verdict {
            explanation: "token scope missing".into(),
            solutions: vec!["grant Notes.Read.All".into()],
            is_recoverable: true,
            patterns: vec![],
            next_steps: vec!["re-authenticate".into()],
        })
    }
}

/// Mock server plus the local state a caller needs.
/// The temp dir lives as long as this value.
pub(crate) struct TestGraph {
    pub server: MockServer,
    pub config: Config,
    pub tokens: TokenStore,
    pub progress: ProgressSink,
    pub escalator: Arc<ErrorEscalator>,
    _temp_dir: TempDir,
}

impl TestGraph {
    /// Start a mock server with escalation disabled
    pub async fn start() -> Self {
        Self::with_escalator(Arc::new(ErrorEscalator::disabled())).await
    }

    /// Start a mock server with escalation enabled over `backend`
    pub async fn with_backend(backend: Arc<CountingBackend>) -> Self {
        let escalator = ErrorEscalator::new(backend, &EscalationConfig::default());
        Self::with_escalator(Arc::new(escalator)).await
    }

    /// Start a mock server around `escalator`
    pub async fn with_escalator(escalator: Arc<ErrorEscalator>) -> Self {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&server.uri(), &temp_dir);
        let tokens = TokenStore::new(&config.auth.token_cache_path);
        Self {
            server,
            config,
            tokens,
            progress: ProgressSink::new(),
            escalator,
            _temp_dir: temp_dir,
        }
    }

    /// Persist `record` as the signed-in token
    pub fn store_token(&self, record: TokenRecord) {
        self.tokens.save(&record).unwrap();
    }

    /// Resilient caller sharing this fixture's store, sink and escalator
    pub fn client(&self) -> GraphClient {
        let http = reqwest::Client::new();
        GraphClient::new(
            http.clone(),
            &self.config.graph,
            self.tokens.clone(),
            AuthorizationFlow::new(http, &self.config.auth),
            self.config.auth.scopes.clone(),
            self.escalator.clone(),
            self.progress.clone(),
        )
    }

    /// Full session over this fixture's configuration (with its own progress sink)
    pub fn session(&self) -> Session {
        Session::with_escalator(self.config.clone(), self.escalator.clone()).unwrap()
    }

    /// Number of requests the mock server received under the Graph base path
    pub async fn graph_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().starts_with("/v1.0/"))
            .count()
    }
}
