//! Configuration types for onenote-image-fetcher

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Identity provider settings for the OAuth2 authorization-code grant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Application (client) ID registered with the identity provider
    #[serde(default)]
    pub client_id: String,

    /// Client secret for the confidential client
    #[serde(default)]
    pub client_secret: String,

    /// Directory tenant ID (or "common"/"organizations")
    #[serde(default)]
    pub tenant_id: String,

    /// Base URL of the identity provider (default: "https://login.microsoftonline.com")
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    /// Redirect URI registered for the app (default: "http://localhost:5000/getToken")
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Requested scopes (default: Notes.Read, Notes.Read.All)
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Location of the persisted token record (default: "token_cache.json")
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,

    /// Timeout for token-endpoint requests (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            tenant_id: String::new(),
            authority_host: default_authority_host(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            token_cache_path: default_token_cache_path(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl AuthConfig {
    /// Tenant-specific authority URL, e.g. `https://login.microsoftonline.com/<tenant>`
    pub fn authority(&self) -> String {
        format!(
            "{}/{}",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

/// Graph API settings used by the resilient caller
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Versioned base URL (default: "https://graph.microsoft.com/v1.0")
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Error escalation settings (external reasoning service)
///
/// When `api_key` is `None` the escalator runs in its disabled state and failures are
/// only reported as plain progress messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Credential for the reasoning service (None = escalation disabled)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Chat-completions base URL (default: "https://api.openai.com/v1")
    #[serde(default = "default_reasoning_base_url")]
    pub base_url: String,

    /// Model name (default: "gpt-4")
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (default: 0.7)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Response token limit (default: 1000)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Reasoning requests allowed per error category before reporting exhaustion (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Log file tailed for context (default: "app.log")
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Number of log lines sent as context (default: 100)
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,

    /// Timeout for one reasoning request (default: 60s)
    #[serde(default = "default_reasoning_timeout")]
    pub request_timeout: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_reasoning_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            log_file: default_log_file(),
            log_tail_lines: default_log_tail_lines(),
            request_timeout: default_reasoning_timeout(),
        }
    }
}

/// Local callback web server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to bind (default: 127.0.0.1:5000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// How often the progress stream checks for new events (default: 100ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Which images are saved for each page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    /// Every `<img>` embedded in the page HTML (default)
    #[default]
    Content,
    /// The SharePoint page preview image (requires `site_id`)
    Preview,
}

impl std::str::FromStr for DownloadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" => Ok(DownloadMode::Content),
            "preview" => Ok(DownloadMode::Preview),
            other => Err(Error::Config {
                message: format!("unknown download mode '{other}' (expected content or preview)"),
                key: Some("DOWNLOAD_MODE".to_string()),
            }),
        }
    }
}

/// File collision handling strategy
///
/// Every visit to `/` with a stored token restarts the walk, so the default
/// rewrites files in place instead of piling up numbered copies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename
    Rename,
    /// Overwrite existing file (default)
    #[default]
    Overwrite,
    /// Skip the file, keep existing
    Skip,
}

impl std::str::FromStr for FileCollisionAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(FileCollisionAction::Rename),
            "overwrite" => Ok(FileCollisionAction::Overwrite),
            "skip" => Ok(FileCollisionAction::Skip),
            other => Err(Error::Config {
                message: format!(
                    "unknown collision action '{other}' (expected rename, overwrite or skip)"
                ),
                key: Some("FILE_COLLISION".to_string()),
            }),
        }
    }
}

/// Hierarchy walk settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Output root for downloaded images (default: "downloaded_images")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Display name of the notebook to walk (None = every notebook)
    #[serde(default)]
    pub notebook_name: Option<String>,

    /// Image source for each page
    #[serde(default)]
    pub mode: DownloadMode,

    /// SharePoint site ID used by [`DownloadMode::Preview`]
    #[serde(default)]
    pub site_id: Option<String>,

    /// What to do when a target file already exists
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            notebook_name: None,
            mode: DownloadMode::default(),
            site_id: None,
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// Main configuration
///
/// Built once at startup (usually by [`Config::from_env`]) and handed to
/// [`Session`](crate::session::Session), which owns it for the process lifetime.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity provider settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Graph API settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Reasoning-service escalation settings
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Local web server settings
    #[serde(default)]
    pub web: WebConfig,

    /// Hierarchy walk settings
    #[serde(default)]
    pub walk: WalkConfig,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Unset or blank variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();

        if let Some(v) = var("CLIENT_ID") {
            config.auth.client_id = v;
        }
        if let Some(v) = var("CLIENT_SECRET") {
            config.auth.client_secret = v;
        }
        if let Some(v) = var("TENANT_ID") {
            config.auth.tenant_id = v;
        }
        if let Some(v) = var("AUTHORITY_HOST") {
            config.auth.authority_host = v;
        }
        if let Some(v) = var("REDIRECT_URI") {
            config.auth.redirect_uri = v;
        }
        if let Some(v) = var("SCOPES") {
            config.auth.scopes = parse_scopes(&v);
        }
        if let Some(v) = var("TOKEN_CACHE_PATH") {
            config.auth.token_cache_path = PathBuf::from(v);
        }

        if let Some(v) = var("GRAPH_BASE_URL") {
            config.graph.base_url = v;
        }

        config.escalation.api_key = var("OPENAI_API_KEY");
        if let Some(v) = var("OPENAI_BASE_URL") {
            config.escalation.base_url = v;
        }
        if let Some(v) = var("OPENAI_MODEL") {
            config.escalation.model = v;
        }
        if let Some(v) = var("MAX_ESCALATION_ATTEMPTS") {
            config.escalation.max_attempts = parse_number(&v, "MAX_ESCALATION_ATTEMPTS")?;
        }
        if let Some(v) = var("LOG_FILE") {
            config.escalation.log_file = PathBuf::from(v);
        }

        if let Some(v) = var("BIND_ADDRESS") {
            config.web.bind_address = v.parse().map_err(|_| Error::Config {
                message: format!("invalid bind address '{v}'"),
                key: Some("BIND_ADDRESS".to_string()),
            })?;
        }

        if let Some(v) = var("OUTPUT_DIR") {
            config.walk.output_dir = PathBuf::from(v);
        }
        config.walk.notebook_name = var("NOTEBOOK_NAME");
        config.walk.site_id = var("SITE_ID");
        if let Some(v) = var("DOWNLOAD_MODE") {
            config.walk.mode = v.parse()?;
        }
        if let Some(v) = var("FILE_COLLISION") {
            config.walk.file_collision = v.parse()?;
        }

        Ok(config)
    }

    /// Check that everything required to start is present.
    ///
    /// A missing reasoning-service key is not an error: escalation is disabled instead.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("CLIENT_ID", &self.auth.client_id),
            ("CLIENT_SECRET", &self.auth.client_secret),
            ("TENANT_ID", &self.auth.tenant_id),
            ("REDIRECT_URI", &self.auth.redirect_uri),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config {
                    message: format!("{key} is required"),
                    key: Some(key.to_string()),
                });
            }
        }

        if self.auth.scopes.is_empty() {
            return Err(Error::Config {
                message: "at least one scope is required".to_string(),
                key: Some("SCOPES".to_string()),
            });
        }

        if url::Url::parse(&self.auth.redirect_uri).is_err() {
            return Err(Error::Config {
                message: format!("REDIRECT_URI '{}' is not a URL", self.auth.redirect_uri),
                key: Some("REDIRECT_URI".to_string()),
            });
        }

        if self.walk.mode == DownloadMode::Preview && self.walk.site_id.is_none() {
            return Err(Error::Config {
                message: "preview mode requires SITE_ID".to_string(),
                key: Some("SITE_ID".to_string()),
            });
        }

        if self.escalation.api_key.is_none() {
            tracing::warn!("OpenAI API key not found, error escalation is disabled");
        }

        Ok(())
    }
}

/// Split a scope list on whitespace or commas
pub fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value.parse().map_err(|_| Error::Config {
        message: format!("{key} must be a number, got '{value}'"),
        key: Some(key.to_string()),
    })
}

// Default value functions
fn default_authority_host() -> String {
    "https://login.microsoftonline.com".into()
}

fn default_redirect_uri() -> String {
    "http://localhost:5000/getToken".into()
}

fn default_scopes() -> Vec<String> {
    vec!["Notes.Read".into(), "Notes.Read.All".into()]
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from("token_cache.json")
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_reasoning_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_reasoning_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_log_file() -> PathBuf {
    PathBuf::from("app.log")
}

fn default_log_tail_lines() -> usize {
    100
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloaded_images")
}
