//! Advisory error analysis through an external reasoning service.
//!
//! [`ErrorEscalator::evaluate`] never fails and never changes what the caller does with
//! the original error: it only produces a [`Verdict`] to show the user. Each error
//! category gets at most `max_attempts` reasoning requests per process; after that a fixed
//! "exhausted" verdict is returned without contacting the service.
//!
//! Without a configured credential the escalator is [disabled](ErrorEscalator::disabled)
//! and callers fall back to plain progress messages.

use crate::config::EscalationConfig;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

/// Bytes read from the end of the log file when gathering context
const LOG_TAIL_WINDOW: u64 = 64 * 1024;

const SYSTEM_PROMPT: &str =
    "You are an expert in debugging Microsoft Graph API and OneNote integration issues.";

/// Structured analysis of a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// What went wrong
    pub explanation: String,

    /// Actionable fixes
    #[serde(default, deserialize_with = "string_list")]
    pub solutions: Vec<String>,

    /// Whether retrying later could succeed without manual intervention
    #[serde(default)]
    pub is_recoverable: bool,

    /// Patterns noticed in the recent logs
    #[serde(default, deserialize_with = "string_list")]
    pub patterns: Vec<String>,

    /// Recommended next steps
    #[serde(default, deserialize_with = "string_list")]
    pub next_steps: Vec<String>,
}

impl Verdict {
    /// Returned once a category has used up its reasoning requests
    pub fn exhausted() -> Self {
        Self {
            explanation: "Maximum self-healing attempts reached".to_string(),
            solutions: vec!["Manual intervention required".to_string()],
            is_recoverable: false,
            patterns: Vec::new(),
            next_steps: vec!["Contact support or review logs manually".to_string()],
        }
    }

    /// Returned when the reasoning request itself fails
    pub fn fallback() -> Self {
        Self {
            explanation: "Failed to analyze error with AI".to_string(),
            solutions: vec!["Check the logs manually for more details".to_string()],
            is_recoverable: false,
            patterns: Vec::new(),
            next_steps: vec!["Review the error logs manually".to_string()],
        }
    }
}

/// Accepts either a list of strings or a single string (models are not consistent)
fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}

/// How an escalation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOutcome {
    /// Analysed; the service considers the failure recoverable
    Recoverable,
    /// Analysed (or fell back); manual intervention needed
    Unrecoverable,
    /// Attempt budget for the category is spent
    Exhausted,
    /// No reasoning service configured
    Disabled,
}

/// Result of [`ErrorEscalator::evaluate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Escalation {
    /// Error category that was evaluated
    pub category: String,
    /// How the escalation ended
    pub outcome: EscalationOutcome,
    /// Analysis, absent when disabled
    pub verdict: Option<Verdict>,
}

/// Failures talking to the reasoning service; always converted into a fallback verdict
#[derive(Debug, Error)]
pub enum ReasoningError {
    /// Request could not be sent or the body could not be read
    #[error("reasoning request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Service answered with a non-success status
    #[error("reasoning service returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Response had no message content
    #[error("reasoning service returned no content")]
    EmptyResponse,

    /// Message content was not a verdict
    #[error("malformed verdict: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Something that can turn an error description into a [`Verdict`]
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Analyse one failure. `logs` is the recent log tail.
    async fn analyze(
        &self,
        category: &str,
        context: &Value,
        logs: &str,
    ) -> std::result::Result<Verdict, ReasoningError>;
}

/// Chat-completions backend (OpenAI-compatible API)
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiBackend {
    /// Create a backend authenticated with `api_key`
    pub fn new(client: reqwest::Client, api_key: String, config: &EscalationConfig) -> Self {
        Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.request_timeout,
        }
    }

    fn prompt(category: &str, context: &Value, logs: &str) -> String {
        let context = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
        format!(
            "Analyze this error in a OneNote image fetching application:\n\n\
             Error Type: {category}\n\
             Context: {context}\n\
             Recent Logs: {logs}\n\n\
             Please provide:\n\
             1. A clear explanation of what went wrong\n\
             2. Specific, actionable solutions\n\
             3. Whether this is a recoverable error\n\
             4. Any patterns or trends in the logs that might help\n\
             5. Recommended next steps\n\n\
             Respond with a single JSON object with these keys:\n\
             - explanation (string)\n\
             - solutions (array of strings)\n\
             - is_recoverable (boolean)\n\
             - patterns (array of strings)\n\
             - next_steps (array of strings)"
        )
    }
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    async fn analyze(
        &self,
        category: &str,
        context: &Value,
        logs: &str,
    ) -> std::result::Result<Verdict, ReasoningError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::prompt(category, context, logs)},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasoningError::Status {
                status: status.as_u16(),
            });
        }

        let payload: Value = response.json().await?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(ReasoningError::EmptyResponse)?;

        parse_verdict(content)
    }
}

/// Parse a verdict from model output, tolerating a surrounding Markdown code fence
pub fn parse_verdict(content: &str) -> std::result::Result<Verdict, ReasoningError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(unfenced.trim())?)
}

/// Bounded, per-category escalation to a [`ReasoningBackend`]
pub struct ErrorEscalator {
    backend: Option<Arc<dyn ReasoningBackend>>,
    attempts: Mutex<HashMap<String, u32>>,
    max_attempts: u32,
    log_file: PathBuf,
    log_tail_lines: usize,
}

impl std::fmt::Debug for ErrorEscalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorEscalator")
            .field("enabled", &self.is_enabled())
            .field("max_attempts", &self.max_attempts)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl ErrorEscalator {
    /// Escalator backed by `backend`
    pub fn new(backend: Arc<dyn ReasoningBackend>, config: &EscalationConfig) -> Self {
        Self {
            backend: Some(backend),
            attempts: Mutex::new(HashMap::new()),
            max_attempts: config.max_attempts,
            log_file: config.log_file.clone(),
            log_tail_lines: config.log_tail_lines,
        }
    }

    /// Escalator that never contacts a service
    pub fn disabled() -> Self {
        let config = EscalationConfig::default();
        Self {
            backend: None,
            attempts: Mutex::new(HashMap::new()),
            max_attempts: config.max_attempts,
            log_file: config.log_file,
            log_tail_lines: config.log_tail_lines,
        }
    }

    /// Build from configuration: OpenAI-backed when a key is set, disabled otherwise
    pub fn from_config(client: reqwest::Client, config: &EscalationConfig) -> Self {
        match &config.api_key {
            Some(key) => {
                let backend = OpenAiBackend::new(client, key.clone(), config);
                Self::new(Arc::new(backend), config)
            }
            None => {
                warn!("Self-healing disabled: OpenAI API key not configured");
                Self::disabled()
            }
        }
    }

    /// Whether a reasoning backend is configured
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Attempts recorded for `category`
    pub fn attempts(&self, category: &str) -> u32 {
        self.lock_attempts().get(category).copied().unwrap_or(0)
    }

    /// Whether `category` still has reasoning requests left
    pub fn should_retry(&self, category: &str) -> bool {
        self.attempts(category) < self.max_attempts
    }

    /// Clear the counter for one category, or all of them
    pub fn reset(&self, category: Option<&str>) {
        let mut attempts = self.lock_attempts();
        match category {
            Some(category) => {
                attempts.remove(category);
            }
            None => attempts.clear(),
        }
    }

    /// Analyse a failure. Never fails; see the module docs.
    pub async fn evaluate(&self, category: &str, context: &Value) -> Escalation {
        let Some(backend) = &self.backend else {
            return Escalation {
                category: category.to_string(),
                outcome: EscalationOutcome::Disabled,
                verdict: None,
            };
        };

        let attempt = {
            let mut attempts = self.lock_attempts();
            let count = attempts.entry(category.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if attempt > self.max_attempts {
            debug!(category, attempt, "escalation budget exhausted");
            return Escalation {
                category: category.to_string(),
                outcome: EscalationOutcome::Exhausted,
                verdict: Some(Verdict::exhausted()),
            };
        }

        let logs = self.read_recent_logs().await;

        let verdict = match backend.analyze(category, context, &logs).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(category, error = %e, "failed to analyze error with reasoning service");
                Verdict::fallback()
            }
        };

        info!(
            category,
            attempt,
            recoverable = verdict.is_recoverable,
            explanation = %verdict.explanation,
            "self-healing analysis"
        );

        Escalation {
            category: category.to_string(),
            outcome: if verdict.is_recoverable {
                EscalationOutcome::Recoverable
            } else {
                EscalationOutcome::Unrecoverable
            },
            verdict: Some(verdict),
        }
    }

    async fn read_recent_logs(&self) -> String {
        match read_log_tail(&self.log_file, LOG_TAIL_WINDOW).await {
            Ok(content) => tail_lines(&content, self.log_tail_lines),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => "No log file found".to_string(),
            Err(e) => {
                warn!(path = %self.log_file.display(), error = %e, "failed to read logs");
                "Failed to read logs".to_string()
            }
        }
    }

    fn lock_attempts(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// At most the last `window` bytes of `path`, starting on a line boundary
async fn read_log_tail(path: &Path, window: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity(usize::try_from(len - start).unwrap_or_default());
    file.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);

    if start == 0 {
        return Ok(text.into_owned());
    }
    // first line is partial
    Ok(text
        .split_once('\n')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_default())
}

/// Last `count` lines of `content`, newline-joined
pub fn tail_lines(content: &str, count: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Relay an escalation to the progress log.
///
/// `error_message` (may be empty) and `details` are what a disabled escalator shows instead
/// of an analysis.
pub fn report_escalation(
    progress: &ProgressSink,
    escalation: &Escalation,
    error_message: &str,
    details: &[(&str, String)],
) {
    let Some(verdict) = &escalation.verdict else {
        progress.record(
            "Self-healing is disabled. Please configure OpenAI API key for advanced error handling.",
        );
        if error_message.is_empty() {
            progress.record(format!("Error: {}", escalation.category));
        } else {
            progress.record(format!("Error: {} ({error_message})", escalation.category));
        }
        for (label, value) in details {
            progress.record(format!("{label}: {value}"));
        }
        return;
    };

    progress.record(format!("Error Analysis: {}", verdict.explanation));

    let sections = [
        ("Suggested Solutions:", &verdict.solutions),
        ("Patterns Found:", &verdict.patterns),
        ("Next Steps:", &verdict.next_steps),
    ];
    for (heading, items) in sections {
        if items.is_empty() {
            continue;
        }
        progress.record(heading);
        for item in items {
            progress.record(format!("- {item}"));
        }
    }

    if !verdict.is_recoverable {
        progress.record("This error is not recoverable. Manual intervention may be required.");
    }
}
