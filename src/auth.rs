//! OAuth2 authorization-code flow against the Microsoft identity platform.
//!
//! [`AuthorizationFlow`] is stateless: it builds the authorize URL, exchanges a code for a
//! token, and exchanges a refresh token for a new one. Persisting the resulting
//! [`TokenRecord`] is the caller's job.
//!
//! ```text
//! UNAUTHENTICATED --authorize URL--> AWAITING_CALLBACK --exchange_code--> AUTHENTICATED
//!                                                 AUTHENTICATED --refresh--> AUTHENTICATED
//! ```

use crate::config::AuthConfig;
use crate::error::{AuthError, Error, Result};
use crate::token_store::TokenRecord;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Scope that makes the provider issue a refresh token
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Length of generated `state` values
const STATE_LENGTH: usize = 32;

/// Token endpoint response (success and error shapes share one struct)
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_record(self) -> std::result::Result<TokenRecord, String> {
        match self.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(TokenRecord {
                access_token,
                expires_in_seconds: self.expires_in.unwrap_or_default(),
                refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            }),
            None => Err(self
                .error_description
                .or(self.error)
                .unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

/// Confidential-client OAuth2 flow
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    authority: String,
    timeout: Duration,
}

impl AuthorizationFlow {
    /// Create a flow for the configured tenant, sharing `client` for token requests
    pub fn new(client: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authority: config.authority(),
            timeout: config.request_timeout,
        }
    }

    /// `<authority>/oauth2/v2.0/authorize`
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority)
    }

    /// `<authority>/oauth2/v2.0/token`
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    /// Build the URL the user visits to grant consent. No network access.
    pub fn build_authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.authorize_endpoint()).map_err(|e| Error::Config {
            message: format!("invalid authority URL: {e}"),
            key: Some("TENANT_ID".to_string()),
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_mode", "query")
                .append_pair("scope", &scope_param(scopes));
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }

        Ok(url)
    }

    /// Exchange an authorization code for a token. Exactly one request to the token endpoint.
    #[instrument(skip(self, code, scopes), fields(endpoint = %self.token_endpoint()))]
    pub async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> std::result::Result<TokenRecord, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::MissingCode);
        }

        let scope = scope_param(scopes);
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ];

        let response = self
            .request_token(&form)
            .await
            .map_err(|description| AuthError::ProviderRejected { description })?;

        match response.into_record() {
            Ok(record) => {
                debug!(
                    expires_in = record.expires_in_seconds,
                    has_refresh_token = record.refresh_token.is_some(),
                    "authorization code exchanged"
                );
                Ok(record)
            }
            Err(description) => {
                warn!(error = %description, "provider rejected authorization code");
                Err(AuthError::ProviderRejected { description })
            }
        }
    }

    /// Exchange a refresh token for a new token. One request to the token endpoint.
    #[instrument(skip(self, refresh_token, scopes), fields(endpoint = %self.token_endpoint()))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> std::result::Result<TokenRecord, AuthError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::RefreshFailed {
                reason: "no refresh token available".to_string(),
            });
        }

        let scope = scope_param(scopes);
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        let response = self
            .request_token(&form)
            .await
            .map_err(|reason| AuthError::RefreshFailed { reason })?;

        response.into_record().map_err(|reason| {
            warn!(error = %reason, "token refresh rejected");
            AuthError::RefreshFailed { reason }
        })
    }

    async fn request_token(
        &self,
        form: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, String> {
        let response = self
            .client
            .post(self.token_endpoint())
            .timeout(self.timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read token response: {e}"))?;

        serde_json::from_str(&body).map_err(|e| {
            warn!(status = %status, error = %e, "token endpoint returned non-JSON body");
            format!("invalid token response (HTTP {status})")
        })
    }
}

/// Space-separated scope list, with `offline_access` appended so a refresh token is issued
pub fn scope_param(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    if !all.contains(&OFFLINE_ACCESS_SCOPE) {
        all.push(OFFLINE_ACCESS_SCOPE);
    }
    all.join(" ")
}

/// Random value for the `state` parameter of the authorize request
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scopes() -> Vec<String> {
        vec!["Notes.Read".to_string(), "Notes.Read.All".to_string()]
    }

    fn flow_for(server_uri: &str) -> AuthorizationFlow {
        flow_with_timeout(server_uri, Duration::from_secs(30))
    }

    fn flow_with_timeout(server_uri: &str, request_timeout: Duration) -> AuthorizationFlow {
        let config = AuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            tenant_id: "tenant-abc".to_string(),
            authority_host: server_uri.to_string(),
            request_timeout,
            ..Default::default()
        };
        AuthorizationFlow::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn test_authorization_url_contains_required_parameters() {
        let flow = flow_for("https://login.microsoftonline.com");
        let url = flow
            .build_authorization_url(&scopes(), "http://localhost:5000/getToken", Some("st4te"))
            .unwrap();

        assert_eq!(
            url.as_str().split('?').next().unwrap(),
            "https://login.microsoftonline.com/tenant-abc/oauth2/v2.0/authorize"
        );
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://localhost:5000/getToken");
        assert_eq!(params["scope"], "Notes.Read Notes.Read.All offline_access");
        assert_eq!(params["state"], "st4te");
    }

    #[test]
    fn test_scope_param_does_not_duplicate_offline_access() {
        let scopes = vec!["Notes.Read".to_string(), "offline_access".to_string()];
        assert_eq!(scope_param(&scopes), "Notes.Read offline_access");
    }

    #[test]
    fn test_generate_state_is_random_alphanumeric() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), STATE_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_exchange_code_returns_token_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=XYZ"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "abc",
                "expires_in": 3600,
                "refresh_token": "refresh-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = flow_for(&server.uri())
            .exchange_code("XYZ", &scopes(), "http://localhost:5000/getToken")
            .await
            .unwrap();

        assert_eq!(record.access_token, "abc");
        assert_eq!(record.expires_in_seconds, 3600);
        assert_eq!(record.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_exchange_code_surfaces_provider_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: The code has expired."
            })))
            .mount(&server)
            .await;

        let err = flow_for(&server.uri())
            .exchange_code("stale", &scopes(), "http://localhost:5000/getToken")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::ProviderRejected {
                description: "AADSTS70008: The code has expired.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_exchange_code_with_empty_code_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = flow_for(&server.uri())
            .exchange_code("  ", &scopes(), "http://localhost:5000/getToken")
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::MissingCode);
    }

    #[tokio::test]
    async fn test_exchange_code_non_json_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = flow_for(&server.uri())
            .exchange_code("XYZ", &scopes(), "http://localhost:5000/getToken")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ProviderRejected { .. }));
    }

    #[tokio::test]
    async fn test_refresh_returns_new_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-token",
                "expires_in": 3599,
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = flow_for(&server.uri())
            .refresh("refresh-1", &scopes())
            .await
            .unwrap();

        assert_eq!(record.access_token, "new-token");
        assert_eq!(record.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_refresh_without_access_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let err = flow_for(&server.uri())
            .refresh("revoked", &scopes())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::RefreshFailed {
                reason: "invalid_grant".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_with_empty_token_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = flow_for(&server.uri())
            .refresh("", &scopes())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshFailed { .. }));
    }

    #[tokio::test]
    async fn test_stalled_token_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-abc/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "late"}))
                    .set_delay(Duration::from_secs(60)),
            )
            .mount(&server)
            .await;

        let flow = flow_with_timeout(&server.uri(), Duration::from_millis(200));
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            flow.refresh("refresh-1", &scopes()),
        )
        .await
        .expect("refresh should give up before the outer timeout")
        .unwrap_err();

        match err {
            AuthError::RefreshFailed { reason } => {
                assert!(reason.starts_with("token request failed"), "{reason}")
            }
            other => panic!("expected RefreshFailed, got {other:?}"),
        }
    }
}
