//! HTTP error response handling for the web server
//!
//! Converts crate errors into HTTP responses with the status from [`ToHttpStatus`] and a
//! JSON [`ErrorResponse`] body.

use crate::error::{Error, ErrorResponse, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Status code for `error`, falling back to 500
pub(crate) fn http_status(error: &Error) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = http_status(&self);
        if status_code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status_code.as_u16(), "request rejected");
        }

        let body: ErrorResponse = self.into();
        (status_code, Json(body)).into_response()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, AuthError};

    async fn body_of(response: Response) -> ErrorResponse {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_option_into_response() {
        let response = Error::InvalidOption("Dance".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_of(response).await;
        assert_eq!(body.error.code, "invalid_option");
        assert!(body.error.message.contains("Dance"));
    }

    #[tokio::test]
    async fn test_missing_code_into_response() {
        let response = Error::Auth(AuthError::MissingCode).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_of(response).await;
        assert_eq!(body.error.code, "missing_code");
        assert!(body.error.message.contains("no authorization code received"));
    }

    #[tokio::test]
    async fn test_graph_error_into_response_carries_status_detail() {
        let response = Error::Api(ApiError::HttpError { status: 503 }).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_of(response).await;
        assert_eq!(body.error.code, "graph_http_error");
        assert_eq!(body.error.details.unwrap()["status"], 503);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            http_status(&Error::Api(ApiError::NoToken)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            http_status(&Error::Server("bind failed".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
