//! Sign-in link and OAuth callback handlers

use super::CallbackQuery;
use crate::api::error_response::http_status;
use crate::api::pages;
use crate::api::state::AppState;
use crate::error::{AuthError, Error, Result};
use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
};

/// GET / - Progress page when signed in, otherwise the sign-in link
///
/// Visiting the page while signed in starts a walk unless one is already running.
pub async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    if state.session.has_token() {
        if !state.start_walk() {
            tracing::debug!("walk already running, serving progress page only");
        }
        return Ok(Html(pages::progress_page()));
    }

    let oauth_state = state.issue_state();
    let url = state.session.authorization_url(Some(&oauth_state))?;
    Ok(Html(pages::login_page(url.as_str())))
}

/// GET /getToken - OAuth redirect target
///
/// Exchanges the authorization code, persists the token and starts the walk. Failures are
/// rendered as an HTML page with the matching status code.
pub async fn get_token(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match complete_sign_in(&state, query).await {
        Ok(()) => {
            state.start_walk();
            Html(pages::progress_page()).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "sign-in failed");
            (http_status(&e), Html(pages::error_page(&e))).into_response()
        }
    }
}

async fn complete_sign_in(state: &AppState, query: CallbackQuery) -> Result<()> {
    let progress = state.session.progress();

    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or(error);
        progress.record(format!("Token acquisition failed: {description}"));
        return Err(Error::Auth(AuthError::ProviderRejected { description }));
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        progress.record("No authorization code received");
        return Err(Error::Auth(AuthError::MissingCode));
    };

    state.verify_state(query.state.as_deref())?;
    state.session.complete_authorization(&code).await?;
    Ok(())
}
