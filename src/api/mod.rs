//! Local web server
//!
//! Serves the sign-in link, receives the OAuth redirect, streams progress to the browser and
//! takes the user's answers to prompts.

use crate::Result;
use crate::error::Error;
use crate::session::Session;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod pages;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the router with all route definitions
///
/// # Routes
///
/// - `GET /` - Sign-in link, or the progress page (starting a walk) when a token is stored
/// - `GET /getToken` - OAuth redirect target (`?code=...&state=...`)
/// - `GET /progress` - Server-sent events stream of the progress log
/// - `POST /handle_option` - Prompt choice (`{"option": "..."}`)
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/getToken", get(routes::get_token))
        .route("/progress", get(routes::progress))
        .route("/handle_option", post(routes::handle_option))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the web server on the configured bind address.
///
/// Runs until `shutdown` is cancelled, either by the "Exit" option or by the caller.
///
/// # Example
///
/// ```no_run
/// use onenote_image_fetcher::{Config, Session};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Arc::new(Session::new(Config::from_env()?)?);
/// onenote_image_fetcher::api::start_server(session, CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_server(session: Arc<Session>, shutdown: CancellationToken) -> Result<()> {
    let bind_address = session.config().web.bind_address;

    tracing::info!(
        address = %bind_address,
        "Starting web server"
    );

    let app = create_router(AppState::new(session, shutdown.clone()));

    let listener = TcpListener::bind(bind_address).await.map_err(Error::Io)?;

    tracing::info!(
        address = %bind_address,
        "Open http://{} in a browser to sign in",
        bind_address
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    tracing::info!("Web server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
