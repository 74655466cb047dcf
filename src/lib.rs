//! # onenote-image-fetcher
//!
//! Downloads the images embedded in OneNote notebooks through Microsoft Graph.
//!
//! The user signs in through a small local web server (OAuth2 authorization-code flow), after
//! which a background walk visits notebook → section group → section → page and saves every
//! image it finds. Progress is streamed to the browser, and failures can be handed to an
//! optional LLM reasoning service that suggests what to do next.
//!
//! ## Building blocks
//!
//! - [`auth::AuthorizationFlow`] - authorize URL, code exchange, refresh
//! - [`token_store::TokenStore`] - the persisted token record
//! - [`graph::GraphClient`] - Graph calls with one refresh-and-retry on 401
//! - [`escalation::ErrorEscalator`] - bounded LLM analysis of failures
//! - [`progress::ProgressSink`] - append-only log read by the progress page
//! - [`walker::HierarchyWalker`] - the notebook traversal
//! - [`api`] - the local web server
//!
//! ## Quick Start
//!
//! ```no_run
//! use onenote_image_fetcher::{Config, Session, run_with_shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let session = Arc::new(Session::new(config)?);
//!
//!     // Serves http://127.0.0.1:5000 until Ctrl+C or "Exit" on the progress page
//!     run_with_shutdown(session).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Local web server
pub mod api;
/// OAuth2 authorization-code flow
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// LLM-backed error escalation
pub mod escalation;
/// Resilient Graph API caller
pub mod graph;
/// Progress log
pub mod progress;
/// Shared application context
pub mod session;
/// Token persistence
pub mod token_store;
/// Utility functions
pub mod utils;
/// Notebook hierarchy walk
pub mod walker;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use config::{Config, DownloadMode, FileCollisionAction, WalkConfig};
pub use error::{ApiError, AuthError, Error, ErrorResponse, Result, ToHttpStatus};
pub use escalation::{ErrorEscalator, Verdict};
pub use progress::{ProgressEvent, ProgressSink};
pub use session::{GraphSession, Session};
pub use token_store::{TokenRecord, TokenStore};
pub use walker::{HierarchyWalker, WalkSummary};

use tokio_util::sync::CancellationToken;

/// Run the web server until a termination signal arrives or the user picks "Exit".
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(session: std::sync::Arc<Session>) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = wait_for_signal() => shutdown.cancel(),
                _ = shutdown.cancelled() => {}
            }
        }
    });

    let result = api::start_server(session, shutdown.clone()).await;
    shutdown.cancel();
    signal_task.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
