//! Application state for the web server

use crate::auth::generate_state;
use crate::config::WalkConfig;
use crate::error::AuthError;
use crate::session::{GraphSession, Session};
use crate::walker::WalkControl;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// Process-wide context: token store, Graph caller, progress log
    pub session: Arc<Session>,

    /// Guard ensuring a single walk at a time
    pub walk: WalkControl,

    /// Settings for the next walk; notebook selection from the progress page updates it
    pub walk_config: Arc<RwLock<WalkConfig>>,

    /// `state` parameter issued with the last authorization link
    pending_state: Arc<Mutex<Option<String>>>,

    /// Cancelled when the user picks "Exit"
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new AppState
    pub fn new(session: Arc<Session>, shutdown: CancellationToken) -> Self {
        let walk_config = session.config().walk.clone();
        Self {
            session,
            walk: WalkControl::new(),
            walk_config: Arc::new(RwLock::new(walk_config)),
            pending_state: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    /// Start a walk with the current settings.
    ///
    /// Returns false when a walk is already running.
    pub fn start_walk(&self) -> bool {
        let config = self
            .walk_config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let session: Arc<dyn GraphSession> = self.session.clone();

        let Some(handle) = self.walk.spawn(session, config) else {
            return false;
        };

        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(summary)) => tracing::info!(
                    pages = summary.pages,
                    images_saved = summary.images_saved,
                    failures = summary.failures,
                    "walk finished"
                ),
                Ok(Err(e)) => tracing::warn!(error = %e, "walk stopped"),
                Err(e) => tracing::error!(error = %e, "walk task panicked"),
            }
        });
        true
    }

    /// Walk `notebook` from now on
    pub fn select_notebook(&self, notebook: &str) {
        self.walk_config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .notebook_name = Some(notebook.to_string());
    }

    /// Issue a fresh `state` value for an authorization link
    pub fn issue_state(&self) -> String {
        let state = generate_state();
        *self.pending_state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        state
    }

    /// Check the `state` returned on the callback.
    ///
    /// When no link was issued by this process (for instance after a restart) any value is
    /// accepted. A matching value is consumed.
    pub fn verify_state(&self, returned: Option<&str>) -> Result<(), AuthError> {
        let mut pending = self.pending_state.lock().unwrap_or_else(|e| e.into_inner());
        match pending.as_deref() {
            None => {
                tracing::debug!("no authorization state pending, skipping check");
                Ok(())
            }
            Some(expected) if Some(expected) == returned => {
                *pending = None;
                Ok(())
            }
            Some(_) => Err(AuthError::StateMismatch),
        }
    }
}
