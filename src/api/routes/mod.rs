//! Route handlers for the web server
//!
//! Handlers are organized by concern:
//! - [`auth`] - Sign-in link and OAuth callback
//! - [`progress`] - Server-sent progress stream
//! - [`options`] - Prompt choices posted from the progress page

use serde::{Deserialize, Serialize};

mod auth;
mod options;
mod progress;

pub use auth::*;
pub use options::*;
pub use progress::*;

/// Query parameters the identity provider appends to the redirect URI
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code
    pub code: Option<String>,
    /// `state` echoed back from the authorization link
    pub state: Option<String>,
    /// Provider error code (e.g. `access_denied`)
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// Body of `POST /handle_option`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptionRequest {
    /// Label of the button the user pressed
    pub option: String,
}

/// Response of `POST /handle_option`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OptionResponse {
    /// What the server did: `exiting`, `restarted`, `continuing`, `prompted`, `started`
    /// or `already_running`
    pub status: String,
}

impl OptionResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}
