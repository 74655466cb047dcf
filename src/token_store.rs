//! Bearer-token persistence.
//!
//! A single [`TokenRecord`] lives in a flat JSON file:
//!
//! ```json
//! {
//!   "access_token": {
//!     "token": "eyJ0eXAi...",
//!     "expires_at": 3599,
//!     "refresh_token": "0.AXkA..."
//!   }
//! }
//! ```
//!
//! Loading never fails: a missing, unreadable or corrupt file means "not signed in".
//! There is no locking; one process owns the file.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Token issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token sent to the Graph API
    #[serde(rename = "token")]
    pub access_token: String,

    /// Lifetime reported by the provider at issue time. Only used as a presence marker;
    /// staleness is detected by the API answering 401.
    #[serde(rename = "expires_at", default)]
    pub expires_in_seconds: i64,

    /// Refresh token, when the provider issued one
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenRecord {
    /// Refresh token if present and non-empty
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<TokenRecord>,
}

/// File-backed store for the single token record
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored record; `None` if absent, unreadable, corrupt or empty.
    pub fn load(&self) -> Option<TokenRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read token cache");
                return None;
            }
        };

        let cache: CacheFile = match serde_json::from_str(&content) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt token cache");
                return None;
            }
        };

        cache
            .access_token
            .filter(|record| !record.access_token.is_empty())
    }

    /// Overwrite the stored record. Not atomic: a crash mid-write leaves a file that
    /// [`load`](Self::load) treats as absent.
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        self.write(&CacheFile {
            access_token: Some(record.clone()),
        })?;
        debug!(path = %self.path.display(), "token cache updated");
        Ok(())
    }

    /// Forget the stored record
    pub fn clear(&self) -> Result<()> {
        self.write(&CacheFile::default())?;
        debug!(path = %self.path.display(), "token cache cleared");
        Ok(())
    }

    fn write(&self, cache: &CacheFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(cache)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
