//! Utility functions for file naming and path collision handling

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Name used when sanitizing leaves nothing
const FALLBACK_NAME: &str = "untitled";

/// Turn a notebook, section or page name into a single safe path component.
///
/// Path separators and characters reserved on common file systems become `_`, whitespace
/// runs become a single `_`, leading/trailing dots and underscores are dropped, and an empty
/// result becomes `untitled`.
///
/// # Examples
///
/// ```
/// use onenote_image_fetcher::utils::sanitize_name;
///
/// assert_eq!(sanitize_name("Notizbuch für Operatives"), "Notizbuch_für_Operatives");
/// assert_eq!(sanitize_name("Q1/Q2 plans"), "Q1_Q2_plans");
/// assert_eq!(sanitize_name(".."), "untitled");
/// ```
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_gap = false;

    for c in name.chars() {
        let reserved = matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            || c.is_control();
        if c.is_whitespace() || reserved {
            pending_gap = true;
            continue;
        }
        if pending_gap && !out.is_empty() {
            out.push('_');
        }
        pending_gap = false;
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// File extension for an image `Content-Type`; `png` when unknown or absent
#[must_use]
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("image/jpeg") | Some("image/jpg") | Some("image/pjpeg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/bmp") => "bmp",
        Some("image/webp") => "webp",
        Some("image/tiff") => "tiff",
        Some("image/svg+xml") => "svg",
        Some("image/x-emf") | Some("image/emf") => "emf",
        _ => "png",
    }
}

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For Rename, ` (1)`, ` (2)`, ... is appended to the stem until the name is free.
/// For Skip, an existing file is a [`Error::FileCollision`].
/// For Overwrite, the path is returned unchanged.
///
/// # Examples
///
/// ```
/// use onenote_image_fetcher::utils::get_unique_path;
/// use onenote_image_fetcher::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/Meeting_notes.png");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If /tmp/Meeting_notes.png exists, returns /tmp/Meeting_notes (1).png
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::FileCollision {
                    path: path.to_path_buf(),
                    reason: "file already exists and collision action is skip".to_string(),
                });
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::FileCollision {
                    path: path.to_path_buf(),
                    reason: "cannot extract file stem".to_string(),
                }
            })?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().unwrap_or_else(|| Path::new(""));

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{stem} ({i}).{ext}"),
                    None => format!("{stem} ({i})"),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::FileCollision {
                path: path.to_path_buf(),
                reason: format!("no free file name after {MAX_RENAME_ATTEMPTS} attempts"),
            })
        }
    }
}
