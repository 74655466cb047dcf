//! Notebook → section → page → image traversal.
//!
//! The walk is strictly sequential: one Graph request in flight at a time. It talks to the
//! outside world only through [`GraphSession`]. Failures of a single page or image are
//! escalated, counted and skipped; only a missing notebook or a notebook without sections
//! stops a branch.
//!
//! Files land in `<output>/<notebook>/[<section group>/...]<section>/<page>[_n].<ext>`.

mod images;
pub mod models;

pub use images::extract_image_sources;
pub use models::{Notebook, Page, PageImage, Section, SectionGroup};

use crate::config::{DownloadMode, FileCollisionAction, WalkConfig};
use crate::error::{ApiError, Error, Result};
use crate::session::GraphSession;
use crate::utils::{extension_for_content_type, get_unique_path, sanitize_name};
use models::{GraphList, PagePreview};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Prompt option: pick a different notebook
pub const OPTION_TRY_ANOTHER_NOTEBOOK: &str = "Try another notebook";
/// Prompt option: run the walk again
pub const OPTION_TRY_AGAIN: &str = "Try again";
/// Prompt option: move on to another section
pub const OPTION_TRY_ANOTHER_SECTION: &str = "Try another section";
/// Prompt option: stop the application
pub const OPTION_EXIT: &str = "Exit";

/// Upper bound on `@odata.nextLink` pages followed for one listing
const MAX_LIST_PAGES: usize = 100;

/// Upper bound on nested section groups resolved for one section
const MAX_GROUP_DEPTH: usize = 16;

/// Counters reported at the end of a walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    /// Notebooks walked
    pub notebooks: usize,
    /// Sections visited
    pub sections: usize,
    /// Pages visited
    pub pages: usize,
    /// Images written to disk
    pub images_saved: usize,
    /// Images not written because the file already existed
    pub images_skipped: usize,
    /// Pages, images or listings that failed
    pub failures: usize,
}

/// List every notebook of the signed-in user
pub async fn list_notebooks(
    session: &dyn GraphSession,
) -> std::result::Result<Vec<Notebook>, ApiError> {
    list_all(session, "me/onenote/notebooks").await
}

/// Fetch a collection, following `@odata.nextLink`
async fn list_all<T: DeserializeOwned>(
    session: &dyn GraphSession,
    endpoint: &str,
) -> std::result::Result<Vec<T>, ApiError> {
    let mut items = Vec::new();
    let mut next = Some(endpoint.to_string());
    let mut fetched = 0;

    while let Some(current) = next.take() {
        let value = session.call(&current).await?;
        let page: GraphList<T> =
            serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
                endpoint: current.clone(),
                reason: e.to_string(),
            })?;
        items.extend(page.value);

        fetched += 1;
        if fetched >= MAX_LIST_PAGES {
            warn!(endpoint, pages = fetched, "listing truncated");
            break;
        }
        next = page.next_link;
    }

    Ok(items)
}

/// Sequential hierarchy walk over one session
pub struct HierarchyWalker {
    session: Arc<dyn GraphSession>,
    config: WalkConfig,
    group_names: HashMap<String, (String, Option<String>)>,
}

impl HierarchyWalker {
    /// Create a walker. `config.notebook_name = None` walks every notebook.
    pub fn new(session: Arc<dyn GraphSession>, config: WalkConfig) -> Self {
        Self {
            session,
            config,
            group_names: HashMap::new(),
        }
    }

    /// Walk the configured notebook(s) and download their images
    pub async fn run(&mut self) -> Result<WalkSummary> {
        let mut summary = WalkSummary::default();

        match self.walk(&mut summary).await {
            Ok(()) => {
                self.progress("Finished processing all sections.");
                self.progress(&format!(
                    "Summary: {} pages, {} images saved, {} skipped, {} failures",
                    summary.pages, summary.images_saved, summary.images_skipped, summary.failures
                ));
                info!(?summary, "walk finished");
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "walk aborted");
                if !matches!(e, Error::NotebookNotFound(_)) {
                    let context = json!({
                        "error": e.to_string(),
                        "error_type": error_type(&e),
                        "output_dir": self.config.output_dir.display().to_string(),
                    });
                    self.session.escalate("general_error", context).await;
                }
                Err(e)
            }
        }
    }

    async fn walk(&mut self, summary: &mut WalkSummary) -> Result<()> {
        let notebooks = match &self.config.notebook_name {
            Some(name) => {
                self.progress(&format!("Fetching notebook: {name}"));
                vec![self.find_notebook(name).await?]
            }
            None => {
                self.progress("Fetching notebooks...");
                list_notebooks(self.session.as_ref()).await?
            }
        };

        for notebook in notebooks {
            self.walk_notebook(&notebook, summary).await?;
        }
        Ok(())
    }

    async fn find_notebook(&self, name: &str) -> Result<Notebook> {
        let notebooks = list_notebooks(self.session.as_ref()).await?;
        let available: Vec<String> = notebooks.iter().map(|n| n.name.clone()).collect();

        if let Some(notebook) = notebooks.into_iter().find(|n| n.name == name) {
            return Ok(notebook);
        }

        self.progress(&format!("Notebook '{name}' not found."));
        let context = json!({
            "notebook_name": name,
            "available_notebooks": available,
        });
        self.session.escalate("notebook_not_found", context).await;
        self.session.prompt(
            &format!("Notebook '{name}' was not found. What would you like to do?"),
            &[
                OPTION_TRY_ANOTHER_NOTEBOOK.to_string(),
                OPTION_TRY_AGAIN.to_string(),
                OPTION_EXIT.to_string(),
            ],
        );
        Err(Error::NotebookNotFound(name.to_string()))
    }

    async fn walk_notebook(
        &mut self,
        notebook: &Notebook,
        summary: &mut WalkSummary,
    ) -> Result<()> {
        summary.notebooks += 1;
        self.progress(&format!("Found notebook: {}", notebook.name));
        self.progress("Fetching sections...");

        let endpoint = format!("me/onenote/notebooks/{}/sections", notebook.id);
        let sections: Vec<Section> = match list_all(self.session.as_ref(), &endpoint).await {
            Ok(sections) => sections,
            Err(e) => {
                summary.failures += 1;
                self.progress(&format!(
                    "Failed to fetch sections for notebook {}: {e}",
                    notebook.name
                ));
                return Ok(());
            }
        };

        if sections.is_empty() {
            self.progress(&format!("No sections found in notebook: {}", notebook.name));
            let context = json!({
                "notebook_id": notebook.id,
                "notebook_name": notebook.name,
            });
            self.session.escalate("no_sections", context).await;
            return Ok(());
        }

        self.progress(&format!("Found {} sections.", sections.len()));
        let notebook_dir = self.config.output_dir.join(sanitize_name(&notebook.name));

        for section in &sections {
            summary.sections += 1;
            self.walk_section(notebook, section, &notebook_dir, summary)
                .await;
        }
        Ok(())
    }

    async fn walk_section(
        &mut self,
        notebook: &Notebook,
        section: &Section,
        notebook_dir: &Path,
        summary: &mut WalkSummary,
    ) {
        self.progress(&format!("Processing section: {}", section.name));

        let mut section_dir = notebook_dir.to_path_buf();
        for group in self.group_path(section).await {
            section_dir.push(sanitize_name(&group));
        }
        section_dir.push(sanitize_name(&section.name));

        self.progress("Fetching pages...");
        let endpoint = format!("me/onenote/sections/{}/pages", section.id);
        let pages: Vec<Page> = match list_all(self.session.as_ref(), &endpoint).await {
            Ok(pages) => pages,
            Err(e) => {
                summary.failures += 1;
                self.progress(&format!(
                    "Failed to fetch pages for section {}: {e}",
                    section.name
                ));
                return;
            }
        };

        if pages.is_empty() {
            self.progress(&format!("No pages found in section: {}", section.name));
            let context = json!({
                "section_id": section.id,
                "section_name": section.name,
            });
            self.session.escalate("no_pages", context).await;
            return;
        }

        self.progress(&format!("Found {} pages.", pages.len()));

        for page in &pages {
            summary.pages += 1;
            self.progress(&format!("Processing page: {}", page.title));

            if let Err(e) = self
                .process_page(notebook, section, page, &section_dir, summary)
                .await
            {
                summary.failures += 1;
                self.progress(&format!("Failed to process page {}: {e}", page.title));
                let context = json!({
                    "page_id": page.id,
                    "page_title": page.title,
                    "error": e.to_string(),
                    "error_type": error_type(&e),
                });
                self.session.escalate("processing_error", context).await;
            }
        }
    }

    /// Section-group names from the outermost group down to the section's own group
    async fn group_path(&mut self, section: &Section) -> Vec<String> {
        let mut names = Vec::new();
        let mut next = section.parent_section_group.clone();

        while let Some(parent) = next.take() {
            if names.len() >= MAX_GROUP_DEPTH {
                warn!(section = %section.name, "section group nesting too deep");
                break;
            }
            let Some((name, grandparent)) = self.section_group(&parent.id).await else {
                break;
            };
            names.push(name);
            next = grandparent.map(|id| models::ParentRef { id, name: None });
        }

        names.reverse();
        names
    }

    async fn section_group(&mut self, id: &str) -> Option<(String, Option<String>)> {
        if let Some(cached) = self.group_names.get(id) {
            return Some(cached.clone());
        }

        let endpoint = format!("me/onenote/sectionGroups/{id}");
        let group: SectionGroup = match self.session.call(&endpoint).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(group) => group,
                Err(e) => {
                    warn!(group_id = id, error = %e, "unexpected section group response");
                    return None;
                }
            },
            Err(e) => {
                warn!(group_id = id, error = %e, "section group lookup failed");
                return None;
            }
        };

        let entry = (
            group.name,
            group.parent_section_group.map(|parent| parent.id),
        );
        self.group_names.insert(id.to_string(), entry.clone());
        Some(entry)
    }

    async fn process_page(
        &self,
        notebook: &Notebook,
        section: &Section,
        page: &Page,
        section_dir: &Path,
        summary: &mut WalkSummary,
    ) -> Result<()> {
        let sources = match self.config.mode {
            DownloadMode::Content => {
                let html = self
                    .session
                    .call_text(&format!("me/onenote/pages/{}/content", page.id))
                    .await?;
                extract_image_sources(&html)
            }
            DownloadMode::Preview => match self.preview_url(page).await? {
                Some(url) => vec![url],
                None => {
                    summary.failures += 1;
                    return Ok(());
                }
            },
        };

        if sources.is_empty() {
            self.progress(&format!("No images found in page: {}", page.title));
            return Ok(());
        }

        let stem = sanitize_name(&page.title);
        let numbered = sources.len() > 1;
        for (index, url) in sources.into_iter().enumerate() {
            let image = PageImage {
                url,
                page_id: page.id.clone(),
                section_id: section.id.clone(),
                notebook_id: notebook.id.clone(),
                filename: if numbered {
                    format!("{stem}_{}", index + 1)
                } else {
                    stem.clone()
                },
            };
            self.download_image(page, &image, section_dir, summary).await?;
        }
        Ok(())
    }

    async fn preview_url(&self, page: &Page) -> Result<Option<String>> {
        let Some(site_id) = &self.config.site_id else {
            return Err(Error::Config {
                message: "preview mode requires SITE_ID".to_string(),
                key: Some("SITE_ID".to_string()),
            });
        };

        let endpoint = format!("sites/{site_id}/pages/{}/preview", page.id);
        let value = self.session.call(&endpoint).await?;
        let preview: PagePreview = serde_json::from_value(value.clone()).unwrap_or_default();

        match preview.preview_image_url.filter(|u| !u.is_empty()) {
            Some(url) => Ok(Some(url)),
            None => {
                self.progress(&format!("No preview image for page: {}", page.title));
                let context = json!({
                    "page_id": page.id,
                    "page_title": page.title,
                    "api_response": value,
                });
                self.session.escalate("preview_error", context).await;
                Ok(None)
            }
        }
    }

    /// Download one image. Download failures are escalated and counted, file system
    /// failures are returned.
    async fn download_image(
        &self,
        page: &Page,
        image: &PageImage,
        section_dir: &Path,
        summary: &mut WalkSummary,
    ) -> Result<()> {
        self.progress(&format!("Downloading image from: {}", image.url));

        let download = match self.session.download(&image.url).await {
            Ok(download) => download,
            Err(e) => {
                summary.failures += 1;
                self.progress(&format!("Failed to download image: {e}"));
                let context = json!({
                    "page_id": page.id,
                    "page_title": page.title,
                    "image_url": image.url,
                    "status_code": e.status(),
                    "error": e.to_string(),
                });
                self.session.escalate("download_error", context).await;
                return Ok(());
            }
        };

        let extension = extension_for_content_type(download.content_type.as_deref());
        let target = section_dir.join(format!("{}.{extension}", image.filename));

        let Some(path) = self.claim_path(&target)? else {
            summary.images_skipped += 1;
            self.progress(&format!("Skipping existing file: {}", target.display()));
            return Ok(());
        };

        tokio::fs::create_dir_all(section_dir).await?;
        tokio::fs::write(&path, &download.bytes).await?;
        summary.images_saved += 1;
        debug!(path = %path.display(), bytes = download.bytes.len(), "image saved");
        self.progress(&format!("Successfully downloaded image to: {}", path.display()));
        Ok(())
    }

    /// Final path for `target`, or `None` when the collision policy says skip
    fn claim_path(&self, target: &Path) -> Result<Option<PathBuf>> {
        match get_unique_path(target, self.config.file_collision) {
            Ok(path) => Ok(Some(path)),
            Err(Error::FileCollision { .. })
                if self.config.file_collision == FileCollisionAction::Skip =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn progress(&self, message: &str) {
        self.session.report_progress(message);
    }
}

/// Short name of an error's kind, for escalation context
fn error_type(error: &Error) -> &'static str {
    match error {
        Error::Config { .. } => "ConfigError",
        Error::Auth(_) => "AuthError",
        Error::Api(_) => "ApiError",
        Error::NotebookNotFound(_) => "NotebookNotFound",
        Error::InvalidOption(_) => "InvalidOption",
        Error::FileCollision { .. } => "FileCollision",
        Error::Io(_) => "IoError",
        Error::Network(_) => "NetworkError",
        Error::Serialization(_) => "SerializationError",
        Error::Server(_) => "ServerError",
    }
}

/// Ensures at most one walk runs at a time
#[derive(Debug, Clone, Default)]
pub struct WalkControl {
    running: Arc<AtomicBool>,
}

impl WalkControl {
    /// Create an idle control
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a walk is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a walk on a background task unless one is already running.
    ///
    /// Returns `None` when a walk was already in progress.
    pub fn spawn(
        &self,
        session: Arc<dyn GraphSession>,
        config: WalkConfig,
    ) -> Option<JoinHandle<Result<WalkSummary>>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("walk already running");
            return None;
        }

        let running = self.running.clone();
        Some(tokio::spawn(async move {
            let _guard = RunningGuard(running);
            session.report_progress("Starting image fetcher...");
            let mut walker = HierarchyWalker::new(session, config);
            walker.run().await
        }))
    }
}

/// Clears the running flag when the walk task ends, even by panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
