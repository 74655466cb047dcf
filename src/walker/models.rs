//! Microsoft Graph OneNote resources, as much of them as the walk needs

use serde::Deserialize;

/// One page of a Graph collection response
#[derive(Debug, Clone, Deserialize)]
pub struct GraphList<T> {
    /// Items on this page
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,

    /// Absolute URL of the next page, if any
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// `{"href": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Href {
    /// Target URL
    pub href: String,
}

/// `links` object carried by notebooks, sections and pages
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Links {
    /// Link opening the item in OneNote on the web
    #[serde(default)]
    pub one_note_web_url: Option<Href>,
}

/// Reference to a parent resource (`parentNotebook`, `parentSectionGroup`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParentRef {
    /// Parent ID
    pub id: String,
    /// Parent display name, when Graph includes it
    #[serde(rename = "displayName", default)]
    pub name: Option<String>,
}

/// A OneNote notebook
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notebook {
    /// Notebook ID
    pub id: String,
    /// Display name
    #[serde(rename = "displayName")]
    pub name: String,
    #[serde(default)]
    links: Option<Links>,
}

impl Notebook {
    /// OneNote web URL
    pub fn web_url(&self) -> Option<&str> {
        web_url(self.links.as_ref())
    }
}

/// A section group (folder of sections)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionGroup {
    /// Section group ID
    pub id: String,
    /// Display name
    #[serde(rename = "displayName")]
    pub name: String,
    /// Enclosing section group, for nested groups
    #[serde(default)]
    pub parent_section_group: Option<ParentRef>,
}

/// A OneNote section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Section ID
    pub id: String,
    /// Display name
    #[serde(rename = "displayName")]
    pub name: String,
    #[serde(default)]
    links: Option<Links>,
    /// Notebook the section belongs to
    #[serde(default)]
    pub parent_notebook: Option<ParentRef>,
    /// Section group the section sits in, if any
    #[serde(default)]
    pub parent_section_group: Option<ParentRef>,
}

impl Section {
    /// OneNote web URL
    pub fn web_url(&self) -> Option<&str> {
        web_url(self.links.as_ref())
    }
}

/// A OneNote page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Page ID
    pub id: String,
    /// Page title (may be empty)
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    links: Option<Links>,
    /// URL of the page's HTML content
    #[serde(default)]
    pub content_url: Option<String>,
}

impl Page {
    /// OneNote web URL
    pub fn web_url(&self) -> Option<&str> {
        web_url(self.links.as_ref())
    }
}

/// `sites/{site}/pages/{page}/preview` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePreview {
    /// Rendered preview image
    #[serde(default)]
    pub preview_image_url: Option<String>,
}

/// An image found on a page, ready to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Source URL
    pub url: String,
    /// Page the image was found on
    pub page_id: String,
    /// Section of that page
    pub section_id: String,
    /// Notebook of that section
    pub notebook_id: String,
    /// File stem to save under (sanitized, without extension)
    pub filename: String,
}

fn web_url(links: Option<&Links>) -> Option<&str> {
    links?
        .one_note_web_url
        .as_ref()
        .map(|h| h.href.as_str())
}
