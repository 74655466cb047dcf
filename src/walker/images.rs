//! `<img>` source extraction from OneNote page HTML

use regex::Regex;
use std::sync::LazyLock;

/// Any `<img ...>` tag
#[allow(clippy::expect_used)]
static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("Invalid regex"));

/// `src` / `data-fullres-src` attributes, double- or single-quoted
#[allow(clippy::expect_used)]
static SRC_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(?:^|\s)(data-fullres-src|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("Invalid regex")
});

/// Image URLs on a page, in document order and without duplicates.
///
/// OneNote puts a resized rendition in `src` and the original in `data-fullres-src`; the
/// original wins when both are present. Inline `data:` URIs are skipped.
pub fn extract_image_sources(html: &str) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();

    for tag in IMG_TAG_RE.find_iter(html) {
        let tag = tag.as_str();
        // Skip "<img" so the attribute pattern sees whitespace-separated attributes
        let attributes = tag.get(4..).unwrap_or_default();

        let mut src = None;
        let mut fullres = None;
        for caps in SRC_ATTR_RE.captures_iter(attributes) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| decode_entities(m.as_str().trim()));
            match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                Some("data-fullres-src") => fullres = fullres.or(value),
                _ => src = src.or(value),
            }
        }

        let Some(url) = fullres.or(src).filter(|u| !u.is_empty()) else {
            continue;
        };
        if url.starts_with("data:") {
            tracing::debug!("skipping inline data URI image");
            continue;
        }
        if !sources.contains(&url) {
            sources.push(url);
        }
    }

    sources
}

/// Decode the HTML entities that appear in attribute URLs
fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
