//! Download link resolution from the open-data listing pages.
//!
//! The listing page is a passport table. Row 8 holds the link to the
//! current data archive:
//!
//! ```text
//! <td>8</td>
//!     <td>Гиперссылка (URL) на набор</td>
//!     <td><a href="https://fsa.gov.ru/opendata/.../data-20240315-structure-20141120.7z" target="_blank">...</a></td>
//! ```

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::config::parse_archive_name;
use crate::error::{HarvesterError, Result};
use crate::http::Fetcher;
use crate::types::ArchiveName;

/// Row 8 of the passport table, one free line, then the anchor with the archive URL.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static DOWNLOAD_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<td>8</td>\r?\n\s+.+\r?\n\s+<td><a href="([^"]+)" target"#).expect("valid regex")
});

/// A download link found on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLink {
    /// Absolute archive URL.
    pub url: String,
    /// Last path segment of the URL.
    pub filename: String,
}

impl ArchiveLink {
    fn archive_name(&self) -> Option<ArchiveName> {
        parse_archive_name(&self.filename).ok()
    }
}

/// Fetch a listing page and resolve its archive link.
///
/// # Arguments
/// * `fetcher` - Fetcher used for the page request
/// * `page_url` - Listing page URL, also the base for relative links
///
/// # Returns
/// The newest archive link on the page, or [`HarvesterError::LinkNotFound`]
pub fn resolve_download_link(fetcher: &Fetcher, page_url: &str) -> Result<ArchiveLink> {
    let html = fetcher.fetch_page(page_url)?;
    let link = select_link(&html, page_url)?;
    tracing::debug!(page = page_url, url = %link.url, "Resolved archive link");
    Ok(link)
}

/// Pick the archive link from listing HTML.
///
/// Links whose filename follows the archive convention are ranked by date
/// token, newest first; equal dates keep page order. When no link follows
/// the convention, the first one on the page wins.
pub fn select_link(html: &str, page_url: &str) -> Result<ArchiveLink> {
    let candidates = find_links(html, page_url);

    let newest = candidates
        .iter()
        .enumerate()
        .filter_map(|(position, link)| link.archive_name().map(|name| (position, name, link)))
        .max_by(|(pa, a, _), (pb, b, _)| {
            a.calendar_date()
                .cmp(&b.calendar_date())
                .then_with(|| a.date.cmp(&b.date))
                // Earlier position wins ties.
                .then_with(|| pb.cmp(pa))
        })
        .map(|(_, _, link)| link.clone());

    newest
        .or_else(|| candidates.into_iter().next())
        .ok_or_else(|| HarvesterError::LinkNotFound {
            page: page_url.to_string(),
        })
}

/// All archive links on the page, in page order, resolved against `page_url`.
pub fn find_links(html: &str, page_url: &str) -> Vec<ArchiveLink> {
    let base = Url::parse(page_url).ok();

    DOWNLOAD_LINK_PATTERN
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|href| {
            let href = href.as_str().trim();
            let url = match &base {
                Some(base) => base.join(href).ok()?.to_string(),
                None => href.to_string(),
            };
            let filename = filename_from_url(&url);
            Some(ArchiveLink { url, filename })
        })
        .collect()
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
///
/// ```
/// use fsa_harvester::link::filename_from_url;
///
/// assert_eq!(
///     filename_from_url("https://fsa.gov.ru/opendata/rss/data-20240315-structure.7z?x=1"),
///     "data-20240315-structure.7z"
/// );
/// ```
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        {
            return segment.to_string();
        }
    }

    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}
