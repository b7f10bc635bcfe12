//! Source adapters. Each adapter drives the shared rendering backend
//! through a site-specific navigation protocol and yields a map of
//! normalized URL -> event record, first occurrence winning.

pub mod link_follow;
pub mod stepper;

pub use link_follow::{LinkFollowConfig, LinkFollowSource};
pub use stepper::{Extraction, StepperConfig, StepperSource};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::geocode::Geocoder;
use crate::render::{Browser, Page};
use crate::urlnorm;

/// One discovered event listing.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub display_url: String,
    pub coords: Option<(f64, f64)>,
}

/// Run-scoped result map keyed by normalized URL.
pub type SourceResult = BTreeMap<String, EventRecord>;

#[async_trait]
pub trait RaceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Scrapes the whole source. Partial results are returned when a
    /// page or navigation step fails mid-way.
    async fn collect(&self, browser: &dyn Browser) -> Result<SourceResult>;
}

/// Tagged per-site configuration; each variant carries only the
/// fields its adapter kind needs. The orchestrator selects the engine
/// at composition time.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    LinkFollow(LinkFollowConfig),
    Stepper(StepperConfig),
}

impl SourceSpec {
    pub fn name(&self) -> &str {
        match self {
            SourceSpec::LinkFollow(config) => &config.name,
            SourceSpec::Stepper(config) => &config.name,
        }
    }

    pub fn into_source(self, geocoder: Arc<Geocoder>) -> Box<dyn RaceSource> {
        match self {
            SourceSpec::LinkFollow(config) => Box::new(LinkFollowSource::new(config)),
            SourceSpec::Stepper(config) => Box::new(StepperSource::new(config, geocoder)),
        }
    }
}

/// Link-shape heuristics for discovering pagination links.
const PAGINATION_SELECTORS: [&str; 8] = [
    "nav[aria-label*='Pagination'] a[href]",
    "nav[aria-label*='pagination'] a[href]",
    "ul[role='navigation'] a[href]",
    "a[rel='next']",
    "a[rel='prev']",
    "a[aria-label*='Next']",
    "a[aria-label*='Previous']",
    "a[href*='page=']",
];

/// Tries the configured selectors in order; the first one yielding at
/// least one href wins. An ordered strategy list, not branching.
pub(crate) async fn extract_links(page: &dyn Page, selectors: &[String]) -> Result<Vec<String>> {
    for selector in selectors {
        let elements = page.query(selector).await?;
        let mut hrefs = Vec::new();
        for element in &elements {
            if let Some(href) = element.attribute("href").await? {
                if !href.trim().is_empty() {
                    hrefs.push(href);
                }
            }
        }
        if !hrefs.is_empty() {
            return Ok(hrefs);
        }
    }
    Ok(Vec::new())
}

/// Collects candidate pagination hrefs across all heuristics.
pub(crate) async fn discover_pagination_links(page: &dyn Page) -> Result<Vec<String>> {
    let mut links = Vec::new();
    for selector in PAGINATION_SELECTORS {
        for element in page.query(selector).await? {
            if let Some(href) = element.attribute("href").await? {
                if !href.trim().is_empty() {
                    links.push(href);
                }
            }
        }
    }
    Ok(links)
}

/// Resolves a possibly-relative href against the current page URL.
pub(crate) fn resolve_absolute(base: &str, href: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|url| url.to_string())
}

/// Inserts hrefs into the result map keyed by normalized URL.
/// Existing keys are never overwritten.
pub(crate) fn merge_links(results: &mut SourceResult, base: &str, hrefs: &[String]) {
    for href in hrefs {
        let Some(absolute) = resolve_absolute(base, href) else {
            continue;
        };
        let key = urlnorm::normalize(&absolute);
        results.entry(key).or_insert(EventRecord {
            display_url: absolute,
            coords: None,
        });
    }
}

/// Best-effort removal of cookie banners and similar overlays by
/// class name. Failures are swallowed.
pub(crate) async fn dismiss_overlays(page: &dyn Page, class_names: &[String]) {
    if class_names.is_empty() {
        return;
    }
    let selector = class_names
        .iter()
        .map(|name| format!(".{name}"))
        .collect::<Vec<_>>()
        .join(", ");
    let script = format!(
        "document.querySelectorAll({}).forEach((el) => el.remove());",
        serde_json::to_string(&selector).unwrap_or_default()
    );
    if let Err(err) = page.eval(&script).await {
        debug!("overlay removal script failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_hrefs_against_page_url() {
        assert_eq!(
            resolve_absolute("https://example.com/events/page2", "/e/42").as_deref(),
            Some("https://example.com/e/42")
        );
        assert_eq!(
            resolve_absolute("https://example.com/events/", "e/42").as_deref(),
            Some("https://example.com/events/e/42")
        );
    }

    #[test]
    fn absolute_hrefs_pass_through() {
        assert_eq!(
            resolve_absolute("https://example.com/", "https://other.org/e/1").as_deref(),
            Some("https://other.org/e/1")
        );
    }

    #[test]
    fn merge_is_first_occurrence_wins() {
        let mut results = SourceResult::new();
        merge_links(
            &mut results,
            "https://example.com/",
            &["/e/1?utm_source=a".to_string()],
        );
        merge_links(&mut results, "https://example.com/", &["/e/1".to_string()]);

        assert_eq!(results.len(), 1);
        let record = results.values().next().unwrap();
        // The first-seen display URL is kept, tracking params and all.
        assert_eq!(record.display_url, "https://example.com/e/1?utm_source=a");
    }
}
