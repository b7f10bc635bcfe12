//! Link-follow pagination: the site exposes event links plus separate
//! pagination links, so discovery is a breadth-first walk over page
//! URLs with a visited set. No client-side state change to detect.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::Result;
use crate::render::Browser;
use crate::retry::with_retries;
use crate::sources::{
    discover_pagination_links, dismiss_overlays, extract_links, merge_links, resolve_absolute,
    RaceSource, SourceResult,
};
use crate::urlnorm;

#[derive(Debug, Clone)]
pub struct LinkFollowConfig {
    pub name: String,
    pub entry_url: String,
    /// Primary selector first, broader fallbacks after.
    pub event_selectors: Vec<String>,
    /// Ceiling on visited pages; hitting it is a warning, not an error.
    pub max_pages: usize,
    pub overlay_classes: Vec<String>,
}

pub struct LinkFollowSource {
    config: LinkFollowConfig,
}

impl LinkFollowSource {
    pub fn new(config: LinkFollowConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RaceSource for LinkFollowSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn collect(&self, browser: &dyn Browser) -> Result<SourceResult> {
        let page = browser.open().await?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([self.config.entry_url.clone()]);
        let mut results = SourceResult::new();

        loop {
            if visited.len() >= self.config.max_pages {
                break;
            }
            let Some(current) = queue.pop_front() else {
                break;
            };
            let normalized_page = urlnorm::normalize(&current);
            if visited.contains(&normalized_page) {
                continue;
            }

            if let Err(err) = with_retries("page navigation", || page.goto(&current)).await {
                // One dead page never aborts the walk.
                error!(url = %current, "navigation failed, skipping page: {err}");
                visited.insert(normalized_page);
                continue;
            }
            dismiss_overlays(&*page, &self.config.overlay_classes).await;

            let base = page
                .current_url()
                .await
                .unwrap_or_else(|_| current.clone());

            let links = extract_links(&*page, &self.config.event_selectors).await?;
            if links.is_empty() {
                warn!(url = %current, "no event links found on page");
            }
            merge_links(&mut results, &base, &links);

            for href in discover_pagination_links(&*page).await? {
                if let Some(absolute) = resolve_absolute(&base, &href) {
                    if !visited.contains(&urlnorm::normalize(&absolute)) {
                        queue.push_back(absolute);
                    }
                }
            }

            visited.insert(normalized_page);
        }

        if visited.len() >= self.config.max_pages {
            warn!(
                max_pages = self.config.max_pages,
                "pagination page ceiling reached, returning partial results"
            );
        }

        let _ = page.close().await;
        Ok(results)
    }
}
