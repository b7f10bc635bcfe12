//! Click-driven pagination: advancing the listing is a client-side
//! action with no URL change, so progress is detected by comparing a
//! cheap content marker before and after each step.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::geocode::{parse_coordinates, Geocoder};
use crate::render::{Browser, Element, Page};
use crate::retry::with_retries;
use crate::sources::{
    dismiss_overlays, extract_links, merge_links, resolve_absolute, EventRecord, RaceSource,
    SourceResult,
};
use crate::urlnorm;

const MARKER_POLL_DEADLINE: Duration = Duration::from_secs(10);
const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How deep each listing entry is inspected.
#[derive(Debug, Clone)]
pub enum Extraction {
    /// Top-level listing links only.
    Links,
    /// Listing rows carry a location text node; an event is kept only
    /// if its location geocodes into the target region.
    InlineLocation {
        container_selector: String,
        link_selector: String,
        location_selector: String,
    },
    /// Each listing link is opened in an auxiliary page to pick up a
    /// nested detail link and coordinate text for region filtering.
    DetailCoords {
        detail_selector: String,
        coords_selector: String,
    },
}

#[derive(Debug, Clone)]
pub struct StepperConfig {
    pub name: String,
    pub entry_url: String,
    /// Primary selector first, broader fallbacks after.
    pub event_selectors: Vec<String>,
    pub next_selector: String,
    /// Selector that must be present before stepping starts, if any.
    pub wait_selector: Option<String>,
    /// Textual marker selectors tried in order; the first extracted
    /// event link is the fallback marker.
    pub marker_selectors: Vec<String>,
    /// Loop bound. Calendar-style sources use their fixed horizon
    /// here since some calendar widgets never stall.
    pub max_steps: usize,
    pub extraction: Extraction,
    pub overlay_classes: Vec<String>,
    pub wait_timeout: Duration,
}

pub struct StepperSource {
    config: StepperConfig,
    geocoder: Arc<Geocoder>,
}

impl StepperSource {
    pub fn new(config: StepperConfig, geocoder: Arc<Geocoder>) -> Self {
        Self { config, geocoder }
    }

    /// Cheap, stable signature of the currently displayed content.
    async fn read_marker(&self, page: &dyn Page) -> Result<String> {
        for selector in &self.config.marker_selectors {
            if let Some(element) = page.query(selector).await?.first() {
                let text = element.text().await?.trim().to_string();
                if !text.is_empty() {
                    return Ok(text);
                }
            }
        }
        let links = self.listing_hrefs(page).await?;
        Ok(links.into_iter().next().unwrap_or_default())
    }

    /// Raw hrefs visible on the current listing, before any deep
    /// inspection.
    async fn listing_hrefs(&self, page: &dyn Page) -> Result<Vec<String>> {
        match &self.config.extraction {
            Extraction::Links | Extraction::DetailCoords { .. } => {
                extract_links(page, &self.config.event_selectors).await
            }
            Extraction::InlineLocation {
                container_selector,
                link_selector,
                ..
            } => {
                let mut hrefs = Vec::new();
                for container in page.query(container_selector).await? {
                    for link in container.query(link_selector).await? {
                        if let Some(href) = link.attribute("href").await? {
                            if !href.trim().is_empty() {
                                hrefs.push(href);
                            }
                        }
                    }
                }
                Ok(hrefs)
            }
        }
    }

    async fn find_next(&self, page: &dyn Page) -> Result<Option<Box<dyn Element>>> {
        let mut elements = page.query(&self.config.next_selector).await?;
        if elements.is_empty() {
            return Ok(None);
        }
        let next = elements.remove(0);
        if next.is_disabled().await? {
            return Ok(None);
        }
        Ok(Some(next))
    }

    /// Polls until the marker differs from `previous`. Returns false
    /// when the deadline elapses without a change.
    async fn wait_for_marker_change(&self, page: &dyn Page, previous: &str) -> Result<bool> {
        let deadline = Instant::now() + MARKER_POLL_DEADLINE;
        loop {
            if self.read_marker(page).await? != previous {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(MARKER_POLL_INTERVAL).await;
        }
    }

    async fn harvest(
        &self,
        browser: &dyn Browser,
        page: &dyn Page,
        results: &mut SourceResult,
        seen_listings: &mut HashSet<String>,
    ) -> Result<()> {
        let base = page
            .current_url()
            .await
            .unwrap_or_else(|_| self.config.entry_url.clone());

        match &self.config.extraction {
            Extraction::Links => {
                let hrefs = self.listing_hrefs(page).await?;
                if hrefs.is_empty() {
                    warn!(source = %self.config.name, "no event links found on listing");
                }
                merge_links(results, &base, &hrefs);
            }
            Extraction::InlineLocation {
                container_selector,
                link_selector,
                location_selector,
            } => {
                let containers = page.query(container_selector).await?;
                if containers.is_empty() {
                    warn!(source = %self.config.name, "no event rows found on listing");
                }
                for container in containers {
                    if let Err(err) = self
                        .harvest_row(
                            &*container,
                            link_selector,
                            location_selector,
                            &base,
                            results,
                        )
                        .await
                    {
                        warn!("skipping event row: {err}");
                    }
                }
            }
            Extraction::DetailCoords {
                detail_selector,
                coords_selector,
            } => {
                let hrefs = self.listing_hrefs(page).await?;
                if hrefs.is_empty() {
                    warn!(source = %self.config.name, "no event links found on listing");
                }
                for href in hrefs {
                    let Some(listing_url) = resolve_absolute(&base, &href) else {
                        continue;
                    };
                    if !seen_listings.insert(urlnorm::normalize(&listing_url)) {
                        continue;
                    }
                    match self
                        .inspect_detail(browser, &listing_url, detail_selector, coords_selector)
                        .await
                    {
                        Ok(Some(record)) => {
                            let key = urlnorm::normalize(&record.display_url);
                            results.entry(key).or_insert(record);
                        }
                        Ok(None) => {
                            debug!(url = %listing_url, "event outside target region, dropped");
                        }
                        Err(err) => {
                            warn!(url = %listing_url, "skipping event detail: {err}");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn harvest_row(
        &self,
        container: &dyn Element,
        link_selector: &str,
        location_selector: &str,
        base: &str,
        results: &mut SourceResult,
    ) -> Result<()> {
        let links = container.query(link_selector).await?;
        let Some(link) = links.first() else {
            return Ok(());
        };
        let Some(href) = link.attribute("href").await? else {
            return Ok(());
        };
        let Some(absolute) = resolve_absolute(base, &href) else {
            return Ok(());
        };
        let key = urlnorm::normalize(&absolute);
        if results.contains_key(&key) {
            return Ok(());
        }

        let mut location = String::new();
        if let Some(element) = container.query(location_selector).await?.first() {
            location = element.text().await?.trim().to_string();
        }

        match self.geocoder.resolve(&location).await? {
            Some(coords) => {
                results.insert(
                    key,
                    EventRecord {
                        display_url: absolute,
                        coords: Some(coords),
                    },
                );
            }
            None => {
                debug!(url = %absolute, location, "location not in target region, dropped");
            }
        }
        Ok(())
    }

    async fn inspect_detail(
        &self,
        browser: &dyn Browser,
        listing_url: &str,
        detail_selector: &str,
        coords_selector: &str,
    ) -> Result<Option<EventRecord>> {
        let page = browser.open().await?;
        let outcome = self
            .inspect_detail_on(&*page, listing_url, detail_selector, coords_selector)
            .await;
        let _ = page.close().await;
        outcome
    }

    async fn inspect_detail_on(
        &self,
        page: &dyn Page,
        listing_url: &str,
        detail_selector: &str,
        coords_selector: &str,
    ) -> Result<Option<EventRecord>> {
        with_retries("page navigation", || page.goto(listing_url)).await?;
        let base = page
            .current_url()
            .await
            .unwrap_or_else(|_| listing_url.to_string());

        // Prefer the nested detail link over the listing href.
        let mut display_url = listing_url.to_string();
        if let Some(element) = page.query(detail_selector).await?.first() {
            if let Some(href) = element.attribute("href").await? {
                if let Some(absolute) = resolve_absolute(&base, &href) {
                    display_url = absolute;
                }
            }
        }

        let mut coords = None;
        for element in page.query(coords_selector).await? {
            let text = element.text().await?;
            if let Some(pair) = parse_coordinates(&text) {
                coords = Some(pair);
                break;
            }
        }

        if let Some((lat, lon)) = coords {
            if !self.geocoder.is_in_region(lat, lon).await? {
                return Ok(None);
            }
        }
        // No parseable location data: accept without coordinates
        // rather than dropping a possibly in-region event.
        Ok(Some(EventRecord { display_url, coords }))
    }
}

#[async_trait]
impl RaceSource for StepperSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn collect(&self, browser: &dyn Browser) -> Result<SourceResult> {
        let page = browser.open().await?;
        with_retries("page navigation", || page.goto(&self.config.entry_url)).await?;
        if let Some(selector) = &self.config.wait_selector {
            page.wait_for(selector, self.config.wait_timeout).await?;
        }
        dismiss_overlays(&*page, &self.config.overlay_classes).await;

        let mut results = SourceResult::new();
        let mut seen_listings = HashSet::new();
        let mut previous_marker: Option<String> = None;

        for step in 0..self.config.max_steps {
            let marker = self.read_marker(&*page).await?;
            if previous_marker.as_deref() == Some(marker.as_str()) {
                warn!(step, "listing marker unchanged since previous step, stopping");
                break;
            }

            self.harvest(browser, &*page, &mut results, &mut seen_listings)
                .await?;

            if step + 1 == self.config.max_steps {
                break;
            }

            let Some(next) = self.find_next(&*page).await? else {
                debug!("next control absent or disabled, stopping");
                break;
            };
            if let Err(err) = with_retries("advance listing", || next.click()).await {
                warn!("click on next control failed, keeping partial results: {err}");
                break;
            }
            if !self.wait_for_marker_change(&*page, &marker).await? {
                warn!("listing did not advance after click, stopping");
                break;
            }
            previous_marker = Some(marker);
        }

        let _ = page.close().await;
        Ok(results)
    }
}
