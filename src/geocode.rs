//! Rate-limited geocoding against a Nominatim-compatible HTTP API.
//!
//! The backing service enforces a global rate limit, so a single
//! last-request timestamp is shared by forward and reverse lookups.
//! Resolved locations are cached for the process lifetime, including
//! negative results, to avoid re-querying unresolvable text.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::GeocoderSettings;
use crate::error::{MonitorError, Result};

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());

/// Extracts a `lat, lon` pair embedded in free page text: the first
/// two signed decimals, whatever label text surrounds them
/// (`"Lat: 38.7, Lon: -9.1"` and bare `"38.7 -9.1"` both parse).
pub fn parse_coordinates(text: &str) -> Option<(f64, f64)> {
    let mut numbers = DECIMAL_RE.find_iter(text);
    let lat: f64 = numbers.next()?.as_str().parse().ok()?;
    let lon: f64 = numbers.next()?.as_str().parse().ok()?;
    Some((lat, lon))
}

pub fn format_coordinates(lat: f64, lon: f64) -> String {
    format!("{lat:.6}, {lon:.6}")
}

#[derive(Debug, Clone, Copy)]
struct CachedLookup {
    lat: f64,
    lon: f64,
    in_region: bool,
}

#[derive(Debug, Deserialize)]
struct GeoAddress {
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
    address: Option<GeoAddress>,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<GeoAddress>,
}

pub struct Geocoder {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    country_code: String,
    region_label: String,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
    cache: Mutex<HashMap<String, CachedLookup>>,
}

impl Geocoder {
    pub fn new(settings: &GeocoderSettings) -> Self {
        let user_agent = match &settings.email {
            Some(email) => format!("{} ({email})", settings.user_agent),
            None => settings.user_agent.clone(),
        };
        Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            user_agent,
            country_code: settings.country_code.to_lowercase(),
            region_label: settings.region_label.clone(),
            delay: Duration::from_secs_f64(settings.delay_sec),
            last_request: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until at least `delay` has elapsed since the previous
    /// request, across both forward and reverse lookups.
    async fn throttle(&self) {
        let wait = {
            let last = self.last_request.lock().unwrap();
            last.and_then(|at| self.delay.checked_sub(at.elapsed()))
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        *self.last_request.lock().unwrap() = Some(Instant::now());
    }

    fn in_region(&self, country_code: Option<&str>) -> bool {
        country_code.unwrap_or("").to_lowercase() == self.country_code
    }

    /// Resolves free-text `location` to coordinates, restricted to the
    /// target region. Returns `None` for unresolvable or out-of-region
    /// locations; both outcomes are cached. A cache hit skips the
    /// throttle entirely.
    pub async fn resolve(&self, location: &str) -> Result<Option<(f64, f64)>> {
        let cache_key = location.trim().to_lowercase();
        if cache_key.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = self.cache.lock().unwrap().get(&cache_key).copied() {
            return Ok(hit.in_region.then_some((hit.lat, hit.lon)));
        }

        self.throttle().await;
        let url = format!("{}/search", self.base_url);
        let query = format!("{}, {}", location.trim(), self.region_label);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| MonitorError::Geocode(format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(MonitorError::Geocode(format!(
                "search returned status {}",
                response.status()
            )));
        }
        let hits: Vec<SearchHit> = response
            .json()
            .await
            .map_err(|e| MonitorError::Geocode(format!("search response malformed: {e}")))?;

        let Some(first) = hits.into_iter().next() else {
            debug!(location, "geocode returned no results");
            self.cache.lock().unwrap().insert(
                cache_key,
                CachedLookup { lat: 0.0, lon: 0.0, in_region: false },
            );
            return Ok(None);
        };

        let lat: f64 = first
            .lat
            .parse()
            .map_err(|_| MonitorError::Geocode(format!("unparseable latitude '{}'", first.lat)))?;
        let lon: f64 = first
            .lon
            .parse()
            .map_err(|_| MonitorError::Geocode(format!("unparseable longitude '{}'", first.lon)))?;
        let country = first.address.and_then(|a| a.country_code);
        let in_region = self.in_region(country.as_deref());
        debug!(location, lat, lon, ?country, in_region, "geocode result");

        self.cache
            .lock()
            .unwrap()
            .insert(cache_key, CachedLookup { lat, lon, in_region });
        Ok(in_region.then_some((lat, lon)))
    }

    /// Reverse lookup: is the coordinate pair inside the target region?
    pub async fn is_in_region(&self, lat: f64, lon: f64) -> Result<bool> {
        self.throttle().await;
        let url = format!("{}/reverse", self.base_url);
        let (lat_text, lon_text) = (lat.to_string(), lon.to_string());
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "json"),
                ("lat", lat_text.as_str()),
                ("lon", lon_text.as_str()),
                ("zoom", "10"),
                ("addressdetails", "1"),
            ])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| MonitorError::Geocode(format!("reverse request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(MonitorError::Geocode(format!(
                "reverse returned status {}",
                response.status()
            )));
        }
        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Geocode(format!("reverse response malformed: {e}")))?;
        let country = body.address.and_then(|a| a.country_code);
        let in_region = self.in_region(country.as_deref());
        debug!(lat, lon, ?country, in_region, "reverse geocode result");
        Ok(in_region)
    }

    #[cfg(test)]
    fn seed_cache(&self, key: &str, lat: f64, lon: f64, in_region: bool) {
        self.cache
            .lock()
            .unwrap()
            .insert(key.to_string(), CachedLookup { lat, lon, in_region });
    }
}
