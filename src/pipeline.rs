//! Pipeline orchestrator: one batch pass over all enabled sources,
//! then the dedup decision, registry write, notification and ledger
//! update.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, Utc};
use tracing::{error, info};

use crate::config::Config;
use crate::dedup;
use crate::error::{MonitorError, Result};
use crate::geocode::Geocoder;
use crate::ledger::Ledger;
use crate::notify::{chunk_lines, Notifier};
use crate::registry::RaceRegistry;
use crate::render::Browser;
use crate::retry::with_retries;
use crate::sources::SourceResult;

pub struct Pipeline {
    config: Config,
    registry: Arc<dyn RaceRegistry>,
    notifier: Arc<dyn Notifier>,
    browser: Arc<dyn Browser>,
    geocoder: Arc<Geocoder>,
}

/// What one invocation did. The exit status reflects per-source
/// errors independently of whether a notification fired.
#[derive(Debug, Default)]
pub struct RunReport {
    pub source_errors: Vec<String>,
    pub total_scraped: usize,
    pub notified: usize,
    pub notification_sent: bool,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.source_errors.is_empty())
    }
}

impl Pipeline {
    pub fn new(
        config: Config,
        registry: Arc<dyn RaceRegistry>,
        notifier: Arc<dyn Notifier>,
        browser: Arc<dyn Browser>,
        geocoder: Arc<Geocoder>,
    ) -> Self {
        Self {
            config,
            registry,
            notifier,
            browser,
            geocoder,
        }
    }

    pub async fn run(&self) -> Result<RunReport> {
        // A registry failure must propagate; it is never "no known URLs".
        let known = with_retries("registry read", || self.registry.known_urls()).await?;
        info!(known = known.len(), "loaded known URLs from registry");

        let mut ledger = Ledger::load(&self.config.state_path)?;
        let mut report = RunReport::default();
        let mut results: BTreeMap<String, SourceResult> = BTreeMap::new();

        for spec in self.config.sources() {
            let name = spec.name().to_string();
            let source = spec.into_source(self.geocoder.clone());
            info!(source = %name, "scraping source");
            match source.collect(self.browser.as_ref()).await {
                Ok(records) => {
                    info!(source = %name, events = records.len(), "source finished");
                    results.insert(name, records);
                }
                Err(err) => {
                    error!(source = %name, "source failed: {err}");
                    report.source_errors.push(name);
                }
            }
        }

        if results.is_empty() {
            return Err(MonitorError::NoSourceSucceeded);
        }

        let plan = dedup::plan(&results, &known, &ledger, self.config.notify_once);
        for summary in &plan.summaries {
            info!(
                source = %summary.source,
                scraped = summary.scraped,
                new = summary.new_candidates,
                to_notify = summary.to_notify,
                "source dedup summary"
            );
        }
        report.total_scraped = plan.summaries.iter().map(|s| s.scraped).sum();

        // The worksheet is rewritten before the message is composed
        // because the message links to it. Dry-run only looks the
        // worksheet id up.
        let gid = if self.config.dry_run {
            with_retries("worksheet lookup", || self.registry.missing_worksheet_gid()).await?
        } else {
            with_retries("worksheet write", || {
                self.registry.replace_missing(&plan.candidate_rows)
            })
            .await?
        };

        if !plan.fires_notification() {
            info!("no new links found, skipping notification");
            if !self.config.dry_run {
                ledger.prune_known(&known);
                ledger.save(&self.config.state_path)?;
            }
            return Ok(report);
        }

        let sheet_link = format!(
            "https://docs.google.com/spreadsheets/d/{}/edit#gid={gid}",
            self.config.sheets.sheet_id
        );
        let total = plan.total_to_notify();
        let lines = [
            format!("<b>{}</b>", Local::now().format("%d.%m.%Y")),
            format!("<b>{total}</b> races were found that aren't in our table."),
            String::new(),
            format!("👉 <a href=\"{sheet_link}\">View the full list</a>"),
        ];
        let chunks = chunk_lines(&lines, self.config.max_message_chars);

        report.notified = total;
        if self.config.dry_run {
            info!("DRY_RUN set, notification not sent");
            for chunk in &chunks {
                info!("would send:\n{chunk}");
            }
            return Ok(report);
        }

        for chunk in &chunks {
            with_retries("notification send", || self.notifier.send(chunk)).await?;
        }
        report.notification_sent = true;

        let now = Utc::now();
        for (source, keys) in &plan.to_notify {
            if !keys.is_empty() {
                ledger.mark_notified(keys.iter().cloned(), source, now);
            }
        }
        ledger.prune_known(&known);
        ledger.save(&self.config.state_path)?;

        Ok(report)
    }
}
