//! Dedup/notification decision engine. Pure set algebra over the
//! per-run scrape results, the freshly read known set and the
//! persisted ledger; the orchestrator executes whatever this plans.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::geocode::format_coordinates;
use crate::ledger::Ledger;
use crate::registry::CandidateRow;
use crate::sources::SourceResult;

#[derive(Debug)]
pub struct SourceSummary {
    pub source: String,
    pub scraped: usize,
    pub new_candidates: usize,
    pub to_notify: usize,
}

#[derive(Debug, Default)]
pub struct DedupPlan {
    pub summaries: Vec<SourceSummary>,
    /// Rows for the missing-races worksheet: every new candidate,
    /// sorted by normalized key within each source.
    pub candidate_rows: Vec<CandidateRow>,
    /// Normalized keys to include in the notification, per source.
    pub to_notify: BTreeMap<String, BTreeSet<String>>,
}

impl DedupPlan {
    pub fn total_to_notify(&self) -> usize {
        self.to_notify.values().map(BTreeSet::len).sum()
    }

    pub fn fires_notification(&self) -> bool {
        self.to_notify.values().any(|keys| !keys.is_empty())
    }
}

/// Computes what is new and what gets notified.
///
/// `new_candidates = scraped − known` for each source, independent of
/// iteration order. With `notify_once` set, keys already present in
/// the ledger are additionally suppressed from the notification (they
/// still land on the worksheet).
pub fn plan(
    results: &BTreeMap<String, SourceResult>,
    known: &HashSet<String>,
    ledger: &Ledger,
    notify_once: bool,
) -> DedupPlan {
    let already_notified = ledger.notified_keys();
    let mut plan = DedupPlan::default();

    for (source, records) in results {
        let new_keys: BTreeSet<&String> = records
            .keys()
            .filter(|key| !known.contains(*key))
            .collect();

        let notify_keys: BTreeSet<String> = new_keys
            .iter()
            .filter(|key| !notify_once || !already_notified.contains(**key))
            .map(|key| (*key).clone())
            .collect();

        for key in &new_keys {
            let record = &records[*key];
            plan.candidate_rows.push(CandidateRow {
                source: source.clone(),
                url: record.display_url.clone(),
                coords: record
                    .coords
                    .map(|(lat, lon)| format_coordinates(lat, lon))
                    .unwrap_or_default(),
            });
        }

        plan.summaries.push(SourceSummary {
            source: source.clone(),
            scraped: records.len(),
            new_candidates: new_keys.len(),
            to_notify: notify_keys.len(),
        });
        plan.to_notify.insert(source.clone(), notify_keys);
    }

    plan
}
