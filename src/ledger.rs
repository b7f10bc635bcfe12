//! Persisted memory of which URLs a notification already went out
//! for. Only *unrecorded* notifications need tracking: once a URL
//! shows up in the registry, a human has recorded it and the entry is
//! pruned.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub first_seen_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub notified: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    /// Loads the ledger file; an absent file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Writes the ledger as a whole-file rewrite, creating the parent
    /// directory if missing.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn notified_keys(&self) -> HashSet<String> {
        self.notified.keys().cloned().collect()
    }

    /// Records a successful notification for `keys`. `first_seen_at`
    /// is preserved from any prior entry; `last_notified_at` always
    /// moves to `now`.
    pub fn mark_notified<I, S>(&mut self, keys: I, source: &str, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            let first_seen_at = self
                .notified
                .get(&key)
                .map(|entry| entry.first_seen_at)
                .unwrap_or(now);
            self.notified.insert(
                key,
                LedgerEntry {
                    first_seen_at,
                    last_notified_at: now,
                    source: source.to_string(),
                },
            );
        }
    }

    /// Drops every entry whose key now appears in the known set.
    pub fn prune_known(&mut self, known: &HashSet<String>) {
        let before = self.notified.len();
        self.notified.retain(|key, _| !known.contains(key));
        let pruned = before - self.notified.len();
        if pruned > 0 {
            debug!(pruned, "pruned ledger entries now present in the registry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn absent_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(&dir.path().join("nope.json")).unwrap();
        assert!(ledger.notified.is_empty());
    }

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/notified.json");

        let mut ledger = Ledger::default();
        ledger.mark_notified(["https://x.com/e/1"], "siteA", at(1000));
        ledger.save(&path).unwrap();

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.notified.len(), 1);
        let entry = &reloaded.notified["https://x.com/e/1"];
        assert_eq!(entry.source, "siteA");
        assert_eq!(entry.first_seen_at, at(1000));
    }

    #[test]
    fn renotification_preserves_first_seen() {
        let mut ledger = Ledger::default();
        ledger.mark_notified(["k"], "siteA", at(100));
        ledger.mark_notified(["k"], "siteA", at(200));

        let entry = &ledger.notified["k"];
        assert_eq!(entry.first_seen_at, at(100));
        assert_eq!(entry.last_notified_at, at(200));
    }

    #[test]
    fn prunes_only_keys_present_in_known_set() {
        let mut ledger = Ledger::default();
        ledger.mark_notified(["a", "b", "c"], "siteA", at(100));

        let known: HashSet<String> = ["a".to_string(), "c".to_string()].into();
        ledger.prune_known(&known);

        assert_eq!(ledger.notified.len(), 1);
        assert!(ledger.notified.contains_key("b"));
    }
}
