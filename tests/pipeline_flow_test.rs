//! Full pipeline pass over scripted components: scrape, dedup against
//! the registry, worksheet rewrite, notification and ledger lifecycle.

mod common;

use std::sync::Arc;

use common::{link, test_config, Doc, FakeBrowser, FakeNotifier, FakeRegistry};
use race_radar::geocode::Geocoder;
use race_radar::ledger::Ledger;
use race_radar::notify::Notifier;
use race_radar::pipeline::Pipeline;
use race_radar::registry::RaceRegistry;
use race_radar::render::Browser;

fn scripted_browser() -> FakeBrowser {
    FakeBrowser::single(
        "https://races.test/",
        Doc::new().with(
            "a.event",
            vec![
                link("https://races.test/e/a"),
                link("https://races.test/e/b?utm_source=promo"),
            ],
        ),
    )
}

fn pipeline(
    state_path: std::path::PathBuf,
    registry: Arc<FakeRegistry>,
    notifier: Arc<FakeNotifier>,
    dry_run: bool,
) -> Pipeline {
    let mut config = test_config(state_path);
    config.dry_run = dry_run;
    let geocoder = Arc::new(Geocoder::new(&config.geocoder));
    Pipeline::new(
        config,
        registry as Arc<dyn RaceRegistry>,
        notifier as Arc<dyn Notifier>,
        Arc::new(scripted_browser()) as Arc<dyn Browser>,
        geocoder,
    )
}

#[tokio::test]
async fn new_url_is_written_notified_and_later_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("notified.json");

    // First run: the registry knows only /e/a, the site shows a and b.
    let registry = Arc::new(FakeRegistry::new(["https://races.test/e/a"], 7));
    let notifier = Arc::new(FakeNotifier::default());
    let report = pipeline(state_path.clone(), registry.clone(), notifier.clone(), false)
        .run()
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.total_scraped, 2);
    assert_eq!(report.notified, 1);
    assert!(report.notification_sent);

    let written = registry.written.lock().unwrap().clone();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].len(), 1);
    assert_eq!(written[0][0].source, "portugalruncalendar.com");
    // The worksheet keeps the display URL as scraped, tracking params
    // and all; dedup works on the normalized form.
    assert_eq!(written[0][0].url, "https://races.test/e/b?utm_source=promo");

    let sent = notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("<b>1</b> races"));
    assert!(sent[0].contains("edit#gid=7"));

    let ledger = Ledger::load(&state_path).unwrap();
    assert_eq!(ledger.notified.len(), 1);
    assert!(ledger.notified.contains_key("https://races.test/e/b"));

    // Second run: a human recorded b in the registry, so nothing is
    // new, nothing is sent, and the ledger entry is pruned.
    let registry = Arc::new(FakeRegistry::new(
        ["https://races.test/e/a", "https://races.test/e/b"],
        7,
    ));
    let notifier = Arc::new(FakeNotifier::default());
    let report = pipeline(state_path.clone(), registry.clone(), notifier.clone(), false)
        .run()
        .await
        .unwrap();

    assert_eq!(report.notified, 0);
    assert!(!report.notification_sent);
    assert!(notifier.sent.lock().unwrap().is_empty());
    // The worksheet is still rewritten, now empty.
    assert_eq!(registry.written.lock().unwrap().last().unwrap().len(), 0);

    let ledger = Ledger::load(&state_path).unwrap();
    assert!(ledger.notified.is_empty());
}

#[tokio::test]
async fn dry_run_sends_nothing_and_leaves_no_state() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("notified.json");

    let registry = Arc::new(FakeRegistry::new(["https://races.test/e/a"], 7));
    let notifier = Arc::new(FakeNotifier::default());
    let report = pipeline(state_path.clone(), registry.clone(), notifier.clone(), true)
        .run()
        .await
        .unwrap();

    assert_eq!(report.notified, 1);
    assert!(!report.notification_sent);
    assert!(notifier.sent.lock().unwrap().is_empty());
    // Dry run only looks the worksheet id up, it never writes.
    assert!(registry.written.lock().unwrap().is_empty());
    assert!(!state_path.exists());
}

#[tokio::test]
async fn nothing_new_still_clears_the_worksheet() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("notified.json");

    let registry = Arc::new(FakeRegistry::new(
        ["https://races.test/e/a", "https://races.test/e/b"],
        3,
    ));
    let notifier = Arc::new(FakeNotifier::default());
    let report = pipeline(state_path, registry.clone(), notifier.clone(), false)
        .run()
        .await
        .unwrap();

    assert_eq!(report.notified, 0);
    assert!(notifier.sent.lock().unwrap().is_empty());
    let written = registry.written.lock().unwrap().clone();
    assert_eq!(written.len(), 1);
    assert!(written[0].is_empty());
}
