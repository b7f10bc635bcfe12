//! Shared test doubles: a scripted rendering backend plus in-memory
//! registry and notifier implementations.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use race_radar::config::{
    Config, GeocoderSettings, PaginationMode, RendererSettings, SheetsSettings, TelegramSettings,
};
use race_radar::error::{MonitorError, Result};
use race_radar::notify::Notifier;
use race_radar::registry::{CandidateRow, RaceRegistry};
use race_radar::render::{Browser, Element, Page};

#[derive(Clone, Default)]
pub struct ElementSpec {
    pub href: Option<String>,
    pub text: String,
    pub disabled: bool,
    /// Clicking this element moves its page to the next scripted state.
    pub advances: bool,
    pub children: Vec<(String, ElementSpec)>,
}

impl ElementSpec {
    pub fn with_child(mut self, selector: &str, child: ElementSpec) -> Self {
        self.children.push((selector.to_string(), child));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

pub fn link(href: &str) -> ElementSpec {
    ElementSpec {
        href: Some(href.to_string()),
        ..Default::default()
    }
}

pub fn text_node(text: &str) -> ElementSpec {
    ElementSpec {
        text: text.to_string(),
        ..Default::default()
    }
}

pub fn next_control() -> ElementSpec {
    ElementSpec {
        advances: true,
        ..Default::default()
    }
}

/// One renderable document state: selector to matching elements, in
/// document order.
#[derive(Clone, Default)]
pub struct Doc {
    selectors: Vec<(String, Vec<ElementSpec>)>,
}

impl Doc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, selector: &str, elements: Vec<ElementSpec>) -> Self {
        self.selectors.push((selector.to_string(), elements));
        self
    }

    fn query(&self, selector: &str) -> Vec<ElementSpec> {
        self.selectors
            .iter()
            .filter(|(s, _)| s == selector)
            .flat_map(|(_, elements)| elements.iter().cloned())
            .collect()
    }
}

struct SiteState {
    pages: HashMap<String, Vec<Doc>>,
    cursor: HashMap<String, usize>,
}

/// Scripted rendering backend. Each URL maps to a sequence of document
/// states; a click on an `advances` element moves that URL to its next
/// state, sticking at the last one like a stalled widget would.
#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<Mutex<SiteState>>,
}

impl FakeBrowser {
    pub fn new(pages: Vec<(&str, Vec<Doc>)>) -> Self {
        let pages = pages
            .into_iter()
            .map(|(url, docs)| (url.to_string(), docs))
            .collect();
        Self {
            state: Arc::new(Mutex::new(SiteState {
                pages,
                cursor: HashMap::new(),
            })),
        }
    }

    pub fn single(url: &str, doc: Doc) -> Self {
        Self::new(vec![(url, vec![doc])])
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open(&self) -> Result<Box<dyn Page>> {
        Ok(Box::new(FakePage {
            state: self.state.clone(),
            current: Mutex::new(None),
        }))
    }
}

struct FakePage {
    state: Arc<Mutex<SiteState>>,
    current: Mutex<Option<String>>,
}

impl FakePage {
    fn current_doc_query(&self, selector: &str) -> Result<Vec<ElementSpec>> {
        let current = self
            .current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MonitorError::Render("no page loaded".into()))?;
        let state = self.state.lock().unwrap();
        let docs = state
            .pages
            .get(&current)
            .ok_or_else(|| MonitorError::Render(format!("no page at {current}")))?;
        let index = state
            .cursor
            .get(&current)
            .copied()
            .unwrap_or(0)
            .min(docs.len() - 1);
        Ok(docs[index].query(selector))
    }

    fn current_url_sync(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        if !self.state.lock().unwrap().pages.contains_key(url) {
            return Err(MonitorError::Render(format!("no page at {url}")));
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.current_url_sync()
            .ok_or_else(|| MonitorError::Render("no page loaded".into()))
    }

    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        let url = self.current_url().await?;
        let specs = self.current_doc_query(selector)?;
        Ok(specs
            .into_iter()
            .map(|spec| {
                Box::new(FakeElement {
                    spec,
                    state: self.state.clone(),
                    url: url.clone(),
                }) as Box<dyn Element>
            })
            .collect())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.query(selector).await?.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MonitorError::Render(format!(
                    "timed out waiting for {selector}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn eval(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct FakeElement {
    spec: ElementSpec,
    state: Arc<Mutex<SiteState>>,
    url: String,
}

#[async_trait]
impl Element for FakeElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        if name == "href" {
            return Ok(self.spec.href.clone());
        }
        Ok(None)
    }

    async fn text(&self) -> Result<String> {
        Ok(self.spec.text.clone())
    }

    async fn click(&self) -> Result<()> {
        if self.spec.advances {
            let mut state = self.state.lock().unwrap();
            let len = state.pages.get(&self.url).map(Vec::len).unwrap_or(1);
            let cursor = state.cursor.entry(self.url.clone()).or_insert(0);
            *cursor = (*cursor + 1).min(len - 1);
        }
        Ok(())
    }

    async fn is_disabled(&self) -> Result<bool> {
        Ok(self.spec.disabled)
    }

    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        Ok(self
            .spec
            .children
            .iter()
            .filter(|(s, _)| s == selector)
            .map(|(_, child)| {
                Box::new(FakeElement {
                    spec: child.clone(),
                    state: self.state.clone(),
                    url: self.url.clone(),
                }) as Box<dyn Element>
            })
            .collect())
    }
}

pub struct FakeRegistry {
    known: HashSet<String>,
    gid: i64,
    pub written: Mutex<Vec<Vec<CandidateRow>>>,
}

impl FakeRegistry {
    pub fn new<'a>(known: impl IntoIterator<Item = &'a str>, gid: i64) -> Self {
        Self {
            known: known.into_iter().map(str::to_string).collect(),
            gid,
            written: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RaceRegistry for FakeRegistry {
    async fn known_urls(&self) -> Result<HashSet<String>> {
        Ok(self.known.clone())
    }

    async fn replace_missing(&self, rows: &[CandidateRow]) -> Result<i64> {
        self.written.lock().unwrap().push(rows.to_vec());
        Ok(self.gid)
    }

    async fn missing_worksheet_gid(&self) -> Result<i64> {
        Ok(self.gid)
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// A full configuration with one enabled link-follow source pointed at
/// the scripted site. The geocoder base is unreachable on purpose; no
/// test path using this config is expected to geocode.
pub fn test_config(state_path: PathBuf) -> Config {
    Config {
        sheets: SheetsSettings {
            api_base: "http://localhost:1".into(),
            token: "test-token".into(),
            sheet_id: "sheet-id".into(),
            worksheet_name: "Races".into(),
            url_column: "Link".into(),
            missing_worksheet_name: "Missing races".into(),
        },
        telegram: TelegramSettings {
            api_base: "http://localhost:1".into(),
            bot_token: "bot-token".into(),
            chat_id: "chat".into(),
        },
        renderer: RendererSettings {
            webdriver_url: "http://localhost:1".into(),
            headless: true,
            user_agent: None,
            timeout_ms: 5_000,
        },
        geocoder: GeocoderSettings {
            base_url: "http://localhost:1".into(),
            user_agent: "race-radar-test".into(),
            email: None,
            delay_sec: 0.0,
            country_code: "pt".into(),
            region_label: "Portugal".into(),
        },
        state_path,
        max_message_chars: 3_800,
        log_level: "info".into(),
        dry_run: false,
        notify_once: false,
        overlay_classes: Vec::new(),
        run_calendar_enabled: true,
        run_calendar_url: "https://races.test/".into(),
        run_calendar_event_links: "a.event".into(),
        run_calendar_next_button: "button.next".into(),
        run_calendar_detail_links: "a.detail".into(),
        run_calendar_coords_selector: "p.coords".into(),
        run_calendar_pagination: PaginationMode::Links,
        max_pagination_pages: 20,
        running_calendar_enabled: false,
        running_calendar_url: "https://cal.test/".into(),
        running_calendar_next_button: "button.next".into(),
        running_calendar_event_list: "div.row".into(),
        running_calendar_event_links: "a.ev".into(),
        running_calendar_location_selector: "em.loc".into(),
        calendar_months: 13,
    }
}
