//! Environment-backed configuration. Credentials and sheet
//! identifiers are required; everything else has a default. Missing
//! required keys fail before any network activity.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::sources::{Extraction, LinkFollowConfig, SourceSpec, StepperConfig};

pub const RUN_CALENDAR_SOURCE: &str = "portugalruncalendar.com";
pub const RUNNING_CALENDAR_SOURCE: &str = "portugalrunning.com";

const REQUIRED_ENV: [&str; 6] = [
    "SHEET_ID",
    "WORKSHEET_NAME",
    "URL_COLUMN",
    "SHEETS_API_TOKEN",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
];

fn get(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn get_or(key: &str, default: &str) -> String {
    get(key).unwrap_or_else(|| default.to_string())
}

fn get_required(key: &str) -> Result<String> {
    get(key).ok_or_else(|| MonitorError::Config(format!("missing required setting {key}")))
}

fn parse_bool(key: &str, default: bool) -> bool {
    match get(key) {
        Some(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        None => default,
    }
}

fn parse_int(key: &str, default: u64) -> Result<u64> {
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| MonitorError::Config(format!("{key} must be an integer, got '{value}'"))),
        None => Ok(default),
    }
}

fn parse_float(key: &str, default: f64) -> Result<f64> {
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| MonitorError::Config(format!("{key} must be a number, got '{value}'"))),
        None => Ok(default),
    }
}

fn parse_list(key: &str, default: &str) -> Vec<String> {
    get_or(key, default)
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct SheetsSettings {
    pub api_base: String,
    pub token: String,
    pub sheet_id: String,
    pub worksheet_name: String,
    pub url_column: String,
    pub missing_worksheet_name: String,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GeocoderSettings {
    pub base_url: String,
    pub user_agent: String,
    pub email: Option<String>,
    pub delay_sec: f64,
    pub country_code: String,
    pub region_label: String,
}

#[derive(Debug, Clone)]
pub enum PaginationMode {
    Buttons,
    Links,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sheets: SheetsSettings,
    pub telegram: TelegramSettings,
    pub renderer: RendererSettings,
    pub geocoder: GeocoderSettings,

    pub state_path: PathBuf,
    pub max_message_chars: usize,
    pub log_level: String,
    pub dry_run: bool,
    /// When set, URLs already in the ledger are not re-notified.
    pub notify_once: bool,
    pub overlay_classes: Vec<String>,

    pub run_calendar_enabled: bool,
    pub run_calendar_url: String,
    pub run_calendar_event_links: String,
    pub run_calendar_next_button: String,
    pub run_calendar_detail_links: String,
    pub run_calendar_coords_selector: String,
    pub run_calendar_pagination: PaginationMode,
    pub max_pagination_pages: usize,

    pub running_calendar_enabled: bool,
    pub running_calendar_url: String,
    pub running_calendar_next_button: String,
    pub running_calendar_event_list: String,
    pub running_calendar_event_links: String,
    pub running_calendar_location_selector: String,
    pub calendar_months: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let missing: Vec<&str> = REQUIRED_ENV
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(MonitorError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        let pagination = match get_or("SOURCE1_PAGINATION", "buttons").to_lowercase().as_str() {
            "buttons" => PaginationMode::Buttons,
            "links" => PaginationMode::Links,
            other => {
                return Err(MonitorError::Config(format!(
                    "SOURCE1_PAGINATION must be 'buttons' or 'links', got '{other}'"
                )))
            }
        };

        Ok(Self {
            sheets: SheetsSettings {
                api_base: get_or(
                    "SHEETS_API_BASE",
                    "https://sheets.googleapis.com/v4/spreadsheets",
                ),
                token: get_required("SHEETS_API_TOKEN")?,
                sheet_id: get_required("SHEET_ID")?,
                worksheet_name: get_required("WORKSHEET_NAME")?,
                url_column: get_required("URL_COLUMN")?,
                missing_worksheet_name: get_or("MISSING_WORKSHEET_NAME", "Missing races"),
            },
            telegram: TelegramSettings {
                api_base: get_or("TELEGRAM_API_BASE", "https://api.telegram.org"),
                bot_token: get_required("TELEGRAM_BOT_TOKEN")?,
                chat_id: get_required("TELEGRAM_CHAT_ID")?,
            },
            renderer: RendererSettings {
                webdriver_url: get_or("WEBDRIVER_URL", "http://localhost:9515"),
                headless: parse_bool("RUN_HEADLESS", true),
                user_agent: get("USER_AGENT"),
                timeout_ms: parse_int("TIMEOUT_MS", 30_000)?,
            },
            geocoder: GeocoderSettings {
                base_url: get_or("GEOCODER_BASE_URL", "https://nominatim.openstreetmap.org"),
                user_agent: get_or("GEOCODER_USER_AGENT", "race-radar/0.1"),
                email: get("GEOCODER_EMAIL"),
                delay_sec: parse_float("GEOCODER_DELAY_SEC", 1.0)?,
                country_code: get_or("GEOCODER_COUNTRY_CODE", "pt"),
                region_label: get_or("GEOCODER_REGION_LABEL", "Portugal"),
            },
            state_path: PathBuf::from(get_or("STATE_PATH", "./data/notified.json")),
            max_message_chars: parse_int("MAX_MESSAGE_CHARS", 3_800)? as usize,
            log_level: get_or("LOG_LEVEL", "info"),
            dry_run: parse_bool("DRY_RUN", false),
            notify_once: parse_bool("NOTIFY_ONCE", false),
            overlay_classes: parse_list(
                "COOKIE_BANNER_CLASSES",
                "cookie-banner,cookie-consent,cc-window",
            ),
            run_calendar_enabled: parse_bool("SOURCE1_ENABLED", true),
            run_calendar_url: get_or("SOURCE1_URL", "https://portugalruncalendar.com"),
            run_calendar_event_links: get_or("SOURCE1_EVENT_LINKS", "div.space-y-6 a.block.h-full"),
            run_calendar_next_button: get_or(
                "SOURCE1_NEXT_BUTTON_SELECTOR",
                "xpath=//button[contains(., 'Próxima')]",
            ),
            run_calendar_detail_links: get_or(
                "SOURCE1_DETAIL_LINKS",
                "div.space-y-6 a.block.h-full a.w-full",
            ),
            run_calendar_coords_selector: get_or(
                "SOURCE1_COORDS_SELECTOR",
                "div.space-y-6 div.flex.items-start.gap-3 p.text-muted-foreground.mt-1",
            ),
            run_calendar_pagination: pagination,
            max_pagination_pages: parse_int("MAX_PAGINATION_PAGES", 200)? as usize,
            running_calendar_enabled: parse_bool("SOURCE2_ENABLED", true),
            running_calendar_url: get_or(
                "SOURCE2_URL",
                "https://www.portugalrunning.com/calendario-de-corridas/",
            ),
            running_calendar_next_button: get_or("SOURCE2_NEXT_BUTTON", "button#evcal_next"),
            running_calendar_event_list: get_or(
                "SOURCE2_EVENT_LIST",
                "div.eventon_events_list div.eventon_list_event",
            ),
            running_calendar_event_links: get_or("SOURCE2_EVENT_LINKS", "a.evcal_evdata_row"),
            running_calendar_location_selector: get_or(
                "SOURCE2_LOCATION_SELECTOR",
                "em.evcal_location em.event_location_name",
            ),
            calendar_months: parse_int("CALENDAR_MONTHS", 13)? as usize,
        })
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.renderer.timeout_ms)
    }

    /// Composes the enabled source adapters as tagged specs; each
    /// variant carries only the fields its engine needs.
    pub fn sources(&self) -> Vec<SourceSpec> {
        let mut specs = Vec::new();

        if self.run_calendar_enabled {
            let event_selectors = vec![
                self.run_calendar_event_links.clone(),
                "div.space-y-6 a[href]".to_string(),
                "div.space-y-6 a".to_string(),
            ];
            let spec = match self.run_calendar_pagination {
                PaginationMode::Buttons => SourceSpec::Stepper(StepperConfig {
                    name: RUN_CALENDAR_SOURCE.to_string(),
                    entry_url: self.run_calendar_url.clone(),
                    event_selectors,
                    next_selector: self.run_calendar_next_button.clone(),
                    wait_selector: None,
                    marker_selectors: Vec::new(),
                    max_steps: self.max_pagination_pages,
                    extraction: Extraction::DetailCoords {
                        detail_selector: self.run_calendar_detail_links.clone(),
                        coords_selector: self.run_calendar_coords_selector.clone(),
                    },
                    overlay_classes: self.overlay_classes.clone(),
                    wait_timeout: self.navigation_timeout(),
                }),
                PaginationMode::Links => SourceSpec::LinkFollow(LinkFollowConfig {
                    name: RUN_CALENDAR_SOURCE.to_string(),
                    entry_url: self.run_calendar_url.clone(),
                    event_selectors,
                    max_pages: self.max_pagination_pages,
                    overlay_classes: self.overlay_classes.clone(),
                }),
            };
            specs.push(spec);
        }

        if self.running_calendar_enabled {
            specs.push(SourceSpec::Stepper(StepperConfig {
                name: RUNNING_CALENDAR_SOURCE.to_string(),
                entry_url: self.running_calendar_url.clone(),
                event_selectors: vec![self.running_calendar_event_links.clone()],
                next_selector: self.running_calendar_next_button.clone(),
                wait_selector: Some(self.running_calendar_next_button.clone()),
                marker_selectors: vec![
                    "#evcal_cur".to_string(),
                    ".eventon_fullcal .evo_month_title".to_string(),
                    ".eventon_fullcal .evcal_month_line".to_string(),
                    "#evcal_head".to_string(),
                ],
                max_steps: self.calendar_months,
                extraction: Extraction::InlineLocation {
                    container_selector: self.running_calendar_event_list.clone(),
                    link_selector: self.running_calendar_event_links.clone(),
                    location_selector: self.running_calendar_location_selector.clone(),
                },
                overlay_classes: self.overlay_classes.clone(),
                wait_timeout: self.navigation_timeout(),
            }));
        }

        specs
    }
}
