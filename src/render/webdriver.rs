//! Minimal W3C WebDriver client over HTTP, enough to drive a
//! chromedriver-compatible endpoint: one session, one window handle
//! per logical page, element lookup/attribute/text/click and
//! synchronous script evaluation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::RendererSettings;
use crate::error::{MonitorError, Result};
use crate::render::{Browser, Element, Page};

/// Element identifier key mandated by the WebDriver specification.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct Driver {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl Driver {
    fn session_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/session/{}", self.base_url, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.base_url, self.session_id, path)
        }
    }

    async fn unwrap_value(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| MonitorError::Render(format!("malformed driver response: {e}")))?;
        if !status.is_success() {
            let error = body["value"]["error"].as_str().unwrap_or("unknown error");
            let message = body["value"]["message"].as_str().unwrap_or("");
            return Err(MonitorError::Render(format!(
                "{error}: {}",
                message.lines().next().unwrap_or("")
            )));
        }
        Ok(body["value"].take())
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.session_url(path))
            .send()
            .await
            .map_err(|e| MonitorError::Render(format!("driver unreachable: {e}")))?;
        Self::unwrap_value(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.session_url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| MonitorError::Render(format!("driver unreachable: {e}")))?;
        Self::unwrap_value(response).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .delete(self.session_url(path))
            .send()
            .await
            .map_err(|e| MonitorError::Render(format!("driver unreachable: {e}")))?;
        Self::unwrap_value(response).await
    }

    /// Focuses the window a page or element belongs to. Commands are
    /// strictly sequential, so switching before each operation is safe.
    async fn focus(&self, window: &str) -> Result<()> {
        self.post("window", json!({ "handle": window })).await?;
        Ok(())
    }
}

fn locator(selector: &str) -> Value {
    match selector.strip_prefix("xpath=") {
        Some(expr) => json!({ "using": "xpath", "value": expr }),
        None => json!({ "using": "css selector", "value": selector }),
    }
}

pub struct WebDriverBrowser {
    driver: Arc<Driver>,
}

impl WebDriverBrowser {
    /// Starts a WebDriver session against `settings.webdriver_url`.
    pub async fn connect(settings: &RendererSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms + 10_000))
            .build()?;
        let base_url = settings.webdriver_url.trim_end_matches('/').to_string();

        let mut chrome_args = vec![
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
        ];
        if settings.headless {
            chrome_args.push("--headless=new".to_string());
        }
        if let Some(user_agent) = &settings.user_agent {
            chrome_args.push(format!("--user-agent={user_agent}"));
        }

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": settings.timeout_ms,
                        "script": settings.timeout_ms,
                    },
                    "goog:chromeOptions": { "args": chrome_args },
                }
            }
        });

        let response = client
            .post(format!("{base_url}/session"))
            .json(&capabilities)
            .send()
            .await
            .map_err(|e| MonitorError::Render(format!("driver unreachable: {e}")))?;
        let value = Driver::unwrap_value(response).await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| MonitorError::Render("session response missing sessionId".into()))?
            .to_string();
        debug!(%session_id, "webdriver session started");

        Ok(Self {
            driver: Arc::new(Driver { client, base_url, session_id }),
        })
    }

    /// Ends the session, closing every window it owns.
    pub async fn quit(&self) -> Result<()> {
        self.driver.delete("").await?;
        Ok(())
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn open(&self) -> Result<Box<dyn Page>> {
        let value = self.driver.post("window/new", json!({ "type": "tab" })).await?;
        let window = value["handle"]
            .as_str()
            .ok_or_else(|| MonitorError::Render("window/new response missing handle".into()))?
            .to_string();
        Ok(Box::new(WebDriverPage {
            driver: self.driver.clone(),
            window,
        }))
    }
}

struct WebDriverPage {
    driver: Arc<Driver>,
    window: String,
}

impl WebDriverPage {
    fn element_from(&self, value: &Value) -> Result<Box<dyn Element>> {
        let id = value[ELEMENT_KEY]
            .as_str()
            .ok_or_else(|| MonitorError::Render("element response missing reference".into()))?
            .to_string();
        Ok(Box::new(WebDriverElement {
            driver: self.driver.clone(),
            window: self.window.clone(),
            id,
        }))
    }

    fn elements_from(&self, value: Value) -> Result<Vec<Box<dyn Element>>> {
        value
            .as_array()
            .map(|items| items.iter().map(|item| self.element_from(item)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.driver.focus(&self.window).await?;
        self.driver.post("url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.driver.focus(&self.window).await?;
        let value = self.driver.get("url").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MonitorError::Render("url response was not a string".into()))
    }

    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        self.driver.focus(&self.window).await?;
        match self.driver.post("elements", locator(selector)).await {
            Ok(value) => self.elements_from(value),
            // "no such element" comes back as an error for some drivers;
            // an empty match is not an error for callers.
            Err(MonitorError::Render(message)) if message.starts_with("no such element") => {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.query(selector).await?.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MonitorError::Render(format!(
                    "timed out waiting for selector '{selector}'"
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn eval(&self, script: &str) -> Result<serde_json::Value> {
        self.driver.focus(&self.window).await?;
        self.driver
            .post("execute/sync", json!({ "script": script, "args": [] }))
            .await
    }

    async fn close(&self) -> Result<()> {
        self.driver.focus(&self.window).await?;
        self.driver.delete("window").await?;
        Ok(())
    }
}

struct WebDriverElement {
    driver: Arc<Driver>,
    window: String,
    id: String,
}

#[async_trait]
impl Element for WebDriverElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.driver.focus(&self.window).await?;
        let value = self
            .driver
            .get(&format!("element/{}/attribute/{name}", self.id))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn text(&self) -> Result<String> {
        self.driver.focus(&self.window).await?;
        let value = self.driver.get(&format!("element/{}/text", self.id)).await?;
        Ok(value.as_str().unwrap_or("").to_string())
    }

    async fn click(&self) -> Result<()> {
        self.driver.focus(&self.window).await?;
        self.driver
            .post(&format!("element/{}/click", self.id), json!({}))
            .await?;
        Ok(())
    }

    async fn is_disabled(&self) -> Result<bool> {
        self.driver.focus(&self.window).await?;
        let value = self
            .driver
            .get(&format!("element/{}/enabled", self.id))
            .await?;
        Ok(!value.as_bool().unwrap_or(true))
    }

    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn Element>>> {
        self.driver.focus(&self.window).await?;
        let value = match self
            .driver
            .post(&format!("element/{}/elements", self.id), locator(selector))
            .await
        {
            Ok(value) => value,
            Err(MonitorError::Render(message)) if message.starts_with("no such element") => {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err),
        };
        let Some(items) = value.as_array() else {
            return Ok(Vec::new());
        };
        items
            .iter()
            .map(|item| {
                let id = item[ELEMENT_KEY]
                    .as_str()
                    .ok_or_else(|| {
                        MonitorError::Render("element response missing reference".into())
                    })?
                    .to_string();
                Ok(Box::new(WebDriverElement {
                    driver: self.driver.clone(),
                    window: self.window.clone(),
                    id,
                }) as Box<dyn Element>)
            })
            .collect()
    }
}
