//! Rendering backend seam. The pipeline only ever talks to these
//! traits; production wires in the WebDriver client, tests wire in
//! scripted fakes.

pub mod webdriver;

pub use webdriver::WebDriverBrowser;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A browsing context that can hand out pages. Sources share one
/// context and use it strictly sequentially.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Page>>;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates and waits for the document to finish loading.
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Returns all elements matching `selector`, in document order.
    /// Selectors are CSS by default; an `xpath=` prefix switches the
    /// query language.
    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn Element>>>;

    /// Polls until `selector` matches at least one element or the
    /// timeout elapses.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Evaluates a script in page context. Best-effort hook used for
    /// cookie-banner removal.
    async fn eval(&self, script: &str) -> Result<serde_json::Value>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Element: Send + Sync {
    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    async fn text(&self) -> Result<String>;

    async fn click(&self) -> Result<()>;

    async fn is_disabled(&self) -> Result<bool>;

    /// Element-scoped query, same selector rules as [`Page::query`].
    async fn query(&self, selector: &str) -> Result<Vec<Box<dyn Element>>>;
}
