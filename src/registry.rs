//! Known-URL registry backed by a Google Sheets spreadsheet. The
//! pipeline reads the recorded-URL column fresh each run and rewrites
//! the "missing races" worksheet wholesale when new candidates show
//! up.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use url::Url;

use crate::config::SheetsSettings;
use crate::error::{MonitorError, Result};
use crate::urlnorm;

/// One row of the missing-races worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub source: String,
    pub url: String,
    pub coords: String,
}

#[async_trait]
pub trait RaceRegistry: Send + Sync {
    /// The set of normalized URLs a human has already recorded.
    /// Failures must propagate: an unreachable registry is never
    /// "no known URLs".
    async fn known_urls(&self) -> Result<HashSet<String>>;

    /// Full clear-then-write of the missing-races worksheet, creating
    /// it if absent. Returns the worksheet id used for link building.
    async fn replace_missing(&self, rows: &[CandidateRow]) -> Result<i64>;

    /// Worksheet id of the missing-races sheet without writing to it.
    async fn missing_worksheet_gid(&self) -> Result<i64>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    #[serde(rename = "sheetId")]
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

/// Resolves the URL column either as a 1-based numeric index or by
/// header-row text match.
fn resolve_column(header: &[String], url_column: &str) -> Result<usize> {
    if let Ok(index) = url_column.parse::<usize>() {
        if index == 0 {
            return Err(MonitorError::Registry(
                "URL column index is 1-based, got 0".into(),
            ));
        }
        return Ok(index);
    }
    header
        .iter()
        .position(|cell| cell.trim() == url_column)
        .map(|idx| idx + 1)
        .ok_or_else(|| {
            MonitorError::Registry(format!("column '{url_column}' not found in header row"))
        })
}

pub struct SheetsRegistry {
    client: reqwest::Client,
    api_base: String,
    token: String,
    sheet_id: String,
    worksheet_name: String,
    url_column: String,
    missing_worksheet: String,
}

impl SheetsRegistry {
    pub fn new(settings: &SheetsSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            sheet_id: settings.sheet_id.clone(),
            worksheet_name: settings.worksheet_name.clone(),
            url_column: settings.url_column.clone(),
            missing_worksheet: settings.missing_worksheet_name.clone(),
        }
    }

    /// Builds `{api_base}/{sheet_id}/<segments...>` with proper
    /// percent-encoding of worksheet titles.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| MonitorError::Registry(format!("bad API base URL: {e}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| MonitorError::Registry("API base URL cannot hold a path".into()))?;
            path.push(&self.sheet_id);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MonitorError::Registry(format!(
            "{action} failed with status {status}: {}",
            body.lines().next().unwrap_or("")
        )))
    }

    async fn fetch_values(&self, title: &str) -> Result<Vec<Vec<String>>> {
        let url = self.endpoint(&["values", title])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let range: ValueRange = Self::check(response, "reading worksheet values")
            .await?
            .json()
            .await?;
        Ok(range.values)
    }

    async fn sheet_properties(&self) -> Result<Vec<SheetProperties>> {
        let mut url = self.endpoint(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let meta: SpreadsheetMeta = Self::check(response, "reading spreadsheet metadata")
            .await?
            .json()
            .await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties).collect())
    }

    /// Finds the missing-races worksheet id, creating the worksheet
    /// when it does not exist yet.
    async fn ensure_missing_worksheet(&self) -> Result<i64> {
        let sheets = self.sheet_properties().await?;
        if let Some(props) = sheets.iter().find(|p| p.title == self.missing_worksheet) {
            return Ok(props.sheet_id);
        }

        info!(worksheet = %self.missing_worksheet, "worksheet not found, creating it");
        let url = Url::parse(&format!("{}/{}:batchUpdate", self.api_base, self.sheet_id))
            .map_err(|e| MonitorError::Registry(format!("bad API base URL: {e}")))?;
        let body = json!({
            "requests": [
                { "addSheet": { "properties": { "title": self.missing_worksheet } } }
            ]
        });
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let reply: serde_json::Value = Self::check(response, "creating worksheet")
            .await?
            .json()
            .await?;
        reply["replies"][0]["addSheet"]["properties"]["sheetId"]
            .as_i64()
            .ok_or_else(|| MonitorError::Registry("addSheet reply missing sheetId".into()))
    }
}

#[async_trait]
impl RaceRegistry for SheetsRegistry {
    async fn known_urls(&self) -> Result<HashSet<String>> {
        let rows = self.fetch_values(&self.worksheet_name).await?;
        if rows.is_empty() {
            return Ok(HashSet::new());
        }

        let column = resolve_column(&rows[0], &self.url_column)?;
        let known = rows
            .iter()
            .skip(1) // header row
            .filter_map(|row| row.get(column - 1))
            .filter(|cell| !cell.trim().is_empty())
            .map(|cell| urlnorm::normalize(cell))
            .collect();
        Ok(known)
    }

    async fn replace_missing(&self, rows: &[CandidateRow]) -> Result<i64> {
        let gid = self.ensure_missing_worksheet().await?;

        let clear_url = self.endpoint(&["values", &format!("{}:clear", self.missing_worksheet)])?;
        let response = self
            .client
            .post(clear_url)
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await?;
        Self::check(response, "clearing worksheet").await?;

        if rows.is_empty() {
            info!("missing-races worksheet cleared, nothing new to write");
            return Ok(gid);
        }

        let mut values = vec![vec![
            "Source".to_string(),
            "URL".to_string(),
            "Coordinates".to_string(),
        ]];
        values.extend(
            rows.iter()
                .map(|row| vec![row.source.clone(), row.url.clone(), row.coords.clone()]),
        );

        let mut update_url = self.endpoint(&["values", &self.missing_worksheet])?;
        update_url
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW");
        let response = self
            .client
            .put(update_url)
            .bearer_auth(&self.token)
            .json(&json!({ "values": values }))
            .send()
            .await?;
        Self::check(response, "writing missing-races rows").await?;

        info!(rows = rows.len(), "missing-races worksheet replaced");
        Ok(gid)
    }

    async fn missing_worksheet_gid(&self) -> Result<i64> {
        self.ensure_missing_worksheet().await
    }
}
