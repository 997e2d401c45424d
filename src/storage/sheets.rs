//! Google Sheets backed sink
//!
//! Talks to the Sheets v4 REST API directly. Every worksheet is one table;
//! writes clear the worksheet and put the full grid back at `A1`.

use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::{ServiceAccountAuth, ServiceAccountKey, TokenProvider};
use super::Sink;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::{ensure_success, ResilientHttpClient};
use crate::schemas::Table;

/// Label used for request metrics and logs
const SHEETS_CLIENT: &str = "sheets";

/// Size of newly created worksheets unless the table needs more
const DEFAULT_ROWS: usize = 1000;
const DEFAULT_COLUMNS: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: usize,
    #[serde(default)]
    column_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    index: i64,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// A1 range covering a whole worksheet, or starting at `cell`.
fn a1_range(title: &str, cell: Option<&str>) -> String {
    let quoted = format!("'{}'", title.replace('\'', "''"));
    match cell {
        Some(cell) => format!("{quoted}!{cell}"),
        None => quoted,
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Sink over one spreadsheet
pub struct GoogleSheetsSink {
    http: Arc<ResilientHttpClient>,
    tokens: Arc<dyn TokenProvider>,
    base_url: Url,
    spreadsheet_id: String,
    staged: bool,
}

impl GoogleSheetsSink {
    pub fn new(
        http: Arc<ResilientHttpClient>,
        tokens: Arc<dyn TokenProvider>,
        base_url: &str,
        spreadsheet_id: &str,
        staged: bool,
    ) -> Result<Self> {
        Ok(Self {
            http,
            tokens,
            base_url: Url::parse(base_url)?,
            spreadsheet_id: spreadsheet_id.to_string(),
            staged,
        })
    }

    /// Opens the configured spreadsheet with the service-account key file.
    pub async fn from_config(config: &Config, http: Arc<ResilientHttpClient>) -> Result<Self> {
        let path = config
            .google_credentials_file
            .as_ref()
            .ok_or_else(|| SyncError::MissingConfig(vec!["GOOGLE_CREDENTIALS_FILE".to_string()]))?;
        let spreadsheet_id = config
            .google_sheet_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::MissingConfig(vec!["GOOGLE_SHEET_ID".to_string()]))?;

        let key = ServiceAccountKey::from_file(path).await?;
        let auth = ServiceAccountAuth::new(key, http.inner().clone())?;

        info!(
            spreadsheet_id = %spreadsheet_id,
            staged = config.sheets_staged_writes,
            "Opened spreadsheet store"
        );
        Self::new(
            http,
            Arc::new(auth),
            &config.sheets_api_url,
            spreadsheet_id,
            config.sheets_staged_writes,
        )
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::SheetError(format!("unusable base URL {}", self.base_url)))?
            .pop_if_empty()
            .push("spreadsheets")
            .extend(segments);
        Ok(url)
    }

    fn spreadsheet_url(&self) -> Result<Url> {
        self.url(&[&self.spreadsheet_id])
    }

    fn batch_update_url(&self) -> Result<Url> {
        self.url(&[&format!("{}:batchUpdate", self.spreadsheet_id)])
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url> {
        self.url(&[&self.spreadsheet_id, "values", &format!("{range}{suffix}")])
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<Response> {
        let token = self.tokens.access_token().await?;
        let client = self.http.inner();
        let response = self
            .http
            .execute(SHEETS_CLIENT, || {
                let mut request = client.request(method.clone(), url.clone()).bearer_auth(&token);
                if let Some(body) = &body {
                    request = request.json(body);
                }
                request.build()
            })
            .await?;
        ensure_success(response).await
    }

    async fn sheets(&self) -> Result<Vec<SheetProperties>> {
        let mut url = self.spreadsheet_url()?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title,index,gridProperties)");
        let response: SpreadsheetResponse = self.send(Method::GET, url, None).await?.json().await?;
        Ok(response.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn find_sheet(&self, title: &str) -> Result<Option<SheetProperties>> {
        Ok(self.sheets().await?.into_iter().find(|s| s.title == title))
    }

    async fn batch_update(&self, requests: Vec<Value>) -> Result<Vec<Value>> {
        let body = json!({ "requests": requests });
        let response: BatchUpdateResponse = self
            .send(Method::POST, self.batch_update_url()?, Some(body))
            .await?
            .json()
            .await?;
        Ok(response.replies)
    }

    async fn add_sheet(&self, title: &str, rows: usize, columns: usize) -> Result<SheetProperties> {
        let replies = self
            .batch_update(vec![json!({
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "rowCount": rows, "columnCount": columns }
                    }
                }
            })])
            .await?;

        let properties = replies
            .first()
            .and_then(|r| r.pointer("/addSheet/properties"))
            .cloned()
            .ok_or_else(|| SyncError::SheetError(format!("addSheet for '{title}' returned no properties")))?;
        let properties: SheetProperties = serde_json::from_value(properties)?;
        info!(sheet = %title, sheet_id = properties.sheet_id, "Created worksheet");
        Ok(properties)
    }

    async fn grow_sheet(&self, sheet: &SheetProperties, rows: usize, columns: usize) -> Result<()> {
        let grid = &sheet.grid_properties;
        if grid.row_count >= rows && grid.column_count >= columns {
            return Ok(());
        }
        debug!(sheet = %sheet.title, rows, columns, "Growing worksheet grid");
        self.batch_update(vec![json!({
            "updateSheetProperties": {
                "properties": {
                    "sheetId": sheet.sheet_id,
                    "gridProperties": {
                        "rowCount": rows.max(grid.row_count),
                        "columnCount": columns.max(grid.column_count)
                    }
                },
                "fields": "gridProperties(rowCount,columnCount)"
            }
        })])
        .await?;
        Ok(())
    }

    async fn clear(&self, title: &str) -> Result<()> {
        let url = self.values_url(&a1_range(title, None), ":clear")?;
        self.send(Method::POST, url, Some(json!({}))).await?;
        Ok(())
    }

    async fn put_values(&self, title: &str, table: &Table) -> Result<()> {
        let range = a1_range(title, Some("A1"));
        let mut url = self.values_url(&range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": table.to_grid(),
        });
        self.send(Method::PUT, url, Some(body)).await?;
        Ok(())
    }

    /// Get-or-create, clear, write.
    async fn write_in_place(&self, name: &str, table: &Table, rows: usize, columns: usize) -> Result<()> {
        match self.find_sheet(name).await? {
            Some(sheet) => self.grow_sheet(&sheet, rows, columns).await?,
            None => {
                self.add_sheet(name, rows, columns).await?;
            }
        }
        self.clear(name).await?;
        self.put_values(name, table).await
    }

    /// Writes into a fresh staging worksheet, then swaps it in with one
    /// atomic batch update. The live worksheet is untouched until the swap.
    async fn write_staged(&self, name: &str, table: &Table, rows: usize, columns: usize) -> Result<()> {
        let staging_name = format!("{name} (staging)");
        let sheets = self.sheets().await?;

        if let Some(leftover) = sheets.iter().find(|s| s.title == staging_name) {
            warn!(sheet = %staging_name, "Removing leftover staging worksheet");
            self.batch_update(vec![json!({ "deleteSheet": { "sheetId": leftover.sheet_id } })])
                .await?;
        }

        let staging = self.add_sheet(&staging_name, rows, columns).await?;
        if let Err(e) = self.put_values(&staging_name, table).await {
            if let Err(cleanup) = self
                .batch_update(vec![json!({ "deleteSheet": { "sheetId": staging.sheet_id } })])
                .await
            {
                warn!(sheet = %staging_name, error = %cleanup, "Failed to remove staging worksheet");
            }
            return Err(e);
        }

        let mut requests = Vec::new();
        let mut properties = json!({ "sheetId": staging.sheet_id, "title": name });
        let mut fields = "title";
        if let Some(live) = sheets.iter().find(|s| s.title == name) {
            requests.push(json!({ "deleteSheet": { "sheetId": live.sheet_id } }));
            properties["index"] = json!(live.index);
            fields = "title,index";
        }
        requests.push(json!({
            "updateSheetProperties": { "properties": properties, "fields": fields }
        }));
        self.batch_update(requests).await?;
        debug!(sheet = %name, "Swapped staging worksheet into place");
        Ok(())
    }
}

#[async_trait]
impl Sink for GoogleSheetsSink {
    fn describe(&self) -> String {
        format!("google-sheets:{}", self.spreadsheet_id)
    }

    async fn write_table(&self, name: &str, table: &Table) -> Result<()> {
        let rows = (table.len() + 1).max(DEFAULT_ROWS);
        let columns = table.width().max(DEFAULT_COLUMNS);

        if self.staged {
            self.write_staged(name, table, rows, columns).await?;
        } else {
            self.write_in_place(name, table, rows, columns).await?;
        }

        info!(sheet = %name, rows = table.len(), staged = self.staged, "Worksheet replaced");
        Ok(())
    }

    async fn read_rows(&self, name: &str) -> Result<Option<Vec<Vec<String>>>> {
        if self.find_sheet(name).await?.is_none() {
            return Ok(None);
        }
        let url = self.values_url(&a1_range(name, None), "")?;
        let range: ValueRange = self.send(Method::GET, url, None).await?.json().await?;
        let rows = range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Cell;
    use crate::storage::StaticToken;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink(server: &MockServer, staged: bool) -> GoogleSheetsSink {
        GoogleSheetsSink::new(
            Arc::new(ResilientHttpClient::with_defaults().unwrap()),
            Arc::new(StaticToken("test-token".to_string())),
            &format!("{}/v4", server.uri()),
            "sheet-1",
            staged,
        )
        .unwrap()
    }

    fn sheets_body(titles: &[(i64, &str)]) -> Value {
        json!({
            "sheets": titles.iter().enumerate().map(|(i, (id, title))| json!({
                "properties": {
                    "sheetId": id,
                    "title": title,
                    "index": i,
                    "gridProperties": { "rowCount": 1000, "columnCount": 26 }
                }
            })).collect::<Vec<_>>()
        })
    }

    fn budget_table() -> Table {
        let mut table = Table::new(["Year", "Budget"]);
        table.push_row(vec![Cell::Int(2020), Cell::Int(100)]);
        table.push_row(vec![Cell::from("Total"), Cell::Empty]);
        table
    }

    #[test]
    fn test_a1_range_quoting() {
        assert_eq!(a1_range("Budget Data", None), "'Budget Data'");
        assert_eq!(a1_range("Bob's", Some("A1")), "'Bob''s'!A1");
    }

    #[tokio::test]
    async fn test_write_creates_missing_sheet_then_clears_and_writes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sheets_body(&[(0, "Sheet1")])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-1:batchUpdate"))
            .and(body_string_contains("addSheet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "replies": [{ "addSheet": { "properties": { "sheetId": 9, "title": "Processed Budget" } } }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-1/values/.*:clear$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-1/values/"))
            .and(body_partial_json(json!({
                "majorDimension": "ROWS",
                "values": [["Year", "Budget"], [2020, 100], ["Total", ""]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        sink(&server, false)
            .write_table("Processed Budget", &budget_table())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_staged_write_swaps_in_one_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(sheets_body(&[(0, "Sheet1"), (5, "Processed Budget")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-1:batchUpdate"))
            .and(body_string_contains("addSheet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "replies": [{ "addSheet": { "properties": {
                    "sheetId": 12, "title": "Processed Budget (staging)"
                } } }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-1/values/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-1:batchUpdate"))
            .and(body_partial_json(json!({
                "requests": [
                    { "deleteSheet": { "sheetId": 5 } },
                    { "updateSheetProperties": {
                        "properties": { "sheetId": 12, "title": "Processed Budget", "index": 1 },
                        "fields": "title,index"
                    } }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "replies": [{}, {}] })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        sink(&server, true)
            .write_table("Processed Budget", &budget_table())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_rows_of_missing_sheet_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sheets_body(&[(0, "Sheet1")])))
            .mount(&server)
            .await;

        let rows = sink(&server, false).read_rows("YouTube").await.unwrap();
        assert!(rows.is_none());
    }

    #[tokio::test]
    async fn test_read_records_from_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sheets_body(&[(3, "YouTube")])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-1/values/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "YouTube!A1:C3",
                "majorDimension": "ROWS",
                "values": [["Name", "Segment", "Channel ID"], ["Main", "Org", "UC123"], ["Short"]]
            })))
            .mount(&server)
            .await;

        let records = sink(&server, false).read_records("YouTube").await.unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Channel ID"], "UC123");
        assert_eq!(records[1]["Segment"], "");
    }

    #[tokio::test]
    async fn test_api_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
            .mount(&server)
            .await;

        let err = sink(&server, false).read_rows("YouTube").await.unwrap_err();
        assert!(matches!(err, SyncError::ApiError { .. }));
    }
}
