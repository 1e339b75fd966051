use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{
    error::GoogleError,
    helpers::google::GoogleToken,
    models::{
        google::{BatchUpdateResponse, SheetProperties, SpreadsheetResource},
        invoice::RowSet,
    },
};

pub const SHEETS_API: &str = "https://sheets.googleapis.com/v4";
pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

pub const DEFAULT_ROWS_COUNT: u32 = 1_000;
pub const DEFAULT_COLS_COUNT: u32 = 26;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spreadsheet {
    pub id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub id: i64,
    pub title: String,
    pub index: usize,
}

impl From<SheetProperties> for Worksheet {
    fn from(properties: SheetProperties) -> Self {
        Self {
            id: properties.sheet_id,
            title: properties.title,
            index: properties.index,
        }
    }
}

/// Spreadsheet operations the report needs from a document host.
#[allow(async_fn_in_trait)]
pub trait SpreadsheetBackend {
    async fn create(&self, title: &str) -> Result<Spreadsheet, GoogleError>;

    /// Grant read access to anyone with the link, without notification.
    async fn share_with_link(&self, spreadsheet: &Spreadsheet) -> Result<(), GoogleError>;

    /// Worksheets ordered by their position in the spreadsheet.
    async fn worksheets(&self, spreadsheet: &Spreadsheet) -> Result<Vec<Worksheet>, GoogleError>;

    async fn rename_worksheet(
        &self,
        spreadsheet: &Spreadsheet,
        worksheet: &Worksheet,
        title: &str,
    ) -> Result<(), GoogleError>;

    async fn add_worksheet(
        &self,
        spreadsheet: &Spreadsheet,
        title: &str,
        rows: u32,
        cols: u32,
    ) -> Result<Worksheet, GoogleError>;

    /// Insert `rows` so that the first one lands on 1-based row `start_row`,
    /// shifting existing rows down. Values are stored raw.
    async fn insert_rows(
        &self,
        spreadsheet: &Spreadsheet,
        worksheet: &Worksheet,
        start_row: u32,
        rows: &[Vec<Value>],
    ) -> Result<(), GoogleError>;
}

impl<S: SpreadsheetBackend + ?Sized> SpreadsheetBackend for &S {
    async fn create(&self, title: &str) -> Result<Spreadsheet, GoogleError> {
        (**self).create(title).await
    }

    async fn share_with_link(&self, spreadsheet: &Spreadsheet) -> Result<(), GoogleError> {
        (**self).share_with_link(spreadsheet).await
    }

    async fn worksheets(&self, spreadsheet: &Spreadsheet) -> Result<Vec<Worksheet>, GoogleError> {
        (**self).worksheets(spreadsheet).await
    }

    async fn rename_worksheet(
        &self,
        spreadsheet: &Spreadsheet,
        worksheet: &Worksheet,
        title: &str,
    ) -> Result<(), GoogleError> {
        (**self).rename_worksheet(spreadsheet, worksheet, title).await
    }

    async fn add_worksheet(
        &self,
        spreadsheet: &Spreadsheet,
        title: &str,
        rows: u32,
        cols: u32,
    ) -> Result<Worksheet, GoogleError> {
        (**self).add_worksheet(spreadsheet, title, rows, cols).await
    }

    async fn insert_rows(
        &self,
        spreadsheet: &Spreadsheet,
        worksheet: &Worksheet,
        start_row: u32,
        rows: &[Vec<Value>],
    ) -> Result<(), GoogleError> {
        (**self).insert_rows(spreadsheet, worksheet, start_row, rows).await
    }
}

/// Write `table` into the worksheet at position `index`, named `name`.
///
/// An existing worksheet at that position is renamed; otherwise a new one is
/// appended. The header goes to row 1 and the data rows follow from row 2.
pub async fn write_table_to_worksheet<S: SpreadsheetBackend>(
    backend: &S,
    spreadsheet: &Spreadsheet,
    table: &RowSet,
    index: usize,
    name: &str,
) -> Result<Worksheet, GoogleError> {
    let worksheet = match backend.worksheets(spreadsheet).await?.into_iter().nth(index) {
        Some(existing) => {
            info!("Renaming worksheet {} to {}", existing.title, name);
            backend.rename_worksheet(spreadsheet, &existing, name).await?;
            Worksheet {
                title: name.to_string(),
                ..existing
            }
        }
        None => {
            info!("No worksheet at position {}, adding {}", index, name);
            backend
                .add_worksheet(spreadsheet, name, DEFAULT_ROWS_COUNT, DEFAULT_COLS_COUNT)
                .await?
        }
    };

    let header: Vec<Value> = table
        .columns()
        .iter()
        .map(|column| Value::String(column.clone()))
        .collect();
    backend
        .insert_rows(spreadsheet, &worksheet, 1, &[header])
        .await?;

    let first_row_after_header = 2;
    if !table.is_empty() {
        backend
            .insert_rows(spreadsheet, &worksheet, first_row_after_header, table.rows())
            .await?;
    }

    info!(
        "Wrote {} rows to worksheet {} of {}",
        table.len(),
        worksheet.title,
        spreadsheet.title
    );
    Ok(worksheet)
}

/// Google Sheets v4 + Drive v3 client authorized with a bearer token.
///
/// Clones share one token, which is refreshed before any request made
/// within a minute of its expiry.
#[derive(Clone, Debug)]
pub struct SheetsClient {
    client: Client,
    token: Arc<Mutex<GoogleToken>>,
    sheets_base: String,
    drive_base: String,
}

impl SheetsClient {
    /// Client for an access token that is never refreshed. Google access
    /// tokens last an hour; use [`SheetsClient::with_token`] with a renewable
    /// token for anything longer.
    pub fn new(access_token: &str) -> Result<Self, GoogleError> {
        Self::with_token(GoogleToken::fixed(access_token))
    }

    pub fn with_token(token: GoogleToken) -> Result<Self, GoogleError> {
        Ok(Self {
            client: Client::builder().build()?,
            token: Arc::new(Mutex::new(token)),
            sheets_base: SHEETS_API.to_string(),
            drive_base: DRIVE_API.to_string(),
        })
    }

    pub fn with_base_urls(mut self, sheets_base: &str, drive_base: &str) -> Self {
        self.sheets_base = sheets_base.trim_end_matches('/').to_string();
        self.drive_base = drive_base.trim_end_matches('/').to_string();
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        what: &str,
        request: RequestBuilder,
    ) -> Result<T, GoogleError> {
        let access_token = self.token.lock().await.bearer().await?;
        let response = request.bearer_auth(access_token).send().await.map_err(|e| {
            error!("Failed to send {} request: {}", what, e);
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Google API returned error status {} for {}: {}", status, what, body);
            return Err(GoogleError::Status {
                what: what.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn batch_update(
        &self,
        spreadsheet: &Spreadsheet,
        what: &str,
        requests: Value,
    ) -> Result<BatchUpdateResponse, GoogleError> {
        let url = format!(
            "{}/spreadsheets/{}:batchUpdate",
            self.sheets_base, spreadsheet.id
        );
        self.send(what, self.client.post(url).json(&json!({ "requests": requests })))
            .await
    }

    fn values_url(&self, spreadsheet: &Spreadsheet, range: &str) -> Result<Url, GoogleError> {
        let base = format!("{}/spreadsheets/{}/values", self.sheets_base, spreadsheet.id);
        let mut url = Url::parse(&base).map_err(|e| GoogleError::InvalidUrl(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GoogleError::InvalidUrl(base.clone()))?
            .push(range);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        Ok(url)
    }
}

impl SpreadsheetBackend for SheetsClient {
    async fn create(&self, title: &str) -> Result<Spreadsheet, GoogleError> {
        info!("Creating spreadsheet {}", title);
        let resource: SpreadsheetResource = self
            .send(
                "create spreadsheet",
                self.client
                    .post(format!("{}/spreadsheets", self.sheets_base))
                    .json(&json!({ "properties": { "title": title } })),
            )
            .await?;

        let url = resource.spreadsheet_url.unwrap_or_else(|| {
            format!(
                "https://docs.google.com/spreadsheets/d/{}",
                resource.spreadsheet_id
            )
        });
        let title = resource
            .properties
            .map(|p| p.title)
            .unwrap_or_else(|| title.to_string());

        info!("Spreadsheet {} created at {}", title, url);
        Ok(Spreadsheet {
            id: resource.spreadsheet_id,
            title,
            url,
        })
    }

    async fn share_with_link(&self, spreadsheet: &Spreadsheet) -> Result<(), GoogleError> {
        info!("Sharing spreadsheet {} by link", spreadsheet.title);
        let url = format!("{}/files/{}/permissions", self.drive_base, spreadsheet.id);
        let _: Value = self
            .send(
                "share spreadsheet",
                self.client
                    .post(url)
                    .query(&[
                        ("sendNotificationEmail", "false"),
                        ("supportsAllDrives", "true"),
                    ])
                    .json(&json!({
                        "type": "anyone",
                        "role": "reader",
                        "allowFileDiscovery": false,
                    })),
            )
            .await?;
        Ok(())
    }

    async fn worksheets(&self, spreadsheet: &Spreadsheet) -> Result<Vec<Worksheet>, GoogleError> {
        let url = format!("{}/spreadsheets/{}", self.sheets_base, spreadsheet.id);
        let resource: SpreadsheetResource = self
            .send(
                "list worksheets",
                self.client
                    .get(url)
                    .query(&[("fields", "spreadsheetId,sheets.properties")]),
            )
            .await?;

        let mut worksheets: Vec<Worksheet> = resource
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.into())
            .collect();
        worksheets.sort_by_key(|worksheet| worksheet.index);
        Ok(worksheets)
    }

    async fn rename_worksheet(
        &self,
        spreadsheet: &Spreadsheet,
        worksheet: &Worksheet,
        title: &str,
    ) -> Result<(), GoogleError> {
        self.batch_update(
            spreadsheet,
            "rename worksheet",
            json!([{
                "updateSheetProperties": {
                    "properties": { "sheetId": worksheet.id, "title": title },
                    "fields": "title",
                }
            }]),
        )
        .await?;
        Ok(())
    }

    async fn add_worksheet(
        &self,
        spreadsheet: &Spreadsheet,
        title: &str,
        rows: u32,
        cols: u32,
    ) -> Result<Worksheet, GoogleError> {
        let response = self
            .batch_update(
                spreadsheet,
                "add worksheet",
                json!([{
                    "addSheet": {
                        "properties": {
                            "title": title,
                            "sheetType": "GRID",
                            "gridProperties": { "rowCount": rows, "columnCount": cols },
                        }
                    }
                }]),
            )
            .await?;

        response
            .replies
            .into_iter()
            .find_map(|reply| reply.add_sheet)
            .map(|sheet| sheet.properties.into())
            .ok_or_else(|| GoogleError::Status {
                what: "add worksheet".into(),
                status: 200,
                body: "response has no addSheet reply".into(),
            })
    }

    async fn insert_rows(
        &self,
        spreadsheet: &Spreadsheet,
        worksheet: &Worksheet,
        start_row: u32,
        rows: &[Vec<Value>],
    ) -> Result<(), GoogleError> {
        if rows.is_empty() {
            return Ok(());
        }

        let start_index = start_row.saturating_sub(1) as usize;
        self.batch_update(
            spreadsheet,
            "insert rows",
            json!([{
                "insertDimension": {
                    "range": {
                        "sheetId": worksheet.id,
                        "dimension": "ROWS",
                        "startIndex": start_index,
                        "endIndex": start_index + rows.len(),
                    },
                    "inheritFromBefore": false,
                }
            }]),
        )
        .await?;

        let range = format!("{}!A{}", quote_sheet_title(&worksheet.title), start_row);
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| row.iter().map(raw_cell).collect())
            .collect();
        let _: Value = self
            .send(
                "update values",
                self.client
                    .put(self.values_url(spreadsheet, &range)?)
                    .json(&json!({ "majorDimension": "ROWS", "values": values })),
            )
            .await?;
        Ok(())
    }
}

fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Cells go to the API as plain scalars: nulls become blanks and nested
/// values their JSON text.
fn raw_cell(cell: &Value) -> Value {
    match cell {
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => Value::String(cell.to_string()),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory spreadsheet host. Every created spreadsheet starts with one
    /// worksheet, like Google's.
    #[derive(Default)]
    struct MemoryBackend {
        worksheets: Mutex<Vec<(Worksheet, Vec<Vec<Value>>)>>,
    }

    impl SpreadsheetBackend for MemoryBackend {
        async fn create(&self, title: &str) -> Result<Spreadsheet, GoogleError> {
            Ok(Spreadsheet {
                id: "id".into(),
                title: title.into(),
                url: "url".into(),
            })
        }

        async fn share_with_link(&self, _: &Spreadsheet) -> Result<(), GoogleError> {
            Ok(())
        }

        async fn worksheets(&self, _: &Spreadsheet) -> Result<Vec<Worksheet>, GoogleError> {
            Ok(self
                .worksheets
                .lock()
                .unwrap()
                .iter()
                .map(|(ws, _)| ws.clone())
                .collect())
        }

        async fn rename_worksheet(
            &self,
            _: &Spreadsheet,
            worksheet: &Worksheet,
            title: &str,
        ) -> Result<(), GoogleError> {
            let mut sheets = self.worksheets.lock().unwrap();
            let entry = sheets.iter_mut().find(|(ws, _)| ws.id == worksheet.id).unwrap();
            entry.0.title = title.into();
            Ok(())
        }

        async fn add_worksheet(
            &self,
            _: &Spreadsheet,
            title: &str,
            rows: u32,
            cols: u32,
        ) -> Result<Worksheet, GoogleError> {
            assert_eq!((rows, cols), (1000, 26));
            let mut sheets = self.worksheets.lock().unwrap();
            let worksheet = Worksheet {
                id: sheets.len() as i64 + 100,
                title: title.into(),
                index: sheets.len(),
            };
            sheets.push((worksheet.clone(), Vec::new()));
            Ok(worksheet)
        }

        async fn insert_rows(
            &self,
            _: &Spreadsheet,
            worksheet: &Worksheet,
            start_row: u32,
            rows: &[Vec<Value>],
        ) -> Result<(), GoogleError> {
            let mut sheets = self.worksheets.lock().unwrap();
            let (_, data) = sheets.iter_mut().find(|(ws, _)| ws.id == worksheet.id).unwrap();
            let at = (start_row - 1) as usize;
            for (offset, row) in rows.iter().enumerate() {
                data.insert(at + offset, row.clone());
            }
            Ok(())
        }
    }

    fn backend_with_default_sheet() -> MemoryBackend {
        let backend = MemoryBackend::default();
        backend.worksheets.lock().unwrap().push((
            Worksheet {
                id: 0,
                title: "Sheet1".into(),
                index: 0,
            },
            Vec::new(),
        ));
        backend
    }

    fn table(rows: usize) -> RowSet {
        RowSet::new(
            vec!["Ревьюер".into(), "Сумма".into()],
            (0..rows).map(|i| vec![json!("alice"), json!(i)]).collect(),
        )
    }

    #[tokio::test]
    async fn existing_worksheet_is_renamed_and_filled() {
        let backend = backend_with_default_sheet();
        let spreadsheet = backend.create("t").await.unwrap();

        let worksheet = write_table_to_worksheet(&backend, &spreadsheet, &table(3), 0, "Reviews")
            .await
            .unwrap();

        assert_eq!(worksheet.id, 0);
        let sheets = backend.worksheets.lock().unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].0.title, "Reviews");
        assert_eq!(sheets[0].1.len(), 4);
        assert_eq!(sheets[0].1[0], vec![json!("Ревьюер"), json!("Сумма")]);
        assert_eq!(sheets[0].1[1][1], json!(0));
        assert_eq!(sheets[0].1[3][1], json!(2));
    }

    #[tokio::test]
    async fn missing_worksheet_is_added() {
        let backend = backend_with_default_sheet();
        let spreadsheet = backend.create("t").await.unwrap();

        write_table_to_worksheet(&backend, &spreadsheet, &table(1), 0, "Reviews")
            .await
            .unwrap();
        let summary = write_table_to_worksheet(&backend, &spreadsheet, &table(2), 1, "Summary")
            .await
            .unwrap();

        assert_eq!(summary.index, 1);
        let sheets = backend.worksheets.lock().unwrap();
        let titles: Vec<_> = sheets.iter().map(|(ws, _)| ws.title.as_str()).collect();
        assert_eq!(titles, ["Reviews", "Summary"]);
        assert_eq!(sheets[1].1.len(), 3);
    }

    #[tokio::test]
    async fn empty_table_writes_only_header() {
        let backend = backend_with_default_sheet();
        let spreadsheet = backend.create("t").await.unwrap();

        write_table_to_worksheet(&backend, &spreadsheet, &table(0), 0, "Reviews")
            .await
            .unwrap();

        assert_eq!(backend.worksheets.lock().unwrap()[0].1.len(), 1);
    }

    #[test]
    fn cells_are_flattened_to_scalars() {
        assert_eq!(raw_cell(&Value::Null), json!(""));
        assert_eq!(raw_cell(&json!(1.5)), json!(1.5));
        assert_eq!(raw_cell(&json!(["a", 1])), json!("[\"a\",1]"));
    }

    #[test]
    fn sheet_titles_are_quoted() {
        assert_eq!(quote_sheet_title("Reviews"), "'Reviews'");
        assert_eq!(quote_sheet_title("Bob's"), "'Bob''s'");
    }
}
