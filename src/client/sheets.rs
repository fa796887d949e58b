//! Google Sheets v4 destination

use super::{Auth, Authenticator, classify_status, transport_error};
use crate::error::DestinationError;
use crate::publish::{Destination, PublishRequest};
use eyre::Result;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for one spreadsheet.
///
/// # Example
/// ```no_run
/// use tabsync::client::{Auth, SheetsClient};
/// use url::Url;
///
/// # fn example() -> eyre::Result<()> {
/// let url = Url::parse("https://sheets.googleapis.com/")?;
/// let client = SheetsClient::try_new(url, "1AbC", Auth::Token("ya29...".into()))?;
/// assert_eq!(client.spreadsheet_id(), "1AbC");
/// # Ok(())
/// # }
/// ```
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    spreadsheet_id: String,
    auth: Authenticator,
}

impl SheetsClient {
    /// Build a client for `spreadsheet_id` on the API at `base_url`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the service
    /// account key is unusable.
    pub fn try_new(base_url: Url, spreadsheet_id: impl Into<String>, auth: Auth) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tabsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            spreadsheet_id: spreadsheet_id.into(),
            auth: Authenticator::try_new(auth)?,
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn auth(&self) -> &Auth {
        self.auth.auth()
    }

    /// Fetch spreadsheet metadata to verify access.
    ///
    /// Returns the spreadsheet title.
    pub async fn test_connection(&self) -> Result<String, DestinationError> {
        let url = self.endpoint("")?;
        let body = self
            .send(Method::GET, url, None, &[("fields", "properties.title")])
            .await?;
        Ok(body["properties"]["title"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    fn endpoint(&self, suffix: &str) -> Result<Url, DestinationError> {
        let path = format!("v4/spreadsheets/{}{}", self.spreadsheet_id, suffix);
        self.base_url
            .join(&path)
            .map_err(|e| DestinationError::Protocol(format!("invalid endpoint '{}': {}", path, e)))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<Value, DestinationError> {
        let mut request = self.http.request(method, url).query(query);
        if let Some(token) = self.auth.bearer(&self.http).await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), message));
        }

        response
            .json()
            .await
            .map_err(|e| DestinationError::Protocol(format!("invalid response body: {}", e)))
    }
}

impl Destination for SheetsClient {
    async fn replace_tab(&self, request: &PublishRequest) -> Result<(), DestinationError> {
        if let Some(body) = update_body(request) {
            let url = self.endpoint("/values:batchUpdate")?;
            self.send(Method::POST, url, Some(&body), &[]).await?;
            log::debug!(
                "Wrote {} row(s) to '{}'",
                request.values.len(),
                request.tab
            );
        }

        if let Some(range) = tail_range(request) {
            let url = self.endpoint("/values:batchClear")?;
            let body = json!({ "ranges": [range] });
            self.send(Method::POST, url, Some(&body), &[]).await?;
            log::debug!("Cleared {}", range);
        }

        Ok(())
    }

    fn request_cost(&self, request: &PublishRequest) -> u32 {
        let update = u32::from(update_body(request).is_some());
        let clear = u32::from(request.layout.clear_tail);
        (update + clear).max(1)
    }
}

/// `'Tab Name'` with embedded quotes doubled, as A1 notation expects.
pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

/// Range that receives the grid: the top-left cell of the layout.
pub fn data_range(request: &PublishRequest) -> String {
    format!(
        "{}!{}{}",
        quote_tab(&request.tab),
        request.layout.column_range.start(),
        request.layout.start_row
    )
}

/// Rows below the written grid, within the column range, to the end of
/// the sheet.
pub fn tail_range(request: &PublishRequest) -> Option<String> {
    if !request.layout.clear_tail {
        return None;
    }
    let first_free_row = request.layout.start_row as usize + request.values.len();
    Some(format!(
        "{}!{}{}:{}",
        quote_tab(&request.tab),
        request.layout.column_range.start(),
        first_free_row,
        request.layout.column_range.end()
    ))
}

/// `values:batchUpdate` body, or `None` when there is nothing to write.
pub fn update_body(request: &PublishRequest) -> Option<Value> {
    let mut data = Vec::new();
    if !request.values.is_empty() {
        data.push(json!({
            "range": data_range(request),
            "majorDimension": "ROWS",
            "values": request.values,
        }));
    }
    if let (Some(cell), Some(status)) = (&request.layout.status_cell, &request.status) {
        data.push(json!({
            "range": format!("{}!{}", quote_tab(&request.tab), cell),
            "values": [[status]],
        }));
    }

    if data.is_empty() {
        return None;
    }
    Some(json!({
        "valueInputOption": "USER_ENTERED",
        "data": data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TabLayout;

    fn request(status_cell: Option<&str>, clear_tail: bool) -> PublishRequest {
        PublishRequest {
            tab: "Bob's Users".to_string(),
            values: vec![
                vec!["id".to_string(), "name".to_string()],
                vec!["1".to_string(), "ann".to_string()],
                vec!["2".to_string(), "bo".to_string()],
            ],
            layout: TabLayout {
                start_row: 3,
                column_range: "B:C".parse().unwrap(),
                clear_tail,
                status_cell: status_cell.map(str::to_string),
            },
            status: Some("2024-01-01 00:00:00 | Bob's Users | records: 2".to_string()),
        }
    }

    #[test]
    fn test_ranges() {
        let request = request(None, true);
        assert_eq!(quote_tab("Plain"), "'Plain'");
        assert_eq!(data_range(&request), "'Bob''s Users'!B3");
        assert_eq!(tail_range(&request).as_deref(), Some("'Bob''s Users'!B6:C"));
    }

    #[test]
    fn test_no_tail_when_disabled() {
        assert_eq!(tail_range(&request(None, false)), None);
    }

    #[test]
    fn test_update_body_with_status() {
        let body = update_body(&request(Some("T1"), true)).unwrap();

        assert_eq!(body["valueInputOption"], "USER_ENTERED");
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["values"][1][1], "ann");
        assert_eq!(data[1]["range"], "'Bob''s Users'!T1");
        assert!(data[1]["values"][0][0].as_str().unwrap().ends_with("records: 2"));
    }

    #[test]
    fn test_update_body_without_status_cell() {
        let body = update_body(&request(None, true)).unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_request_cost() {
        let client = SheetsClient::try_new(
            Url::parse("http://localhost:8080/").unwrap(),
            "sheet",
            Auth::None,
        )
        .unwrap();

        assert_eq!(client.request_cost(&request(None, true)), 2);
        assert_eq!(client.request_cost(&request(Some("T1"), false)), 1);
    }

    #[test]
    fn test_endpoint() {
        let client = SheetsClient::try_new(
            Url::parse("https://sheets.googleapis.com/").unwrap(),
            "1AbC",
            Auth::None,
        )
        .unwrap();

        assert_eq!(
            client.endpoint("/values:batchClear").unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/1AbC/values:batchClear"
        );
    }

    #[tokio::test]
    async fn test_unreachable_destination_is_transient() {
        use crate::error::Transient;

        let client = SheetsClient::try_new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            "sheet",
            Auth::None,
        )
        .unwrap();

        let err = client.replace_tab(&request(None, false)).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
    }
}
