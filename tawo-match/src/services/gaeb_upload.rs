//! GAEB upload ingestion
//!
//! Forwards the raw upload to the conversion webhook and turns whatever comes
//! back into line items. The conversion workflow has answered with several
//! envelopes over time; all of them are accepted:
//!
//! - `[row, ...]` (array of row objects)
//! - `[{rows: [...]}]` (array whose first element is an envelope)
//! - `{rows: [...]}`, `{body: {rows}}`, `{data: {rows}}`
//! - `{message: "<csv text>"}`

use serde_json::{json, Value};
use std::time::Duration;
use tawo_common::columns::key_for_header;
use tawo_common::LineItem;
use thiserror::Error;

/// Conversion webhook of the original deployment
pub const DEFAULT_UPLOAD_URL: &str = "https://n8n.kivosoftware.de/webhook/gaeb/x83-to-csv";

pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;

/// Message used when the webhook answers with an empty non-JSON body
const EMPTY_BODY_MESSAGE: &str = "Upload successful";

/// Candidate CSV delimiters, in tie-break order
const CSV_DELIMITERS: [u8; 3] = [b';', b',', b'\t'];

/// Upload errors
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload failed: {0}")]
    Network(String),

    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream non-2xx status
    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Could not parse converted rows: {0}")]
    Parse(String),

    #[error("Conversion returned no rows")]
    NoRows,
}

/// Client for the conversion webhook
#[derive(Debug, Clone)]
pub struct UploadClient {
    http_client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl UploadClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UploadError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
            timeout,
        })
    }

    /// Forward raw bytes with their original content type
    ///
    /// JSON responses are returned as-is; any other body becomes
    /// `{"message": text}`.
    pub async fn forward(&self, body: Vec<u8>, content_type: &str) -> Result<Value, UploadError> {
        tracing::info!(url = %self.url, bytes = body.len(), "Forwarding upload to conversion webhook");

        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %error_text, "Webhook error");
            return Err(UploadError::Status(status.as_u16()));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        let text = response.text().await.map_err(|e| self.classify(e))?;
        if is_json {
            serde_json::from_str(&text).map_err(|e| UploadError::Parse(e.to_string()))
        } else if text.is_empty() {
            Ok(json!({ "message": EMPTY_BODY_MESSAGE }))
        } else {
            Ok(json!({ "message": text }))
        }
    }

    fn classify(&self, err: reqwest::Error) -> UploadError {
        if err.is_timeout() {
            UploadError::Timeout(self.timeout)
        } else {
            UploadError::Network(err.to_string())
        }
    }
}

/// Turn a conversion response into rows (fully blank rows dropped)
pub fn rows_from_response(value: &Value) -> Result<Vec<LineItem>, UploadError> {
    let rows = match value {
        Value::Array(items) => match items.first() {
            Some(first) if is_envelope(first) => return rows_from_response(first),
            _ => rows_from_json(items),
        },
        Value::Object(object) => {
            if let Some(Value::Array(items)) = object.get("rows") {
                rows_from_json(items)
            } else if let Some(inner) = ["body", "data"]
                .iter()
                .filter_map(|key| object.get(*key))
                .find(|v| v.get("rows").is_some_and(Value::is_array))
            {
                return rows_from_response(inner);
            } else if let Some(Value::String(csv_text)) = object.get("message") {
                parse_csv(csv_text)?
            } else {
                return Err(UploadError::Parse("unrecognized response shape".to_string()));
            }
        }
        _ => return Err(UploadError::Parse("response is neither array nor object".to_string())),
    };

    let rows: Vec<LineItem> = rows.into_iter().filter(|row| !row.is_blank()).collect();
    if rows.is_empty() {
        return Err(UploadError::NoRows);
    }
    Ok(rows)
}

fn is_envelope(value: &Value) -> bool {
    value.get("rows").is_some_and(Value::is_array)
        || ["body", "data"]
            .iter()
            .any(|key| value.get(*key).and_then(|v| v.get("rows")).is_some_and(Value::is_array))
}

fn rows_from_json(items: &[Value]) -> Vec<LineItem> {
    items.iter().filter_map(LineItem::from_json_object).collect()
}

/// Parse CSV text with an auto-detected delimiter (`;`, `,` or tab)
pub fn parse_csv(text: &str) -> Result<Vec<LineItem>, UploadError> {
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = detect_delimiter(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| UploadError::Parse(e.to_string()))?
        .iter()
        .map(|h| key_for_header(h).map(str::to_string).unwrap_or_else(|| h.to_string()))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| UploadError::Parse(e.to_string()))?;
        let mut row = LineItem::default();
        for (key, cell) in headers.iter().zip(record.iter()) {
            if !key.is_empty() {
                row.set(key, cell);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Delimiter occurring most often in the header line
fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    CSV_DELIMITERS
        .iter()
        .copied()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .fold((CSV_DELIMITERS[0], 0), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_of_rows() {
        let rows = rows_from_response(&json!([
            {"type": "REMARK", "rNoPart": "1", "shortText": "Rohbau"},
            {"type": "NORMAL", "rNoPart": "1.1", "qty": 3},
            {}
        ]))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_remark());
        assert_eq!(rows[1].qty, "3");
    }

    #[test]
    fn test_envelopes() {
        let row = json!({"type": "NORMAL", "rNoPart": "1"});
        for shape in [
            json!({"rows": [row.clone()]}),
            json!({"body": {"rows": [row.clone()]}}),
            json!({"data": {"rows": [row.clone()]}}),
            json!([{"rows": [row.clone()]}]),
            json!([{"body": {"rows": [row.clone()]}}]),
        ] {
            let rows = rows_from_response(&shape).unwrap();
            assert_eq!(rows.len(), 1, "shape: {}", shape);
            assert_eq!(rows[0].r_no_part, "1");
        }
    }

    #[test]
    fn test_message_csv_semicolon() {
        let csv = "Typ;Ordnungszahl;Kurztext;Menge\nREMARK;1;Rohbau;\nNORMAL;1.1;Mauerwerk;12,5\n;;;\n";
        let rows = rows_from_response(&json!({ "message": csv })).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].short_text, "Mauerwerk");
        assert_eq!(rows[1].qty, "12,5");
    }

    #[test]
    fn test_csv_delimiter_detection() {
        assert_eq!(detect_delimiter("a;b;c"), b';');
        assert_eq!(detect_delimiter("a,b,c"), b',');
        assert_eq!(detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter("single"), b';');

        let rows = parse_csv("type\trNoPart\tcustom\nNORMAL\t2.1\tx\n").unwrap();
        assert_eq!(rows[0].r_no_part, "2.1");
        assert_eq!(rows[0].extra.get("custom").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_quoted_csv_cells() {
        let rows = parse_csv("type,shortText\nNORMAL,\"Fliesen, weiß\"\n").unwrap();
        assert_eq!(rows[0].short_text, "Fliesen, weiß");
    }

    #[test]
    fn test_unusable_responses() {
        assert!(matches!(rows_from_response(&json!({"message": "Upload successful"})), Err(UploadError::NoRows)));
        assert!(matches!(rows_from_response(&json!({"other": 1})), Err(UploadError::Parse(_))));
        assert!(matches!(rows_from_response(&json!([])), Err(UploadError::NoRows)));
        assert!(matches!(rows_from_response(&json!(3)), Err(UploadError::Parse(_))));
    }
}
