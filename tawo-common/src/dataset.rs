//! Uploaded dataset and its fingerprint

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::columns::LineItem;

/// Default margin shown on the project form
pub const DEFAULT_MARGIN: &str = "15,0";

/// The full row sequence of one upload plus its project settings
///
/// Row position is the row's identity for the whole session: rows are never
/// reordered or renumbered after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub file_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_margin")]
    pub margin: String,
    pub rows: Vec<LineItem>,
}

fn default_margin() -> String {
    DEFAULT_MARGIN.to_string()
}

impl Dataset {
    pub fn new(file_name: impl Into<String>, rows: Vec<LineItem>) -> Self {
        Self {
            file_name: file_name.into(),
            project_name: String::new(),
            margin: default_margin(),
            rows,
        }
    }

    /// Idempotency key derived from (file name, row count, first row id)
    ///
    /// Two uploads sharing all three are treated as the same dataset.
    pub fn fingerprint(&self) -> Fingerprint {
        let first_id = self.rows.first().map(LineItem::identifier).unwrap_or("");
        let mut hasher = Sha256::new();
        hasher.update(self.file_name.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.rows.len().to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(first_id.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        Fingerprint(hex)
    }

    /// Indices of orderable line items (everything except REMARK rows)
    pub fn dispatchable_indices(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.is_remark())
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Dataset fingerprint (16 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Fingerprint(value.to_string())
    }
}
