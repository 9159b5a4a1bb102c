//! Result export
//!
//! Applies each row's selected candidate to the `KFE / DF` columns and renders
//! the full table as CSV or TSV with the German column labels as header.

use std::collections::BTreeMap;
use std::str::FromStr;

use tawo_common::columns::TABLE_COLUMNS;
use tawo_common::LineItem;

use crate::models::MatchResult;
use crate::services::selection::SelectionState;

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Tsv,
}

impl ExportFormat {
    pub fn delimiter(&self) -> u8 {
        match self {
            ExportFormat::Csv => b';',
            ExportFormat::Tsv => b'\t',
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Tsv => "text/tab-separated-values; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            other => Err(format!("Unsupported export format: {}", other)),
        }
    }
}

/// Rows with the selected candidate of each matched row applied
pub fn apply_matches(
    rows: &[LineItem],
    results: &BTreeMap<usize, MatchResult>,
    selection: &SelectionState,
) -> Vec<LineItem> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| match results.get(&idx) {
            Some(result) => apply_match(row, result, selection.rank(idx), selection.reason(idx)),
            None => row.clone(),
        })
        .collect()
}

/// One row with candidate `rank` of `result` applied
pub fn apply_match(row: &LineItem, result: &MatchResult, rank: usize, reason: Option<&str>) -> LineItem {
    let mut out = row.clone();

    if let Some(candidate) = result.candidate(rank) {
        out.kfe_df_id = candidate.id;
        out.kfe_df_kurztext = candidate.title;
        out.kfe_df_langtext = candidate.long_text;
        out.kfe_df_zeit = candidate.zeit;
        out.kfe_df_materialkosten = candidate.materialkosten;
        out.kfe_df_kategorie = candidate.kategorie;
    }

    let technical = result.technical();
    if !technical.leistungsgruppe.is_empty() {
        out.leistungsgruppe = technical.leistungsgruppe.clone();
    }
    if !technical.besonderheit.is_empty() {
        out.besonderheit = technical.besonderheit.clone();
    }
    if !technical.kalkulationskomplexitaet.is_empty() {
        out.kalkulationskomplexitaet = technical.kalkulationskomplexitaet.clone();
    }

    out.kfe_falsch_grund = reason.unwrap_or_default().to_string();
    out
}

/// Render rows as delimited text (header = column labels)
pub fn render(rows: &[LineItem], format: ExportFormat) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(Vec::new());

    writer.write_record(TABLE_COLUMNS.iter().map(|c| c.label))?;
    for row in rows {
        writer.write_record(TABLE_COLUMNS.iter().map(|c| row.get(c.key).unwrap_or("")))?;
    }

    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
