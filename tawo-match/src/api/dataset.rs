//! Dataset view and cell edits

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tawo_common::columns::{
    group_headers, is_first_column_in_group, kfe_subgroup_headers, lv_header_keys, ColumnDef, GroupHeader,
    TABLE_COLUMNS,
};
use tawo_common::hierarchy::{SectionIndex, SectionRange};
use tawo_common::{Fingerprint, LineItem};

use crate::db;
use crate::{ApiError, ApiResult, AppState};

/// One row with its hierarchy metadata
#[derive(Debug, Serialize)]
pub struct DatasetRowView {
    pub index: usize,
    /// REMARK row that starts this row's section
    pub section_start: Option<usize>,
    pub depth: usize,
    pub is_remark: bool,
    /// REMARK row heading a section with more rows than itself
    pub has_children: bool,
    pub row: LineItem,
}

/// One table column in display order
#[derive(Debug, Serialize)]
pub struct ColumnView {
    #[serde(flatten)]
    pub column: ColumnDef,
    /// First column of its group (visual separator)
    pub starts_group: bool,
}

/// Table header layout
#[derive(Debug, Serialize)]
pub struct TableLayout {
    pub columns: Vec<ColumnView>,
    pub groups: Vec<GroupHeader>,
    pub kfe_subgroups: Vec<GroupHeader>,
    /// Columns of the review table
    pub lv_columns: Vec<&'static str>,
}

impl TableLayout {
    pub fn build() -> Self {
        let keys: Vec<&str> = TABLE_COLUMNS.iter().map(|c| c.key).collect();
        Self {
            columns: TABLE_COLUMNS
                .iter()
                .map(|column| ColumnView {
                    column: *column,
                    starts_group: is_first_column_in_group(column.key, &keys),
                })
                .collect(),
            groups: group_headers(),
            kfe_subgroups: kfe_subgroup_headers(),
            lv_columns: lv_header_keys(),
        }
    }
}

/// GET /dataset response
#[derive(Debug, Serialize)]
pub struct DatasetView {
    pub fingerprint: Fingerprint,
    pub file_name: String,
    pub project_name: String,
    pub margin: String,
    pub layout: TableLayout,
    pub rows: Vec<DatasetRowView>,
    pub ranges: Vec<SectionRange>,
}

/// PUT /dataset/rows/:row request
#[derive(Debug, Deserialize)]
pub struct EditCellRequest {
    /// Column key or German header label
    pub column: String,
    pub value: String,
}

/// GET /dataset
pub async fn get_dataset(State(state): State<AppState>) -> ApiResult<Json<DatasetView>> {
    let dataset = db::dataset::load_dataset(&state.store)
        .await?
        .ok_or_else(|| ApiError::NotFound("No dataset uploaded".to_string()))?;

    let index = SectionIndex::build(&dataset.rows);
    let fingerprint = dataset.fingerprint();

    let rows = dataset
        .rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| DatasetRowView {
            index: idx,
            section_start: index.section_start.get(idx).copied().flatten(),
            depth: index.depth.get(idx).copied().unwrap_or(0),
            is_remark: row.is_remark(),
            has_children: row.is_remark() && index.has_children(idx),
            row,
        })
        .collect();

    Ok(Json(DatasetView {
        fingerprint,
        file_name: dataset.file_name,
        project_name: dataset.project_name,
        margin: dataset.margin,
        layout: TableLayout::build(),
        rows,
        ranges: index.ranges,
    }))
}

/// PUT /dataset/rows/:row
///
/// `type`, `rNoPart` and `id` cannot be edited.
pub async fn edit_cell(
    State(state): State<AppState>,
    Path(row): Path<usize>,
    Json(request): Json<EditCellRequest>,
) -> ApiResult<Json<LineItem>> {
    let updated = state.matching.edit_cell(row, request.column, request.value).await?;
    Ok(Json(updated))
}

/// Build dataset routes
pub fn dataset_routes() -> Router<AppState> {
    Router::new()
        .route("/dataset", get(get_dataset))
        .route("/dataset/rows/:row", put(edit_cell))
}
