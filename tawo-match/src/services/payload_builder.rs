//! Payload builder
//!
//! One matching request carries `[fileIdentity, ...ancestorRemarks, target]`:
//! the enclosing section headings give the matcher the context an item
//! description usually leaves out ("Wand" under "Fliesenarbeiten > Bad").

use serde::Serialize;
use tawo_common::hierarchy::{is_path_prefix, path_segments};
use tawo_common::LineItem;

/// Synthetic first entry identifying the uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIdentity {
    pub id: String,
    pub name: String,
}

/// One entry of a payload row group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadEntry {
    File(FileIdentity),
    Row(LineItem),
}

/// Request body of one matching request (`{"rows": [...]}`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadRowGroup {
    pub rows: Vec<PayloadEntry>,
}

/// Build the payload for `target`
///
/// Ancestors are the section rows whose non-empty path is a prefix of the
/// target's path, ordered by segment count (stable for equal depth). A
/// section with exactly the target's path is included.
pub fn build_payload<F>(
    rows: &[LineItem],
    target: &LineItem,
    file: &FileIdentity,
    is_remark: F,
) -> PayloadRowGroup
where
    F: Fn(&LineItem) -> bool,
{
    let target_path = path_segments(&target.r_no_part);

    let mut ancestors: Vec<(usize, &LineItem)> = rows
        .iter()
        .filter(|row| is_remark(row))
        .filter_map(|row| {
            let segments = path_segments(&row.r_no_part);
            (!segments.is_empty() && is_path_prefix(&segments, &target_path))
                .then_some((segments.len(), row))
        })
        .collect();
    ancestors.sort_by_key(|(depth, _)| *depth);

    let mut entries = Vec::with_capacity(ancestors.len() + 2);
    entries.push(PayloadEntry::File(file.clone()));
    entries.extend(ancestors.into_iter().map(|(_, row)| PayloadEntry::Row(row.clone())));
    entries.push(PayloadEntry::Row(target.clone()));

    PayloadRowGroup { rows: entries }
}
