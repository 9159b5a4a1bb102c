//! Section hierarchy over dotted paths
//!
//! Hierarchy is based on dotted notation (1.1, 1.2, 1.2.1). A section runs from
//! a REMARK row up to, but excluding, the next REMARK row. All functions here
//! are pure and re-run whenever the row sequence changes.

use serde::Serialize;

use crate::columns::LineItem;

/// Normalize an Ordnungszahl to dotted notation
///
/// `"1 > 2 > 1"`, `"1 2 1"` and `"1,2;1"` all become `"1.2.1"`. Repeated
/// separators collapse and leading/trailing dots are dropped.
pub fn normalize_to_dotted_path(raw: &str) -> String {
    let mut dotted = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        let mapped = if ch == '>' || ch == ',' || ch == ';' || ch.is_whitespace() {
            '.'
        } else {
            ch
        };
        if mapped == '.' && (dotted.is_empty() || dotted.ends_with('.')) {
            continue;
        }
        dotted.push(mapped);
    }
    while dotted.ends_with('.') {
        dotted.pop();
    }
    dotted
}

/// Path segments, e.g. `"1.2.3"` -> `["1", "2", "3"]`
pub fn path_segments(raw: &str) -> Vec<String> {
    normalize_to_dotted_path(raw)
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Nesting depth (segment count)
pub fn path_level(raw: &str) -> usize {
    path_segments(raw).len()
}

/// True if `prefix` is a positional prefix of `full` (`[1,1]` of `[1,1,2]`)
pub fn is_path_prefix<S: AsRef<str>>(prefix: &[S], full: &[S]) -> bool {
    prefix.len() <= full.len()
        && prefix
            .iter()
            .zip(full.iter())
            .all(|(a, b)| a.as_ref() == b.as_ref())
}

/// Half-open row range `[start, end)` of one section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionRange {
    pub start: usize,
    pub end: usize,
}

impl SectionRange {
    /// A REMARK row has children when its section spans more than itself
    pub fn has_children(&self) -> bool {
        self.end - self.start > 1
    }
}

/// For each row index, the REMARK row index that starts its section
///
/// Rows before the first REMARK belong to no section (`None`).
pub fn build_section_start_by_row_index<F>(rows: &[LineItem], is_remark: F) -> Vec<Option<usize>>
where
    F: Fn(&LineItem) -> bool,
{
    let mut current = None;
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            if is_remark(row) {
                current = Some(idx);
            }
            current
        })
        .collect()
}

/// Section boundaries for each REMARK-started section
pub fn build_section_ranges<F>(rows: &[LineItem], is_remark: F) -> Vec<SectionRange>
where
    F: Fn(&LineItem) -> bool,
{
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, row) in rows.iter().enumerate() {
        if is_remark(row) {
            if let Some(s) = start {
                ranges.push(SectionRange { start: s, end: idx });
            }
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        ranges.push(SectionRange {
            start: s,
            end: rows.len(),
        });
    }
    ranges
}

/// Precomputed hierarchy metadata for a row sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SectionIndex {
    pub section_start: Vec<Option<usize>>,
    pub depth: Vec<usize>,
    pub ranges: Vec<SectionRange>,
}

impl SectionIndex {
    pub fn build(rows: &[LineItem]) -> Self {
        Self {
            section_start: build_section_start_by_row_index(rows, LineItem::is_remark),
            depth: rows.iter().map(|r| path_level(&r.r_no_part)).collect(),
            ranges: build_section_ranges(rows, LineItem::is_remark),
        }
    }

    /// True if the REMARK row at `start` heads a section with more than one row
    pub fn has_children(&self, start: usize) -> bool {
        self.ranges
            .iter()
            .find(|r| r.start == start)
            .is_some_and(SectionRange::has_children)
    }
}
