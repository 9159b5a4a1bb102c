//! Match selection state
//!
//! Per row: the chosen candidate rank (default 0) and the "wrong reason" the
//! operator gives when rank 0 is overridden. A non-zero rank always carries a
//! reason; selecting a non-zero rank seeds a default instead of blocking.

use std::collections::BTreeMap;

use super::dispatch::DispatchError;

/// Reason seeded when a non-top candidate is selected
pub const DEFAULT_WRONG_REASON: &str = "Alternative passt besser";

/// A rank change that must be reported as correction feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub row_index: usize,
    pub old_rank: usize,
    pub new_rank: usize,
    pub reason: Option<String>,
}

/// Selected ranks and wrong reasons for one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selections: BTreeMap<usize, usize>,
    reasons: BTreeMap<usize, String>,
    default_reason: String,
}

impl SelectionState {
    pub fn new(default_reason: impl Into<String>) -> Self {
        Self {
            selections: BTreeMap::new(),
            reasons: BTreeMap::new(),
            default_reason: default_reason.into(),
        }
    }

    /// Restore persisted state, dropping entries that violate the invariants
    ///
    /// `candidate_count(row)` is the length of that row's candidate list.
    pub fn restore<F>(
        &mut self,
        selections: BTreeMap<usize, usize>,
        reasons: BTreeMap<usize, String>,
        candidate_count: F,
    ) where
        F: Fn(usize) -> usize,
    {
        self.selections = selections
            .into_iter()
            .filter(|(row, rank)| *rank == 0 || *rank < candidate_count(*row))
            .collect();
        self.reasons = reasons
            .into_iter()
            .filter(|(row, reason)| self.rank(*row) != 0 && !reason.trim().is_empty())
            .collect();

        // Non-zero ranks whose reason was lost get the default back
        let missing: Vec<usize> = self
            .selections
            .iter()
            .filter(|(row, rank)| **rank != 0 && !self.reasons.contains_key(*row))
            .map(|(row, _)| *row)
            .collect();
        for row in missing {
            self.reasons.insert(row, self.default_reason.clone());
        }
    }

    pub fn rank(&self, row: usize) -> usize {
        self.selections.get(&row).copied().unwrap_or(0)
    }

    pub fn reason(&self, row: usize) -> Option<&str> {
        self.reasons.get(&row).map(String::as_str)
    }

    pub fn selections(&self) -> &BTreeMap<usize, usize> {
        &self.selections
    }

    pub fn reasons(&self) -> &BTreeMap<usize, String> {
        &self.reasons
    }

    /// Select `rank` for `row`, which has `candidate_count` candidates
    ///
    /// Returns the change when the rank actually moved.
    pub fn select(
        &mut self,
        row: usize,
        rank: usize,
        candidate_count: usize,
    ) -> Result<Option<SelectionChange>, DispatchError> {
        if rank != 0 && rank >= candidate_count {
            return Err(DispatchError::InvalidSelection(format!(
                "rank {} out of range for row {} ({} candidates)",
                rank, row, candidate_count
            )));
        }

        let old_rank = self.rank(row);
        self.selections.insert(row, rank);

        if rank == 0 {
            self.reasons.remove(&row);
        } else if old_rank == 0 || !self.reasons.contains_key(&row) {
            self.reasons.insert(row, self.default_reason.clone());
        }

        if old_rank == rank {
            return Ok(None);
        }

        Ok(Some(SelectionChange {
            row_index: row,
            old_rank,
            new_rank: rank,
            reason: self.reasons.get(&row).cloned(),
        }))
    }

    /// Replace the wrong reason of a row with a non-zero rank
    pub fn set_reason(&mut self, row: usize, reason: &str) -> Result<(), DispatchError> {
        if self.rank(row) == 0 {
            return Err(DispatchError::InvalidSelection(format!(
                "row {} has the top candidate selected; no reason applies",
                row
            )));
        }

        let trimmed = reason.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::ReasonRequired(row));
        }

        self.reasons.insert(row, trimmed.to_string());
        Ok(())
    }

    /// A fresh result arrived for `row`: back to rank 0 without reason
    pub fn reset_row(&mut self, row: usize) {
        self.selections.insert(row, 0);
        self.reasons.remove(&row);
    }

    pub fn clear(&mut self) {
        self.selections.clear();
        self.reasons.clear();
    }
}
