//! Data models for tawo-match
//!
//! - Dispatch state machine and per-row display state
//! - Match result union (merged / legacy) and its candidate view

pub mod dispatch_state;
pub mod match_result;

pub use dispatch_state::{DispatchStatus, RowState};
pub use match_result::{Candidate, CatalogEntry, MatchResult, TechnicalAssessment};
