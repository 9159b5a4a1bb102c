//! Dispatch state machine
//!
//! Aggregate status of the matching pass for the loaded dataset:
//! IDLE → SENDING → DONE, with ERROR reachable from SENDING on a pass-level
//! failure. A new pass can start from any state.

use serde::Serialize;
use tawo_common::events::DispatchMode;

/// Aggregate dispatch status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DispatchStatus {
    /// No dataset loaded or no pass started yet
    Idle,
    /// A pass is running; `batch_id` is its epoch
    Sending { batch_id: u64, mode: DispatchMode },
    /// Every request of the last pass settled
    Done,
    /// The last pass was aborted
    Error { message: String },
}

impl DispatchStatus {
    pub fn is_sending(&self) -> bool {
        matches!(self, DispatchStatus::Sending { .. })
    }

    /// Epoch of the running pass
    pub fn batch_id(&self) -> Option<u64> {
        match self {
            DispatchStatus::Sending { batch_id, .. } => Some(*batch_id),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DispatchStatus::Idle => "idle",
            DispatchStatus::Sending { .. } => "sending",
            DispatchStatus::Done => "done",
            DispatchStatus::Error { .. } => "error",
        }
    }
}

/// Display state of one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    /// Section heading, never dispatched
    Remark,
    /// Request in flight
    Sending,
    /// Match result stored
    Matched,
    /// Request settled in an earlier pass without a result
    NoResult,
    /// Not yet sent
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_with_state_tag() {
        let status = DispatchStatus::Sending {
            batch_id: 4,
            mode: DispatchMode::MissingOnly,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "sending");
        assert_eq!(json["batch_id"], 4);
        assert_eq!(json["mode"], "missing_only");

        let error = serde_json::to_value(DispatchStatus::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(error["state"], "error");
        assert_eq!(error["message"], "boom");
    }

    #[test]
    fn test_batch_id_only_while_sending() {
        assert_eq!(DispatchStatus::Idle.batch_id(), None);
        assert_eq!(DispatchStatus::Done.batch_id(), None);
        let sending = DispatchStatus::Sending {
            batch_id: 9,
            mode: DispatchMode::Full,
        };
        assert_eq!(sending.batch_id(), Some(9));
        assert!(sending.is_sending());
        assert_eq!(sending.label(), "sending");
    }
}
