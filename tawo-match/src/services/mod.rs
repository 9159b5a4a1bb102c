//! Matching services
//!
//! Leaves first: payload builder and response normalizer, then transport,
//! ledger and selection, then the dispatch driver that ties them together.

pub mod dispatch;
pub mod export;
pub mod feedback_notifier;
pub mod gaeb_upload;
pub mod ledger;
pub mod matching_client;
pub mod payload_builder;
pub mod response_normalizer;
pub mod selection;

pub use dispatch::{DispatchConfig, DispatchError, MatchingDriver, MatchingHandle};
pub use feedback_notifier::{CorrectionFeedback, FeedbackNotifier};
pub use gaeb_upload::{UploadClient, UploadError};
pub use ledger::MatchingLedger;
pub use matching_client::{HttpMatchingClient, MatchingError, MatchingTransport};
pub use payload_builder::{build_payload, FileIdentity, PayloadEntry, PayloadRowGroup};
pub use selection::SelectionState;
