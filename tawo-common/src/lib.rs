//! # TAWO Common Library
//!
//! Shared code for the TAWO matching service:
//! - Column registry and the `LineItem` row record
//! - Dataset model and fingerprint
//! - Section hierarchy indexing over dotted paths
//! - Event types (TawoEvent enum) and EventBus
//! - Configuration loading

pub mod columns;
pub mod config;
pub mod dataset;
pub mod error;
pub mod events;
pub mod hierarchy;

pub use columns::LineItem;
pub use dataset::{Dataset, Fingerprint};
pub use error::{Error, Result};
