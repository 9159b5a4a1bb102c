//! Correction-feedback notifier
//!
//! Selection changes are emitted as [`CorrectionFeedback`] commands; this task
//! drains them and posts each one to the feedback webhook. Delivery is
//! fire-and-forget: failures are logged and never retried, and they never
//! touch matching state.

use serde_json::{Map, Value};
use std::time::Duration;
use tawo_common::{Fingerprint, LineItem};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::Candidate;

const FEEDBACK_TIMEOUT_SECS: u64 = 30;

/// Operator overrode the default candidate of a row
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionFeedback {
    pub fingerprint: Fingerprint,
    pub row_index: usize,
    pub row: LineItem,
    pub old_match: Option<Candidate>,
    pub corrected_match: Option<Candidate>,
    pub reason: Option<String>,
}

impl CorrectionFeedback {
    /// `{...row, corrected_match, old_match, kfe_falsch_grund?}`
    pub fn to_body(&self) -> Value {
        let mut body = match serde_json::to_value(&self.row) {
            Ok(Value::Object(object)) => object,
            _ => Map::new(),
        };
        body.insert(
            "corrected_match".to_string(),
            serde_json::to_value(&self.corrected_match).unwrap_or(Value::Null),
        );
        body.insert(
            "old_match".to_string(),
            serde_json::to_value(&self.old_match).unwrap_or(Value::Null),
        );
        if let Some(reason) = &self.reason {
            body.insert("kfe_falsch_grund".to_string(), Value::String(reason.clone()));
        }
        Value::Object(body)
    }
}

/// Sender side handed to the dispatch driver
pub type FeedbackSender = mpsc::UnboundedSender<CorrectionFeedback>;

/// Posts correction feedback to the configured webhook
pub struct FeedbackNotifier {
    http_client: reqwest::Client,
    url: Option<String>,
}

impl FeedbackNotifier {
    pub fn new(url: Option<String>) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FEEDBACK_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http_client, url })
    }

    /// Drain commands until the channel closes or shutdown is requested
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<CorrectionFeedback>, shutdown: CancellationToken) {
        info!(configured = self.url.is_some(), "Feedback notifier started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(feedback) => self.deliver(&feedback).await,
                    None => break,
                },
            }
        }

        debug!("Feedback notifier stopped");
    }

    /// Post one feedback command; never fails
    pub async fn deliver(&self, feedback: &CorrectionFeedback) {
        let Some(url) = &self.url else {
            debug!(row = feedback.row_index, "No feedback endpoint configured, dropping feedback");
            return;
        };

        let result = self.http_client.post(url).json(&feedback.to_body()).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(
                    fingerprint = %feedback.fingerprint,
                    row = feedback.row_index,
                    "Correction feedback delivered"
                );
            }
            Ok(response) => {
                warn!(
                    fingerprint = %feedback.fingerprint,
                    row = feedback.row_index,
                    status = response.status().as_u16(),
                    "Feedback endpoint rejected correction"
                );
            }
            Err(e) => {
                warn!(
                    fingerprint = %feedback.fingerprint,
                    row = feedback.row_index,
                    error = %e,
                    "Failed to send correction feedback"
                );
            }
        }
    }
}
