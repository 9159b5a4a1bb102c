//! Idempotency & retry ledger
//!
//! Persists per-fingerprint matching state in scoped storage so a restarted
//! service (or a second `start`) never resends completed work:
//!
//! | Key | Content |
//! |---|---|
//! | `tawo_matching_sent_<fp>` | `true` once a full pass settled |
//! | `tawo_matching_results_<fp>` | `{ "<row>": <raw match result> }` |
//! | `tawo_matching_selected_<fp>` | `{ "<row>": <rank> }` |
//! | `tawo_matching_reasons_<fp>` | `{ "<row>": "<wrong reason>" }` |
//! | `tawo_matching_done_<fp>` | `{ "<row>": true }` for settled rows |
//!
//! Writes are best-effort: failures are logged and swallowed. Corrupt or
//! unreadable entries read as "nothing persisted".

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tawo_common::Fingerprint;
use tracing::warn;

use crate::db::scoped_storage::MATCHING_PREFIX;
use crate::db::ScopedStore;
use crate::models::MatchResult;

fn sent_key(fp: &Fingerprint) -> String {
    format!("{}sent_{}", MATCHING_PREFIX, fp)
}

fn results_key(fp: &Fingerprint) -> String {
    format!("{}results_{}", MATCHING_PREFIX, fp)
}

fn selected_key(fp: &Fingerprint) -> String {
    format!("{}selected_{}", MATCHING_PREFIX, fp)
}

fn reasons_key(fp: &Fingerprint) -> String {
    format!("{}reasons_{}", MATCHING_PREFIX, fp)
}

fn done_key(fp: &Fingerprint) -> String {
    format!("{}done_{}", MATCHING_PREFIX, fp)
}

/// Matching state restored for one fingerprint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedMatching {
    pub results: BTreeMap<usize, MatchResult>,
    pub selections: BTreeMap<usize, usize>,
    pub reasons: BTreeMap<usize, String>,
    pub done_rows: BTreeSet<usize>,
}

/// Ledger over scoped storage
#[derive(Debug, Clone)]
pub struct MatchingLedger {
    store: ScopedStore,
}

impl MatchingLedger {
    pub fn new(store: ScopedStore) -> Self {
        Self { store }
    }

    /// True once a full pass for `fp` settled
    pub async fn has_been_fully_sent(&self, fp: &Fingerprint) -> bool {
        match self.store.get(&sent_key(fp)).await {
            Ok(Some(value)) => value == "true",
            Ok(None) => false,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Failed to read sent flag");
                false
            }
        }
    }

    pub async fn mark_fully_sent(&self, fp: &Fingerprint) {
        if let Err(e) = self.store.set(&sent_key(fp), "true").await {
            warn!(fingerprint = %fp, error = %e, "Failed to persist sent flag");
        }
    }

    /// Remove the sent flag and every persisted map for `fp`
    pub async fn clear_all(&self, fp: &Fingerprint) {
        for key in [sent_key(fp), results_key(fp), selected_key(fp), reasons_key(fp), done_key(fp)] {
            if let Err(e) = self.store.remove(&key).await {
                warn!(fingerprint = %fp, key = %key, error = %e, "Failed to clear ledger entry");
            }
        }
    }

    pub async fn load_persisted(&self, fp: &Fingerprint) -> PersistedMatching {
        let done_flags: BTreeMap<usize, bool> = self.load_index_map(&done_key(fp)).await;
        PersistedMatching {
            results: self.load_index_map(&results_key(fp)).await,
            selections: self.load_index_map(&selected_key(fp)).await,
            reasons: self.load_index_map(&reasons_key(fp)).await,
            done_rows: done_flags
                .into_iter()
                .filter_map(|(idx, done)| done.then_some(idx))
                .collect(),
        }
    }

    pub async fn persist(
        &self,
        fp: &Fingerprint,
        results: &BTreeMap<usize, MatchResult>,
        selections: &BTreeMap<usize, usize>,
        reasons: &BTreeMap<usize, String>,
    ) {
        self.store_index_map(&results_key(fp), results).await;
        self.store_index_map(&selected_key(fp), selections).await;
        self.store_index_map(&reasons_key(fp), reasons).await;
    }

    pub async fn persist_selection(
        &self,
        fp: &Fingerprint,
        selections: &BTreeMap<usize, usize>,
        reasons: &BTreeMap<usize, String>,
    ) {
        self.store_index_map(&selected_key(fp), selections).await;
        self.store_index_map(&reasons_key(fp), reasons).await;
    }

    pub async fn persist_done(&self, fp: &Fingerprint, done_rows: &BTreeSet<usize>) {
        let flags: BTreeMap<usize, bool> = done_rows.iter().map(|idx| (*idx, true)).collect();
        self.store_index_map(&done_key(fp), &flags).await;
    }

    async fn load_index_map<T: DeserializeOwned>(&self, key: &str) -> BTreeMap<usize, T> {
        let text = match self.store.get(key).await {
            Ok(Some(text)) => text,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read ledger entry");
                return BTreeMap::new();
            }
        };
        decode_index_map(&text).unwrap_or_else(|| {
            warn!(key = %key, "Corrupt ledger entry, treating as empty");
            BTreeMap::new()
        })
    }

    async fn store_index_map<T: Serialize>(&self, key: &str, map: &BTreeMap<usize, T>) {
        let encoded = match encode_index_map(map) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize ledger entry");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &encoded).await {
            warn!(key = %key, error = %e, "Failed to persist ledger entry");
        }
    }
}

/// Encode as a JSON object keyed by the decimal row index
pub fn encode_index_map<T: Serialize>(map: &BTreeMap<usize, T>) -> serde_json::Result<String> {
    let mut object = Map::new();
    for (idx, value) in map {
        object.insert(idx.to_string(), serde_json::to_value(value)?);
    }
    serde_json::to_string(&Value::Object(object))
}

/// Decode a row-index keyed object
///
/// Returns `None` when the text is not a JSON object. Non-numeric keys and
/// values that fail to decode are discarded individually.
pub fn decode_index_map<T: DeserializeOwned>(text: &str) -> Option<BTreeMap<usize, T>> {
    let object: Map<String, Value> = serde_json::from_str(text).ok()?;
    Some(
        object
            .into_iter()
            .filter_map(|(key, value)| {
                let idx = key.trim().parse::<usize>().ok()?;
                let decoded = serde_json::from_value(value).ok()?;
                Some((idx, decoded))
            })
            .collect(),
    )
}
