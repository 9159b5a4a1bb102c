//! Response normalizer
//!
//! The automation platform wraps the matching answer differently depending on
//! workflow version and proxies in between. `extract` walks the known wrapper
//! shapes with a fixed precedence and yields the canonical result, or `None`
//! when nothing recognizable is found. An unrecognized shape is "no result"
//! for the row, never an error.

use serde_json::Value;

use crate::models::match_result::{has_legacy_fields, has_merged_candidates};
use crate::models::MatchResult;

/// Wrapper nesting deeper than this is treated as unrecognized
const MAX_UNWRAP_DEPTH: usize = 8;

/// Extract the canonical match result from a raw response body
///
/// Precedence, checked on the current value before recursing:
/// 1. object with a non-empty `merged_candidates` list
/// 2. object with any legacy top-level match field
/// 3. array: first element
/// 4. object with `data`, `result`, `results[0]` or `output`, in that order;
///    a wrapper that yields nothing falls through to the next
pub fn extract(raw: &Value) -> Option<MatchResult> {
    extract_at_depth(raw, 0)
}

fn extract_at_depth(value: &Value, depth: usize) -> Option<MatchResult> {
    if depth > MAX_UNWRAP_DEPTH {
        tracing::debug!(depth, "Response wrapper nesting too deep");
        return None;
    }

    match value {
        Value::Object(object) => {
            if has_merged_candidates(object) {
                return MatchResult::from_merged(value);
            }
            if has_legacy_fields(object) {
                return MatchResult::from_legacy(value);
            }

            let wrappers = [
                present(object.get("data")),
                present(object.get("result")),
                object
                    .get("results")
                    .and_then(Value::as_array)
                    .and_then(|items| items.first()),
                present(object.get("output")),
            ];

            wrappers
                .into_iter()
                .flatten()
                .find_map(|inner| extract_at_depth(inner, depth + 1))
        }
        Value::Array(items) => items
            .first()
            .and_then(|first| extract_at_depth(first, depth + 1)),
        _ => None,
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}
