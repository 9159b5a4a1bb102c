//! Match result model
//!
//! The matching service answers in one of two shapes:
//!
//! - **merged**: `merged_candidates` is an ordered list of catalog entries,
//!   each with `catalog_id`, `score` and descriptive text
//! - **legacy**: the best match sits in top-level `kfe_df_*` fields, with up
//!   to four more in `alternatives`
//!
//! Both expose the same candidate list through [`MatchResult::candidates`].
//! The raw object is kept and is what gets persisted; loading re-parses it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tawo_common::columns::cell_text;

/// Field holding the merged candidate list
pub const MERGED_CANDIDATES_FIELD: &str = "merged_candidates";

/// Top-level fields that mark the legacy shape
pub const LEGACY_FIELDS: &[&str] = &["kfe_df_id", "kfe_df_kurztext", "kfe_df_langtext", "alternatives"];

/// Maximum number of legacy alternatives kept
pub const MAX_LEGACY_ALTERNATIVES: usize = 4;

const ID_FIELDS: &[&str] = &["kfe_df_id", "catalog_id", "id", "kfe_id"];
const KURZTEXT_FIELDS: &[&str] = &["kfe_df_kurztext", "kurztext", "short_text", "title"];
const LANGTEXT_FIELDS: &[&str] = &["kfe_df_langtext", "langtext", "long_text"];
const ZEIT_FIELDS: &[&str] = &["kfe_df_zeit", "zeit"];
const MATERIALKOSTEN_FIELDS: &[&str] = &["kfe_df_materialkosten", "materialkosten"];
const KATEGORIE_FIELDS: &[&str] = &["kfe_df_kategorie", "kategorie"];
const SCORE_FIELDS: &[&str] = &["kfe_df_score", "score"];

/// One catalog entry proposed by the matching service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub kurztext: String,
    pub langtext: String,
    pub zeit: String,
    pub materialkosten: String,
    pub kategorie: String,
    /// Relevance in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl CatalogEntry {
    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            id: first_text(object, ID_FIELDS),
            kurztext: first_text(object, KURZTEXT_FIELDS),
            langtext: first_text(object, LANGTEXT_FIELDS),
            zeit: first_text(object, ZEIT_FIELDS),
            materialkosten: first_text(object, MATERIALKOSTEN_FIELDS),
            kategorie: first_text(object, KATEGORIE_FIELDS),
            score: first_score(object, SCORE_FIELDS),
        }
    }

    fn is_empty(&self) -> bool {
        self.id.trim().is_empty() && self.kurztext.trim().is_empty() && self.langtext.trim().is_empty()
    }
}

/// Technical assessment attached to a result (same fields in both shapes)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TechnicalAssessment {
    pub leistungsgruppe: String,
    pub besonderheit: String,
    pub kalkulationskomplexitaet: String,
}

impl TechnicalAssessment {
    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            leistungsgruppe: first_text(object, &["leistungsgruppe"]),
            besonderheit: first_text(object, &["besonderheit"]),
            kalkulationskomplexitaet: first_text(object, &["kalkulationskomplexitaet"]),
        }
    }
}

/// Normalized `{index, title, id, idWithScore, longText}` view of one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub index: usize,
    pub title: String,
    pub id: String,
    pub id_with_score: String,
    pub long_text: String,
    pub zeit: String,
    pub materialkosten: String,
    pub kategorie: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Candidate {
    fn from_entry(index: usize, entry: &CatalogEntry) -> Self {
        let id_with_score = match entry.score {
            Some(score) => format!("{} ({:.0}%)", entry.id, score * 100.0),
            None => entry.id.clone(),
        };
        Self {
            index,
            title: entry.kurztext.clone(),
            id: entry.id.clone(),
            id_with_score,
            long_text: entry.langtext.clone(),
            zeit: entry.zeit.clone(),
            materialkosten: entry.materialkosten.clone(),
            kategorie: entry.kategorie.clone(),
            score: entry.score,
        }
    }
}

/// Canonical match result for one row
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Merged {
        entries: Vec<CatalogEntry>,
        technical: TechnicalAssessment,
        raw: Value,
    },
    Legacy {
        best: Option<CatalogEntry>,
        alternatives: Vec<CatalogEntry>,
        technical: TechnicalAssessment,
        raw: Value,
    },
}

impl MatchResult {
    /// Parse an object carrying a non-empty `merged_candidates` list
    pub fn from_merged(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let list = object.get(MERGED_CANDIDATES_FIELD)?.as_array()?;
        if list.is_empty() {
            return None;
        }

        let entries = list
            .iter()
            .filter_map(Value::as_object)
            .map(CatalogEntry::from_object)
            .filter(|e| !e.is_empty())
            .collect();

        Some(MatchResult::Merged {
            entries,
            technical: TechnicalAssessment::from_object(object),
            raw: value.clone(),
        })
    }

    /// Parse an object carrying legacy `kfe_df_*` / `alternatives` fields
    pub fn from_legacy(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if !has_legacy_fields(object) {
            return None;
        }

        let best = Some(CatalogEntry::from_object(object)).filter(|e| !e.is_empty());
        let alternatives = object
            .get("alternatives")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(CatalogEntry::from_object)
                    .filter(|e| !e.is_empty())
                    .take(MAX_LEGACY_ALTERNATIVES)
                    .collect()
            })
            .unwrap_or_default();

        Some(MatchResult::Legacy {
            best,
            alternatives,
            technical: TechnicalAssessment::from_object(object),
            raw: value.clone(),
        })
    }

    /// The recognized response object, unmodified
    pub fn raw(&self) -> &Value {
        match self {
            MatchResult::Merged { raw, .. } | MatchResult::Legacy { raw, .. } => raw,
        }
    }

    pub fn technical(&self) -> &TechnicalAssessment {
        match self {
            MatchResult::Merged { technical, .. } | MatchResult::Legacy { technical, .. } => technical,
        }
    }

    /// Catalog entries in rank order (rank 0 = best)
    pub fn entries(&self) -> Vec<&CatalogEntry> {
        match self {
            MatchResult::Merged { entries, .. } => entries.iter().collect(),
            MatchResult::Legacy {
                best, alternatives, ..
            } => best.iter().chain(alternatives.iter()).collect(),
        }
    }

    /// Normalized candidate list
    pub fn candidates(&self) -> Vec<Candidate> {
        self.entries()
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Candidate::from_entry(index, entry))
            .collect()
    }

    pub fn candidate(&self, rank: usize) -> Option<Candidate> {
        self.entries()
            .get(rank)
            .map(|entry| Candidate::from_entry(rank, entry))
    }

    pub fn candidate_count(&self) -> usize {
        self.entries().len()
    }
}

impl Serialize for MatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MatchResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        crate::services::response_normalizer::extract(&value)
            .ok_or_else(|| serde::de::Error::custom("unrecognized match result shape"))
    }
}

/// True if any legacy top-level field is present and non-null
pub fn has_legacy_fields(object: &Map<String, Value>) -> bool {
    LEGACY_FIELDS
        .iter()
        .any(|field| object.get(*field).is_some_and(|v| !v.is_null()))
}

/// True if `merged_candidates` is a non-empty array
pub fn has_merged_candidates(object: &Map<String, Value>) -> bool {
    object
        .get(MERGED_CANDIDATES_FIELD)
        .and_then(Value::as_array)
        .is_some_and(|list| !list.is_empty())
}

fn first_text(object: &Map<String, Value>, fields: &[&str]) -> String {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .find(|v| !v.is_null())
        .map(cell_text)
        .unwrap_or_default()
}

fn first_score(object: &Map<String, Value>, fields: &[&str]) -> Option<f64> {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
            _ => None,
        })
        .filter(|score| score.is_finite())
        .map(|score| score.clamp(0.0, 1.0))
}
