//! Column registry and the line-item record
//!
//! Single source of truth for table columns: keys, German labels and group
//! structure. The `define_columns!` table generates both the registry
//! (`TABLE_COLUMNS`) and the `LineItem` struct, so a column can never exist in
//! one without the other.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Column key holding the section/item discriminator
pub const TYPE_KEY: &str = "type";

/// Column key holding the dotted path (Ordnungszahl)
pub const PATH_KEY: &str = "rNoPart";

/// Key of the upstream row identifier (kept in the extra bag)
pub const IDENTIFIER_KEY: &str = "id";

/// `type` value that marks a section/heading row
pub const REMARK_TYPE: &str = "REMARK";

/// Column group names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnGroup {
    /// Leistungsverzeichnis
    #[serde(rename = "LV")]
    Lv,
    #[serde(rename = "Technische Einschätzung")]
    TechnicalAssessment,
    #[serde(rename = "KFE / DF")]
    KfeDf,
}

impl ColumnGroup {
    pub fn label(&self) -> &'static str {
        match self {
            ColumnGroup::Lv => "LV",
            ColumnGroup::TechnicalAssessment => "Technische Einschätzung",
            ColumnGroup::KfeDf => "KFE / DF",
        }
    }
}

/// Subgroup of the KFE / DF group holding the matched catalog entry
pub const SUBGROUP_DEAL_FUSION: &str = "Deal Fusion Match";

/// Subgroup of the KFE / DF group holding the correction reason
pub const SUBGROUP_KFE_KIT: &str = "KFE Kit";

/// One table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub key: &'static str,
    pub label: &'static str,
    pub group: ColumnGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<&'static str>,
}

macro_rules! define_columns {
    ($( $field:ident : $key:literal => $label:literal, $group:expr, $subgroup:expr; )*) => {
        /// One row of the bill of quantities
        ///
        /// Every registered column is a named field (empty string when the
        /// upstream row did not carry it). Fields the registry does not know
        /// about are kept in `extra` so they survive a round trip to the
        /// matching service.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct LineItem {
            $(
                #[serde(rename = $key)]
                pub $field: String,
            )*
            /// Unknown upstream fields
            #[serde(flatten)]
            pub extra: BTreeMap<String, String>,
        }

        /// All table columns in display order
        pub const TABLE_COLUMNS: &[ColumnDef] = &[
            $( ColumnDef { key: $key, label: $label, group: $group, subgroup: $subgroup }, )*
        ];

        impl LineItem {
            /// Read a cell by column key (falls back to the extra bag)
            pub fn get(&self, key: &str) -> Option<&str> {
                match key {
                    $( $key => Some(self.$field.as_str()), )*
                    other => self.extra.get(other).map(String::as_str),
                }
            }

            /// Write a cell by column key (unknown keys go to the extra bag)
            pub fn set(&mut self, key: &str, value: impl Into<String>) {
                match key {
                    $( $key => self.$field = value.into(), )*
                    other => {
                        self.extra.insert(other.to_string(), value.into());
                    }
                }
            }
        }
    };
}

define_columns! {
    kind: "type" => "Typ", ColumnGroup::Lv, None;
    r_no_part: "rNoPart" => "Ordnungszahl", ColumnGroup::Lv, None;
    short_text: "shortText" => "Kurztext", ColumnGroup::Lv, None;
    long_text: "longText" => "Langtext", ColumnGroup::Lv, None;
    qty: "qty" => "Menge", ColumnGroup::Lv, None;
    unit: "unit" => "Einheit", ColumnGroup::Lv, None;
    unit_price: "unitPrice" => "Einheitspreis", ColumnGroup::Lv, None;
    total_price: "totalPrice" => "Gesamtpreis", ColumnGroup::Lv, None;
    discount: "discount" => "Nachlass", ColumnGroup::Lv, None;
    price_after_discount: "priceAfterDiscount" => "Preis nach Nachlass", ColumnGroup::Lv, None;
    vat: "vat" => "MwSt.", ColumnGroup::Lv, None;
    leistungsgruppe: "leistungsgruppe" => "Leistungsgruppe", ColumnGroup::TechnicalAssessment, None;
    besonderheit: "besonderheit" => "Besonderheit", ColumnGroup::TechnicalAssessment, None;
    kalkulationskomplexitaet: "kalkulationskomplexitaet" => "Kalkulationskomplexität", ColumnGroup::TechnicalAssessment, None;
    kfe_df_id: "kfeDfId" => "KFE DF ID", ColumnGroup::KfeDf, Some(SUBGROUP_DEAL_FUSION);
    kfe_df_kurztext: "kfeDfKurztext" => "KFE DF Kurztext", ColumnGroup::KfeDf, Some(SUBGROUP_DEAL_FUSION);
    kfe_df_langtext: "kfeDfLangtext" => "KFE DF Langtext", ColumnGroup::KfeDf, Some(SUBGROUP_DEAL_FUSION);
    kfe_df_zeit: "kfeDfZeit" => "KFE DF Zeit", ColumnGroup::KfeDf, Some(SUBGROUP_DEAL_FUSION);
    kfe_df_materialkosten: "kfeDfMaterialkosten" => "Materialkosten", ColumnGroup::KfeDf, Some(SUBGROUP_DEAL_FUSION);
    kfe_df_kategorie: "kfeDfKategorie" => "Kategorie", ColumnGroup::KfeDf, Some(SUBGROUP_DEAL_FUSION);
    kfe_falsch_grund: "kfeFalschGrund" => "KFE Falsch Grund", ColumnGroup::KfeDf, Some(SUBGROUP_KFE_KIT);
}

impl LineItem {
    /// Build a row from an arbitrary upstream JSON object
    ///
    /// Header names are normalized through [`key_for_header`]; non-string
    /// values are stringified. Returns `None` for non-objects.
    pub fn from_json_object(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut row = LineItem::default();
        for (header, cell) in object {
            let key = key_for_header(header).unwrap_or(header.as_str());
            row.set(key, cell_text(cell));
        }
        Some(row)
    }

    /// True for section/heading rows
    pub fn is_remark(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case(REMARK_TYPE)
    }

    /// Upstream row identifier, falling back to the path when absent
    pub fn identifier(&self) -> &str {
        match self.extra.get(IDENTIFIER_KEY) {
            Some(id) if !id.trim().is_empty() => id.as_str(),
            _ => self.r_no_part.as_str(),
        }
    }

    /// True when every cell is blank
    pub fn is_blank(&self) -> bool {
        TABLE_COLUMNS
            .iter()
            .all(|c| self.get(c.key).map_or(true, |v| v.trim().is_empty()))
            && self.extra.values().all(|v| v.trim().is_empty())
    }
}

/// Render a JSON cell the way a spreadsheet would show it
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Legacy API/CSV header names (lowercase) mapped to column keys
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("typ", "type"),
    ("rnopart", "rNoPart"),
    ("partno", "rNoPart"),
    ("part no.", "rNoPart"),
    ("ordnungszahl", "rNoPart"),
    ("pathnumbers", "rNoPart"),
    ("path", "rNoPart"),
    ("shorttext", "shortText"),
    ("kurztext", "shortText"),
    ("longtext", "longText"),
    ("langtext", "longText"),
    ("quantity", "qty"),
    ("menge", "qty"),
    ("einheit", "unit"),
    ("unitprice", "unitPrice"),
    ("einheitspreis", "unitPrice"),
    ("totalprice", "totalPrice"),
    ("gesamtpreis", "totalPrice"),
    ("nachlass", "discount"),
    ("priceafterdiscount", "priceAfterDiscount"),
    ("preis nach nachlass", "priceAfterDiscount"),
    ("mwst", "vat"),
    ("id", IDENTIFIER_KEY),
];

static HEADER_TO_KEY: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut map: HashMap<String, &'static str> = HEADER_ALIASES
        .iter()
        .map(|(alias, key)| (alias.to_string(), *key))
        .collect();
    for column in TABLE_COLUMNS {
        map.insert(column.key.to_lowercase(), column.key);
        map.insert(column.label.to_lowercase(), column.key);
    }
    map
});

/// Map a legacy or localized header name to its column key
pub fn key_for_header(header: &str) -> Option<&'static str> {
    HEADER_TO_KEY.get(&header.trim().to_lowercase()).copied()
}

/// Group of a column key
pub fn column_group(key: &str) -> Option<ColumnGroup> {
    TABLE_COLUMNS.iter().find(|c| c.key == key).map(|c| c.group)
}

/// True if `key` starts a new group within `headers` (visual separator)
pub fn is_first_column_in_group(key: &str, headers: &[&str]) -> bool {
    let Some(group) = column_group(key) else {
        return false;
    };
    match headers.iter().position(|h| *h == key) {
        None => false,
        Some(0) => true,
        Some(idx) => column_group(headers[idx - 1]) != Some(group),
    }
}

/// Header cell spanning several columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupHeader {
    pub label: &'static str,
    pub colspan: usize,
}

/// Group headers in display order
pub fn group_headers() -> Vec<GroupHeader> {
    let mut headers: Vec<GroupHeader> = Vec::new();
    for column in TABLE_COLUMNS {
        match headers.last_mut() {
            Some(last) if last.label == column.group.label() => last.colspan += 1,
            _ => headers.push(GroupHeader {
                label: column.group.label(),
                colspan: 1,
            }),
        }
    }
    headers
}

/// Subgroup headers of the KFE / DF group
pub fn kfe_subgroup_headers() -> Vec<GroupHeader> {
    [SUBGROUP_DEAL_FUSION, SUBGROUP_KFE_KIT]
        .into_iter()
        .map(|label| GroupHeader {
            label,
            colspan: TABLE_COLUMNS
                .iter()
                .filter(|c| c.subgroup == Some(label))
                .count(),
        })
        .collect()
}

/// LV column keys (the review table)
pub fn lv_header_keys() -> Vec<&'static str> {
    TABLE_COLUMNS
        .iter()
        .filter(|c| c.group == ColumnGroup::Lv)
        .map(|c| c.key)
        .collect()
}
