//! CSL-JSON records
//!
//! A CSL-JSON export is an array of reference objects. The well-known
//! properties are typed; everything else is kept verbatim in `extra`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ParseError, ParseWarning};

/// A CSL name (person or organisation)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CslName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Organisational or otherwise unsplittable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
}

/// One component of a CSL date-parts tuple
///
/// Exports in the wild mix numbers and numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CslDatePart {
    Int(i64),
    Float(f64),
    Text(String),
}

impl CslDatePart {
    /// Integer value of this component, if it has one
    ///
    /// Strings use their leading digits ("2021", "2021-ish").
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CslDatePart::Int(n) => Some(*n),
            CslDatePart::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            CslDatePart::Float(_) => None,
            CslDatePart::Text(s) => leading_int(s),
        }
    }
}

/// A CSL date variable (`issued`, `accessed`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CslDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<CslDatePart>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CslDate {
    /// The first date-parts tuple, if it is non-empty
    pub fn first_tuple(&self) -> Option<&[CslDatePart]> {
        self.date_parts
            .first()
            .map(Vec::as_slice)
            .filter(|parts| !parts.is_empty())
    }
}

/// A CSL-JSON reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CslRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "title-short", default)]
    pub title_short: Option<String>,
    #[serde(default)]
    pub author: Option<Vec<CslName>>,
    #[serde(default)]
    pub editor: Option<Vec<CslName>>,
    #[serde(default)]
    pub issued: Option<CslDate>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(rename = "container-title", default)]
    pub container_title: Option<String>,
    #[serde(rename = "collection-title", default)]
    pub collection_title: Option<String>,
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(rename = "event-place", default)]
    pub event_place: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub page: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(rename = "publisher-place", default)]
    pub publisher_place: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub volume: Option<String>,
    #[serde(rename = "zotero-key", default)]
    pub zotero_key: Option<String>,
    /// Properties without a typed slot
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Parse a CSL-JSON document
///
/// Invalid JSON or a non-array document is fatal; an array element that is
/// not a usable record is reported as a warning and skipped.
pub fn parse(text: &str) -> Result<(Vec<CslRecord>, Vec<ParseWarning>), ParseError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ParseError::InvalidJson {
        message: e.to_string(),
    })?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ParseError::NotAnArray {
                found: json_kind(&other).to_string(),
            })
        }
    };

    let mut records = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<CslRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => warnings.push(ParseWarning {
                line: None,
                message: format!("skipping CSL record #{}: {}", index, e),
            }),
        }
    }

    Ok((records, warnings))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse the leading (optionally signed) integer of a string
pub(crate) fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(String::from))
}
