//! Raw bibliography parsing
//!
//! Turns the text of a bibliography file into raw records, one per
//! reference. Two formats are understood:
//!
//! - **CSL-JSON**: an array of CSL reference objects (`csl`)
//! - **BibLaTeX**: `.bib` text (`biblatex`)
//!
//! Parsing never interprets records beyond what the grammar requires;
//! deriving display fields is the job of [`crate::entry`].

pub mod biblatex;
pub mod csl;
pub mod names;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseWarning};

pub use biblatex::{BibLatexName, BibLatexRecord};
pub use csl::{CslDatePart, CslDate, CslName, CslRecord};

/// Supported bibliography formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseFormat {
    #[serde(rename = "csl-json")]
    CslJson,
    #[serde(rename = "biblatex")]
    BibLatex,
}

impl DatabaseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseFormat::CslJson => "csl-json",
            DatabaseFormat::BibLatex => "biblatex",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            DatabaseFormat::CslJson => "CSL-JSON",
            DatabaseFormat::BibLatex => "BibLaTeX",
        }
    }
}

impl std::fmt::Display for DatabaseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatabaseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csl-json" | "csl" | "json" => Ok(DatabaseFormat::CslJson),
            "biblatex" | "bibtex" | "bib" => Ok(DatabaseFormat::BibLatex),
            other => Err(format!("Unknown database format: {}", other)),
        }
    }
}

/// One unprocessed reference record
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Csl(CslRecord),
    BibLatex(BibLatexRecord),
}

/// Result of parsing one document
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub records: Vec<RawRecord>,
    /// Records that were skipped
    pub warnings: Vec<ParseWarning>,
}

/// Parse a whole document in the given format
pub fn parse_records(text: &str, format: DatabaseFormat) -> Result<ParseOutput, ParseError> {
    match format {
        DatabaseFormat::CslJson => {
            let (records, warnings) = csl::parse(text)?;
            Ok(ParseOutput {
                records: records.into_iter().map(RawRecord::Csl).collect(),
                warnings,
            })
        }
        DatabaseFormat::BibLatex => {
            let (records, warnings) = biblatex::parse(text)?;
            Ok(ParseOutput {
                records: records.into_iter().map(RawRecord::BibLatex).collect(),
                warnings,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!("csl-json".parse(), Ok(DatabaseFormat::CslJson));
        assert_eq!("BibLaTeX".parse(), Ok(DatabaseFormat::BibLatex));
        assert!("ris".parse::<DatabaseFormat>().is_err());
    }

    #[test]
    fn test_format_serde_names() {
        let json = serde_json::to_string(&DatabaseFormat::CslJson).unwrap();
        assert_eq!(json, "\"csl-json\"");
        let format: DatabaseFormat = serde_json::from_str("\"biblatex\"").unwrap();
        assert_eq!(format, DatabaseFormat::BibLatex);
    }

    #[test]
    fn test_parse_records_dispatches_by_format() {
        let csl = r#"[{"id": "a", "type": "book"}]"#;
        let out = parse_records(csl, DatabaseFormat::CslJson).unwrap();
        assert!(matches!(out.records[0], RawRecord::Csl(_)));

        let bib = "@book{a, title = {T}}";
        let out = parse_records(bib, DatabaseFormat::BibLatex).unwrap();
        assert!(matches!(out.records[0], RawRecord::BibLatex(_)));
    }
}
