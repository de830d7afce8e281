//! BibLaTeX parser implementation using nom
//!
//! Handles:
//! - `@string` macros, including `#` concatenation and the month macros
//! - `@preamble` and `@comment` blocks
//! - all entry types, with `{...}` or `(...)` delimiters
//! - braced, quoted, numeric and macro field values
//! - creator fields split into structured names
//!
//! Each `@entry{...}` block is located by brace matching before it is
//! parsed, so a malformed entry only costs that entry (a warning). An entry
//! whose braces never close ends at the next entry header that starts a
//! line, or at the end of the input, and is skipped with a warning.

use std::collections::{BTreeMap, HashMap};

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::{map, opt},
    IResult,
};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::names::parse_names;
use crate::error::{ParseError, ParseWarning};

pub use super::names::BibLatexName;

/// Fields holding people, parsed into [`BibLatexName`] lists
const CREATOR_FIELDS: &[&str] = &[
    "author",
    "editor",
    "bookauthor",
    "translator",
    "editora",
    "editorb",
    "editorc",
    "annotator",
    "commentator",
    "introduction",
    "foreword",
    "afterword",
    "holder",
];

/// Fields kept exactly as written (no LaTeX decoding)
const VERBATIM_FIELDS: &[&str] = &[
    "url", "doi", "eprint", "file", "files", "pdf", "note", "verba", "verbb", "verbc",
];

/// Comma-separated list fields
const LIST_FIELDS: &[&str] = &["keywords"];

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// A parsed BibLaTeX entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibLatexRecord {
    /// Citation key
    pub key: String,
    /// Lowercased entry type (`article`, `book`, ...)
    pub entry_type: String,
    /// Non-creator fields, lowercased names
    pub fields: BTreeMap<String, Vec<String>>,
    /// Creator fields, lowercased names
    pub creators: BTreeMap<String, Vec<BibLatexName>>,
    /// Line of the `@` that opens the entry
    pub line: u32,
}

impl BibLatexRecord {
    /// First value of a field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a field
    pub fn field_values(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    pub fn creators(&self, role: &str) -> Option<&[BibLatexName]> {
        self.creators
            .get(role)
            .map(Vec::as_slice)
            .filter(|names| !names.is_empty())
    }
}

/// Parse a BibLaTeX document
pub fn parse(text: &str) -> Result<(Vec<BibLatexRecord>, Vec<ParseWarning>), ParseError> {
    let mut strings: HashMap<String, String> = MONTHS
        .iter()
        .enumerate()
        .map(|(i, m)| (m.to_string(), (i + 1).to_string()))
        .collect();

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut remaining = text;
    let mut line = 1u32;

    while let Some(at) = remaining.find('@') {
        line += count_lines(&remaining[..at]);
        let candidate = &remaining[at..];

        // An '@' outside a block that doesn't open one is comment text
        let Some((kind, open_offset)) = entry_header(candidate) else {
            remaining = &candidate[1..];
            continue;
        };

        let (end, closed) = match block_end(candidate, open_offset) {
            BlockEnd::Closed(end) => (end, true),
            BlockEnd::Unclosed(end) => (end, false),
        };
        let block = &candidate[..end];

        if !closed {
            warnings.push(ParseWarning {
                line: Some(line),
                message: format!("skipping unterminated @{} entry", kind),
            });
        } else if kind != "comment" {
            match parse_at_entry(block, &strings) {
                Ok((rest, at_entry)) if rest.trim().is_empty() => match at_entry {
                    AtEntry::Entry {
                        entry_type,
                        key,
                        fields,
                    } => records.push(build_record(key, entry_type, fields, line)),
                    AtEntry::Strings(defs) => {
                        for (name, value) in defs {
                            strings.insert(name.to_ascii_lowercase(), value);
                        }
                    }
                    AtEntry::Preamble => {}
                },
                _ => warnings.push(ParseWarning {
                    line: Some(line),
                    message: format!("skipping malformed @{} entry", kind),
                }),
            }
        }

        line += count_lines(block);
        remaining = &candidate[end..];
    }

    Ok((records, warnings))
}

fn count_lines(s: &str) -> u32 {
    s.bytes().filter(|b| *b == b'\n').count() as u32
}

/// Result of parsing an @ block
enum AtEntry {
    Entry {
        entry_type: String,
        key: String,
        fields: Vec<(String, String)>,
    },
    Strings(Vec<(String, String)>),
    Preamble,
}

/// Lowercased block type and the offset of its opening delimiter
fn entry_header(input: &str) -> Option<(String, usize)> {
    let after_at = input.strip_prefix('@')?;
    let trimmed = after_at.trim_start();
    let kind_len = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(trimmed.len());
    if kind_len == 0 {
        return None;
    }
    let after_kind = &trimmed[kind_len..];
    let delimiter = after_kind.trim_start();
    if !(delimiter.starts_with('{') || delimiter.starts_with('(')) {
        return None;
    }
    let open_offset = input.len() - delimiter.len();
    Some((trimmed[..kind_len].to_ascii_lowercase(), open_offset))
}

/// Where a block located by [`block_end`] stops
enum BlockEnd {
    /// Byte offset just past the closing delimiter
    Closed(usize),
    /// The block never closed; offset of the next entry header or end of input
    Unclosed(usize),
}

/// Find the end of the block whose opening delimiter is at `open`
fn block_end(input: &str, open: usize) -> BlockEnd {
    let bytes = input.as_bytes();
    let paren = bytes[open] == b'(';
    let mut depth = 0i32;
    let mut pos = open + 1;

    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 1,
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 && !paren {
                    return BlockEnd::Closed(pos + 1);
                }
                depth -= 1;
            }
            b')' if paren && depth == 0 => return BlockEnd::Closed(pos + 1),
            b'@' if bytes[pos - 1] == b'\n' && entry_header(&input[pos..]).is_some() => {
                return BlockEnd::Unclosed(pos);
            }
            _ => {}
        }
        pos += 1;
    }
    BlockEnd::Unclosed(bytes.len())
}

fn parse_at_entry<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, AtEntry> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, entry_type) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, open) = alt((char('{'), char('(')))(rest)?;
    let close = if open == '{' { '}' } else { ')' };

    match entry_type.to_ascii_lowercase().as_str() {
        "string" => {
            let (rest, defs) = parse_fields(rest, strings)?;
            let (rest, _) = multispace0(rest)?;
            let (rest, _) = char(close)(rest)?;
            Ok((rest, AtEntry::Strings(defs)))
        }
        "preamble" => {
            let (rest, _) = multispace0(rest)?;
            let (rest, _) = parse_field_value(rest, strings)?;
            let (rest, _) = multispace0(rest)?;
            let (rest, _) = char(close)(rest)?;
            Ok((rest, AtEntry::Preamble))
        }
        kind => {
            let kind = kind.to_string();
            parse_entry_body(rest, kind, close, strings)
        }
    }
}

fn parse_entry_body<'a>(
    input: &'a str,
    entry_type: String,
    close: char,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, AtEntry> {
    let (rest, _) = multispace0(input)?;
    let (rest, key) = take_while1(move |c: char| {
        !c.is_whitespace() && c != ',' && c != close && c != '{' && c != '}'
    })(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = opt(char(','))(rest)?;

    let (rest, fields) = parse_fields(rest, strings)?;

    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char(close)(rest)?;

    Ok((
        rest,
        AtEntry::Entry {
            entry_type,
            key: key.to_string(),
            fields,
        },
    ))
}

/// Parse `name = value` pairs up to the closing delimiter
fn parse_fields<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, Vec<(String, String)>> {
    let mut fields = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;
        if rest.starts_with('}') || rest.starts_with(')') {
            return Ok((rest, fields));
        }

        match parse_single_field(rest, strings) {
            Ok((rest, field)) => {
                fields.push(field);
                let (rest, _) = multispace0(rest)?;
                remaining = rest.strip_prefix(',').unwrap_or(rest);
            }
            Err(_) => return Ok((remaining, fields)),
        }
    }
}

fn parse_single_field<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, name) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:.+".contains(c))(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;

    Ok((rest, (name.to_ascii_lowercase(), value)))
}

/// Parse a field value (braced, quoted, number or macro), joined by `#`
fn parse_field_value<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, String> {
    let mut result = String::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;

        let (rest, part) = alt((
            parse_braced_value,
            parse_quoted_value,
            map(take_while1(|c: char| c.is_ascii_digit()), |s: &str| s.to_string()),
            map(
                take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                |s: &str| {
                    strings
                        .get(&s.to_ascii_lowercase())
                        .cloned()
                        .unwrap_or_else(|| s.to_string())
                },
            ),
        ))(rest)?;

        result.push_str(&part);

        let (rest, _) = multispace0(rest)?;
        match rest.strip_prefix('#') {
            Some(stripped) => remaining = stripped,
            None => return Ok((rest, result)),
        }
    }
}

fn parse_braced_value(input: &str) -> IResult<&str, String> {
    let (rest, content) = parse_braced_content(input)?;
    Ok((rest, content[1..content.len() - 1].to_string()))
}

/// Braced content including nested braces
fn parse_braced_content(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let bytes = input.as_bytes();
    let mut depth = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[pos + 1..], &input[..pos + 1]));
                }
            }
            b'\\' => pos += 1,
            _ => {}
        }
        pos += 1;
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// Quoted content; quotes inside braces do not terminate it
fn parse_quoted_value(input: &str) -> IResult<&str, String> {
    if !input.starts_with('"') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let mut depth = 0i32;
    let mut escaped = false;
    for (i, c) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            '"' if depth == 0 => return Ok((&input[i + 1..], input[1..i].to_string())),
            _ => {}
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn build_record(
    key: String,
    entry_type: String,
    raw_fields: Vec<(String, String)>,
    line: u32,
) -> BibLatexRecord {
    let mut record = BibLatexRecord {
        key,
        entry_type,
        line,
        ..Default::default()
    };

    for (name, value) in raw_fields {
        if record.fields.contains_key(&name) || record.creators.contains_key(&name) {
            continue;
        }

        if CREATOR_FIELDS.contains(&name.as_str()) {
            record.creators.insert(name, parse_names(&value));
        } else if LIST_FIELDS.contains(&name.as_str()) {
            let items = value
                .split(',')
                .map(|item| decode_latex(item).trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            record.fields.insert(name, items);
        } else if VERBATIM_FIELDS.contains(&name.as_str()) {
            record.fields.insert(name, vec![value.trim().to_string()]);
        } else {
            record.fields.insert(name, vec![decode_latex(&value)]);
        }
    }

    record
}

/// Light LaTeX decoding for display fields
///
/// Drops protective braces, resolves escaped specials and common accent
/// commands, and collapses whitespace.
pub fn decode_latex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' | '}' => {}
            '~' => out.push(' '),
            '\\' => match chars.peek().copied() {
                Some(special @ ('&' | '%' | '_' | '$' | '#' | '{' | '}' | '\\')) => {
                    chars.next();
                    out.push(special);
                }
                Some(accent) if combining_mark(accent).is_some() => {
                    chars.next();
                    // Accent argument may be braced: \"{o}
                    let mut base = None;
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next == '{' || next == ' ' {
                            continue;
                        }
                        if next != '}' {
                            base = Some(next);
                        }
                        break;
                    }
                    if let (Some(base), Some(mark)) = (base, combining_mark(accent)) {
                        out.push(base);
                        out.push(mark);
                    }
                }
                Some(letter) if letter.is_ascii_alphabetic() => {
                    let mut command = String::new();
                    while let Some(&next) = chars.peek() {
                        if !next.is_ascii_alphabetic() {
                            break;
                        }
                        command.push(next);
                        chars.next();
                    }
                    if let Some(symbol) = command_symbol(&command) {
                        out.push_str(symbol);
                    }
                    // Eat the single space that terminates a control word
                    if chars.peek() == Some(&' ') {
                        chars.next();
                    }
                }
                _ => {}
            },
            c => out.push(c),
        }
    }

    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .nfc()
        .collect()
}

fn combining_mark(accent: char) -> Option<char> {
    match accent {
        '"' => Some('\u{0308}'),
        '\'' => Some('\u{0301}'),
        '`' => Some('\u{0300}'),
        '^' => Some('\u{0302}'),
        '~' => Some('\u{0303}'),
        '=' => Some('\u{0304}'),
        '.' => Some('\u{0307}'),
        _ => None,
    }
}

fn command_symbol(command: &str) -> Option<&'static str> {
    match command {
        "ss" => Some("ß"),
        "o" => Some("ø"),
        "O" => Some("Ø"),
        "ae" => Some("æ"),
        "AE" => Some("Æ"),
        "oe" => Some("œ"),
        "OE" => Some("Œ"),
        "aa" => Some("å"),
        "AA" => Some("Å"),
        "l" => Some("ł"),
        "L" => Some("Ł"),
        "i" => Some("ı"),
        "textendash" => Some("–"),
        "textemdash" => Some("—"),
        "LaTeX" => Some("LaTeX"),
        "TeX" => Some("TeX"),
        _ => None,
    }
}
