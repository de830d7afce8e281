//! BibTeX name lists
//!
//! Splits creator fields such as `author = {Doe, Jane and {Acme Corp}}` into
//! structured names. Handles the three BibTeX name forms:
//!
//! - `First von Last`
//! - `von Last, First`
//! - `von Last, Jr, First`
//!
//! A name wrapped entirely in braces is an unsplittable literal.

use serde::{Deserialize, Serialize};

use super::biblatex::decode_latex;

/// A structured creator name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibLatexName {
    pub first_name: Option<String>,
    pub prefix: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    /// Organisational name given as `{...}`
    pub literal: Option<String>,
}

impl BibLatexName {
    pub fn literal(name: impl Into<String>) -> Self {
        Self {
            literal: Some(name.into()),
            ..Default::default()
        }
    }

    /// `first prefix last suffix` with empty parts dropped, or the literal
    pub fn display(&self) -> String {
        if let Some(literal) = self.literal.as_deref().filter(|l| !l.is_empty()) {
            return literal.to_string();
        }
        [&self.first_name, &self.prefix, &self.last_name, &self.suffix]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Split a creator field into names
pub fn parse_names(value: &str) -> Vec<BibLatexName> {
    split_on_and(value)
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_name(raw))
        .collect()
}

/// Parse a single name
pub fn parse_name(raw: &str) -> BibLatexName {
    let raw = raw.trim();

    if is_fully_braced(raw) {
        return BibLatexName::literal(decode_latex(&raw[1..raw.len() - 1]).trim());
    }

    let parts: Vec<&str> = split_top_level(raw, ',')
        .into_iter()
        .map(str::trim)
        .collect();

    match parts.as_slice() {
        [single] => parse_first_von_last(single),
        [von_last, first] => {
            let (prefix, last) = split_von_last(&words(von_last));
            BibLatexName {
                first_name: join_words(&words(first)),
                prefix,
                last_name: last,
                suffix: None,
                literal: None,
            }
        }
        [von_last, jr, rest @ ..] => {
            let (prefix, last) = split_von_last(&words(von_last));
            BibLatexName {
                first_name: join_words(&words(&rest.join(", "))),
                prefix,
                last_name: last,
                suffix: join_words(&words(jr)),
                literal: None,
            }
        }
        [] => BibLatexName::default(),
    }
}

fn parse_first_von_last(part: &str) -> BibLatexName {
    let words = words(part);
    if words.len() <= 1 {
        return BibLatexName {
            last_name: join_words(&words),
            ..Default::default()
        };
    }

    let last_index = words.len() - 1;
    let von_start = words[..last_index].iter().position(|w| starts_lowercase(w));

    match von_start {
        Some(start) => {
            let mut end = start;
            while end < last_index && starts_lowercase(&words[end]) {
                end += 1;
            }
            BibLatexName {
                first_name: join_words(&words[..start]),
                prefix: join_words(&words[start..end]),
                last_name: join_words(&words[end..]),
                suffix: None,
                literal: None,
            }
        }
        None => BibLatexName {
            first_name: join_words(&words[..last_index]),
            last_name: join_words(&words[last_index..]),
            ..Default::default()
        },
    }
}

fn split_von_last(words: &[String]) -> (Option<String>, Option<String>) {
    if words.is_empty() {
        return (None, None);
    }
    let mut end = 0;
    while end < words.len() - 1 && starts_lowercase(&words[end]) {
        end += 1;
    }
    (join_words(&words[..end]), join_words(&words[end..]))
}

fn starts_lowercase(word: &str) -> bool {
    // Braced words count as capitalised, as in BibTeX
    if word.starts_with('{') {
        return false;
    }
    word.chars()
        .find(|c| c.is_alphabetic())
        .map(|c| c.is_lowercase())
        .unwrap_or(false)
}

fn join_words(words: &[String]) -> Option<String> {
    let joined = words
        .iter()
        .map(|w| decode_latex(w))
        .collect::<Vec<_>>()
        .join(" ");
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

fn is_fully_braced(s: &str) -> bool {
    if !s.starts_with('{') || !s.ends_with('}') {
        return false;
    }
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Whitespace-separated words, keeping braced groups intact
fn words(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;

    for c in s.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            c if c.is_whitespace() && depth <= 0 => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_on_and(value: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for word in words(value) {
        if word.eq_ignore_ascii_case("and") {
            names.push(current.join(" "));
            current.clear();
        } else {
            current.push(word);
        }
    }
    names.push(current.join(" "));
    names
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(first: Option<&str>, prefix: Option<&str>, last: Option<&str>) -> BibLatexName {
        BibLatexName {
            first_name: first.map(String::from),
            prefix: prefix.map(String::from),
            last_name: last.map(String::from),
            suffix: None,
            literal: None,
        }
    }

    #[test]
    fn test_first_last() {
        assert_eq!(
            parse_name("Jane Q. Doe"),
            name(Some("Jane Q."), None, Some("Doe"))
        );
    }

    #[test]
    fn test_first_von_last() {
        assert_eq!(
            parse_name("Ludwig van Beethoven"),
            name(Some("Ludwig"), Some("van"), Some("Beethoven"))
        );
    }

    #[test]
    fn test_von_last_comma_first() {
        assert_eq!(
            parse_name("de la Fontaine, Jean"),
            name(Some("Jean"), Some("de la"), Some("Fontaine"))
        );
    }

    #[test]
    fn test_last_jr_first() {
        let parsed = parse_name("King, Jr., Martin Luther");
        assert_eq!(parsed.last_name.as_deref(), Some("King"));
        assert_eq!(parsed.suffix.as_deref(), Some("Jr."));
        assert_eq!(parsed.first_name.as_deref(), Some("Martin Luther"));
        assert_eq!(parsed.display(), "Martin Luther King Jr.");
    }

    #[test]
    fn test_braced_literal() {
        let names = parse_names("{World Health Organization} and Doe, John");
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], BibLatexName::literal("World Health Organization"));
        assert_eq!(names[1].display(), "John Doe");
    }

    #[test]
    fn test_and_inside_braces_does_not_split() {
        let names = parse_names("{Barnes and Noble} AND Smith, A.");
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].display(), "Barnes and Noble");
        assert_eq!(names[1].display(), "A. Smith");
    }

    #[test]
    fn test_single_word() {
        assert_eq!(parse_name("Plato"), name(None, None, Some("Plato")));
    }

    #[test]
    fn test_braced_surname_part() {
        let parsed = parse_name("Jean {de Gaulle}");
        assert_eq!(parsed.first_name.as_deref(), Some("Jean"));
        assert_eq!(parsed.last_name.as_deref(), Some("de Gaulle"));
    }
}
