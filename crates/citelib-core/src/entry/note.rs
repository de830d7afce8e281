//! Note link conversion
//!
//! Reference managers embed links in notes either as LaTeX
//! `\href{URL}{Text}` or, from older exporters, as HTML anchors. Both are
//! rewritten to Markdown `[Text](URL)`. Every occurrence is matched on its
//! own; text between and around links is left alone.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HREF: Regex = Regex::new(r"\\href\{([^}]*)\}\{([^}]*)\}").unwrap();
    static ref ANCHOR: Regex = Regex::new(r#"<a href="([^"]+)">([^<]+)</a>"#).unwrap();
}

/// Rewrite every embedded link in `text` as a Markdown link
pub fn convert_links(text: &str) -> String {
    let converted = HREF.replace_all(text, "[$2]($1)");
    ANCHOR.replace_all(&converted, "[$2]($1)").into_owned()
}

/// Convert and join note values, separated by a blank line
pub fn render_notes<'a>(notes: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let rendered: Vec<String> = notes
        .into_iter()
        .filter(|note| !note.is_empty())
        .map(convert_links)
        .collect();
    (!rendered.is_empty()).then(|| rendered.join("\n\n"))
}
