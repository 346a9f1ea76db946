//! Wire codec for events.
//!
//! `parse` decodes iCalendar text into [`crate::event::Event`] values and
//! `generate` is its inverse on the fields it populates.

pub mod generate;
pub mod parse;

pub use generate::generate_ics;
pub use parse::parse_events;

/// Escape the four reserved characters of iCalendar TEXT values:
/// backslash, semicolon, comma and newline.
pub(crate) fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_text`].
pub(crate) fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(next) => out.push(next),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a multi-valued TEXT property on an unescaped separator, unescaping
/// each piece. An escaped separator (e.g. `\,`) stays inside its value.
pub(crate) fn split_escaped(s: &str, sep: char) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == sep {
            pieces.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    pieces.push(current);
    pieces
        .into_iter()
        .map(|p| unescape_text(p.trim()))
        .filter(|p| !p.is_empty())
        .collect()
}
