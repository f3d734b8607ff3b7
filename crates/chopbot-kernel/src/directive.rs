//! The inline directive mini-language the model embeds in free-form text:
//!
//! ```text
//! ORDER_ADD:<item name>|QUANTITY:<positive integer>
//! ORDER_REMOVE:<item name>
//! ORDER_UPDATE:<item name>|QUANTITY:<non-negative integer>
//! ```
//!
//! Extraction is two-pass: scan collects every well-formed directive span,
//! then the spans are stripped from the text and what remains is the
//! user-visible message. Application order is fixed ADD -> REMOVE -> UPDATE
//! regardless of where directives appear in the text, so textual position
//! never changes the final cart. A malformed directive is not matched and
//! passes through as literal text.

use chopbot_contracts::Order;
use tracing::warn;

use crate::{menu, order};

const ADD_HEAD: &str = "ORDER_ADD:";
const REMOVE_HEAD: &str = "ORDER_REMOVE:";
const UPDATE_HEAD: &str = "ORDER_UPDATE:";
const QUANTITY_KEY: &str = "QUANTITY:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Add { item: String, quantity: i64 },
    Remove { item: String },
    Update { item: String, quantity: i64 },
}

/// Result of scanning one model reply: the directives in their fixed
/// application order, and the text with every directive span removed.
/// The remainder is returned raw; callers trim it for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub directives: Vec<Directive>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Add,
    Remove,
    Update,
}

struct Span {
    start: usize,
    end: usize,
    directive: Directive,
}

pub fn extract(text: &str) -> Extraction {
    let spans = scan(text);

    let mut message = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in &spans {
        message.push_str(&text[cursor..span.start]);
        cursor = span.end;
    }
    message.push_str(&text[cursor..]);

    let mut directives = Vec::with_capacity(spans.len());
    for span in &spans {
        if matches!(span.directive, Directive::Add { .. }) {
            directives.push(span.directive.clone());
        }
    }
    for span in &spans {
        if matches!(span.directive, Directive::Remove { .. }) {
            directives.push(span.directive.clone());
        }
    }
    for span in &spans {
        if matches!(span.directive, Directive::Update { .. }) {
            directives.push(span.directive.clone());
        }
    }

    Extraction {
        directives,
        message,
    }
}

/// Applies extracted directives to the cart through the mutation engine.
/// Names that do not resolve against the catalog are skipped with a warning;
/// they are never surfaced as a user-facing error.
pub fn apply(target: &mut Order, directives: &[Directive]) {
    for directive in directives {
        match directive {
            Directive::Add { item, quantity } => match menu::resolve(item) {
                Some(menu_item) => order::add_item(target, menu_item, *quantity),
                None => warn!(item = %item, "add directive names unknown dish; skipped"),
            },
            Directive::Remove { item } => match menu::resolve(item) {
                Some(menu_item) => order::remove_item(target, &menu_item.id),
                None => warn!(item = %item, "remove directive names unknown dish; skipped"),
            },
            Directive::Update { item, quantity } => match menu::resolve(item) {
                Some(menu_item) => order::update_quantity(target, &menu_item.id, *quantity),
                None => warn!(item = %item, "update directive names unknown dish; skipped"),
            },
        }
    }
}

fn scan(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < text.len() {
        if let Some((head_len, kind)) = head_at(text, i) {
            if let Some(span) = parse_body(text, i, head_len, kind) {
                i = span.end;
                spans.push(span);
                continue;
            }
        }
        i += 1;
    }
    spans
}

fn head_at(text: &str, at: usize) -> Option<(usize, Kind)> {
    for (head, kind) in [
        (ADD_HEAD, Kind::Add),
        (REMOVE_HEAD, Kind::Remove),
        (UPDATE_HEAD, Kind::Update),
    ] {
        if matches_ignore_case(text, at, head) {
            return Some((head.len(), kind));
        }
    }
    None
}

fn matches_ignore_case(text: &str, at: usize, pattern: &str) -> bool {
    let bytes = text.as_bytes();
    let pat = pattern.as_bytes();
    bytes.len() >= at + pat.len() && bytes[at..at + pat.len()].eq_ignore_ascii_case(pat)
}

fn parse_body(text: &str, start: usize, head_len: usize, kind: Kind) -> Option<Span> {
    let name_start = start + head_len;
    match kind {
        Kind::Remove => parse_remove(text, start, name_start),
        Kind::Add | Kind::Update => parse_with_quantity(text, start, name_start, kind),
    }
}

// The item name runs to the end of the line, the next directive head, or the
// end of the text. The span ends at the last non-space character so the
// surrounding whitespace stays in the message.
fn parse_remove(text: &str, start: usize, name_start: usize) -> Option<Span> {
    let bytes = text.as_bytes();
    let mut stop = name_start;
    while stop < bytes.len() {
        if bytes[stop] == b'\n' || bytes[stop] == b'\r' || head_at(text, stop).is_some() {
            break;
        }
        stop += 1;
    }

    let raw = &text[name_start..stop];
    let item = raw.trim();
    if item.is_empty() {
        return None;
    }
    let end = name_start + raw.trim_end().len();
    Some(Span {
        start,
        end,
        directive: Directive::Remove {
            item: item.to_string(),
        },
    })
}

// `<name>|QUANTITY:<digits>`. Anything off-grammar (no pipe before the end of
// the line, wrong key, empty name, no digits) fails the match and the text is
// left alone.
fn parse_with_quantity(text: &str, start: usize, name_start: usize, kind: Kind) -> Option<Span> {
    let bytes = text.as_bytes();
    let mut pipe = name_start;
    loop {
        if pipe >= bytes.len() || bytes[pipe] == b'\n' || bytes[pipe] == b'\r' {
            return None;
        }
        if bytes[pipe] == b'|' {
            break;
        }
        if head_at(text, pipe).is_some() {
            return None;
        }
        pipe += 1;
    }

    let item = text[name_start..pipe].trim();
    if item.is_empty() {
        return None;
    }

    let key_at = pipe + 1;
    if !matches_ignore_case(text, key_at, QUANTITY_KEY) {
        return None;
    }

    let digits_start = key_at + QUANTITY_KEY.len();
    let mut digits_end = digits_start;
    while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
        digits_end += 1;
    }
    if digits_end == digits_start {
        return None;
    }
    let quantity: i64 = text[digits_start..digits_end].parse().ok()?;

    let item = item.to_string();
    let directive = match kind {
        Kind::Add => Directive::Add { item, quantity },
        Kind::Update => Directive::Update { item, quantity },
        Kind::Remove => unreachable!(),
    };
    Some(Span {
        start,
        end: digits_end,
        directive,
    })
}
