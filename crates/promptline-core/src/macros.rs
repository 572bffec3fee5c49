//! Inline text macros
//!
//! Two macro families are expanded inside `{{ ... }}` spans:
//!
//! - `{{random::a::b}}` / `{{random:a,b}}` picks one option uniformly
//! - `{{roll2d6}}` / `{{roll:d20}}` sums dice rolls
//!
//! Anything else is left in place verbatim. Rendering never fails.

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

static ROLL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn roll_regex() -> Option<&'static Regex> {
    ROLL_REGEX
        .get_or_init(|| Regex::new(r"(?i)^\s*(\d*)d(\d+)\s*$").ok())
        .as_ref()
}

/// Expand macros using the thread-local random source
pub fn render(text: &str) -> String {
    render_with(text, &mut rand::thread_rng())
}

/// Expand macros using the given random source
pub fn render_with<R: Rng>(text: &str, rng: &mut R) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let Some(end) = find_macro_end(tail) else {
            // unterminated: keep the remainder untouched
            out.push_str(tail);
            return out;
        };

        let whole = &tail[..end];
        let body = whole[2..whole.len() - 2].trim();
        match evaluate(body, rng) {
            Some(replacement) if replacement.contains("{{") => {
                // no depth limit: a self-producing macro would not terminate
                out.push_str(&render_with(&replacement, rng));
            }
            Some(replacement) => out.push_str(&replacement),
            None => {
                warn!(macro_body = %body, "Unrecognized macro left as-is");
                out.push_str(whole);
            }
        }
        rest = &tail[end..];
    }

    out.push_str(rest);
    out
}

/// Byte offset just past the `}}` matching the leading `{{` of `text`
fn find_macro_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;

    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"{{" => {
                depth += 1;
                i += 2;
            }
            b"}}" => {
                depth = depth.saturating_sub(1);
                i += 2;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => i += 1,
        }
    }
    None
}

fn evaluate<R: Rng>(body: &str, rng: &mut R) -> Option<String> {
    if starts_with_ignore_case(body, "random") {
        random_choice(&body["random".len()..], rng)
    } else if starts_with_ignore_case(body, "roll") {
        roll_dice(&body["roll".len()..], rng)
    } else {
        None
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn random_choice<R: Rng>(rest: &str, rng: &mut R) -> Option<String> {
    let rest = rest.trim_start();
    let body = rest
        .strip_prefix("::")
        .or_else(|| rest.strip_prefix(':'))?;

    let options = split_options(body);
    Some(options.choose(rng).cloned().unwrap_or_default())
}

/// Split a random body at depth 0: on `::` when present, otherwise on `,`
fn split_options(body: &str) -> Vec<String> {
    let separator: &str = if top_level_contains(body, "::") { "::" } else { "," };

    let mut options = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut rest = body;

    while let Some(ch) = rest.chars().next() {
        if rest.starts_with("{{") {
            depth += 1;
            current.push_str("{{");
            rest = &rest[2..];
        } else if depth > 0 && rest.starts_with("}}") {
            depth -= 1;
            current.push_str("}}");
            rest = &rest[2..];
        } else if depth == 0 && rest.starts_with(separator) {
            options.push(current.trim().to_string());
            current.clear();
            rest = &rest[separator.len()..];
        } else {
            current.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    options.push(current.trim().to_string());

    options.retain(|o| !o.is_empty());
    options
}

fn top_level_contains(body: &str, needle: &str) -> bool {
    let mut depth = 0usize;
    let mut rest = body;
    while let Some(ch) = rest.chars().next() {
        if rest.starts_with("{{") {
            depth += 1;
            rest = &rest[2..];
        } else if depth > 0 && rest.starts_with("}}") {
            depth -= 1;
            rest = &rest[2..];
        } else if depth == 0 && rest.starts_with(needle) {
            return true;
        } else {
            rest = &rest[ch.len_utf8()..];
        }
    }
    false
}

/// Largest dice count and face count a roll macro accepts
const MAX_DICE: u64 = 1000;
const MAX_SIDES: u64 = 1_000_000;

fn roll_dice<R: Rng>(rest: &str, rng: &mut R) -> Option<String> {
    let rest = rest.trim();
    let spec = rest
        .strip_prefix("::")
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest);

    let caps = roll_regex()?.captures(spec)?;
    let count: u64 = match caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
        Some(digits) => digits.parse().ok()?,
        None => 1,
    };
    let sides: u64 = caps.get(2)?.as_str().parse().ok()?;
    if !(1..=MAX_DICE).contains(&count) || !(1..=MAX_SIDES).contains(&sides) {
        return None;
    }

    let total = (0..count).try_fold(0u64, |acc, _| acc.checked_add(rng.gen_range(1..=sides)))?;
    Some(total.to_string())
}
