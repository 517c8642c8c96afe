//! Tolerant recovery of a JSON value from model output.
//!
//! The instruction says "JSON only", and models mostly comply. When they do
//! not, the damage is predictable: a Markdown fence around the JSON, a stray
//! `json` label, or a sentence of prose before or after it. [`parse_loose`]
//! tries a fixed sequence of recoveries and returns the first value that
//! parses. Text with no recoverable JSON yields `None`, which the pipeline
//! treats as an empty extraction rather than an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?[ \t]*\r?\n?(.*?)\r?\n?```").unwrap());

/// Recover a JSON value from noisy model output.
///
/// Attempts, first success wins:
/// 1. the trimmed text as-is
/// 2. the body of the first fenced code block (optionally tagged `json`)
/// 3. the text with a leading `json` label removed
/// 4. the first balanced `[...]` or `{...}` substring that parses
pub fn parse_loose(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    let fenced = RE_FENCED
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim());
    if let Some(body) = fenced {
        if let Ok(v) = serde_json::from_str(body) {
            debug!("Recovered JSON from fenced block");
            return Some(v);
        }
    }

    let unlabelled = strip_json_label(fenced.unwrap_or(trimmed));
    if let Ok(v) = serde_json::from_str(unlabelled) {
        debug!("Recovered JSON after stripping label");
        return Some(v);
    }

    let found = first_balanced_value(trimmed);
    if found.is_some() {
        debug!("Recovered JSON from embedded substring");
    }
    found
}

/// Drop a leading case-insensitive `json` label.
fn strip_json_label(s: &str) -> &str {
    match s.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("json") => s[4..].trim_start(),
        _ => s,
    }
}

/// Openers tried by [`first_balanced_value`]. Each try scans to the end of
/// the text at worst, so this bounds the scan at `O(n)`.
const MAX_CANDIDATE_OPENERS: usize = 64;

/// Scan for `[`/`{` openers in order and return the first balanced span that parses.
fn first_balanced_value(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .take(MAX_CANDIDATE_OPENERS)
        .find_map(|(start, _)| {
            let len = balanced_len(&text[start..])?;
            serde_json::from_str(&text[start..start + len]).ok()
        })
}

/// Byte length of the bracketed span starting at `s[0]`, honouring JSON
/// strings and escapes. `None` when brackets never balance or mismatch.
fn balanced_len(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
