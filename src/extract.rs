//! JSON recovery from mixed assistant responses.
//!
//! Assistant output interleaves prose with JSON, usually inside a fenced
//! code block. Recovery tries the fenced form first, then falls back to the
//! first bare `{...}` (or `[...]` for the array variant). Each candidate
//! must actually parse; failures fall through to the next pattern.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// A recovered JSON value together with the exact substring it came from,
/// so callers can strip that one occurrence out of the surrounding prose.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub value: Value,
    pub matched: String,
}

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*([\[{].*?[\]}])\s*```").unwrap()
    })
}

fn bare_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap())
}

fn bare_array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").unwrap())
}

/// Recover a JSON object (or array inside a fence) from a mixed response.
/// Fenced blocks win over bare candidates even when both are present.
pub fn extract_json(text: &str) -> Option<Extracted> {
    if let Some(caps) = fenced_re().captures(text) {
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return Some(Extracted {
                value,
                matched: caps.get(0).map(|m| m.as_str()).unwrap_or(body).to_string(),
            });
        }
    }
    if let Some(m) = bare_object_re().find(text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(Extracted {
                value,
                matched: m.as_str().to_string(),
            });
        }
    }
    None
}

/// Bracketed variant used by gate extraction: fenced block first, then the
/// first bare `[...]` substring.
pub fn extract_json_array(text: &str) -> Option<Extracted> {
    if let Some(caps) = fenced_re().captures(text) {
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if value.is_array() {
                return Some(Extracted {
                    value,
                    matched: caps.get(0).map(|m| m.as_str()).unwrap_or(body).to_string(),
                });
            }
        }
    }
    if let Some(m) = bare_array_re().find(text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            if value.is_array() {
                return Some(Extracted {
                    value,
                    matched: m.as_str().to_string(),
                });
            }
        }
    }
    None
}
