//! Assessment decoding and iteration-name sanitization.

use regex::Regex;
use std::sync::OnceLock;

use crate::extract::extract_json;
use crate::types::StructuredAssessment;

const DEFAULT_SEVERITY: i64 = 3;
pub const MAX_NAME_LEN: usize = 50;

/// Decode a structured assessment from raw assistant output.
///
/// Severity is rounded and clamped to [1, 5]; a missing or non-numeric
/// field defaults to 3. The prose is the original text with the matched
/// JSON block removed (one occurrence); if removal would leave nothing,
/// the trimmed raw text is used instead.
pub fn parse_assessment(raw: &str) -> StructuredAssessment {
    let Some(found) = extract_json(raw) else {
        return StructuredAssessment {
            severity: DEFAULT_SEVERITY,
            principle: "unknown".to_string(),
            category: "other".to_string(),
            prose: raw.trim().to_string(),
            raw: raw.to_string(),
        };
    };

    let severity = found
        .value
        .get("severity")
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .map(|v| (v.round() as i64).clamp(1, 5))
        .unwrap_or(DEFAULT_SEVERITY);

    let principle = found
        .value
        .get("principle")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let category = found
        .value
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("other")
        .to_string();

    let stripped = raw.replacen(&found.matched, "", 1);
    let prose = if stripped.trim().is_empty() {
        raw.trim().to_string()
    } else {
        stripped.trim().to_string()
    };

    StructuredAssessment {
        severity,
        principle,
        category,
        prose,
        raw: raw.to_string(),
    }
}

fn name_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9-]+").unwrap())
}

/// Sanitize an assistant-proposed iteration name.
///
/// Takes the first contiguous `[a-z0-9-]+` run, capped at 50 characters.
/// No match falls back to a timestamped slug.
pub fn sanitize_name(response: &str) -> String {
    match name_run_re().find(response) {
        Some(m) => {
            let run = m.as_str();
            run[..run.len().min(MAX_NAME_LEN)].to_string()
        }
        None => format!("assessment-{}", chrono::Utc::now().timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_fenced_json() {
        let raw = "The code duplicates logic everywhere.\n```json\n{\"severity\": 4, \"principle\": \"DRY\", \"category\": \"duplication\"}\n```";
        let a = parse_assessment(raw);
        assert_eq!(a.severity, 4);
        assert_eq!(a.principle, "DRY");
        assert_eq!(a.category, "duplication");
        assert_eq!(a.prose, "The code duplicates logic everywhere.");
        assert_eq!(a.raw, raw);
    }

    #[test]
    fn test_parse_without_json_defaults() {
        let a = parse_assessment("  Plain prose only.  ");
        assert_eq!(a.severity, 3);
        assert_eq!(a.principle, "unknown");
        assert_eq!(a.category, "other");
        assert_eq!(a.prose, "Plain prose only.");
    }

    #[test]
    fn test_severity_clamped_and_rounded() {
        let a = parse_assessment("{\"severity\": 9.6}");
        assert_eq!(a.severity, 5);
        let a = parse_assessment("{\"severity\": -2}");
        assert_eq!(a.severity, 1);
        let a = parse_assessment("{\"severity\": 2.5}");
        assert_eq!(a.severity, 3);
    }

    #[test]
    fn test_non_numeric_severity_defaults() {
        let a = parse_assessment("{\"severity\": \"high\", \"principle\": \"KISS\"}");
        assert_eq!(a.severity, 3);
        assert_eq!(a.principle, "KISS");
    }

    #[test]
    fn test_json_only_input_keeps_raw_as_prose() {
        let raw = "{\"severity\": 2}";
        let a = parse_assessment(raw);
        assert_eq!(a.prose, raw.trim());
    }

    #[test]
    fn test_severity_in_valid_range_for_any_input() {
        for raw in [
            "{\"severity\": 100}",
            "{\"severity\": 0}",
            "{\"severity\": null}",
            "{}",
            "no json",
        ] {
            let a = parse_assessment(raw);
            assert!((1..=5).contains(&a.severity), "raw: {raw}");
        }
    }

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_name("fix-srp-violation"), "fix-srp-violation");
        assert_eq!(sanitize_name("fix-srp-violation\n"), "fix-srp-violation");
    }

    #[test]
    fn test_sanitize_takes_first_lowercase_run() {
        // Uppercase letters break the run; the first match wins.
        assert_eq!(sanitize_name("The name is fix-auth"), "he");
    }

    #[test]
    fn test_sanitize_truncates_to_fifty() {
        let long = "a".repeat(80);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_sanitize_idempotent() {
        for input in ["fix-srp-violation", "The name is fix-auth", &"x".repeat(80)] {
            let once = sanitize_name(input);
            assert_eq!(sanitize_name(&once), once);
        }
    }

    #[test]
    fn test_sanitize_fallback_is_timestamped() {
        let name = sanitize_name("!!!INVALID!!!");
        let re = Regex::new(r"^assessment-\d+$").unwrap();
        assert!(re.is_match(&name), "got: {name}");
    }
}
