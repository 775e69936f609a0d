//! Charter checking: does the project document its own intent?

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::types::{CharterCheckResult, CharterSource};

/// The injected seam for charter inspection.
pub trait CharterChecker: Send + Sync {
    fn check(&self, project: &Path) -> Result<CharterCheckResult>;
}

/// Production checker reading intent documentation off disk.
pub struct FsCharterChecker {
    min_length: usize,
}

impl FsCharterChecker {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }
}

impl CharterChecker for FsCharterChecker {
    fn check(&self, project: &Path) -> Result<CharterCheckResult> {
        Ok(check_charter(project, self.min_length))
    }
}

fn charter_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)## Project Charter\s*(.*?)(?:\n## |\z)").unwrap())
}

fn mix_description_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"description:\s*"([^"]*)""#).unwrap())
}

/// Inspect the four intent-documentation sources in order, collecting every
/// one that exists, and report whether any meets the minimum length.
pub fn check_charter(project: &Path, min_length: usize) -> CharterCheckResult {
    let mut sources = Vec::new();

    if let Ok(content) = std::fs::read_to_string(project.join("CHARTER.md")) {
        push_source(&mut sources, "CHARTER.md", content.trim().len(), min_length);
    }

    if let Ok(content) = std::fs::read_to_string(project.join("CLAUDE.md")) {
        if let Some(caps) = charter_section_re().captures(&content) {
            let section = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            push_source(&mut sources, "CLAUDE.md", section.trim().len(), min_length);
        }
    }

    if let Ok(content) = std::fs::read_to_string(project.join("README.md")) {
        push_source(&mut sources, "README.md", content.trim().len(), min_length);
    }

    if let Some((file, description)) = package_description(project) {
        push_source(&mut sources, file, description.trim().len(), min_length);
    }

    let passed = sources.iter().any(|s| s.sufficient);
    let guidance = if passed {
        vec![]
    } else if sources.is_empty() {
        vec![
            "No project intent documentation found.".to_string(),
            "Add a CHARTER.md, a '## Project Charter' section in CLAUDE.md, a README.md, or a package description.".to_string(),
        ]
    } else {
        let longest = sources.iter().map(|s| s.length).max().unwrap_or(0);
        vec![
            format!(
                "Project intent documentation is too short: longest source is {longest} characters, need at least {min_length}."
            ),
            "Expand the charter to describe what the project is for and what good looks like.".to_string(),
        ]
    };

    CharterCheckResult {
        passed,
        sources,
        guidance,
    }
}

fn push_source(sources: &mut Vec<CharterSource>, file: &str, length: usize, min_length: usize) {
    sources.push(CharterSource {
        file: file.to_string(),
        length,
        sufficient: length >= min_length,
    });
}

/// Package description from the first manifest that carries one:
/// package.json, then mix.exs, then pyproject.toml.
fn package_description(project: &Path) -> Option<(&'static str, String)> {
    if let Ok(content) = std::fs::read_to_string(project.join("package.json")) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) {
            if let Some(desc) = value.get("description").and_then(|d| d.as_str()) {
                return Some(("package.json", desc.to_string()));
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(project.join("mix.exs")) {
        if let Some(caps) = mix_description_re().captures(&content) {
            return Some(("mix.exs", caps[1].to_string()));
        }
    }

    if let Ok(content) = std::fs::read_to_string(project.join("pyproject.toml")) {
        if let Ok(value) = content.parse::<toml::Table>() {
            let desc = value
                .get("project")
                .and_then(|p| p.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| {
                    value
                        .get("tool")
                        .and_then(|t| t.get("poetry"))
                        .and_then(|p| p.get("description"))
                        .and_then(|d| d.as_str())
                });
            if let Some(desc) = desc {
                return Some(("pyproject.toml", desc.to_string()));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: usize = 40;

    #[test]
    fn test_empty_project_fails_with_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        let result = check_charter(dir.path(), MIN);
        assert!(!result.passed);
        assert!(result.sources.is_empty());
        assert_eq!(result.guidance.len(), 2);
        assert!(result.guidance[0].contains("No project intent documentation"));
    }

    #[test]
    fn test_charter_md_passes_when_long_enough() {
        let dir = tempfile::tempdir().unwrap();
        let text = "This project exists to keep the billing pipeline honest and observable.";
        std::fs::write(dir.path().join("CHARTER.md"), text).unwrap();
        let result = check_charter(dir.path(), MIN);
        assert!(result.passed);
        assert_eq!(result.sources[0].file, "CHARTER.md");
        assert!(result.guidance.is_empty());
    }

    #[test]
    fn test_exactly_min_length_is_sufficient() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CHARTER.md"), "x".repeat(MIN)).unwrap();
        let result = check_charter(dir.path(), MIN);
        assert!(result.passed);
        assert_eq!(result.sources[0].length, MIN);
    }

    #[test]
    fn test_short_sources_fail_with_too_short_guidance() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "tiny").unwrap();
        let result = check_charter(dir.path(), MIN);
        assert!(!result.passed);
        assert_eq!(result.sources.len(), 1);
        assert!(result.guidance[0].contains("too short"));
    }

    #[test]
    fn test_claude_md_charter_section_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let content = "# Repo\n\n## Project Charter\nKeep the ledger consistent under concurrent writers at all times.\n\n## Build\ncargo build\n";
        std::fs::write(dir.path().join("CLAUDE.md"), content).unwrap();
        let result = check_charter(dir.path(), MIN);
        let src = &result.sources[0];
        assert_eq!(src.file, "CLAUDE.md");
        // Only the section body counts, not the build notes below it.
        assert_eq!(
            src.length,
            "Keep the ledger consistent under concurrent writers at all times.".len()
        );
        assert!(result.passed);
    }

    #[test]
    fn test_claude_md_without_section_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CLAUDE.md"), "# Just build notes\n").unwrap();
        let result = check_charter(dir.path(), MIN);
        assert!(result.sources.is_empty());
    }

    #[test]
    fn test_package_json_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"x","description":"A queueing daemon that survives restarts without loss"}"#,
        )
        .unwrap();
        let result = check_charter(dir.path(), MIN);
        assert_eq!(result.sources[0].file, "package.json");
        assert!(result.passed);
    }

    #[test]
    fn test_package_json_wins_over_pyproject() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"description":"short"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\ndescription = \"this one is definitely long enough to pass the bar\"\n",
        )
        .unwrap();
        let result = check_charter(dir.path(), MIN);
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].file, "package.json");
        assert!(!result.passed);
    }

    #[test]
    fn test_mix_exs_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mix.exs"),
            "defmodule X.MixProject do\n  defp package do\n    [description: \"An OTP release that shepherds long-running jobs\"]\n  end\nend\n",
        )
        .unwrap();
        let result = check_charter(dir.path(), MIN);
        assert_eq!(result.sources[0].file, "mix.exs");
        assert!(result.passed);
    }

    #[test]
    fn test_pyproject_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\nname = \"x\"\ndescription = \"Static analysis for notebooks and their hidden state\"\n",
        )
        .unwrap();
        let result = check_charter(dir.path(), MIN);
        assert_eq!(result.sources[0].file, "pyproject.toml");
        assert!(result.passed);
    }

    #[test]
    fn test_multiple_sources_any_sufficient_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CHARTER.md"), "stub").unwrap();
        std::fs::write(
            dir.path().join("README.md"),
            "A long-form README that easily clears the minimum length bar for intent.",
        )
        .unwrap();
        let result = check_charter(dir.path(), MIN);
        assert!(result.passed);
        assert_eq!(result.sources.len(), 2);
        assert!(!result.sources[0].sufficient);
        assert!(result.sources[1].sufficient);
    }
}
