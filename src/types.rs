use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Operating mode — local pipeline or issue-driven GitHub flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Local,
    Github,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::Github => write!(f, "github"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "github" => Ok(Mode::Github),
            _ => Err(format!("unknown mode: {s}")),
        }
    }
}

/// Triage classification of a proposed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Feature,
    Bugfix,
    Security,
    Performance,
    Architecture,
    Testing,
    Documentation,
    Cosmetic,
    Organization,
    Other,
    Unknown,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Feature => "feature",
            ChangeType::Bugfix => "bugfix",
            ChangeType::Security => "security",
            ChangeType::Performance => "performance",
            ChangeType::Architecture => "architecture",
            ChangeType::Testing => "testing",
            ChangeType::Documentation => "documentation",
            ChangeType::Cosmetic => "cosmetic",
            ChangeType::Organization => "organization",
            ChangeType::Other => "other",
            ChangeType::Unknown => "unknown",
        }
    }

    /// Classifier output is free text; anything unrecognized maps to Other.
    pub fn parse_lenient(s: &str) -> ChangeType {
        match s.trim().to_lowercase().as_str() {
            "feature" => ChangeType::Feature,
            "bugfix" => ChangeType::Bugfix,
            "security" => ChangeType::Security,
            "performance" => ChangeType::Performance,
            "architecture" => ChangeType::Architecture,
            "testing" => ChangeType::Testing,
            "documentation" => ChangeType::Documentation,
            "cosmetic" => ChangeType::Cosmetic,
            "organization" => ChangeType::Organization,
            "unknown" => ChangeType::Unknown,
            _ => ChangeType::Other,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named shell command whose exit code decides pass/fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub name: String,
    pub command: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Outcome of one gate execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub name: String,
    pub command: String,
    pub passed: bool,
    pub required: bool,
    pub output: String,
    /// None when the runner failed to produce one (spawn error or kill).
    pub exit_code: Option<i32>,
}

/// Aggregate verdict over one gate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatesRunResult {
    pub all_passed: bool,
    pub required_passed: bool,
    pub results: Vec<GateResult>,
}

impl GatesRunResult {
    /// Aggregate individual results; empty input yields both flags true.
    pub fn from_results(results: Vec<GateResult>) -> Self {
        let all_passed = results.iter().all(|r| r.passed);
        let required_passed = results.iter().all(|r| !r.required || r.passed);
        Self {
            all_passed,
            required_passed,
            results,
        }
    }

    pub fn empty() -> Self {
        Self::from_results(vec![])
    }

    pub fn failed_required(&self) -> Vec<&GateResult> {
        self.results
            .iter()
            .filter(|r| r.required && !r.passed)
            .collect()
    }
}

/// Assessment decoded from assistant output, with safe defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAssessment {
    /// Always within [1, 5]; missing or non-numeric input defaults to 3.
    pub severity: i64,
    pub principle: String,
    pub category: String,
    pub prose: String,
    pub raw: String,
}

/// Verdict from the triage filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResult {
    pub accepted: bool,
    pub reason: String,
    pub severity: i64,
    pub change_type: ChangeType,
    pub busy_work: bool,
}

/// One charter documentation source found in the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharterSource {
    pub file: String,
    pub length: usize,
    pub sufficient: bool,
}

/// Result of the charter sufficiency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharterCheckResult {
    pub passed: bool,
    pub sources: Vec<CharterSource>,
    pub guidance: Vec<String>,
}

/// Final state of one local iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationResult {
    pub name: String,
    pub assessment: String,
    pub plan: String,
    pub execution: String,
    pub gates_result: GatesRunResult,
    pub retries: u32,
    pub success: bool,
    pub structured_assessment: Option<StructuredAssessment>,
    pub triage_result: Option<TriageResult>,
    pub charter_check: Option<CharterCheckResult>,
    pub skipped_reason: Option<String>,
}

/// Thumbs-up/down reaction tallies on an issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReactions {
    pub thumbs_up: Vec<String>,
    pub thumbs_down: Vec<String>,
}

/// An open proposal issue as fetched from the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoneIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub reactions: IssueReactions,
    pub created_at: DateTime<Utc>,
}

/// Proposal decoded from an issue body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoneProposal {
    pub name: String,
    pub assessment: String,
    pub plan: String,
    pub agent: String,
    pub severity: i64,
    pub principle: String,
}

/// Outcome of executing one approved issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub issue: u64,
    pub title: String,
    pub success: bool,
    pub retries: u32,
    pub commit: Option<String>,
}

/// Final state of one GitHub-mode run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubIterateResult {
    pub closed: Vec<u64>,
    pub executed: Vec<ExecutionOutcome>,
    pub proposed: Vec<u64>,
    pub skipped_triage: u32,
    pub charter_check: Option<CharterCheckResult>,
    pub success: bool,
}

/// One agent definition discovered in the agent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub name: String,
    pub path: PathBuf,
}

/// One grouped audit entry from the audit directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationEntry {
    pub name: String,
    pub date: DateTime<Utc>,
    pub files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gates_aggregate_empty() {
        let g = GatesRunResult::empty();
        assert!(g.all_passed);
        assert!(g.required_passed);
        assert!(g.results.is_empty());
    }

    #[test]
    fn test_gates_aggregate_optional_failure() {
        let g = GatesRunResult::from_results(vec![
            GateResult {
                name: "test".into(),
                command: "true".into(),
                passed: true,
                required: true,
                output: String::new(),
                exit_code: Some(0),
            },
            GateResult {
                name: "lint".into(),
                command: "false".into(),
                passed: false,
                required: false,
                output: String::new(),
                exit_code: Some(1),
            },
        ]);
        assert!(!g.all_passed);
        assert!(g.required_passed);
    }

    #[test]
    fn test_all_passed_implies_required_passed() {
        for (passed, required) in [(true, true), (true, false), (false, true), (false, false)] {
            let g = GatesRunResult::from_results(vec![GateResult {
                name: "g".into(),
                command: "c".into(),
                passed,
                required,
                output: String::new(),
                exit_code: Some(0),
            }]);
            if g.all_passed {
                assert!(g.required_passed);
            }
        }
    }

    #[test]
    fn test_change_type_lenient_parse() {
        assert_eq!(ChangeType::parse_lenient("bugfix"), ChangeType::Bugfix);
        assert_eq!(ChangeType::parse_lenient(" Security "), ChangeType::Security);
        assert_eq!(ChangeType::parse_lenient("nonsense"), ChangeType::Other);
        assert_eq!(ChangeType::parse_lenient("unknown"), ChangeType::Unknown);
    }

    #[test]
    fn test_gate_definition_required_defaults_true() {
        let g: GateDefinition =
            serde_json::from_str(r#"{"name":"test","command":"npm test"}"#).unwrap();
        assert!(g.required);
    }

    #[test]
    fn test_failed_required_filters() {
        let g = GatesRunResult::from_results(vec![
            GateResult {
                name: "a".into(),
                command: "false".into(),
                passed: false,
                required: true,
                output: String::new(),
                exit_code: Some(1),
            },
            GateResult {
                name: "b".into(),
                command: "false".into(),
                passed: false,
                required: false,
                output: String::new(),
                exit_code: Some(1),
            },
        ]);
        let failed: Vec<&str> = g.failed_required().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["a"]);
    }
}
