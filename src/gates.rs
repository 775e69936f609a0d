//! Quality gates: resolution and execution.
//!
//! Gates come from (in priority order) the on-disk override file, assistant
//! extraction from the agent definition, or nowhere at all. Execution runs
//! each command through `sh -c` under the configured timeout.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agents;
use crate::assistant::{AssistantRequest, AssistantRunner};
use crate::extract::extract_json_array;
use crate::process::{self, RunRequest};
use crate::types::{GateDefinition, GateResult, GatesRunResult};

pub const GATES_OVERRIDE_FILE: &str = ".hone-gates.json";
const MAX_OUTPUT_LINES: usize = 200;

/// The injected seam for gate resolution.
#[async_trait]
pub trait GateResolver: Send + Sync {
    async fn resolve(&self, project: &Path, agent: &str) -> Result<Vec<GateDefinition>>;
}

/// The injected seam for gate execution.
#[async_trait]
pub trait GateExecutor: Send + Sync {
    async fn run_gates(&self, project: &Path, gates: &[GateDefinition]) -> Result<GatesRunResult>;
}

#[derive(Debug, Deserialize)]
struct GatesFile {
    gates: Vec<GateDefinition>,
}

/// Read the override file. Parse and filesystem errors fall through to the
/// next resolution step rather than raising.
pub fn read_gates_override(project: &Path) -> Option<Vec<GateDefinition>> {
    let content = std::fs::read_to_string(project.join(GATES_OVERRIDE_FILE)).ok()?;
    match serde_json::from_str::<GatesFile>(&content) {
        Ok(file) => Some(file.gates),
        Err(e) => {
            tracing::warn!("ignoring malformed {GATES_OVERRIDE_FILE}: {e}");
            None
        }
    }
}

/// Build the extraction prompt sent when no override file exists.
pub fn extraction_prompt(agent_text: &str) -> String {
    format!(
        "Extract the quality gates this agent definition implies for its projects. \
         Respond with ONLY a strict JSON array, no prose, of objects shaped \
         {{\"name\": string, \"command\": string, \"required\": boolean}}. \
         Commands must be runnable shell commands.\n\n\
         Agent definition:\n{agent_text}"
    )
}

/// Decode extracted gates. Entries lacking both a name and a command are
/// dropped; `required` defaults to true.
pub fn parse_extracted_gates(response: &str) -> Vec<GateDefinition> {
    let Some(found) = extract_json_array(response) else {
        return vec![];
    };
    let Some(items) = found.value.as_array() else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let command = item.get("command").and_then(|v| v.as_str()).unwrap_or("");
            if name.is_empty() && command.is_empty() {
                return None;
            }
            Some(GateDefinition {
                name: name.to_string(),
                command: command.to_string(),
                required: item.get("required").and_then(|v| v.as_bool()).unwrap_or(true),
            })
        })
        .collect()
}

/// Production resolver: override file, then assistant extraction, else empty.
pub struct FileOrAgentResolver {
    assistant: Arc<dyn AssistantRunner>,
    model: String,
    agent_dir: PathBuf,
}

impl FileOrAgentResolver {
    pub fn new(assistant: Arc<dyn AssistantRunner>, model: impl Into<String>, agent_dir: PathBuf) -> Self {
        Self {
            assistant,
            model: model.into(),
            agent_dir,
        }
    }
}

#[async_trait]
impl GateResolver for FileOrAgentResolver {
    async fn resolve(&self, project: &Path, agent: &str) -> Result<Vec<GateDefinition>> {
        if let Some(gates) = read_gates_override(project) {
            return Ok(gates);
        }

        let Some(info) = agents::find_agent(&self.agent_dir, agent)? else {
            return Ok(vec![]);
        };
        let agent_text = agents::read_agent(&info)?;

        let response = self
            .assistant
            .invoke(&AssistantRequest {
                agent: None,
                model: self.model.clone(),
                prompt: extraction_prompt(&agent_text),
                read_only: true,
                cwd: project.to_path_buf(),
            })
            .await?;

        Ok(parse_extracted_gates(&response))
    }
}

/// Keep the last `MAX_OUTPUT_LINES` lines — the error tail is what retry
/// prompts need — and note how many were dropped.
pub fn truncate_output(output: &str) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() <= MAX_OUTPUT_LINES {
        return output.to_string();
    }
    let dropped = lines.len() - MAX_OUTPUT_LINES;
    let tail = lines[dropped..].join("\n");
    format!("... ({dropped} lines truncated)\n{tail}")
}

/// Production executor: sequential `sh -c` runs under a shared timeout.
pub struct ShellGateExecutor {
    timeout: Duration,
}

impl ShellGateExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl GateExecutor for ShellGateExecutor {
    async fn run_gates(&self, project: &Path, gates: &[GateDefinition]) -> Result<GatesRunResult> {
        let mut results = Vec::with_capacity(gates.len());
        for gate in gates {
            let req = RunRequest::new(
                vec!["sh".to_string(), "-c".to_string(), gate.command.clone()],
                project,
            )
            .with_timeout(self.timeout);

            let result = match process::run(&req).await {
                Ok(out) => GateResult {
                    name: gate.name.clone(),
                    command: gate.command.clone(),
                    passed: out.exit_code == Some(0),
                    required: gate.required,
                    output: truncate_output(&format!("{}{}", out.stdout, out.stderr)),
                    exit_code: out.exit_code,
                },
                // Spawn failures count as failed gates, not fatal errors.
                Err(e) => GateResult {
                    name: gate.name.clone(),
                    command: gate.command.clone(),
                    passed: false,
                    required: gate.required,
                    output: format!("failed to run gate: {e}"),
                    exit_code: None,
                },
            };
            tracing::debug!(gate = %result.name, passed = result.passed, "gate finished");
            results.push(result);
        }
        Ok(GatesRunResult::from_results(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedAssistant {
        response: String,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl AssistantRunner for CannedAssistant {
        async fn invoke(&self, req: &AssistantRequest) -> Result<String> {
            assert!(req.read_only);
            *self.calls.lock().unwrap() += 1;
            Ok(self.response.clone())
        }
    }

    fn canned(response: &str) -> Arc<CannedAssistant> {
        Arc::new(CannedAssistant {
            response: response.to_string(),
            calls: Mutex::new(0),
        })
    }

    #[test]
    fn test_override_file_parses_and_defaults_required() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GATES_OVERRIDE_FILE),
            r#"{"gates": [{"name": "test", "command": "npm test"}, {"name": "lint", "command": "npm run lint", "required": false}]}"#,
        )
        .unwrap();
        let gates = read_gates_override(dir.path()).unwrap();
        assert_eq!(gates.len(), 2);
        assert!(gates[0].required);
        assert!(!gates[1].required);
    }

    #[test]
    fn test_malformed_override_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(GATES_OVERRIDE_FILE), "{oops").unwrap();
        assert!(read_gates_override(dir.path()).is_none());
        assert!(read_gates_override(Path::new("/nonexistent")).is_none());
    }

    #[test]
    fn test_parse_extracted_gates_filters_empty_entries() {
        let response = r#"```json
[{"name": "test", "command": "cargo test"},
 {"note": "no name or command"},
 {"name": "lint", "command": "cargo clippy", "required": false}]
```"#;
        let gates = parse_extracted_gates(response);
        assert_eq!(gates.len(), 2);
        assert_eq!(gates[0].name, "test");
        assert!(gates[0].required);
        assert!(!gates[1].required);
    }

    #[test]
    fn test_parse_extracted_gates_garbage_is_empty() {
        assert!(parse_extracted_gates("no array anywhere").is_empty());
    }

    #[tokio::test]
    async fn test_resolver_prefers_override_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GATES_OVERRIDE_FILE),
            r#"{"gates": [{"name": "test", "command": "true"}]}"#,
        )
        .unwrap();
        let assistant = canned("[]");
        let resolver = FileOrAgentResolver::new(
            assistant.clone(),
            "haiku",
            dir.path().join("no-agents-here"),
        );
        let gates = resolver.resolve(dir.path(), "whoever").await.unwrap();
        assert_eq!(gates.len(), 1);
        assert_eq!(*assistant.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolver_extracts_from_agent_when_no_override() {
        let project = tempfile::tempdir().unwrap();
        let agent_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            agent_dir.path().join("quality.md"),
            "# Quality agent\nAlways run the test suite.",
        )
        .unwrap();
        let assistant = canned(r#"[{"name": "test", "command": "cargo test", "required": true}]"#);
        let resolver =
            FileOrAgentResolver::new(assistant.clone(), "haiku", agent_dir.path().to_path_buf());
        let gates = resolver.resolve(project.path(), "quality").await.unwrap();
        assert_eq!(gates.len(), 1);
        assert_eq!(gates[0].command, "cargo test");
        assert_eq!(*assistant.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolver_unknown_agent_yields_empty() {
        let project = tempfile::tempdir().unwrap();
        let agent_dir = tempfile::tempdir().unwrap();
        let assistant = canned("[]");
        let resolver =
            FileOrAgentResolver::new(assistant.clone(), "haiku", agent_dir.path().to_path_buf());
        let gates = resolver.resolve(project.path(), "ghost").await.unwrap();
        assert!(gates.is_empty());
        assert_eq!(*assistant.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_truncate_keeps_last_lines() {
        let input: String = (1..=250)
            .map(|i| format!("line {i}\n"))
            .collect();
        let out = truncate_output(&input);
        assert!(out.starts_with("... (51 lines truncated)\n"));
        assert!(out.contains("line 250"));
        assert!(!out.contains("line 50\n"));
        // The tail keeps the error end, not the beginning.
        assert!(out.contains("line 249"));
    }

    #[test]
    fn test_truncate_short_output_untouched() {
        let input = "a\nb\nc";
        assert_eq!(truncate_output(input), input);
    }

    fn gate(name: &str, command: &str, required: bool) -> GateDefinition {
        GateDefinition {
            name: name.to_string(),
            command: command.to_string(),
            required,
        }
    }

    #[tokio::test]
    async fn test_executor_classifies_pass_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellGateExecutor::new(Duration::from_secs(10));
        let result = executor
            .run_gates(
                dir.path(),
                &[
                    gate("ok", "echo passing", true),
                    gate("bad", "echo failing; exit 2", true),
                ],
            )
            .await
            .unwrap();
        assert!(!result.all_passed);
        assert!(!result.required_passed);
        assert_eq!(result.results[0].exit_code, Some(0));
        assert!(result.results[0].passed);
        assert_eq!(result.results[1].exit_code, Some(2));
        assert!(result.results[1].output.contains("failing"));
    }

    #[tokio::test]
    async fn test_executor_preserves_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellGateExecutor::new(Duration::from_secs(10));
        let result = executor
            .run_gates(
                dir.path(),
                &[gate("b", "true", true), gate("a", "true", true)],
            )
            .await
            .unwrap();
        let names: Vec<&str> = result.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_executor_timeout_is_a_failed_gate() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellGateExecutor::new(Duration::from_millis(200));
        let result = executor
            .run_gates(dir.path(), &[gate("slow", "sleep 30", true)])
            .await
            .unwrap();
        assert!(!result.results[0].passed);
        assert_eq!(result.results[0].exit_code, None);
        assert!(!result.required_passed);
    }

    #[tokio::test]
    async fn test_executor_empty_gates_all_pass() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellGateExecutor::new(Duration::from_secs(1));
        let result = executor.run_gates(dir.path(), &[]).await.unwrap();
        assert!(result.all_passed);
        assert!(result.required_passed);
    }
}
