//! Local iteration engine: charter → gates/preflight → assess → name →
//! triage → plan → execute → verify, with a bounded retry inner loop.

use anyhow::Result;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agents;
use crate::assessment::{parse_assessment, sanitize_name};
use crate::assistant::{AssistantRequest, AssistantRunner, ClaudeCli};
use crate::audit;
use crate::charter::{CharterChecker, FsCharterChecker};
use crate::config::HoneConfig;
use crate::gates::{
    FileOrAgentResolver, GateExecutor, GateResolver, ShellGateExecutor,
};
use crate::triage::{SkepticalTriage, TriageFilter};
use crate::types::{GateDefinition, GatesRunResult, IterationResult};

/// Per-invocation switches layered on top of the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterateOptions {
    pub skip_gates: bool,
    pub skip_charter: bool,
    pub skip_triage: bool,
}

/// Result of the execute+verify sub-flow, shared with GitHub mode.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub execution: String,
    pub gates_result: GatesRunResult,
    pub retries: u32,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Stage prompts. The opening tokens are part of the externally observable
// contract: callers and test doubles dispatch on them.
// ---------------------------------------------------------------------------

pub fn assess_prompt(folder: &Path) -> String {
    format!(
        "Assess the project in {} against your principles. Identify the principle \
         that it is most violating, and describe how we should correct it.",
        folder.display()
    )
}

pub fn name_prompt(assessment: &str) -> String {
    format!(
        "Output ONLY a short kebab-case filename (lowercase letters, digits and \
         dashes, no extension, at most 50 characters) that summarizes this \
         assessment:\n\n{assessment}"
    )
}

pub fn plan_prompt(assessment: &str) -> String {
    format!(
        "Based on the following assessment, write a concrete step-by-step plan to \
         correct the most violated principle. Output the plan as markdown.\n\n\
         {assessment}"
    )
}

pub fn execute_prompt(folder: &Path, assessment: &str, plan: &str) -> String {
    format!(
        "Execute the following plan to improve the project in {}.\n\n\
         Why:\n{assessment}\n\nPlan:\n{plan}",
        folder.display()
    )
}

pub fn retry_prompt(plan: &str, gates_result: &GatesRunResult) -> String {
    let failed: Vec<String> = gates_result
        .failed_required()
        .iter()
        .map(|g| format!("### Gate: {}\n\n{}", g.name, g.output))
        .collect();
    format!(
        "The previous execution introduced quality gate failures. Fix the project \
         so that all required gates pass, staying within the intent of the original \
         plan.\n\n## Original Plan\n{plan}\n\n## Failed Gates\n{}",
        failed.join("\n\n")
    )
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct IterationEngine {
    config: HoneConfig,
    assistant: Arc<dyn AssistantRunner>,
    resolver: Arc<dyn GateResolver>,
    executor: Arc<dyn GateExecutor>,
    charter: Arc<dyn CharterChecker>,
    triage: Arc<dyn TriageFilter>,
    /// Under --json the result document owns stdout; progress moves to stderr.
    progress_to_stderr: bool,
}

impl IterationEngine {
    /// Production wiring: shell-backed collaborators built from config.
    pub fn new(config: HoneConfig) -> Self {
        let assistant: Arc<dyn AssistantRunner> = Arc::new(ClaudeCli::new(
            config.assistant_command.clone(),
            config.read_only_tools.clone(),
        ));
        let resolver: Arc<dyn GateResolver> = Arc::new(FileOrAgentResolver::new(
            assistant.clone(),
            config.models.gates.clone(),
            agents::default_agent_dir(),
        ));
        let executor: Arc<dyn GateExecutor> = Arc::new(ShellGateExecutor::new(
            Duration::from_millis(config.gate_timeout_ms),
        ));
        let charter: Arc<dyn CharterChecker> =
            Arc::new(FsCharterChecker::new(config.min_charter_length));
        let triage: Arc<dyn TriageFilter> = Arc::new(SkepticalTriage::new(
            assistant.clone(),
            config.models.triage.clone(),
            config.severity_threshold,
        ));
        Self {
            config,
            assistant,
            resolver,
            executor,
            charter,
            triage,
            progress_to_stderr: false,
        }
    }

    /// Test wiring: every collaborator injected.
    pub fn with_parts(
        config: HoneConfig,
        assistant: Arc<dyn AssistantRunner>,
        resolver: Arc<dyn GateResolver>,
        executor: Arc<dyn GateExecutor>,
        charter: Arc<dyn CharterChecker>,
        triage: Arc<dyn TriageFilter>,
    ) -> Self {
        Self {
            config,
            assistant,
            resolver,
            executor,
            charter,
            triage,
            progress_to_stderr: false,
        }
    }

    pub fn progress_to_stderr(mut self, enabled: bool) -> Self {
        self.progress_to_stderr = enabled;
        self
    }

    pub fn config(&self) -> &HoneConfig {
        &self.config
    }

    pub fn assistant(&self) -> &Arc<dyn AssistantRunner> {
        &self.assistant
    }

    pub fn triage_filter(&self) -> &Arc<dyn TriageFilter> {
        &self.triage
    }

    pub fn charter_checker(&self) -> &Arc<dyn CharterChecker> {
        &self.charter
    }

    pub async fn resolve_gates(&self, folder: &Path, agent: &str) -> Result<Vec<GateDefinition>> {
        self.resolver.resolve(folder, agent).await
    }

    fn progress(&self, msg: &str) {
        if self.progress_to_stderr {
            eprintln!("{msg}");
        } else {
            println!("{msg}");
        }
    }

    fn stage(&self, name: &str) {
        self.progress(&format!("{}", format!("========== {name} ==========").bold()));
    }

    async fn invoke(
        &self,
        agent: Option<&str>,
        model: &str,
        prompt: String,
        read_only: bool,
        cwd: &Path,
    ) -> Result<String> {
        self.assistant
            .invoke(&AssistantRequest {
                agent: agent.map(|a| a.to_string()),
                model: model.to_string(),
                prompt,
                read_only,
                cwd: cwd.to_path_buf(),
            })
            .await
    }

    /// Run one full local iteration.
    pub async fn iterate(
        &self,
        agent: &str,
        folder: &Path,
        opts: &IterateOptions,
    ) -> Result<IterationResult> {
        // Charter: intent documentation must exist before any assistant work.
        let mut charter_check = None;
        if !opts.skip_charter {
            self.stage("charter");
            let check = self.charter.check(folder)?;
            if !check.passed {
                for line in &check.guidance {
                    self.progress(&format!("  {}", line.yellow()));
                }
                return Ok(skipped_result(
                    String::new(),
                    String::new(),
                    Some(check),
                    None,
                    None,
                    "Charter check failed: project intent documentation is insufficient"
                        .to_string(),
                ));
            }
            charter_check = Some(check);
        }

        // Gates + preflight, before any assistant stage: a dirty baseline
        // means the iteration cannot be verified at all.
        let gates: Vec<GateDefinition> = if opts.skip_gates {
            vec![]
        } else {
            self.resolver.resolve(folder, agent).await?
        };
        if !gates.is_empty() {
            self.stage("preflight");
            let preflight = self.executor.run_gates(folder, &gates).await?;
            if !preflight.required_passed {
                for failed in preflight.failed_required() {
                    self.progress(&format!("  [{}] {}", "FAIL".red().bold(), failed.name));
                }
                return Ok(IterationResult {
                    name: String::new(),
                    assessment: String::new(),
                    plan: String::new(),
                    execution: String::new(),
                    gates_result: preflight,
                    retries: 0,
                    success: false,
                    structured_assessment: None,
                    triage_result: None,
                    charter_check,
                    skipped_reason: Some(
                        "Preflight failed: required gates failing before execution".to_string(),
                    ),
                });
            }
        }

        // Assess
        self.stage("assess");
        let assessment = self
            .invoke(
                Some(agent),
                &self.config.models.assess,
                assess_prompt(folder),
                true,
                folder,
            )
            .await?;
        let structured = parse_assessment(&assessment);
        self.progress(&format!(
            "  severity {} | {}",
            structured.severity, structured.principle
        ));

        // Name
        self.stage("name");
        let name_response = self
            .invoke(
                None,
                &self.config.models.name,
                name_prompt(&assessment),
                true,
                folder,
            )
            .await?;
        let name = sanitize_name(&name_response);
        self.progress(&format!("  {name}"));

        // Triage
        let mut triage_result = None;
        if !opts.skip_triage {
            self.stage("triage");
            let verdict = self.triage.triage(&structured, folder).await?;
            if !verdict.accepted {
                self.progress(&format!("  [{}] {}", "SKIP".yellow().bold(), verdict.reason));
                let reason = verdict.reason.clone();
                return Ok(skipped_result(
                    name,
                    assessment,
                    charter_check,
                    Some(structured),
                    Some(verdict),
                    reason,
                ));
            }
            self.progress(&format!("  [{}] {}", "OK".green().bold(), verdict.change_type));
            triage_result = Some(verdict);
        }

        // Persist the assessment, then plan.
        let audit_dir = audit::ensure_audit_dir(folder, &self.config.audit_dir)?;
        audit::save_stage_output(&audit_dir, &name, "", &assessment)?;

        self.stage("plan");
        let plan = self
            .invoke(
                Some(agent),
                &self.config.models.plan,
                plan_prompt(&assessment),
                true,
                folder,
            )
            .await?;
        audit::save_stage_output(&audit_dir, &name, "plan", &plan)?;

        // Execute + verify
        let outcome = self
            .execute_and_verify(Some(agent), folder, &audit_dir, &name, &assessment, &plan, &gates)
            .await?;

        Ok(IterationResult {
            name,
            assessment,
            plan,
            execution: outcome.execution,
            gates_result: outcome.gates_result,
            retries: outcome.retries,
            success: outcome.success,
            structured_assessment: Some(structured),
            triage_result,
            charter_check,
            skipped_reason: None,
        })
    }

    /// Execute a plan, then verify it against the gates with bounded retries.
    /// GitHub mode reuses this with the plan and assessment decoded from an
    /// approved issue.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_and_verify(
        &self,
        agent: Option<&str>,
        folder: &Path,
        audit_dir: &Path,
        name: &str,
        assessment: &str,
        plan: &str,
        gates: &[GateDefinition],
    ) -> Result<ExecuteOutcome> {
        self.stage("execute");
        let execution = self
            .invoke(
                agent,
                &self.config.models.execute,
                execute_prompt(folder, assessment, plan),
                false,
                folder,
            )
            .await?;
        audit::save_stage_output(audit_dir, name, "actions", &execution)?;

        if gates.is_empty() {
            return Ok(ExecuteOutcome {
                execution,
                gates_result: GatesRunResult::empty(),
                retries: 0,
                success: true,
            });
        }

        self.stage("verify");
        let mut gates_result = self.executor.run_gates(folder, gates).await?;
        self.report_gates(&gates_result);

        let mut retries = 0u32;
        while !gates_result.required_passed && retries < self.config.max_retries {
            retries += 1;
            self.stage(&format!("retry {retries}/{}", self.config.max_retries));
            let retry_output = self
                .invoke(
                    agent,
                    &self.config.models.execute,
                    retry_prompt(plan, &gates_result),
                    false,
                    folder,
                )
                .await?;
            audit::save_stage_output(
                audit_dir,
                name,
                &format!("retry-{retries}-actions"),
                &retry_output,
            )?;
            gates_result = self.executor.run_gates(folder, gates).await?;
            self.report_gates(&gates_result);
        }

        let success = gates_result.required_passed;
        Ok(ExecuteOutcome {
            execution,
            gates_result,
            retries,
            success,
        })
    }

    fn report_gates(&self, result: &GatesRunResult) {
        for gate in &result.results {
            let status = if gate.passed {
                "PASS".green().bold()
            } else {
                "FAIL".red().bold()
            };
            self.progress(&format!("  [{status}] {}", gate.name));
        }
    }
}

fn skipped_result(
    name: String,
    assessment: String,
    charter_check: Option<crate::types::CharterCheckResult>,
    structured_assessment: Option<crate::types::StructuredAssessment>,
    triage_result: Option<crate::types::TriageResult>,
    reason: String,
) -> IterationResult {
    IterationResult {
        name,
        assessment,
        plan: String::new(),
        execution: String::new(),
        gates_result: GatesRunResult::empty(),
        retries: 0,
        success: true,
        structured_assessment,
        triage_result,
        charter_check,
        skipped_reason: Some(reason),
    }
}
