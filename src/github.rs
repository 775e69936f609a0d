//! GitHub mode: proposals as issues, approval by reaction.
//!
//! The gateway wraps the `gh` and `git` CLIs; the engine runs three phases
//! strictly in order — close rejected, execute approved, propose new — and
//! a failure in an earlier phase never blocks a later one.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;

use crate::assessment::{parse_assessment, sanitize_name};
use crate::assistant::AssistantRequest;
use crate::audit;
use crate::engine::{assess_prompt, name_prompt, plan_prompt, IterateOptions, IterationEngine};
use crate::process::{self, RunRequest};
use crate::types::{
    ExecutionOutcome, GitHubIterateResult, HoneIssue, HoneProposal, IssueReactions,
};

pub const HONE_LABEL: &str = "hone";
const METADATA_MARKER: &str = "<!-- hone-metadata";
const GATE_COMMENT_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Issue body codec
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize, Deserialize)]
struct IssueMetadata {
    agent: String,
    severity: i64,
    principle: String,
    name: String,
}

/// Encode a proposal into an issue body carrying both machine metadata and
/// a human-readable summary.
pub fn format_issue_body(p: &HoneProposal) -> String {
    let metadata = serde_json::json!({
        "agent": p.agent,
        "severity": p.severity,
        "principle": p.principle,
        "name": p.name,
    });
    format!(
        "{METADATA_MARKER}\n{metadata}\n-->\n\n\
         **Agent:** {agent}\n\
         **Severity:** {severity}/5\n\
         **Principle:** {principle}\n\n\
         ## Assessment\n\n{assessment}\n\n\
         ## Plan\n\n{plan}\n",
        agent = p.agent,
        severity = p.severity,
        principle = p.principle,
        assessment = p.assessment,
        plan = p.plan,
    )
}

/// Decode a proposal from an issue body. Any parse failure yields None;
/// undecodable issues are skipped, never fatal.
pub fn parse_issue_body(body: &str) -> Option<HoneProposal> {
    let start = body.find(METADATA_MARKER)?;
    let after_marker = &body[start + METADATA_MARKER.len()..];
    let end = after_marker.find("-->")?;
    let metadata: IssueMetadata = serde_json::from_str(after_marker[..end].trim()).ok()?;

    let assessment_start = body.find("## Assessment")?;
    let plan_start = body.find("## Plan")?;
    if plan_start < assessment_start {
        return None;
    }
    let assessment = body[assessment_start + "## Assessment".len()..plan_start].trim();
    let plan = body[plan_start + "## Plan".len()..].trim();

    Some(HoneProposal {
        name: metadata.name,
        assessment: assessment.to_string(),
        plan: plan.to_string(),
        agent: metadata.agent,
        severity: metadata.severity,
        principle: metadata.principle,
    })
}

// ---------------------------------------------------------------------------
// Host gateway
// ---------------------------------------------------------------------------

/// The injected seam for everything that talks to the VCS host and git.
#[async_trait]
pub trait HostGateway: Send + Sync {
    async fn owner(&self) -> Result<String>;
    async fn list_open_issues(&self) -> Result<Vec<HoneIssue>>;
    /// Failures degrade to empty reaction lists rather than erroring.
    async fn fetch_reactions(&self, number: u64) -> IssueReactions;
    async fn create_issue(&self, title: &str, body: &str) -> Result<u64>;
    async fn close_issue(&self, number: u64, comment: &str) -> Result<()>;
    /// Idempotent: an already-existing label is not an error.
    async fn ensure_label(&self);
    /// Stage everything, commit, and return the commit hash.
    async fn commit_all(&self, message: &str) -> Result<String>;
}

/// Production gateway shelling out to `gh` and `git`.
pub struct GhCli {
    cwd: PathBuf,
}

impl GhCli {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }

    async fn gh(&self, args: &[&str]) -> Result<String> {
        let mut argv = vec!["gh".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let out = process::run(&RunRequest::new(argv, &self.cwd)).await?;
        if !out.succeeded() {
            bail!("gh {} failed: {}", args.join(" "), out.stderr.trim());
        }
        Ok(out.stdout)
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let out = process::run(&RunRequest::new(argv, &self.cwd)).await?;
        if !out.succeeded() {
            bail!("git {} failed: {}", args.join(" "), out.stderr.trim());
        }
        Ok(out.stdout)
    }

    async fn repo_slug(&self) -> Result<String> {
        let out = self
            .gh(&["repo", "view", "--json", "nameWithOwner", "--jq", ".nameWithOwner"])
            .await?;
        Ok(out.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: String,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct GhReaction {
    user: String,
    content: String,
}

fn issue_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/issues/(\d+)").unwrap())
}

#[async_trait]
impl HostGateway for GhCli {
    async fn owner(&self) -> Result<String> {
        let out = self
            .gh(&["repo", "view", "--json", "owner", "--jq", ".owner.login"])
            .await?;
        Ok(out.trim().to_string())
    }

    async fn list_open_issues(&self) -> Result<Vec<HoneIssue>> {
        let out = self
            .gh(&[
                "issue",
                "list",
                "--label",
                HONE_LABEL,
                "--state",
                "open",
                "--json",
                "number,title,body,createdAt",
                "--limit",
                "100",
            ])
            .await?;
        let issues: Vec<GhIssue> =
            serde_json::from_str(out.trim()).context("parsing gh issue list output")?;
        Ok(issues
            .into_iter()
            .map(|i| HoneIssue {
                number: i.number,
                title: i.title,
                body: i.body,
                reactions: IssueReactions::default(),
                created_at: i.created_at,
            })
            .collect())
    }

    async fn fetch_reactions(&self, number: u64) -> IssueReactions {
        let mut reactions = IssueReactions::default();
        let slug = match self.repo_slug().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("reaction fetch skipped, no repo slug: {e}");
                return reactions;
            }
        };
        let out = match self
            .gh(&[
                "api",
                &format!("repos/{slug}/issues/{number}/reactions"),
                "--jq",
                ".[] | {user:.user.login, content:.content}",
            ])
            .await
        {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!("reaction fetch failed for issue {number}: {e}");
                return reactions;
            }
        };
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(reaction) = serde_json::from_str::<GhReaction>(line) else {
                continue;
            };
            match reaction.content.as_str() {
                "+1" => reactions.thumbs_up.push(reaction.user),
                "-1" => reactions.thumbs_down.push(reaction.user),
                _ => {}
            }
        }
        reactions
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<u64> {
        let out = self
            .gh(&[
                "issue", "create", "--title", title, "--body", body, "--label", HONE_LABEL,
            ])
            .await?;
        let caps = issue_number_re()
            .captures(&out)
            .context("no issue number in gh issue create output")?;
        caps[1].parse().context("parsing issue number")
    }

    async fn close_issue(&self, number: u64, comment: &str) -> Result<()> {
        self.gh(&["issue", "close", &number.to_string(), "--comment", comment])
            .await?;
        Ok(())
    }

    async fn ensure_label(&self) {
        if let Err(e) = self
            .gh(&[
                "label",
                "create",
                HONE_LABEL,
                "--description",
                "Hone improvement proposal",
                "--color",
                "0e8a16",
            ])
            .await
        {
            tracing::debug!("label create skipped (probably exists): {e}");
        }
    }

    async fn commit_all(&self, message: &str) -> Result<String> {
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "-m", message]).await?;
        let hash = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// GitHub iteration engine
// ---------------------------------------------------------------------------

pub struct GitHubEngine {
    engine: IterationEngine,
    gateway: Arc<dyn HostGateway>,
}

impl GitHubEngine {
    pub fn new(engine: IterationEngine, gateway: Arc<dyn HostGateway>) -> Self {
        Self { engine, gateway }
    }

    /// Run the three-phase flow: close rejected, execute approved, propose
    /// new. Proposals require a passing charter; the earlier phases run
    /// regardless.
    pub async fn iterate(
        &self,
        agent: &str,
        folder: &Path,
        proposals: u32,
        opts: &IterateOptions,
    ) -> Result<GitHubIterateResult> {
        let config = self.engine.config().clone();

        // Phase 0: charter gating for proposals.
        let mut charter_check = None;
        let mut charter_ok = true;
        if !opts.skip_charter {
            let check = self.engine.charter_checker().check(folder)?;
            charter_ok = check.passed;
            charter_check = Some(check);
        }

        let owner = self.gateway.owner().await?;
        let mut issues = self.gateway.list_open_issues().await?;

        // Phase 1: close anything the owner has thumbed down.
        let mut closed = Vec::new();
        for issue in &mut issues {
            let reactions = self.gateway.fetch_reactions(issue.number).await;
            if reactions.thumbs_down.iter().any(|u| u == &owner) {
                if let Err(e) = self
                    .gateway
                    .close_issue(
                        issue.number,
                        "Closed: rejected by product owner (thumbs-down reaction).",
                    )
                    .await
                {
                    tracing::error!("closing rejected issue #{}: {e}", issue.number);
                    continue;
                }
                closed.push(issue.number);
            } else {
                issue.reactions = reactions;
            }
        }

        // Phase 2: execute approved issues, oldest first.
        let gates = if opts.skip_gates {
            vec![]
        } else {
            self.engine.resolve_gates(folder, agent).await?
        };

        let mut approved: Vec<&HoneIssue> = issues
            .iter()
            .filter(|i| !closed.contains(&i.number))
            .filter(|i| i.reactions.thumbs_up.iter().any(|u| u == &owner))
            .collect();
        approved.sort_by_key(|i| i.created_at);

        let mut executed = Vec::new();
        for issue in approved {
            let Some(proposal) = parse_issue_body(&issue.body) else {
                tracing::warn!("issue #{} has no decodable proposal, skipping", issue.number);
                continue;
            };
            match self
                .execute_approved(folder, issue, &proposal, &gates, &config.audit_dir)
                .await
            {
                Ok(outcome) => executed.push(outcome),
                Err(e) => {
                    tracing::error!("executing issue #{}: {e}", issue.number);
                }
            }
        }

        // Phase 3: propose new work.
        let mut proposed = Vec::new();
        let mut skipped_triage = 0u32;
        if proposals > 0 && charter_ok {
            self.gateway.ensure_label().await;
            for _ in 0..proposals {
                match self.propose(agent, folder, opts).await? {
                    ProposeOutcome::Created(number) => proposed.push(number),
                    ProposeOutcome::TriageRejected => skipped_triage += 1,
                }
            }
        } else if proposals > 0 {
            tracing::error!("charter check failed; no proposals will be created");
        }

        let success = executed.iter().all(|o| o.success) && (proposals == 0 || charter_ok);
        Ok(GitHubIterateResult {
            closed,
            executed,
            proposed,
            skipped_triage,
            charter_check,
            success,
        })
    }

    async fn execute_approved(
        &self,
        folder: &Path,
        issue: &HoneIssue,
        proposal: &HoneProposal,
        gates: &[crate::types::GateDefinition],
        audit_dir_name: &str,
    ) -> Result<ExecutionOutcome> {
        let audit_dir = audit::ensure_audit_dir(folder, audit_dir_name)?;
        let outcome = self
            .engine
            .execute_and_verify(
                Some(&proposal.agent),
                folder,
                &audit_dir,
                &proposal.name,
                &proposal.assessment,
                &proposal.plan,
                gates,
            )
            .await?;

        if outcome.success {
            let message = format!("[Hone] {} (#{})", issue.title, issue.number);
            let hash = self.gateway.commit_all(&message).await?;
            self.gateway
                .close_issue(
                    issue.number,
                    &format!("Completed successfully.\n\nCommit: {hash}"),
                )
                .await?;
            Ok(ExecutionOutcome {
                issue: issue.number,
                title: issue.title.clone(),
                success: true,
                retries: outcome.retries,
                commit: Some(hash),
            })
        } else {
            let gate_outputs: Vec<String> = outcome
                .gates_result
                .failed_required()
                .iter()
                .map(|g| {
                    let end = g
                        .output
                        .char_indices()
                        .nth(GATE_COMMENT_LIMIT)
                        .map(|(i, _)| i)
                        .unwrap_or(g.output.len());
                    format!("### Gate: {}\n{}", g.name, &g.output[..end])
                })
                .collect();
            self.gateway
                .close_issue(
                    issue.number,
                    &format!(
                        "Failed: quality gates did not pass after {} retries.\n\n{}",
                        outcome.retries,
                        gate_outputs.join("\n\n")
                    ),
                )
                .await?;
            Ok(ExecutionOutcome {
                issue: issue.number,
                title: issue.title.clone(),
                success: false,
                retries: outcome.retries,
                commit: None,
            })
        }
    }

    async fn propose(
        &self,
        agent: &str,
        folder: &Path,
        opts: &IterateOptions,
    ) -> Result<ProposeOutcome> {
        let config = self.engine.config();

        let assessment = self
            .engine
            .assistant()
            .invoke(&AssistantRequest {
                agent: Some(agent.to_string()),
                model: config.models.assess.clone(),
                prompt: assess_prompt(folder),
                read_only: true,
                cwd: folder.to_path_buf(),
            })
            .await?;
        let structured = parse_assessment(&assessment);

        let name_response = self
            .engine
            .assistant()
            .invoke(&AssistantRequest {
                agent: None,
                model: config.models.name.clone(),
                prompt: name_prompt(&assessment),
                read_only: true,
                cwd: folder.to_path_buf(),
            })
            .await?;
        let name = sanitize_name(&name_response);

        let audit_dir = audit::ensure_audit_dir(folder, &config.audit_dir)?;
        audit::save_stage_output(&audit_dir, &name, "", &assessment)?;

        if !opts.skip_triage {
            let verdict = self.engine.triage_filter().triage(&structured, folder).await?;
            if !verdict.accepted {
                tracing::info!("proposal skipped by triage: {}", verdict.reason);
                return Ok(ProposeOutcome::TriageRejected);
            }
        }

        let plan = self
            .engine
            .assistant()
            .invoke(&AssistantRequest {
                agent: Some(agent.to_string()),
                model: config.models.plan.clone(),
                prompt: plan_prompt(&assessment),
                read_only: true,
                cwd: folder.to_path_buf(),
            })
            .await?;
        audit::save_stage_output(&audit_dir, &name, "plan", &plan)?;

        let proposal = HoneProposal {
            name: name.clone(),
            assessment: structured.prose.clone(),
            plan,
            agent: agent.to_string(),
            severity: structured.severity,
            principle: structured.principle.clone(),
        };
        let title = format!("[Hone] {name}");
        let number = self
            .gateway
            .create_issue(&title, &format_issue_body(&proposal))
            .await?;
        Ok(ProposeOutcome::Created(number))
    }
}

enum ProposeOutcome {
    Created(u64),
    TriageRejected,
}
