//! Triage: severity threshold plus a skeptical busy-work classifier.
//!
//! The classifier is an LLM and therefore flaky; a verdict that fails to
//! parse must never block substantive work, so parse failures fail open.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::assistant::{AssistantRequest, AssistantRunner};
use crate::extract::extract_json;
use crate::types::{ChangeType, StructuredAssessment, TriageResult};

/// The injected seam for the triage filter.
#[async_trait]
pub trait TriageFilter: Send + Sync {
    async fn triage(
        &self,
        assessment: &StructuredAssessment,
        project: &Path,
    ) -> Result<TriageResult>;
}

/// Production filter: pure threshold check, then one read-only assistant
/// call with the skeptical prompt.
pub struct SkepticalTriage {
    assistant: Arc<dyn AssistantRunner>,
    model: String,
    severity_threshold: i64,
}

impl SkepticalTriage {
    pub fn new(
        assistant: Arc<dyn AssistantRunner>,
        model: impl Into<String>,
        severity_threshold: i64,
    ) -> Self {
        Self {
            assistant,
            model: model.into(),
            severity_threshold,
        }
    }
}

/// Build the busy-work classifier prompt. The opening tokens are an external
/// contract; test doubles dispatch on them.
pub fn busy_work_prompt(assessment: &StructuredAssessment) -> String {
    format!(
        "You are a skeptical engineering manager reviewing a proposed improvement. \
         Decide whether it is busy-work: churn that looks like progress but does not \
         materially improve the project.\n\n\
         Principle cited: {principle}\n\n\
         Assessment:\n{prose}\n\n\
         Busy-work signals: pure renames or file moves, cosmetic reformatting, \
         speculative abstraction with a single caller, rewriting working code in a \
         different style, documentation tweaks on code that is about to change, \
         reorganizing folders without behavioral benefit.\n\n\
         Respond with JSON only:\n\
         {{\"changeType\": \"feature|bugfix|security|performance|architecture|testing|documentation|cosmetic|organization|other\", \
         \"busyWork\": true|false, \"reason\": \"one sentence\"}}",
        principle = assessment.principle,
        prose = assessment.prose,
    )
}

#[async_trait]
impl TriageFilter for SkepticalTriage {
    async fn triage(
        &self,
        assessment: &StructuredAssessment,
        project: &Path,
    ) -> Result<TriageResult> {
        let severity = assessment.severity;

        // Pure short-circuit: below-threshold proposals never reach the LLM.
        if severity < self.severity_threshold {
            return Ok(TriageResult {
                accepted: false,
                reason: format!(
                    "Severity {severity} is below threshold {}",
                    self.severity_threshold
                ),
                severity,
                change_type: ChangeType::Unknown,
                busy_work: false,
            });
        }

        let response = self
            .assistant
            .invoke(&AssistantRequest {
                agent: None,
                model: self.model.clone(),
                prompt: busy_work_prompt(assessment),
                read_only: true,
                cwd: project.to_path_buf(),
            })
            .await?;

        Ok(classify(severity, &response))
    }
}

/// Decode the classifier verdict; anything unparseable fails open.
pub fn classify(severity: i64, response: &str) -> TriageResult {
    let (change_type, busy_work, reason) = match extract_json(response) {
        Some(found) => {
            let change_type = found
                .value
                .get("changeType")
                .and_then(|v| v.as_str())
                .map(ChangeType::parse_lenient)
                .unwrap_or(ChangeType::Other);
            let busy_work = found
                .value
                .get("busyWork")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let reason = found
                .value
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            (change_type, busy_work, reason)
        }
        None => {
            tracing::warn!("triage verdict did not parse; failing open");
            (ChangeType::Other, false, String::new())
        }
    };

    if busy_work {
        TriageResult {
            accepted: false,
            reason: format!("Busy-work: {reason}"),
            severity,
            change_type,
            busy_work: true,
        }
    } else {
        TriageResult {
            accepted: true,
            reason,
            severity,
            change_type,
            busy_work: false,
        }
    }
}
