//! Assistant invocation: builds the CLI argument vector and runs it.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use crate::process::{self, RunRequest};

/// One assistant invocation: which persona, model, prompt, and whether the
/// call may mutate the project.
#[derive(Debug, Clone)]
pub struct AssistantRequest {
    pub agent: Option<String>,
    pub model: String,
    pub prompt: String,
    /// When set, the call is restricted to the given tool allowlist.
    pub read_only: bool,
    pub cwd: PathBuf,
}

/// Assistant call failed below the conversation level.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant exited with {code:?}: {stderr}")]
    NonZeroExit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// The injected seam for everything that talks to the assistant.
#[async_trait]
pub trait AssistantRunner: Send + Sync {
    async fn invoke(&self, req: &AssistantRequest) -> Result<String>;
}

/// Production runner shelling out to the assistant CLI.
pub struct ClaudeCli {
    command: String,
    read_only_tools: String,
}

impl ClaudeCli {
    pub fn new(command: impl Into<String>, read_only_tools: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            read_only_tools: read_only_tools.into(),
        }
    }

    /// Canonical argument order. Tests pattern-match on this sequence, so it
    /// is part of the external contract:
    /// `[--agent A]? --model M --print -p PROMPT [--allowedTools T]?
    /// --dangerously-skip-permissions`.
    pub fn build_argv(&self, req: &AssistantRequest) -> Vec<String> {
        let mut argv = vec![self.command.clone()];
        if let Some(agent) = req.agent.as_deref().filter(|a| !a.is_empty()) {
            argv.push("--agent".to_string());
            argv.push(agent.to_string());
        }
        argv.push("--model".to_string());
        argv.push(req.model.clone());
        argv.push("--print".to_string());
        argv.push("-p".to_string());
        argv.push(req.prompt.clone());
        if req.read_only {
            argv.push("--allowedTools".to_string());
            argv.push(self.read_only_tools.clone());
        }
        argv.push("--dangerously-skip-permissions".to_string());
        argv
    }
}

#[async_trait]
impl AssistantRunner for ClaudeCli {
    async fn invoke(&self, req: &AssistantRequest) -> Result<String> {
        let argv = self.build_argv(req);
        tracing::debug!(model = %req.model, read_only = req.read_only, "invoking assistant");
        let out = process::run(&RunRequest::new(argv, &req.cwd)).await?;
        if !out.succeeded() {
            return Err(AssistantError::NonZeroExit {
                code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
            }
            .into());
        }
        Ok(out.stdout.trim().to_string())
    }
}
