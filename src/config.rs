//! Configuration: compiled defaults, user config file, CLI flag overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Mode;

/// Model assignment per pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageModels {
    pub assess: String,
    pub name: String,
    pub plan: String,
    pub execute: String,
    pub gates: String,
    pub derive: String,
    pub triage: String,
}

/// Full runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoneConfig {
    pub models: StageModels,
    pub audit_dir: String,
    /// Space-joined tool allowlist applied to read-only assistant calls.
    pub read_only_tools: String,
    pub max_retries: u32,
    pub gate_timeout_ms: u64,
    pub mode: Mode,
    pub min_charter_length: usize,
    pub severity_threshold: i64,
    /// Executable name for the assistant CLI.
    pub assistant_command: String,
}

impl Default for HoneConfig {
    fn default() -> Self {
        Self {
            models: StageModels {
                assess: "sonnet".to_string(),
                name: "haiku".to_string(),
                plan: "sonnet".to_string(),
                execute: "sonnet".to_string(),
                gates: "haiku".to_string(),
                derive: "sonnet".to_string(),
                triage: "haiku".to_string(),
            },
            audit_dir: ".hone".to_string(),
            read_only_tools: "Read Glob Grep LS".to_string(),
            max_retries: 3,
            gate_timeout_ms: 120_000,
            mode: Mode::Local,
            min_charter_length: 200,
            severity_threshold: 3,
            assistant_command: "claude".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// User config file (every field optional; absent fields keep defaults)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileModels {
    assess: Option<String>,
    name: Option<String>,
    plan: Option<String>,
    execute: Option<String>,
    gates: Option<String>,
    derive: Option<String>,
    triage: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    models: Option<FileModels>,
    audit_dir: Option<String>,
    read_only_tools: Option<String>,
    max_retries: Option<u32>,
    gate_timeout_ms: Option<u64>,
    mode: Option<Mode>,
    min_charter_length: Option<usize>,
    severity_threshold: Option<i64>,
    assistant_command: Option<String>,
}

/// Well-known user config path: `<config-home>/hone/config.json`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hone").join("config.json"))
}

/// CLI flag overrides; layered last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_retries: Option<u32>,
    pub mode: Option<Mode>,
    pub severity_threshold: Option<i64>,
    pub min_charter_length: Option<usize>,
    pub assess_model: Option<String>,
    pub plan_model: Option<String>,
    pub execute_model: Option<String>,
}

/// Merge one user config fragment over the defaults. Absent fields keep
/// their default values; nothing is ever dropped.
fn merge_file(mut cfg: HoneConfig, file: FileConfig) -> HoneConfig {
    if let Some(models) = file.models {
        let m = &mut cfg.models;
        if let Some(v) = models.assess {
            m.assess = v;
        }
        if let Some(v) = models.name {
            m.name = v;
        }
        if let Some(v) = models.plan {
            m.plan = v;
        }
        if let Some(v) = models.execute {
            m.execute = v;
        }
        if let Some(v) = models.gates {
            m.gates = v;
        }
        if let Some(v) = models.derive {
            m.derive = v;
        }
        if let Some(v) = models.triage {
            m.triage = v;
        }
    }
    if let Some(v) = file.audit_dir {
        cfg.audit_dir = v;
    }
    if let Some(v) = file.read_only_tools {
        cfg.read_only_tools = v;
    }
    if let Some(v) = file.max_retries {
        cfg.max_retries = v;
    }
    if let Some(v) = file.gate_timeout_ms {
        cfg.gate_timeout_ms = v;
    }
    if let Some(v) = file.mode {
        cfg.mode = v;
    }
    if let Some(v) = file.min_charter_length {
        cfg.min_charter_length = v;
    }
    if let Some(v) = file.severity_threshold {
        cfg.severity_threshold = v;
    }
    if let Some(v) = file.assistant_command {
        cfg.assistant_command = v;
    }
    cfg
}

fn apply_overrides(mut cfg: HoneConfig, overrides: &ConfigOverrides) -> HoneConfig {
    if let Some(v) = overrides.max_retries {
        cfg.max_retries = v;
    }
    if let Some(v) = overrides.mode {
        cfg.mode = v;
    }
    if let Some(v) = overrides.severity_threshold {
        cfg.severity_threshold = v;
    }
    if let Some(v) = overrides.min_charter_length {
        cfg.min_charter_length = v;
    }
    if let Some(ref v) = overrides.assess_model {
        cfg.models.assess = v.clone();
    }
    if let Some(ref v) = overrides.plan_model {
        cfg.models.plan = v.clone();
    }
    if let Some(ref v) = overrides.execute_model {
        cfg.models.execute = v.clone();
    }
    cfg
}

/// Load configuration from an explicit path (testable core).
///
/// A missing or unreadable file silently falls back to defaults; flags win
/// over the file.
pub fn load_config_from(path: Option<&Path>, overrides: &ConfigOverrides) -> HoneConfig {
    let mut cfg = HoneConfig::default();

    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<FileConfig>(&content) {
                Ok(file) => {
                    cfg = merge_file(cfg, file);
                }
                Err(e) => {
                    tracing::warn!("ignoring malformed config {}: {e}", path.display());
                }
            },
            Err(_) => {
                tracing::debug!("no user config at {}", path.display());
            }
        }
    }

    apply_overrides(cfg, overrides)
}

/// Load from the well-known user path plus flag overrides.
pub fn load_config(overrides: &ConfigOverrides) -> HoneConfig {
    let path = user_config_path();
    load_config_from(path.as_deref(), overrides)
}
