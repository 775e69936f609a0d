//! Audit trail: markdown stage outputs grouped into iteration entries.
//!
//! Writes are fatal on failure — a hole in the audit trail is worse than a
//! stopped iteration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::types::IterationEntry;

/// Create the audit directory inside the project if missing.
pub fn ensure_audit_dir(project: &Path, dir_name: &str) -> Result<PathBuf> {
    let dir = project.join(dir_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating audit dir: {}", dir.display()))?;
    Ok(dir)
}

/// Persist one stage output as `<name>-<suffix>.md`, or `<name>.md` when the
/// suffix is empty.
pub fn save_stage_output(dir: &Path, name: &str, suffix: &str, content: &str) -> Result<PathBuf> {
    let file_name = if suffix.is_empty() {
        format!("{name}.md")
    } else {
        format!("{name}-{suffix}.md")
    };
    let path = dir.join(file_name);
    std::fs::write(&path, content)
        .with_context(|| format!("writing audit file: {}", path.display()))?;
    Ok(path)
}

fn retry_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-retry-\d+-actions$").unwrap())
}

/// Strip the stage suffixes off an audit filename, in order:
/// `-retry-<n>-actions`, `-actions`, `-plan`, then the `.md` extension
/// (already removed by the caller).
fn base_name(stem: &str) -> String {
    let stripped = retry_suffix_re().replace(stem, "");
    let stripped = stripped
        .strip_suffix("-actions")
        .unwrap_or(&stripped)
        .to_string();
    stripped
        .strip_suffix("-plan")
        .unwrap_or(&stripped)
        .to_string()
}

/// Group audit files into iteration entries, newest first.
///
/// Entry date is the mtime of the first file discovered for each group.
pub fn list_iterations(dir: &Path) -> Result<Vec<IterationEntry>> {
    let pattern = dir.join("*.md");
    let mut groups: BTreeMap<String, (DateTime<Utc>, Vec<String>)> = BTreeMap::new();

    for path in glob::glob(&pattern.to_string_lossy())
        .context("building audit glob")?
        .flatten()
    {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let base = base_name(stem);
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mtime: DateTime<Utc> = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        let group = groups.entry(base).or_insert_with(|| (mtime, Vec::new()));
        group.1.push(file_name);
    }

    let mut entries: Vec<IterationEntry> = groups
        .into_iter()
        .map(|(name, (date, files))| IterationEntry { name, date, files })
        .collect();
    entries.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(entries)
}
