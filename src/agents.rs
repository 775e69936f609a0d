//! Agent registry: definitions living in the user's agent directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::types::AgentInfo;

/// Default agent directory: `~/.claude/agents`.
pub fn default_agent_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("agents")
}

/// Strip the recognized agent-file extensions from a filename.
fn agent_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(".agent.md")
        .or_else(|| file_name.strip_suffix(".md"))
}

/// Enumerate agent definitions, sorted by name.
///
/// Files named `<name>.agent.md` or `<name>.md` qualify; the original
/// filename is captured so later reads use exactly what was enumerated.
pub fn list_agents(dir: &Path) -> Result<Vec<AgentInfo>> {
    let mut agents = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(agents),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(name) = agent_name(&file_name) {
            agents.push(AgentInfo {
                name: name.to_string(),
                path,
            });
        }
    }
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(agents)
}

/// Resolve an agent by name.
pub fn find_agent(dir: &Path, name: &str) -> Result<Option<AgentInfo>> {
    Ok(list_agents(dir)?.into_iter().find(|a| a.name == name))
}

/// Read an agent's definition file.
pub fn read_agent(agent: &AgentInfo) -> Result<String> {
    std::fs::read_to_string(&agent.path)
        .with_context(|| format!("reading agent definition: {}", agent.path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("refactorer.agent.md"), "# Refactorer").unwrap();
        std::fs::write(dir.path().join("architect.md"), "# Architect").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an agent").unwrap();
        dir
    }

    #[test]
    fn test_list_agents_sorted_by_name() {
        let dir = fixture();
        let agents = list_agents(dir.path()).unwrap();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["architect", "refactorer"]);
    }

    #[test]
    fn test_agent_md_extension_stripped_once() {
        // ".agent.md" must win over the plain ".md" suffix.
        let dir = fixture();
        let agent = find_agent(dir.path(), "refactorer").unwrap().unwrap();
        assert!(agent.path.ends_with("refactorer.agent.md"));
    }

    #[test]
    fn test_find_missing_agent() {
        let dir = fixture();
        assert!(find_agent(dir.path(), "nope").unwrap().is_none());
    }

    #[test]
    fn test_missing_dir_is_empty_not_error() {
        let agents = list_agents(Path::new("/definitely/not/here")).unwrap();
        assert!(agents.is_empty());
    }

    #[test]
    fn test_read_agent_contents() {
        let dir = fixture();
        let agent = find_agent(dir.path(), "architect").unwrap().unwrap();
        assert_eq!(read_agent(&agent).unwrap(), "# Architect");
    }
}
