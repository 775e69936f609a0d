mod agents;
mod assessment;
mod assistant;
mod audit;
mod charter;
mod config;
mod engine;
mod extract;
mod gates;
mod github;
mod process;
mod triage;
mod types;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use assistant::{AssistantRequest, AssistantRunner, ClaudeCli};
use config::ConfigOverrides;
use engine::{IterateOptions, IterationEngine};
use github::{GhCli, GitHubEngine};
use types::Mode;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "hone",
    version,
    about = "Deterministic verification loop around an LLM code-improvement assistant"
)]
enum Cli {
    /// Run one improvement iteration against a project
    Iterate {
        /// Agent definition to assess with
        agent: String,

        /// Project directory to improve
        folder: PathBuf,

        /// Maximum retry attempts after failed verify gates
        #[arg(long)]
        max_retries: Option<u32>,

        /// Skip gate resolution, preflight and verification
        #[arg(long)]
        skip_gates: bool,

        /// Skip the charter sufficiency check
        #[arg(long)]
        skip_charter: bool,

        /// Skip severity/busy-work triage
        #[arg(long)]
        skip_triage: bool,

        /// Operating mode
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Number of proposal issues to create (github mode only)
        #[arg(long)]
        proposals: Option<u32>,

        /// Minimum severity that survives triage (1-5)
        #[arg(long)]
        severity_threshold: Option<i64>,

        /// Minimum charter length in characters
        #[arg(long)]
        min_charter_length: Option<usize>,

        /// Model for the assess stage
        #[arg(long)]
        assess_model: Option<String>,

        /// Model for the plan stage
        #[arg(long)]
        plan_model: Option<String>,

        /// Model for the execute stage
        #[arg(long)]
        execute_model: Option<String>,

        /// Emit the final result as JSON on stdout; progress goes to stderr
        #[arg(long)]
        json: bool,
    },

    /// List past iterations recorded in the audit directory
    History {
        /// Project directory
        folder: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List available agent definitions
    ListAgents {
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration
    Config,

    /// Derive a quality-gate override file from an agent definition
    Derive {
        /// Agent definition to derive gates from
        agent: String,

        /// Project directory to write .hone-gates.json into
        folder: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hone=info".parse().unwrap()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli {
        Cli::Iterate {
            agent,
            folder,
            max_retries,
            skip_gates,
            skip_charter,
            skip_triage,
            mode,
            proposals,
            severity_threshold,
            min_charter_length,
            assess_model,
            plan_model,
            execute_model,
            json,
        } => {
            let overrides = ConfigOverrides {
                max_retries,
                mode,
                severity_threshold,
                min_charter_length,
                assess_model,
                plan_model,
                execute_model,
            };
            let cfg = config::load_config(&overrides);

            // Agent existence is checked before anything else, including the
            // proposals/mode validation below.
            let agent_dir = agents::default_agent_dir();
            if agents::find_agent(&agent_dir, &agent)?.is_none() {
                eprintln!("{} unknown agent: {agent}", "error:".red().bold());
                let available = agents::list_agents(&agent_dir)?;
                if !available.is_empty() {
                    eprintln!("available agents:");
                    for a in &available {
                        eprintln!("  {}", a.name);
                    }
                }
                std::process::exit(1);
            }

            if cfg.mode == Mode::Local && proposals.is_some() {
                eprintln!(
                    "{} --proposals is only valid in github mode",
                    "error:".red().bold()
                );
                std::process::exit(1);
            }

            let opts = IterateOptions {
                skip_gates,
                skip_charter,
                skip_triage,
            };

            let exit_code = match cfg.mode {
                Mode::Local => run_local(cfg, &agent, &folder, &opts, json).await?,
                Mode::Github => {
                    run_github(cfg, &agent, &folder, proposals.unwrap_or(1), &opts, json).await?
                }
            };
            std::process::exit(exit_code);
        }

        Cli::History { folder, json } => {
            let cfg = config::load_config(&ConfigOverrides::default());
            let entries = audit::list_iterations(&folder.join(&cfg.audit_dir))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No iterations recorded in {}", folder.display());
            } else {
                for entry in &entries {
                    println!(
                        "{}  {} ({} file{})",
                        entry.date.format("%Y-%m-%d %H:%M"),
                        entry.name.bold(),
                        entry.files.len(),
                        if entry.files.len() == 1 { "" } else { "s" }
                    );
                }
            }
        }

        Cli::ListAgents { json } => {
            let agents = agents::list_agents(&agents::default_agent_dir())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&agents)?);
            } else if agents.is_empty() {
                println!("No agents found in {}", agents::default_agent_dir().display());
            } else {
                for a in &agents {
                    println!("{}  {}", a.name.bold(), a.path.display());
                }
            }
        }

        Cli::Config => {
            let cfg = config::load_config(&ConfigOverrides::default());
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }

        Cli::Derive { agent, folder } => {
            let exit_code = cmd_derive(&agent, &folder).await?;
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// iterate dispatch
// ---------------------------------------------------------------------------

async fn run_local(
    cfg: config::HoneConfig,
    agent: &str,
    folder: &std::path::Path,
    opts: &IterateOptions,
    json: bool,
) -> Result<i32> {
    let engine = IterationEngine::new(cfg).progress_to_stderr(json);

    match engine.iterate(agent, folder, opts).await {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_local_summary(&result);
            }
            Ok(if result.success { 0 } else { 1 })
        }
        Err(e) => {
            eprintln!("{} {e:#}", "iteration failed:".red().bold());
            Ok(1)
        }
    }
}

async fn run_github(
    cfg: config::HoneConfig,
    agent: &str,
    folder: &std::path::Path,
    proposals: u32,
    opts: &IterateOptions,
    json: bool,
) -> Result<i32> {
    let engine = IterationEngine::new(cfg).progress_to_stderr(json);
    let gateway = Arc::new(GhCli::new(folder));
    let gh = GitHubEngine::new(engine, gateway);

    match gh.iterate(agent, folder, proposals, opts).await {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_github_summary(&result);
            }
            Ok(if result.success { 0 } else { 1 })
        }
        Err(e) => {
            eprintln!("{} {e:#}", "github iteration failed:".red().bold());
            Ok(1)
        }
    }
}

fn print_local_summary(result: &types::IterationResult) {
    println!();
    if let Some(reason) = &result.skipped_reason {
        let status = if result.success {
            "SKIP".yellow().bold()
        } else {
            "FAIL".red().bold()
        };
        println!("[{status}] {reason}");
        return;
    }
    let status = if result.success {
        "DONE".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("[{status}] {}", result.name);
    if let Some(sa) = &result.structured_assessment {
        println!("  principle: {} (severity {})", sa.principle, sa.severity);
    }
    println!("  retries: {}", result.retries);
    for gate in &result.gates_result.results {
        let mark = if gate.passed {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        println!("  [{mark}] {}", gate.name);
    }
}

fn print_github_summary(result: &types::GitHubIterateResult) {
    println!();
    println!("Closed (rejected): {}", result.closed.len());
    for n in &result.closed {
        println!("  #{n}");
    }
    println!("Executed: {}", result.executed.len());
    for o in &result.executed {
        let status = if o.success {
            "DONE".green().bold()
        } else {
            "FAIL".red().bold()
        };
        match &o.commit {
            Some(hash) => println!("  [{status}] #{} {} ({hash})", o.issue, o.title),
            None => println!("  [{status}] #{} {}", o.issue, o.title),
        }
    }
    println!("Proposed: {}", result.proposed.len());
    for n in &result.proposed {
        println!("  #{n}");
    }
    if result.skipped_triage > 0 {
        println!("Skipped by triage: {}", result.skipped_triage);
    }
}

// ---------------------------------------------------------------------------
// hone derive
// ---------------------------------------------------------------------------

/// One-shot generator: ask the assistant what gates this agent implies and
/// write them to the project's override file.
async fn cmd_derive(agent: &str, folder: &std::path::Path) -> Result<i32> {
    let cfg = config::load_config(&ConfigOverrides::default());
    let agent_dir = agents::default_agent_dir();

    let Some(info) = agents::find_agent(&agent_dir, agent)? else {
        eprintln!("{} unknown agent: {agent}", "error:".red().bold());
        return Ok(1);
    };
    let agent_text = agents::read_agent(&info)?;

    let assistant = ClaudeCli::new(cfg.assistant_command.clone(), cfg.read_only_tools.clone());
    let response = assistant
        .invoke(&AssistantRequest {
            agent: None,
            model: cfg.models.derive.clone(),
            prompt: gates::extraction_prompt(&agent_text),
            read_only: true,
            cwd: folder.to_path_buf(),
        })
        .await?;

    let derived = gates::parse_extracted_gates(&response);
    if derived.is_empty() {
        eprintln!(
            "{} no gates could be derived from agent '{agent}'",
            "error:".red().bold()
        );
        return Ok(1);
    }

    let path = folder.join(gates::GATES_OVERRIDE_FILE);
    let body = serde_json::to_string_pretty(&serde_json::json!({ "gates": derived }))?;
    std::fs::write(&path, body)?;

    println!(
        "Wrote {} gate{} to {}",
        derived.len(),
        if derived.len() == 1 { "" } else { "s" },
        path.display()
    );
    Ok(0)
}
