//! memcurate - operator CLI for agent memory curation
//!
//! ## Commands
//!
//! - `memory`: add, list and show memories for an owner
//! - `usage`: token mass of an owner's live memories
//! - `threshold`: read or set an owner's circuit-breaker threshold
//! - `refine`: run a scripted refinement session through the driver adapter
//! - `audit`: inspect the audit trail of a session or an owner
//! - `reconcile`: roll back sessions that never reached a terminal entry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memcurate_core::obs::SessionSpan;
use memcurate_core::{
    driver, CurationConfig, MemoryKind, OwnerId, ReconcileOutcome, RefinementScheduler, SessionId,
    SessionStatus, METRICS,
};
use memcurate_state::{MemoryId, SurrealCurationStore};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Summary used when a refine script ends without calling `complete`.
const AUTO_COMPLETE_SUMMARY: &str = "refine script ended without an explicit complete";

#[derive(Parser, Debug)]
#[command(name = "memcurate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Curate an agent's long-term memory with audited, reversible sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to memcurate.toml (default: $MEMCURATE_CONFIG, then ./memcurate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage memories
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show the token mass of an owner's live memories
    Usage {
        #[arg(long)]
        owner: String,

        /// Memory kind to measure
        #[arg(long, default_value = "core")]
        kind: MemoryKind,
    },

    /// Read or set the circuit-breaker threshold of an owner
    Threshold {
        #[command(subcommand)]
        action: ThresholdAction,
    },

    /// Run a refinement session from a script of JSON tool calls
    Refine {
        #[arg(long)]
        owner: String,

        /// JSON array or newline-delimited tool calls; `-` reads stdin
        #[arg(long)]
        actions: PathBuf,

        /// Caller-supplied session id (default: a fresh UUID)
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },

    /// Roll back sessions that never completed
    Reconcile {
        #[arg(long)]
        owner: String,

        /// Only this session (default: every open session of the owner)
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MemoryAction {
    /// Add a memory
    Add {
        #[arg(long)]
        owner: String,

        /// Memory content
        content: String,

        #[arg(long, default_value = "core")]
        kind: MemoryKind,
    },

    /// List an owner's memories
    List {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        kind: Option<MemoryKind>,

        /// Include tombstoned memories
        #[arg(long)]
        all: bool,
    },

    /// Show one memory as JSON
    Show {
        #[arg(long)]
        owner: String,

        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ThresholdAction {
    /// Show the effective threshold
    Get {
        #[arg(long)]
        owner: String,
    },

    /// Persist a threshold in (0, 1]
    Set {
        #[arg(long)]
        owner: String,

        value: f64,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Entries of one session, most recent first
    Session { session_id: String },

    /// Entries of one owner, oldest first
    Owner {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    memcurate_core::init_tracing(cli.json, level);

    let config = CurationConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let connection = config
        .connection()
        .context("Invalid database connection settings")?;
    let store = SurrealCurationStore::connect(&connection)
        .await
        .context("Failed to connect to memcurate database")?;
    let scheduler = RefinementScheduler::new(Arc::new(store), config);

    let result = match cli.command {
        Commands::Memory { action } => match action {
            MemoryAction::Add {
                owner,
                content,
                kind,
            } => cmd_memory_add(&scheduler, &owner, &content, kind).await,
            MemoryAction::List { owner, kind, all } => {
                cmd_memory_list(&scheduler, &owner, kind, all).await
            }
            MemoryAction::Show { owner, id } => cmd_memory_show(&scheduler, &owner, &id).await,
        },
        Commands::Usage { owner, kind } => cmd_usage(&scheduler, &owner, kind).await,
        Commands::Threshold { action } => match action {
            ThresholdAction::Get { owner } => cmd_threshold_get(&scheduler, &owner).await,
            ThresholdAction::Set { owner, value } => {
                cmd_threshold_set(&scheduler, &owner, value).await
            }
        },
        Commands::Refine {
            owner,
            actions,
            session_id,
        } => {
            let script = read_script(&actions)?;
            cmd_refine(&scheduler, &owner, &script, session_id.as_deref())
                .await
                .map(|outcome| println!("{}", pretty(&outcome)))
        }
        Commands::Audit { action } => match action {
            AuditCommand::Session { session_id } => cmd_audit_session(&scheduler, &session_id).await,
            AuditCommand::Owner { owner } => cmd_audit_owner(&scheduler, &owner).await,
        },
        Commands::Reconcile { owner, session } => {
            cmd_reconcile(&scheduler, &owner, session.as_deref())
                .await
                .map(|_| ())
        }
    };

    METRICS.flush();
    result
}

// ---------------------------------------------------------------------------
// memory
// ---------------------------------------------------------------------------

async fn cmd_memory_add(
    scheduler: &RefinementScheduler,
    owner: &str,
    content: &str,
    kind: MemoryKind,
) -> Result<()> {
    let memory = scheduler
        .memories()
        .create(&OwnerId::from(owner), content, kind)
        .await
        .context("Failed to add memory")?;

    println!("{}", memory.memory_id);
    Ok(())
}

async fn cmd_memory_list(
    scheduler: &RefinementScheduler,
    owner: &str,
    kind: Option<MemoryKind>,
    all: bool,
) -> Result<()> {
    let memories = scheduler
        .memories()
        .list(&OwnerId::from(owner), kind, all)
        .await?;

    if memories.is_empty() {
        println!("No memories found for '{}'", owner);
        return Ok(());
    }

    let accountant = scheduler.config().accountant();
    for m in memories {
        let mut flags = Vec::new();
        if m.constitutional {
            flags.push("protected");
        }
        if m.tombstoned {
            flags.push("tombstoned");
        }
        println!(
            "{}  {:<7} {:>5} tok  {}{}",
            m.memory_id,
            m.kind,
            accountant.count(&m.content),
            preview(&m.content, 60),
            if flags.is_empty() {
                String::new()
            } else {
                format!("  [{}]", flags.join(", "))
            }
        );
    }
    Ok(())
}

async fn cmd_memory_show(scheduler: &RefinementScheduler, owner: &str, id: &str) -> Result<()> {
    let memory = scheduler
        .memories()
        .get_owned(&OwnerId::from(owner), &MemoryId::from(id))
        .await
        .context(format!("Memory not found: {}", id))?;

    println!("{}", serde_json::to_string_pretty(&memory)?);
    Ok(())
}

async fn cmd_usage(scheduler: &RefinementScheduler, owner: &str, kind: MemoryKind) -> Result<()> {
    let mass = scheduler
        .memories()
        .usage(&OwnerId::from(owner), kind)
        .await?;
    println!("{} {} tokens", mass, kind);
    Ok(())
}

// ---------------------------------------------------------------------------
// threshold
// ---------------------------------------------------------------------------

async fn cmd_threshold_get(scheduler: &RefinementScheduler, owner: &str) -> Result<()> {
    let owner_id = OwnerId::from(owner);
    let settings = scheduler.owner_settings(&owner_id).await?;
    let effective = scheduler.threshold(&owner_id).await?;

    println!(
        "Threshold: {}{}",
        effective.value(),
        if settings.threshold.is_none() {
            " (default)"
        } else {
            ""
        }
    );
    match settings.last_refined_at {
        Some(at) => println!("Last refined: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last refined: never"),
    }
    Ok(())
}

async fn cmd_threshold_set(scheduler: &RefinementScheduler, owner: &str, value: f64) -> Result<()> {
    let settings = scheduler
        .set_threshold(&OwnerId::from(owner), value)
        .await
        .context("Failed to set threshold")?;
    info!(owner_id = %owner, threshold = value, "threshold updated");
    println!(
        "Threshold for '{}' set to {}",
        owner,
        settings.threshold.map(|t| t.value()).unwrap_or(value)
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// refine
// ---------------------------------------------------------------------------

fn read_script(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read actions from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).context(format!("Failed to read actions file {:?}", path))
}

/// Accepts a JSON array of tool calls or one call per line.
fn parse_script(script: &str) -> Result<Vec<Value>> {
    let trimmed = script.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Actions file is not a JSON array");
    }
    script
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).context(format!("Invalid JSON on line {}", n + 1))
        })
        .collect()
}

/// Run the script through the driver adapter and return the completion result.
///
/// Rejected calls are printed and skipped. A script without `complete` is
/// completed on its behalf.
async fn cmd_refine(
    scheduler: &RefinementScheduler,
    owner: &str,
    script: &str,
    session_id: Option<&str>,
) -> Result<Value> {
    let calls = parse_script(script)?;
    let owner_id = OwnerId::from(owner);
    let mut session = match session_id {
        Some(id) => scheduler.begin_with_id(&owner_id, SessionId::from(id)).await,
        None => scheduler.begin(&owner_id).await,
    }
    .context("Failed to start refinement session")?;

    let _span = SessionSpan::enter(session.session_id().as_str(), owner);
    let mut completion = None;

    for call in calls {
        if session.status() != SessionStatus::Active {
            warn!("ignoring tool call after complete");
            break;
        }
        if let Some(outcome) = scheduler.finish_expired(&mut session).await? {
            completion = Some(json!({ "ok": true, "result": outcome }));
            break;
        }
        let result = driver::invoke(&mut session, call)
            .await
            .context(format!("Session {} failed", session.session_id()))?;
        if result["result"]["outcome"] == "completed" {
            completion = Some(result);
        } else {
            println!("{}", result);
        }
    }

    match completion {
        Some(done) => Ok(done),
        None => {
            let result = driver::invoke_named(
                &mut session,
                "complete",
                json!({ "summary": AUTO_COMPLETE_SUMMARY }),
            )
            .await
            .context(format!("Session {} failed", session.session_id()))?;
            Ok(result)
        }
    }
}

// ---------------------------------------------------------------------------
// audit and recovery
// ---------------------------------------------------------------------------

async fn cmd_audit_session(scheduler: &RefinementScheduler, session_id: &str) -> Result<()> {
    let entries = scheduler
        .audit()
        .for_session(&SessionId::from(session_id))
        .await?;
    if entries.is_empty() {
        println!("No audit entries for session '{}'", session_id);
        return Ok(());
    }
    print_entries(&entries);
    Ok(())
}

async fn cmd_audit_owner(scheduler: &RefinementScheduler, owner: &str) -> Result<()> {
    let entries = scheduler.audit().for_owner(&OwnerId::from(owner)).await?;
    if entries.is_empty() {
        println!("No audit entries for '{}'", owner);
        return Ok(());
    }
    print_entries(&entries);
    Ok(())
}

fn print_entries(entries: &[memcurate_core::AuditEntry]) {
    for e in entries {
        let subjects: Vec<&str> = e.subject_ref.iter().map(MemoryId::as_str).collect();
        println!(
            "{} #{:<3} {:<16} session {}  [{}]{}",
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            e.seq,
            e.action,
            e.session_id,
            subjects.join(", "),
            if e.verify() { "" } else { "  DIGEST MISMATCH" }
        );
    }
}

async fn cmd_reconcile(
    scheduler: &RefinementScheduler,
    owner: &str,
    session: Option<&str>,
) -> Result<Vec<(SessionId, ReconcileOutcome)>> {
    let owner_id = OwnerId::from(owner);
    let targets = match session {
        Some(id) => vec![SessionId::from(id)],
        None => scheduler.open_sessions(&owner_id).await?,
    };

    if targets.is_empty() {
        println!("No open sessions for '{}'", owner);
        return Ok(Vec::new());
    }

    let mut done = Vec::with_capacity(targets.len());
    for sid in targets {
        let outcome = scheduler
            .reconcile(&owner_id, &sid)
            .await
            .context(format!("Failed to reconcile session {}", sid))?;
        match &outcome {
            ReconcileOutcome::AlreadyClosed { action } => {
                println!("{}: already closed ({})", sid, action)
            }
            ReconcileOutcome::RolledBack {
                reverted_entries,
                stats,
            } => println!(
                "{}: rolled back {} entries ({})",
                sid, reverted_entries, stats
            ),
        }
        done.push((sid, outcome));
    }
    Ok(done)
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn preview(content: &str, max: usize) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > max || content.lines().nth(1).is_some() {
        let cut: String = line.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
