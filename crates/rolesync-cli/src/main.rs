//! Rolesync - coordinator CLI for role-synchronized workload runs
//!
//! The `rolesync` command confirms the peers of a role, dispatches
//! instructions to them and waits for completion.
//!
//! ## Commands
//!
//! - `wait`: Confirm every peer of a role answers its heartbeat
//! - `dispatch`: Send instructions to a role and wait until every peer completes
//! - `reset`: Reset every peer of a role
//! - `notify-exit`: Tell the peers of one or more roles to exit
//! - `state`: Read, write or delete persisted state documents
//! - `journal`: Show the last journaled dispatch to an agent

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{info, warn, Level};

use rolesync_core::{
    AgentClientRegistry, CancelToken, Component, Instructions, InstructionsType, ParameterValue,
    RoleSummary, RoleSynchronizer, SyncConfig, Topology,
};
use rolesync_state::{FileStateStore, StateStore};

#[derive(Parser)]
#[command(name = "rolesync")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Role synchronization for distributed workload runs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Coordinator configuration (TOML). A missing file means defaults.
    #[arg(long, global = true, env = "ROLESYNC_CONFIG", default_value = "rolesync.toml")]
    config: PathBuf,

    /// Run topology (TOML or JSON)
    #[arg(long, global = true, env = "ROLESYNC_TOPOLOGY", default_value = "topology.toml")]
    topology: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Confirm every peer of a role answers its heartbeat
    Wait {
        role: String,

        /// Heartbeat timeout in seconds (default: from config)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Dispatch instructions to a role and wait for every peer to complete
    Dispatch {
        role: String,

        /// Component type; repeat for several components
        #[arg(short, long = "component", required = true)]
        components: Vec<String>,

        /// Component parameter, `key=value` (first component) or `type:key=value`
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Instructions type
        #[arg(long = "type", value_enum, default_value_t = DispatchKind::StartExecution)]
        kind: DispatchKind,

        /// Completion timeout in seconds (default: from config)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Reset every peer of a role
    Reset { role: String },

    /// Tell every peer of the given roles to exit
    NotifyExit {
        #[arg(required = true)]
        roles: Vec<String>,
    },

    /// Persisted state documents
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Show the last journaled dispatch to an agent
    Journal { role: String, agent: String },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print a state document
    Get { id: String },

    /// Save a JSON document read from a file or stdin
    Save {
        id: String,

        /// Input file (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete a state document
    Delete { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DispatchKind {
    Profiling,
    StartExecution,
    StartStopExecution,
}

impl From<DispatchKind> for InstructionsType {
    fn from(kind: DispatchKind) -> Self {
        match kind {
            DispatchKind::Profiling => InstructionsType::Profiling,
            DispatchKind::StartExecution => InstructionsType::ClientServerStartExecution,
            DispatchKind::StartStopExecution => InstructionsType::ClientServerStartStopExecution,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    rolesync_core::init_tracing(cli.json, level);

    let mut config = SyncConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;

    let store = Arc::new(
        FileStateStore::new(config.state_dir(), &config.file_retry)
            .context("Failed to open state store")?,
    );

    let connect = || build_synchronizer(&config, &cli.topology, Arc::clone(&store));
    let cancel = cancel_on_interrupt();

    match cli.command {
        Commands::State { action } => cmd_state(store.as_ref(), action, &cancel).await,
        Commands::Wait { role, timeout_secs } => {
            let sync = connect()?;
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(sync.settings().heartbeat_timeout);
            let summary = sync
                .wait_for_role(&role, timeout, &cancel)
                .await?;
            print_summary(&summary)
        }
        Commands::Dispatch {
            role,
            components,
            params,
            kind,
            timeout_secs,
        } => {
            let instructions = Instructions {
                instructions_type: kind.into(),
                components: build_components(&components, &params)?,
            };
            let sync = connect()?;
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(sync.settings().completion_timeout);
            let summary = sync
                .send_instructions_and_await_completion(
                    &role,
                    &instructions,
                    timeout,
                    &cancel,
                )
                .await?;
            print_summary(&summary)
        }
        Commands::Reset { role } => {
            let summary = connect()?.reset_role(&role, &cancel).await?;
            print_summary(&summary)
        }
        Commands::NotifyExit { roles } => cmd_notify_exit(&connect()?, roles, &cancel).await,
        Commands::Journal { role, agent } => {
            until_cancelled(&cancel, cmd_journal(&connect()?, &role, &agent)).await?
        }
    }
}

fn build_synchronizer(
    config: &SyncConfig,
    topology_path: &Path,
    store: Arc<FileStateStore>,
) -> Result<RoleSynchronizer> {
    let topology = Topology::load(topology_path)
        .with_context(|| format!("Failed to load topology {:?}", topology_path))?;
    info!(agents = topology.agents().len(), "topology loaded");

    let registry = AgentClientRegistry::http(config.port_resolver(), config.request_timeout());
    let retry = config
        .workflow_policy()
        .context("Invalid workflow retry policy")?;

    Ok(RoleSynchronizer::new(
        Arc::new(topology),
        Arc::new(registry),
        retry,
        config.sync_settings(),
    )
    .with_journal(store))
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancelToken {
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });
    cancel
}

/// Drive `operation` to completion unless the token fires first.
async fn until_cancelled<T>(
    cancel: &CancelToken,
    operation: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("Cancelled"),
        value = operation => Ok(value),
    }
}

fn print_summary(summary: &RoleSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Build components from `--component` types and `--param` assignments.
///
/// An unqualified `key=value` applies to the first component; `type:key=value`
/// applies to the component of that type.
fn build_components(types: &[String], params: &[String]) -> Result<Vec<Component>> {
    let mut components: Vec<Component> = types.iter().map(Component::new).collect();
    if components.is_empty() {
        bail!("At least one --component is required");
    }

    for raw in params {
        let (target, assignment) = match raw.split_once(':') {
            Some((target, rest)) if rest.contains('=') && !target.contains('=') => {
                (Some(target), rest)
            }
            _ => (None, raw.as_str()),
        };
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("Parameter '{raw}' is not key=value"))?;
        if key.trim().is_empty() {
            bail!("Parameter '{raw}' has an empty key");
        }

        let component = match target {
            None => &mut components[0],
            Some(target) => components
                .iter_mut()
                .find(|c| c.component_type.eq_ignore_ascii_case(target))
                .with_context(|| format!("Parameter '{raw}' names unknown component '{target}'"))?,
        };
        component
            .parameters
            .insert(key.trim().to_string(), ParameterValue::parse(value.trim()));
    }

    Ok(components)
}

async fn cmd_notify_exit(
    sync: &RoleSynchronizer,
    roles: Vec<String>,
    cancel: &CancelToken,
) -> Result<()> {
    let mut notifier = sync.shutdown_notifier();
    for role in roles {
        notifier.add_role(role);
    }

    let failures = until_cancelled(cancel, notifier.notify_all()).await?;
    if failures.is_empty() {
        println!("Exit sent to roles: {}", notifier.roles().join(", "));
        return Ok(());
    }
    for failure in &failures {
        eprintln!("{} ({}): {}", failure.agent, failure.role, failure.error);
    }
    bail!("{} peer(s) could not be notified", failures.len())
}

async fn cmd_journal(sync: &RoleSynchronizer, role: &str, agent: &str) -> Result<()> {
    match sync.last_known_dispatch(role, agent).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No dispatch journaled for '{}' in role '{}'", agent, role),
    }
    Ok(())
}

async fn cmd_state(
    store: &FileStateStore,
    action: StateAction,
    cancel: &CancelToken,
) -> Result<()> {
    match action {
        StateAction::Get { id } => match until_cancelled(cancel, store.get_state(&id)).await?? {
            Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
            None => bail!("No state stored under '{}'", id),
        },
        StateAction::Save { id, file } => {
            let content = match &file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {:?}", path))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            let document: Value =
                serde_json::from_str(&content).context("State document is not valid JSON")?;
            until_cancelled(cancel, store.save_state(&id, &document)).await??;
            println!("Saved state '{}'", id);
        }
        StateAction::Delete { id } => {
            until_cancelled(cancel, store.delete_state(&id)).await??;
            println!("Deleted state '{}'", id);
        }
    }
    Ok(())
}
