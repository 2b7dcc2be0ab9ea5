//! `kbisect`: drive a kernel regression bisection across one or more test
//! hosts, resuming automatically across process restarts.
//!
//! ## Commands
//!
//! - `init`: create a new bisection session for a config's good/bad range
//! - `start`: run (or resume) the bisection loop to completion or a halt
//! - `status`: show the current session's progress
//! - `report`: render a session's full iteration history, text or JSON
//! - `build`: build a single commit on every host without bisecting
//! - `abort`: explicitly abort the active session (never resumes)
//! - `ipmi`: drive a host's power controller directly
//! - `monitor`: tail host outcomes for the active iteration
//! - `logs`: print a stored build or console log
//! - `metadata`: print a stored metadata payload

mod config;
mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use uuid::Uuid;

use kbisect_bisect::GitBisectDriver;
use kbisect_core::LogKind;
use kbisect_coordinator::{Coordinator, LoopOutcome};
use kbisect_remote::{HostRunner, PowerController, RemoteExec, SshRemoteExec};
use kbisect_store::{Store, SurrealStore};

use config::Config;

#[derive(Parser)]
#[command(name = "kbisect")]
#[command(author = "kbisect contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Kernel regression bisection across one or more test hosts", long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the bisection config (TOML)
    #[arg(short, long, global = true, default_value = "kbisect.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerVerb {
    Status,
    Cycle,
    On,
    Off,
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogKindArg {
    Build,
    Console,
}

impl From<LogKindArg> for LogKind {
    fn from(k: LogKindArg) -> Self {
        match k {
            LogKindArg::Build => LogKind::Build,
            LogKindArg::Console => LogKind::Console,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new bisection session for the configured good/bad range
    Init,

    /// Run (or resume) the bisection loop to completion or a halt
    Start,

    /// Show the active session's progress
    Status,

    /// Render a session's iteration history
    Report {
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Session to report on (defaults to the latest non-terminal session)
        #[arg(long)]
        session: Option<Uuid>,
    },

    /// Build a single commit on every configured host without bisecting
    Build {
        /// Commit-ish to build
        sha: String,
    },

    /// Abort the active session; it will not resume
    Abort {
        #[arg(long)]
        session: Option<Uuid>,
    },

    /// Drive a host's power controller directly
    Ipmi {
        /// Host id, as named in the config
        host: String,

        #[arg(value_enum)]
        verb: PowerVerb,
    },

    /// Tail host outcomes for the active session's current iteration
    Monitor {
        #[arg(long)]
        session: Option<Uuid>,
    },

    /// Print a stored build or console log
    Logs {
        /// Iteration index within the session
        iteration: u32,

        /// Host id the log was captured from
        host: String,

        #[arg(value_enum, default_value_t = LogKindArg::Build)]
        kind: LogKindArg,

        #[arg(long)]
        session: Option<Uuid>,
    },

    /// Print a stored metadata payload by its content hash
    Metadata {
        hash: String,

        #[arg(long)]
        session: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    kbisect_core::telemetry::init_tracing(cli.json, level);

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let store: Arc<dyn Store> = Arc::new(
        SurrealStore::from_path(&config.db_path)
            .await
            .context("opening store")?,
    );
    let remote: Arc<dyn RemoteExec> = Arc::new(SshRemoteExec::new());

    let exit_code = match cli.command {
        Commands::Init => cmd_init(&config, store.as_ref(), remote.as_ref()).await?,
        Commands::Start => cmd_start(&config, store, remote).await?,
        Commands::Status => cmd_status(store.as_ref()).await?,
        Commands::Report { format, session } => {
            cmd_report(store.as_ref(), format, session).await?
        }
        Commands::Build { sha } => cmd_build(&config, remote.as_ref(), &sha).await?,
        Commands::Abort { session } => cmd_abort(store.as_ref(), session).await?,
        Commands::Ipmi { host, verb } => cmd_ipmi(&config, remote.as_ref(), &host, verb).await?,
        Commands::Monitor { session } => cmd_monitor(store.as_ref(), session).await?,
        Commands::Logs {
            iteration,
            host,
            kind,
            session,
        } => cmd_logs(store.as_ref(), session, iteration, &host, kind.into()).await?,
        Commands::Metadata { hash, session } => {
            cmd_metadata(store.as_ref(), session, &hash).await?
        }
    };

    std::process::exit(exit_code);
}

/// Resolve the session a read-only command should act on: the one the
/// caller named, or the latest non-terminal session if none was given.
async fn resolve_session(store: &dyn Store, session: Option<Uuid>) -> Result<kbisect_core::Session> {
    match session {
        Some(id) => store.get_session(id).await.context("fetching session"),
        None => store
            .latest_non_terminal_session()
            .await
            .context("looking up active session")?
            .context("no active session; pass --session <id> to target a completed one"),
    }
}

async fn cmd_init(config: &Config, store: &dyn Store, remote: &dyn RemoteExec) -> Result<i32> {
    if store.latest_non_terminal_session().await?.is_some() {
        bail!("a non-terminal session already exists; run `kbisect status` or finish it first");
    }

    for host in &config.hosts {
        info!(host_id = %host.id, "initializing protection on host");
        remote
            .run(host, "init_protection", &[], None, Duration::from_secs(60))
            .await
            .with_context(|| format!("init_protection failed on host {}", host.id))?;
    }

    let session = store
        .create_session(&config.good_ref, &config.bad_ref, config.snapshot.clone(), &config.hosts)
        .await
        .context("creating session")?;

    // §6 `init`: "baseline metadata" — collect once per host before any
    // iteration runs, so a halted/resumed session has something to diff
    // against. Best-effort: a host that can't produce it yet still gets a
    // session (the bisection itself is what proves hosts are reachable).
    for host in &config.hosts {
        match remote
            .run(
                host,
                "collect_metadata",
                &["baseline".to_string()],
                None,
                Duration::from_secs(60),
            )
            .await
        {
            Ok(result) if result.exit_code == 0 => {
                match serde_json::from_slice::<serde_json::Value>(&result.stdout) {
                    Ok(payload) => {
                        store
                            .put_metadata(session.id, None, payload)
                            .await
                            .context("storing baseline metadata")?;
                    }
                    Err(e) => {
                        tracing::warn!(host_id = %host.id, %e, "baseline metadata was not valid JSON, skipping");
                    }
                }
            }
            Ok(result) => {
                tracing::warn!(host_id = %host.id, exit_code = result.exit_code, "baseline metadata collection failed, continuing");
            }
            Err(e) => {
                tracing::warn!(host_id = %host.id, %e, "baseline metadata collection unreachable, continuing");
            }
        }
    }

    println!("created session {}", session.id);
    Ok(0)
}

async fn cmd_start(config: &Config, store: Arc<dyn Store>, remote: Arc<dyn RemoteExec>) -> Result<i32> {
    let driver = GitBisectDriver::new(config.repo_path.clone()).context("opening kernel source repo")?;
    let coordinator = Coordinator::new(
        store,
        driver,
        remote,
        config.hosts.clone(),
        config.runner_config(),
    );

    match coordinator
        .run(&config.good_ref, &config.bad_ref, config.snapshot.clone())
        .await
        .context("running bisection loop")?
    {
        LoopOutcome::Completed { first_bad } => {
            println!("first bad commit: {first_bad}");
            Ok(0)
        }
        LoopOutcome::Halted(report) => {
            eprintln!("{}", report.render_text());
            Ok(1)
        }
    }
}

async fn cmd_status(store: &dyn Store) -> Result<i32> {
    match store.latest_non_terminal_session().await? {
        Some(session) => {
            let summary = store.summary(session.id).await?;
            print!("{}", report::render_text(&summary, &[]));
            Ok(0)
        }
        None => {
            println!("no active session");
            Ok(0)
        }
    }
}

async fn cmd_report(store: &dyn Store, format: ReportFormat, session: Option<Uuid>) -> Result<i32> {
    let session = resolve_session(store, session).await?;
    let summary = store.summary(session.id).await.context("reading summary")?;
    let iterations = store.iterations(session.id).await.context("reading iterations")?;

    match format {
        ReportFormat::Text => print!("{}", report::render_text(&summary, &iterations)),
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report::render_json(&summary, &iterations))?)
        }
    }
    Ok(0)
}

async fn cmd_build(config: &Config, remote: &dyn RemoteExec, sha: &str) -> Result<i32> {
    let mut any_failed = false;
    for host in &config.hosts {
        let runner = HostRunner::new(host, remote, config.runner_config());
        let outcome = runner.build_only(sha).await;

        println!("{}: {:?} (exit {:?})", host.id, outcome.verdict, outcome.test_exit_code);
        if let Some(log) = &outcome.build_log {
            if outcome.verdict != kbisect_core::HostVerdict::Pass {
                eprintln!("{}", String::from_utf8_lossy(log));
            }
        }
        any_failed |= outcome.verdict != kbisect_core::HostVerdict::Pass;
    }
    Ok(if any_failed { 1 } else { 0 })
}

/// Explicit user abort (§9 "Halt" vs "abort" distinction; §6 exit code 2).
/// Unlike a halt, an aborted session never resumes.
async fn cmd_abort(store: &dyn Store, session: Option<Uuid>) -> Result<i32> {
    let session = resolve_session(store, session).await?;
    store
        .update_session_status(session.id, kbisect_core::SessionStatus::Aborted, None)
        .await
        .context("aborting session")?;
    println!("aborted session {}", session.id);
    Ok(2)
}

async fn cmd_ipmi(config: &Config, remote: &dyn RemoteExec, host_id: &str, verb: PowerVerb) -> Result<i32> {
    let host = config.host(host_id)?;
    let controller = PowerController::new(host, remote);

    match verb {
        PowerVerb::Status => {
            let status = controller.status().await?;
            println!("{status:?}");
        }
        PowerVerb::Cycle => controller.cycle().await?,
        PowerVerb::On => controller.on().await?,
        PowerVerb::Off => controller.off().await?,
        PowerVerb::Reset => controller.reset().await?,
    }
    Ok(0)
}

async fn cmd_monitor(store: &dyn Store, session: Option<Uuid>) -> Result<i32> {
    let session = resolve_session(store, session).await?;
    println!("watching session {} (ctrl-c to stop)", session.id);

    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(iteration) = store.latest_iteration(session.id).await? else {
                    continue;
                };
                let outcomes = store.host_outcomes(iteration.id).await?;
                println!("iteration #{} ({})", iteration.index, iteration.sha);
                for outcome in &outcomes {
                    println!("  {:<12} {:?} at {:?}", outcome.host_id, outcome.verdict, outcome.phase);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(0);
            }
        }
    }
}

async fn cmd_logs(
    store: &dyn Store,
    session: Option<Uuid>,
    iteration_index: u32,
    host_id: &str,
    kind: LogKind,
) -> Result<i32> {
    let session = resolve_session(store, session).await?;
    let iteration = store
        .iterations(session.id)
        .await?
        .into_iter()
        .find(|it| it.index == iteration_index)
        .with_context(|| format!("no iteration #{iteration_index} in session {}", session.id))?;

    let outcome = store
        .host_outcomes(iteration.id)
        .await?
        .into_iter()
        .find(|o| o.host_id == host_id)
        .with_context(|| format!("no outcome for host {host_id} in iteration #{iteration_index}"))?;

    let blob_id = match kind {
        LogKind::Build => outcome.build_log_ref,
        LogKind::Console => outcome.console_log_ref,
    }
    .with_context(|| format!("no {kind:?} log stored for host {host_id}"))?;

    let bytes = store.get_log_blob(blob_id).await.context("reading log blob")?;
    std::io::Write::write_all(&mut std::io::stdout(), &bytes)?;
    Ok(0)
}

async fn cmd_metadata(store: &dyn Store, session: Option<Uuid>, hash: &str) -> Result<i32> {
    let _session = resolve_session(store, session).await?;
    let payload = store.get_metadata(hash).await.context("reading metadata")?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(0)
}
