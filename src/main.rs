//! Autonomy Governor - Entry Point
//!
//! Commands:
//! - run (default): cognitive loop daemon
//! - status: trust summary and pending proposals
//! - approve / reject <id>: resolve a proposal
//! - freeze <description>: record a critical failure
//! - scan: one proactive scan over stale threads

use anyhow::{bail, Context};
use autonomy_governor::{
    AttentionSource, CognitiveLoop, Governor, GovernorConfig, JsonThreadStore, OllamaBackend,
    ProactiveAction, Resolution, SystemClock, ThinkCallback, WorkspaceAttention,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn print_help() {
    println!("Autonomy Governor v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: autonomy-governor [OPTIONS] [COMMAND]");
    println!();
    println!("Commands:");
    println!("  run                  Run the cognitive loop (default)");
    println!("  status               Show trust and pending proposals");
    println!("  approve <id>         Approve a pending proposal");
    println!("  reject <id>          Reject a pending proposal");
    println!("  freeze <description> Record a critical failure");
    println!("  scan                 Evaluate stale threads once");
    println!();
    println!("Options:");
    println!("  --json-logs          Log JSON to stderr");
    println!("  --help, -h           Show this help");
    println!();
    println!("Environment variables:");
    println!("  GOVERNOR_CONFIG      Optional TOML config file");
    println!("  GOVERNOR_WORKSPACE   Workspace root (state/ lives here)");
    println!("  GOVERNOR_SHADOW_MODE Score follow-ups without dispatching");
    println!("  OLLAMA_URL           Model backend URL");
    println!("  GOVERNOR_MODEL       Model name");
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Accept a full id or a unique prefix of a pending proposal
fn resolve_id(governor: &Governor, given: &str) -> anyhow::Result<String> {
    if governor.proposals().get(given).is_some() {
        return Ok(given.to_string());
    }

    let matches: Vec<String> = governor
        .proposals()
        .pending()
        .into_iter()
        .filter(|p| p.id.starts_with(given))
        .map(|p| p.id)
        .collect();

    match matches.as_slice() {
        [id] => Ok(id.clone()),
        [] => bail!("No proposal matches {}", given),
        _ => bail!("{} matches {} proposals, use more characters", given, matches.len()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let json_logs = args.iter().any(|a| a == "--json-logs");
    let positional: Vec<&str> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .collect();

    init_logging(json_logs)?;

    let config = GovernorConfig::from_env().context("Invalid configuration")?;
    let clock = Arc::new(SystemClock);
    let threads = Arc::new(JsonThreadStore::open(&config.workspace));
    let backend = Arc::new(OllamaBackend::new(config.ollama_config())?);
    let mut governor = Governor::open(
        &config.workspace,
        clock.clone(),
        backend,
        threads.clone(),
        config.proactive_config(),
    );

    match positional.as_slice() {
        ["status"] => {
            println!("{}", governor.trust().observable_summary());
            let pending = governor.proposals().pending();
            println!();
            println!("Pending proposals: {}", pending.len());
            for proposal in &pending {
                println!("  {}", proposal.format());
            }
            let recent = governor.authority().recent(5);
            if !recent.is_empty() {
                println!();
                println!("Recent actions:");
                for entry in recent {
                    println!(
                        "  {} {} [{}] {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        if entry.approved { "ok " } else { "no " },
                        entry.tier.as_str(),
                        entry.description
                    );
                }
            }
        }
        ["approve", id] | ["reject", id] => {
            let resolution = if positional[0] == "approve" {
                Resolution::Approved
            } else {
                Resolution::Rejected
            };
            let id = resolve_id(&governor, id)?;
            let proposal = governor.resolve_proposal(&id, resolution)?;
            println!("{}", proposal.format());
            println!("{}", governor.trust().observable_summary());
        }
        ["freeze", description @ ..] if !description.is_empty() => {
            governor.record_critical_failure(&description.join(" "))?;
            println!("{}", governor.trust().observable_summary());
        }
        ["scan"] => {
            let decisions = governor.scan_threads(config.stale_after_hours).await;
            if decisions.is_empty() {
                println!("No stale threads");
            }
            for decision in &decisions {
                println!("{}", decision.format());
                if let Some(draft) = &decision.draft {
                    println!("    {}", draft);
                }
            }
        }
        [] | ["run"] => {
            info!("Autonomy Governor v{}", env!("CARGO_PKG_VERSION"));
            info!("Workspace: {}", config.workspace.display());

            let stale_after_hours = config.stale_after_hours;
            let governor = Arc::new(Mutex::new(governor));
            let think: ThinkCallback = Arc::new(move |reason| {
                let governor = Arc::clone(&governor);
                Box::pin(async move {
                    let mut governor = governor.lock().await;
                    let decisions = governor.scan_threads(stale_after_hours).await;
                    for decision in decisions
                        .iter()
                        .filter(|d| d.action != ProactiveAction::Silence)
                    {
                        info!(reason = %reason, "Proactive {}", decision.format());
                    }
                    Ok(())
                })
            });

            let attention: Arc<dyn AttentionSource> = Arc::new(WorkspaceAttention::new(
                &config.workspace,
                clock.clone(),
                threads,
                stale_after_hours,
            ));
            let cognitive_loop = CognitiveLoop::new(config.loop_config(), clock, attention, think);
            cognitive_loop.start();

            tokio::signal::ctrl_c()
                .await
                .context("Failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C, shutting down");
            cognitive_loop.stop();

            let stats = cognitive_loop.stats();
            info!(
                "Loop finished: {} ticks, {} reflections, {} failures",
                stats.ticks, stats.reflections, stats.failures
            );
        }
        other => {
            print_help();
            bail!("Unknown command: {}", other.join(" "));
        }
    }

    Ok(())
}
