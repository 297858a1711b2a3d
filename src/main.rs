use anyhow::Result;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vantage::agent::Agent;
use vantage::config::AgentConfig;
use vantage::webdriver::RemoteDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ForcedAction {
    Post,
    Mentions,
    Browse,
    Monitor,
    Discover,
    Reflect,
    Vet,
    DeepDive,
}

/// Autonomous research and engagement agent
#[derive(Debug, Parser)]
#[command(name = "vantage", version, about)]
struct Cli {
    /// Run a single action and exit instead of the full loop
    #[arg(long, value_enum)]
    force_action: Option<ForcedAction>,

    /// Optional target for the forced action (profile handle)
    #[arg(long)]
    target: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vantage=debug")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    tracing::info!("Vantage agent starting...");
    let config = AgentConfig::load();

    let running = Arc::new(AtomicBool::new(true));
    spawn_shutdown_listener(running.clone());

    let driver = RemoteDriver::connect(&config.webdriver_url).await?;
    let mut agent = Agent::new(
        config,
        Arc::new(driver),
        StdRng::from_entropy(),
        StdRng::from_entropy(),
        running.clone(),
    )?;

    // Setup failures are fatal; the loop never starts unauthenticated
    agent.verify_session().await?;

    if let Some(action) = cli.force_action {
        tracing::warn!("Debug mode: forcing single action {:?}", action);
        run_forced_action(&mut agent, action, cli.target).await?;
        tracing::info!("Forced action complete, shutting down");
        return Ok(());
    }

    tracing::info!("Type 'exit' to stop the agent");
    agent.run_loop().await;
    Ok(())
}

async fn run_forced_action(
    agent: &mut Agent,
    action: ForcedAction,
    target: Option<String>,
) -> Result<()> {
    match action {
        ForcedAction::Post => agent.expand_reach().await,
        ForcedAction::Mentions => agent.scan_mentions().await.map(|_| ()),
        ForcedAction::Browse => agent.browse_following_feed().await,
        ForcedAction::Monitor => agent.monitor_core_subjects(target).await,
        ForcedAction::Discover => agent.curiosity_driven_discovery().await,
        ForcedAction::Reflect => agent.self_reflection().await,
        ForcedAction::Vet => agent.vet_partner(target).await.map(|_| ()),
        ForcedAction::DeepDive => agent.deep_dive_partner(target).await.map(|_| ()),
    }
}

// Dedicated thread so a blocking stdin read never stalls the runtime. The
// flag flip is best-effort; the loop notices it at its next check point.
fn spawn_shutdown_listener(running: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if line.trim().eq_ignore_ascii_case("exit") {
                        tracing::info!("Stop command received, finishing current cycle");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}
