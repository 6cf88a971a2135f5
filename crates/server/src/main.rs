//! Prism Server
//!
//! Axum server exposing the orchestration engine over HTTP, plus a
//! one-shot CLI mode.

mod api;

use clap::{Parser, Subcommand};
use prism_core::credentials::SqliteCredentialStore;
use prism_core::hive::FlowPreset;
use prism_core::topology::{FocusDimension, RefineConfig, SwarmConfig};
use prism_core::{
    Engine, EngineConfig, EngineError, ExecutionRequest, RunResult, Session, SessionSnapshot,
    Topology, TopologyConfig,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::AppState;

#[derive(Parser, Clone)]
#[command(author, version, about = "Prism - multi-topology LLM orchestration")]
struct Args {
    /// Config file (defaults to .prism/config.json)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run one prompt and print the result (no server)
    Run {
        /// The prompt
        prompt: String,
        /// standalone, chain, arena, refine or swarm
        #[arg(short, long, default_value = "standalone")]
        topology: Topology,
        /// Refine focus: general, security, performance, cleanliness, red_team
        #[arg(long)]
        focus: Option<String>,
        /// Swarm flow: swarm, art_direction, video_direction
        #[arg(long)]
        flow: Option<String>,
        /// Swarm: keep advancing on auto-pilot until the final phase
        #[arg(long)]
        autopilot: bool,
    },
}

fn parse_variant<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, EngineError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|_| EngineError::InvalidRequest(format!("unknown option: {value}")))
}

fn cli_config(
    engine: &Engine,
    topology: Topology,
    focus: Option<&str>,
    flow: Option<&str>,
) -> Result<TopologyConfig, EngineError> {
    Ok(match topology {
        Topology::Refine => {
            let mut refine: RefineConfig = engine.config().refine.clone();
            if let Some(focus) = focus {
                refine.focus = parse_variant::<FocusDimension>(focus)?;
            }
            TopologyConfig::Refine(refine)
        }
        Topology::Swarm => {
            let preset = match flow {
                Some(flow) => parse_variant::<FlowPreset>(flow)?,
                None => FlowPreset::default(),
            };
            TopologyConfig::Swarm(SwarmConfig::new(preset))
        }
        other => engine.default_config(other),
    })
}

/// The server keeps user keys across restarts; one-shot runs stay in memory
fn with_default_store(mut config: EngineConfig, serving: bool) -> EngineConfig {
    if serving && config.credentials_db.is_none() {
        config.credentials_db = Some(SqliteCredentialStore::DEFAULT_PATH.into());
    }
    config
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    if let Some(result) = &snapshot.result {
        for stage in result.history() {
            let marker = if stage.succeeded { "ok" } else { "failed" };
            println!("--- {} [{} / {}] ---", stage.role_label, stage.provider, marker);
            match &stage.error_message {
                Some(message) => println!("{message}"),
                None => println!("{}", stage.parsed().display_text()),
            }
        }
        if let RunResult::Swarm(session) = result {
            for directive in &session.directives {
                println!("manager: {}", directive.reply_text);
            }
        }
    }
    if let Some(error) = &snapshot.error {
        eprintln!("Error ({}): {}", error.code, error.message);
    }
}

async fn run_once(
    session: &Session,
    prompt: String,
    topology: Topology,
    focus: Option<String>,
    flow: Option<String>,
    autopilot: bool,
) -> anyhow::Result<()> {
    let config = cli_config(session.engine(), topology, focus.as_deref(), flow.as_deref())?;
    let request = ExecutionRequest::new(prompt, config)?;

    let mut snapshot = session.start_run(request).await?;
    if topology == Topology::Swarm && autopilot {
        while snapshot.error.is_none() {
            match &snapshot.result {
                Some(RunResult::Swarm(swarm)) if !swarm.terminal => {
                    snapshot = session.confirm(None).await?;
                }
                _ => break,
            }
        }
    }

    print_snapshot(&snapshot);
    if let Some(artifact) = session.latest_artifact().await {
        println!("=== final ===\n{artifact}");
    }
    Ok(())
}

async fn run_server() -> anyhow::Result<()> {
    let args = Args::parse();

    let _ = dotenvy::from_path(".prism/.env");

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    let serving = !matches!(args.command, Some(CliCommand::Run { .. }));
    let engine = Arc::new(Engine::from_config(with_default_store(config, serving))?);

    let (event_tx, _) = broadcast::channel(256);
    let session = Session::new(engine).with_events(event_tx.clone());

    let port = match args.command {
        Some(CliCommand::Run {
            prompt,
            topology,
            focus,
            flow,
            autopilot,
        }) => {
            return run_once(&session, prompt, topology, focus, flow, autopilot).await;
        }
        Some(CliCommand::Serve { port }) => port,
        None => 8080,
    };

    let app = api::routes(AppState::new(session, event_tx));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Prism server running at http://{}", addr);
    println!("   Runs:        /api/v1/runs, /runs/current, /runs/events");
    println!("   Swarm:       /api/v1/runs/current/confirm, /feedback, /refine");
    println!("   Credentials: /api/v1/credentials, /api/v1/providers");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    run_server().await
}
