//! amiga-node: the donation cycle server.
//!
//! Startup sequence:
//!   1. Load and validate the cycle parameters
//!   2. Open (or initialise) the state database
//!   3. Seed the administrator account if the DB has none
//!   4. Start the JSON-RPC 2.0 server
//!   5. Wait for ctrl-c, then flush and exit

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use amiga_core::constants::DEFAULT_ADMIN_USERNAME;
use amiga_core::cycle::CycleParams;
use amiga_rpc::server::RpcServerState;
use amiga_rpc::RpcServer;
use amiga_state::{ensure_admin_seed, CycleEngine, StateDb};

const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

#[derive(Parser, Debug)]
#[command(
    name = "amiga-node",
    version,
    about = "Referral donation cycle server"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.amiga/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8645")]
    rpc_addr: SocketAddr,

    /// Path to a cycle parameters JSON file. Missing fields take defaults.
    #[arg(long)]
    cycle_params: Option<PathBuf>,

    /// Username of the administrator created on first start.
    #[arg(long, default_value = DEFAULT_ADMIN_USERNAME)]
    admin_username: String,

    /// Password of the administrator created on first start.
    #[arg(long, env = "AMIGA_ADMIN_PASSWORD")]
    admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,amiga=debug")),
        )
        .init();

    let args = Args::parse();
    info!("amiga node starting");

    // ── Cycle parameters ──────────────────────────────────────────────────────
    let params = load_cycle_params(args.cycle_params.as_deref())?;
    info!(
        quota = params.quota,
        max_stage = params.max_stage,
        terminal_policy = ?params.terminal_policy,
        "cycle parameters loaded"
    );

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);
    let engine = Arc::new(
        CycleEngine::new(Arc::clone(&db), params).context("building cycle engine")?,
    );

    // ── Administrator seed ────────────────────────────────────────────────────
    let password = match args.admin_password {
        Some(p) => p,
        None => {
            warn!("no --admin-password or AMIGA_ADMIN_PASSWORD set; using the default. DO NOT USE IN PRODUCTION.");
            DEFAULT_ADMIN_PASSWORD.to_string()
        }
    };
    let now = chrono::Utc::now().timestamp();
    match ensure_admin_seed(&engine, &args.admin_username, &password, now)
        .context("seeding administrator")?
    {
        Some(id) => info!(participant = %id, "fresh database: administrator created"),
        None => info!("existing administrator found; skipping seed"),
    }

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState { engine: Arc::clone(&engine) });
    let (_addr, rpc_handle) = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    info!(participants = db.participant_count(), "node ready");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    info!("shutting down");
    let _ = rpc_handle.stop();
    rpc_handle.stopped().await;
    db.flush().context("flushing state database")?;
    Ok(())
}

/// Load cycle parameters from a JSON file, or use the defaults.
fn load_cycle_params(path: Option<&Path>) -> anyhow::Result<CycleParams> {
    let params = match path {
        Some(p) => {
            let json = std::fs::read_to_string(p)
                .with_context(|| format!("reading cycle params from {}", p.display()))?;
            serde_json::from_str(&json).context("parsing cycle params JSON")?
        }
        None => CycleParams::default(),
    };
    params.validate().context("invalid cycle params")?;
    Ok(params)
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
