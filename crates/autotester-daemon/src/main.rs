//! autotesterd — daemon wiring for the auto-tester control core.
//!
//! Opens the store and the bus, starts the controller (queue worker plus
//! schedulers), and serves the REST surface until ctrl-c.

mod api;
mod i2c;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use autotester_core::app::Controller;
use autotester_core::device::SimulatedBus;
use autotester_core::ports::bus::SharedBus;
use autotester_core::ports::clock::SystemClock;
use autotester_core::ports::store::Store;
use autotester_core::store::{MemoryStore, RedbStore};

/// Auto-tester control daemon.
#[derive(Parser, Debug)]
#[command(name = "autotesterd", version, about, long_about = None)]
struct Args {
    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:8090")]
    listen: SocketAddr,

    /// Path to the redb database file
    #[arg(long, default_value = "autotester.redb")]
    db: PathBuf,

    /// I²C character device
    #[arg(long, default_value = "/dev/i2c-1")]
    i2c: PathBuf,

    /// Run against a simulated analyzer (and an in-memory store) instead
    /// of real hardware
    #[arg(long)]
    dev: bool,

    /// Log filter (tracing env-filter syntax)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&args.log).context("invalid --log filter")?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (store, bus): (Arc<dyn Store>, SharedBus) = if args.dev {
        info!("dev mode: simulated analyzer, in-memory store");
        (Arc::new(MemoryStore::new()), SharedBus::new(SimulatedBus::new()))
    } else {
        let store = RedbStore::open(&args.db)
            .with_context(|| format!("opening store at {}", args.db.display()))?;
        let bus = i2c::LinuxBus::open(&args.i2c)
            .with_context(|| format!("opening bus at {}", args.i2c.display()))?;
        (Arc::new(store), SharedBus::new(bus))
    };

    let controller = Arc::new(Controller::new(store, bus, Arc::new(SystemClock)));
    let cancel = CancellationToken::new();
    Arc::clone(&controller)
        .start(cancel.clone())
        .await
        .context("starting controller")?;

    let app = api::router(Arc::clone(&controller));
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %args.listen, "listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            cancel.cancel();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving")?;

    controller.shutdown().await;
    Ok(())
}
