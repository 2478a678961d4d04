use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use server::api::{self, ApiState};
use server::app::{Application, Listeners, SharedApp, SpawnPolicy, TickListener};
use server::config;
use server::db::{Database, DB_URL_ENV};
use server::retirement::RetirementListener;
use server::snapshot::{self, SnapshotListener};
use server::ticker::Ticker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const LISTEN_ADDR: (&str, u16) = ("0.0.0.0", 8080);

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Game config JSON file
    #[clap(short = 'c', long, value_name = "file")]
    config_file: PathBuf,

    /// Static files root directory
    #[clap(short = 'w', long, value_name = "dir")]
    www_root: PathBuf,

    /// Advance the simulation automatically every N milliseconds; disables
    /// the tick endpoint
    #[clap(short = 't', long, value_name = "milliseconds")]
    tick_period: Option<u64>,

    /// Spawn dogs at random positions instead of the first road's start
    #[clap(long)]
    randomize_spawn_points: bool,

    /// File the game state is saved to and restored from
    #[clap(long, value_name = "file")]
    state_file: Option<PathBuf>,

    /// Save the state automatically every N milliseconds
    #[clap(long, value_name = "milliseconds")]
    save_state_period: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info");
    }

    let args = Args::parse();
    if args.tick_period == Some(0) {
        bail!("tick-period must be > 0");
    }
    if args.save_state_period == Some(0) {
        bail!("save-state-period must be > 0");
    }

    let db_url = std::env::var(DB_URL_ENV)
        .with_context(|| format!("{DB_URL_ENV} environment variable not found"))?;

    let game = config::load_game(&args.config_file)?;
    let db = Database::connect(&db_url, 1)
        .await
        .context("could not connect to the database")?;

    let spawn_policy = if args.randomize_spawn_points {
        SpawnPolicy::Random
    } else {
        SpawnPolicy::FirstRoadStart
    };
    let mut application = Application::new(game, spawn_policy);

    // Restore the previous state before anything can observe the world.
    if let Some(path) = &args.state_file {
        snapshot::load_state(&mut application, path)
            .with_context(|| format!("could not restore state from {}", path.display()))?;
    }

    let app: SharedApp = Arc::new(Mutex::new(application));
    let listeners = Arc::new(Listeners::default());

    let save_listener = args.state_file.as_ref().map(|path| {
        Arc::new(TickListener::Snapshot(SnapshotListener::new(
            path.clone(),
            args.save_state_period.map(Duration::from_millis),
        )))
    });
    if let (Some(listener), Some(_)) = (&save_listener, args.save_state_period) {
        listeners.add(listener);
    }

    let retirement_listener = Arc::new(TickListener::Retirement(RetirementListener::new(
        db.clone(),
    )));
    listeners.add(&retirement_listener);

    let ticker_handle = args.tick_period.map(|period| {
        Ticker::new(
            app.clone(),
            listeners.clone(),
            Duration::from_millis(period),
        )
        .start()
    });

    let state = ApiState {
        app: app.clone(),
        listeners: listeners.clone(),
        db,
    };
    let router = api::build_router(state, args.www_root, args.tick_period.is_none());

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR)
        .await
        .with_context(|| format!("could not bind {}:{}", LISTEN_ADDR.0, LISTEN_ADDR.1))?;
    info!("server started on {}:{}", LISTEN_ADDR.0, LISTEN_ADDR.1);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop the tick domain, then run the final snapshot with nothing else
    // able to mutate state.
    if let Some(handle) = ticker_handle {
        handle.abort();
    }
    if let Some(listener) = &save_listener {
        if let TickListener::Snapshot(snapshot_listener) = listener.as_ref() {
            let application = app.lock().await;
            snapshot_listener.save(&application);
        }
    }

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
