// Dispatch entry point.
//
// Every subcommand starts the same way:
// 1. Load config (copying defaults on first run)
// 2. Initialize tracing (log to file, stdout is for command output)
// 3. Run the subcommand

mod client;
mod report;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{error, info};

use dispatch_core::app;
use dispatch_core::config::{self, Config};
use dispatch_core::db::Database;
use dispatch_core::notify::route_assignment;
use dispatch_core::routing;
use dispatch_core::shipping::{manifest, ShippingOrder};
use dispatch_core::ws_server;

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(about = "Delivery route planning and order notifications")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Group orders into driver routes and order the stops
    Plan {
        /// Order manifest CSV. Uses the imported orders when omitted
        #[arg(long)]
        orders: Option<PathBuf>,

        /// Number of routes to plan (overrides config)
        #[arg(short = 'k', long)]
        clusters: Option<usize>,

        /// Seed for cluster initialization (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,

        /// Store the plan in the database
        #[arg(long)]
        save: bool,

        /// Queue a delivery notification for each assigned driver
        #[arg(long)]
        notify: bool,
    },

    /// Load an order manifest into the database
    Import {
        #[arg(long)]
        orders: PathBuf,
    },

    /// Run the notification server until Ctrl+C
    Serve,

    /// Subscribe to a user's notifications and print every frame
    Listen {
        #[arg(long)]
        user: String,

        /// Server URL (defaults to the configured websocket address)
        #[arg(long)]
        url: Option<String>,
    },

    /// Send one order event (JSON file) to the notification server
    Publish {
        #[arg(long)]
        event: PathBuf,

        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("failed to load configuration")?;
    init_tracing(&config)?;
    info!("dispatch starting up");

    match cli.command {
        Command::Plan {
            orders,
            clusters,
            seed,
            json,
            save,
            notify,
        } => plan(&config, orders, clusters, seed, json, save, notify),
        Command::Import { orders } => import(&config, &orders),
        Command::Serve => serve(config).await,
        Command::Listen { user, url } => {
            let url = url.unwrap_or_else(|| config.websocket.url());
            client::listen(&url, &user).await
        }
        Command::Publish { event, url } => {
            let url = url.unwrap_or_else(|| config.websocket.url());
            client::publish(&url, &event).await
        }
    }
}

fn open_db(config: &Config) -> anyhow::Result<Database> {
    let path = config.database.resolve_path()?;
    let db = Database::open(&path).context("failed to open database")?;
    info!("Database opened at {}", path);
    Ok(db)
}

fn plan(
    config: &Config,
    orders_path: Option<PathBuf>,
    clusters: Option<usize>,
    seed: Option<u64>,
    json: bool,
    save: bool,
    notify: bool,
) -> anyhow::Result<()> {
    let db = if orders_path.is_none() || save || notify {
        Some(open_db(config)?)
    } else {
        None
    };

    let orders: Vec<ShippingOrder> = match (&orders_path, &db) {
        (Some(path), _) => manifest::load_orders(path)?,
        (None, Some(db)) => db.load_orders(None)?,
        (None, None) => Vec::new(),
    };
    info!("Planning over {} orders", orders.len());

    let mut options = config.routing.plan_options();
    if let Some(k) = clusters {
        options.clusters = k;
    }

    let plan = match seed.or(config.routing.seed) {
        Some(seed) => routing::plan_routes(
            &orders,
            &config.depot,
            &config.drivers,
            &options,
            &mut StdRng::seed_from_u64(seed),
        ),
        None => routing::plan_routes(
            &orders,
            &config.depot,
            &config.drivers,
            &options,
            &mut StdRng::from_entropy(),
        ),
    }
    .context("route planning failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", report::summary(&plan));
    }

    if let Some(db) = &db {
        if save {
            let id = db.save_route_plan(&plan)?;
            info!("Saved route plan {}", id);
            eprintln!("Saved route plan #{id}");
        }
        if notify {
            let mut sent = 0;
            for route in &plan.routes {
                if let Some(n) = route_assignment(route) {
                    db.insert_notification(&n)?;
                    sent += 1;
                }
            }
            info!("Queued {} driver notification(s)", sent);
            eprintln!("Queued {sent} driver notification(s)");
        }
    }

    Ok(())
}

fn import(config: &Config, path: &Path) -> anyhow::Result<()> {
    let orders = manifest::load_orders(path)?;
    let db = open_db(config)?;
    let written = db.import_orders(&orders)?;
    info!("Imported {} orders from {}", written, path.display());
    println!(
        "Imported {written} orders ({} stored in total)",
        db.order_count()?
    );
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let db = open_db(&config)?;
    let host = config.websocket.host.clone();
    let port = config.websocket.port;

    let listener = ws_server::TungsteniteListener::bind(&host, port)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {host}:{port}"))?;
    let local_addr = listener.local_addr()?;

    let (ws_tx, ws_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    let state = app::AppState::new(config, db);
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, cmd_rx, state).await {
            error!("Application loop error: {}", e);
        }
    });

    println!("Notification server listening on ws://{local_addr} (Ctrl+C to stop)");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    let _ = cmd_tx.send(app::AppCommand::Shutdown).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    // The accept loop runs until its channel closes; don't wait on a client.
    ws_handle.abort();

    info!("Notification server shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file, keeping stdout for command output.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join(&config.logging.directory);
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("dispatch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
