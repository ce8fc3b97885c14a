use api_client::FinnhubClient;
use chrono::Utc;
use clap::{Parser, Subcommand};
use configuration::{load_config_from, Config};
use database::{connect, run_migrations, PgStore, Store};
use engine::{Accounts, Catalog, PriceRefresher, Services, StoredPrices, Sweeper};
use executor::{ExecutionEngine, MarketClock};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use web_server::{run_server, AppState};

/// The main entry point for the Meridian paper-trading platform.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if there is one.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _guard = init_tracing();
    let config = load_config_from(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Sweep => sweep(config).await,
        Commands::RefreshPrices => refresh_prices(config).await,
        Commands::Migrate => {
            let pool = connect(&config.database).await?;
            run_migrations(&pool).await?;
            tracing::info!("Migrations applied.");
            Ok(())
        }
        Commands::AddUser(args) => {
            let accounts = Accounts::new(open_store(&config).await?);
            let user = accounts
                .register_user(&args.username, &args.email, args.cash, Utc::now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        Commands::AddStock(args) => {
            let catalog = Catalog::new(open_store(&config).await?);
            let stock = catalog
                .add(&args.ticker, &args.company, args.sector, args.price, Utc::now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&stock)?);
            Ok(())
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A paper-trading platform: portfolios, orders and a scheduled fill engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. A missing file means defaults.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API together with the order sweeper and price refresher.
    Serve,
    /// Evaluate every pending order once and print the report.
    Sweep,
    /// Fetch a fresh quote for every stock once.
    RefreshPrices,
    /// Apply the database migrations and exit.
    Migrate,
    /// Register a user with a starting cash balance.
    AddUser(AddUserArgs),
    /// List a new tradable stock.
    AddStock(AddStockArgs),
}

#[derive(Parser)]
struct AddUserArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    /// Starting cash balance (e.g., "10000").
    #[arg(long, default_value = "0")]
    cash: Decimal,
}

#[derive(Parser)]
struct AddStockArgs {
    /// The ticker symbol (e.g., "AAPL").
    #[arg(long)]
    ticker: String,
    #[arg(long)]
    company: String,
    #[arg(long)]
    sector: Option<String>,
    /// The initial market price.
    #[arg(long)]
    price: Decimal,
}

// ==============================================================================
// Command Logic
// ==============================================================================

/// Connects, migrates and wraps the pool in the Postgres store.
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let pool = connect(&config.database).await?;
    run_migrations(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

fn build_refresher(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<PriceRefresher> {
    let client = FinnhubClient::new(&config.prices)?;
    Ok(PriceRefresher::new(
        store,
        Arc::new(client),
        config.prices.interval(),
    ))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let clock = MarketClock::from_config(&config.market);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let engine = ExecutionEngine::new(Arc::clone(&store), clock);
    let prices = Arc::new(StoredPrices::new(Arc::clone(&store)));
    let sweeper = Sweeper::new(engine, prices, config.sweeper.interval());
    tasks.push(tokio::spawn(sweeper.run(shutdown_rx.clone())));

    if config.prices.enabled && !config.prices.api_key.is_empty() {
        let refresher = build_refresher(&config, Arc::clone(&store))?;
        tasks.push(tokio::spawn(refresher.run(shutdown_rx.clone())));
    } else {
        tracing::info!("Price refresher disabled (prices.enabled is false or no API key).");
    }

    let state = AppState {
        services: Services::new(store, clock),
    };
    let result = run_server(config.server.addr, state, shutdown_signal()).await;

    // The server is down; stop the background tasks and wait for them.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task panicked.");
        }
    }
    result
}

async fn sweep(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let clock = MarketClock::from_config(&config.market);
    let engine = ExecutionEngine::new(Arc::clone(&store), clock);
    let sweeper = Sweeper::new(
        engine,
        Arc::new(StoredPrices::new(store)),
        config.sweeper.interval(),
    );

    let report = sweeper.run_once(Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn refresh_prices(config: Config) -> anyhow::Result<()> {
    if config.prices.api_key.is_empty() {
        anyhow::bail!("prices.api_key (MERIDIAN__PRICES__API_KEY) must be set to refresh prices");
    }
    let store = open_store(&config).await?;
    let report = build_refresher(&config, store)?
        .refresh_once(Utc::now())
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Installs the global subscriber. The returned guard flushes buffered log
/// lines on drop and must live until the process exits.
fn init_tracing() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meridian=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
    guard
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received.");
}
