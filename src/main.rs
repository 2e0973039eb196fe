use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use cryptodash::api::{
    AccountBackend, BinanceClient, FallbackAccount, GatewayClient, SimulatedAccount,
};
use cryptodash::config::{Settings, MAX_HORIZON_DAYS};
use cryptodash::poller::Poller;
use cryptodash::signal::SeededSignal;
use cryptodash::web::{self, AppState};
use cryptodash::SampleStore;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cryptodash", about = "BTC price and account equity dashboard")]
struct Cli {
    /// Config file (defaults to ./cryptodash.{toml,yaml,json} when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the poller and the dashboard server
    Serve,
    /// Delete samples older than the retention horizon once and exit
    Purge {
        /// Override `retention.horizon_days`
        #[arg(long)]
        days: Option<i64>,
    },
    /// Print row counts and the latest stored samples
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging()?;

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Purge { days } => purge(settings, days).await,
        Command::Stats => stats(settings).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("cryptodash=info,tower_http=info"))?,
        )
        .init();
    Ok(())
}

fn build_account(settings: &Settings, prices: &BinanceClient) -> Result<AccountBackend> {
    let timeout = settings.poller.adapter_timeout();
    let hold = settings
        .simulation
        .hold()
        .context("simulation.hold_secs is out of range")?;
    let simulated = || {
        SimulatedAccount::new(
            prices.clone(),
            &settings.price.symbol,
            SeededSignal::new(settings.simulation.seed, hold),
        )
    };

    let account = &settings.account;
    let gateway = match (&account.base_url, &account.account_id, &account.token) {
        (Some(url), Some(id), Some(token)) => Some(
            GatewayClient::new(url, id, token, timeout)
                .context("Failed to build brokerage gateway client")?,
        ),
        _ => None,
    };

    Ok(match gateway {
        Some(gateway) if account.simulate_on_failure => {
            AccountBackend::GatewayWithFallback(FallbackAccount::new(gateway, simulated()))
        }
        Some(gateway) => AccountBackend::Gateway(gateway),
        None => AccountBackend::Simulated(simulated()),
    })
}

// ============================================================================
// Commands
// ============================================================================

async fn serve(settings: Settings) -> Result<()> {
    tracing::info!("🚀 cryptodash starting");

    let store = SampleStore::open(&settings.database.url)
        .await
        .context("Failed to open sample store")?;

    let prices = BinanceClient::new(
        &settings.price.base_url,
        &settings.price.symbol,
        settings.price.requests_per_second,
        settings.poller.adapter_timeout(),
    )
    .context("Failed to build price client")?;
    let account = build_account(&settings, &prices)?;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Database: {}", settings.database.url);
    tracing::info!("  Price source: {} ({})", settings.price.base_url, prices.symbol());
    tracing::info!("  Account: {}", account.describe());
    tracing::info!("  Retention: {} days", settings.retention.horizon_days);

    let poller = Poller::new(
        prices,
        account,
        store.clone(),
        settings.poller.clone(),
        settings.retention.clone(),
    );

    let state = AppState {
        store: store.clone(),
        prices: poller.price_reader(),
        equity: poller.equity_reader(),
        poll_state: poller.state(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut poller_task = tokio::spawn(poller.run(shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind))?;
    tracing::info!("🌐 Dashboard listening on http://{}", settings.server.bind);

    let mut server_rx = shutdown_tx.subscribe();
    let server = axum::serve(listener, web::router(state)).with_graceful_shutdown(async move {
        let _ = server_rx.wait_for(|stop| *stop).await;
    });
    let mut server_task = tokio::spawn(async move { server.await });

    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = &mut poller_task => {
            tracing::error!("Poller exited: {:?}", result);
        }
        result = &mut server_task => {
            tracing::error!("Server exited: {:?}", result);
        }
    }

    let _ = shutdown_tx.send(true);
    if !poller_task.is_finished() {
        let _ = poller_task.await;
    }
    if !server_task.is_finished() {
        let _ = server_task.await;
    }
    store.close().await;

    tracing::info!("👋 cryptodash stopped");
    Ok(())
}

async fn purge(settings: Settings, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(settings.retention.horizon_days);
    anyhow::ensure!(
        (1..=MAX_HORIZON_DAYS).contains(&days),
        "--days must be between 1 and {MAX_HORIZON_DAYS}"
    );
    let horizon = Duration::try_days(days).context("--days is out of range")?;

    let store = SampleStore::open(&settings.database.url).await?;
    let (prices, equity) = store.purge_older_than(horizon, Utc::now()).await?;

    println!("Deleted {prices} price samples and {equity} equity samples older than {days} days");
    store.close().await;
    Ok(())
}

async fn stats(settings: Settings) -> Result<()> {
    let store = SampleStore::open(&settings.database.url).await?;

    println!("Database: {}", settings.database.url);
    println!("Price samples:  {}", store.count_prices().await?);
    println!("Equity samples: {}", store.count_equity().await?);

    match store.latest_price().await? {
        Some(sample) => println!("Latest price:  {} at {}", sample.price, sample.captured_at),
        None => println!("Latest price:  -"),
    }
    match store.latest_equity().await? {
        Some(sample) => println!(
            "Latest equity: {} ({}) at {}",
            sample.equity, sample.position, sample.captured_at
        ),
        None => println!("Latest equity: -"),
    }

    store.close().await;
    Ok(())
}
