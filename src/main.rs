//! # dexdash
//!
//! Command-line driver: wires settings, telemetry, local storage, the
//! connection context, the account cache and the analytics client together.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dexdash_analytics::{AnalyticsClient, Resolution};
use dexdash_core::{AccountAddress, Endpoint};
use dexdash_engine::{AccountCache, AccountSnapshot, AccountWatcher, AppContext, ConnectionContext, ObserveOptions};
use dexdash_rpc::RpcClientFactory;
use dexdash_settings::DashSettings;
use dexdash_store::{Database, LocalStorage};
use dexdash_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use tracing::{info, warn, Level};

/// Market dashboard for the command line.
#[derive(Parser, Debug)]
#[command(name = "dexdash", about = "DEX market dashboard")]
struct Cli {
    /// Settings file (defaults to ~/.dexdash/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Local storage database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available RPC endpoints.
    Endpoints,
    /// Select the RPC endpoint used from now on.
    UseEndpoint { name: String },
    /// Add a user-supplied RPC endpoint.
    AddEndpoint { name: String, url: String },
    /// Follow an account until interrupted.
    Watch {
        address: String,
        /// Re-read interval in milliseconds (overrides settings).
        #[arg(long)]
        refresh_ms: Option<u64>,
    },
    /// Print price candles for a market.
    Candles {
        market: String,
        #[arg(long, default_value = "1h")]
        resolution: Resolution,
        /// How far back to fetch.
        #[arg(long, default_value = "24")]
        hours: u32,
    },
    /// Print recent trades for a market.
    Trades {
        market: String,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Print 24h statistics and top of book for a market.
    Stats { market: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => dexdash_settings::load_settings_from_path(path),
        None => dexdash_settings::load_settings(),
    }
    .context("loading settings")?;
    if let Some(db_path) = &cli.db_path {
        settings.storage.db_path = db_path.clone();
    }

    let _telemetry = init_telemetry(&telemetry_config(&settings)).context("installing logger")?;

    match cli.command {
        Command::Endpoints => list_endpoints(&settings).await,
        Command::UseEndpoint { name } => use_endpoint(&settings, &name).await,
        Command::AddEndpoint { name, url } => add_endpoint(&settings, name, url).await,
        Command::Watch {
            address,
            refresh_ms,
        } => watch(&settings, &address, refresh_ms).await,
        Command::Candles {
            market,
            resolution,
            hours,
        } => candles(&settings, &market, resolution, hours).await,
        Command::Trades { market, limit } => trades(&settings, &market, limit).await,
        Command::Stats { market } => stats(&settings, &market).await,
    }
}

fn telemetry_config(settings: &DashSettings) -> TelemetryConfig {
    let log_level = parse_level(&settings.logging.level).unwrap_or(Level::INFO);
    let module_levels = settings
        .logging
        .module_levels
        .iter()
        .filter_map(|(module, level)| Some((module.clone(), parse_level(level)?)))
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        json: settings.logging.json,
    }
}

async fn connection_context(settings: &DashSettings) -> Result<ConnectionContext> {
    let db = Database::open(&settings.storage.db_path).context("opening local storage")?;
    let factory = RpcClientFactory::new(
        settings.rpc.request_timeout(),
        settings.rpc.subscription_channel_capacity,
    );
    let context = ConnectionContext::new(LocalStorage::new(db), Arc::new(factory), settings.rpc.commitment)
        .await
        .context("opening connection")?;
    Ok(context)
}

fn analytics(settings: &DashSettings) -> Result<AnalyticsClient> {
    AnalyticsClient::new(settings.analytics.url.clone(), settings.analytics.timeout())
        .context("building analytics client")
}

async fn list_endpoints(settings: &DashSettings) -> Result<()> {
    let connections = connection_context(settings).await?;
    let selected = connections.endpoint();
    for endpoint in connections.endpoints() {
        let marker = if endpoint.name == selected.name { "*" } else { " " };
        let origin = if endpoint.custom { "custom" } else { "built-in" };
        println!("{marker} {:<16} {:<8} {}", endpoint.name, origin, endpoint.url);
    }
    connections.shutdown().await;
    Ok(())
}

async fn use_endpoint(settings: &DashSettings, name: &str) -> Result<()> {
    let connections = connection_context(settings).await?;
    let endpoint = connections.set_endpoint(name).await?;
    println!("using {} ({})", endpoint.name, endpoint.url);
    connections.shutdown().await;
    Ok(())
}

async fn add_endpoint(settings: &DashSettings, name: String, url: String) -> Result<()> {
    let connections = connection_context(settings).await?;
    let endpoint = connections.add_custom_endpoint(Endpoint::custom(name, url))?;
    println!("added {} ({})", endpoint.name, endpoint.url);
    connections.shutdown().await;
    Ok(())
}

async fn watch(settings: &DashSettings, address: &str, refresh_ms: Option<u64>) -> Result<()> {
    let address = AccountAddress::parse(address)?;
    let refresh = refresh_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.cache.refresh_interval());

    let connections = connection_context(settings).await?;
    let app = AppContext::new()
        .with_connection(connections.clone())
        .with_accounts(AccountCache::new());

    let mut watcher = AccountWatcher::spawn(
        app.accounts()?.clone(),
        app.connection()?,
        address.clone(),
        ObserveOptions::with_refresh_interval(refresh),
    );
    info!(%address, endpoint = %connections.endpoint().name, ?refresh, "watching account");

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            result = &mut interrupted => {
                if let Err(e) = result {
                    warn!(error = %e, "signal handler failed");
                }
                break;
            }
            _ = watcher.changed() => print_snapshot(&address, &watcher.snapshot()),
        }
    }

    drop(watcher);
    connections.shutdown().await;
    Ok(())
}

fn print_snapshot(address: &AccountAddress, snapshot: &AccountSnapshot) {
    let now = Utc::now().format("%H:%M:%S");
    match (snapshot.is_loaded(), snapshot.value()) {
        (false, _) => println!("{now} {address} loading"),
        (true, None) => println!("{now} {address} does not exist"),
        (true, Some(info)) => println!(
            "{now} {address} lamports={} data_len={} owner={}",
            info.lamports,
            info.data.len(),
            info.owner
        ),
    }
}

async fn candles(settings: &DashSettings, market: &str, resolution: Resolution, hours: u32) -> Result<()> {
    let client = analytics(settings)?;
    let to = Utc::now();
    let from = to - chrono::Duration::hours(i64::from(hours));
    let candles = client.price_candles(market, resolution, from, to).await?;

    println!("{market} {resolution} candles, last {hours}h");
    for candle in candles {
        let opened = candle
            .opened_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| candle.time.to_string());
        println!(
            "{opened}  o={:.4} h={:.4} l={:.4} c={:.4} v={:.2}",
            candle.open, candle.high, candle.low, candle.close, candle.volume
        );
    }
    Ok(())
}

async fn trades(settings: &DashSettings, market: &str, limit: u32) -> Result<()> {
    let client = analytics(settings)?;
    for trade in client.trades(market, limit).await? {
        let at = trade
            .executed_at()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| trade.time.to_string());
        println!(
            "{at} {:<4} {:>12.4} x {:<12.4} ({:.2})",
            format!("{:?}", trade.side).to_lowercase(),
            trade.price,
            trade.size,
            trade.notional()
        );
    }
    Ok(())
}

async fn stats(settings: &DashSettings, market: &str) -> Result<()> {
    let client = analytics(settings)?;
    let (stats, depth) = tokio::try_join!(client.market_stats(market), client.depth(market))?;

    println!("{}", stats.market);
    println!("  last    {:.4} ({:+.2}%)", stats.last_price, stats.change_24h * 100.0);
    println!("  24h     high {:.4} low {:.4} volume {:.2}", stats.high_24h, stats.low_24h, stats.volume_24h);
    match (depth.best_bid(), depth.best_ask(), depth.spread()) {
        (Some(bid), Some(ask), Some(spread)) => println!(
            "  book    bid {:.4} x {:.4} / ask {:.4} x {:.4} spread {:.4}",
            bid.price, bid.size, ask.price, ask.size, spread
        ),
        _ => println!("  book    empty side"),
    }
    Ok(())
}
