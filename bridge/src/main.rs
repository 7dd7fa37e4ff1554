//! Lottery Bridge
//!
//! Runs the periodic draw loop against the lottery contract alongside the
//! health server.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use lottery_bridge::{
    BridgeConfig, BridgeStats, DrawService, FileDrawLedger, HealthServer, HealthState,
    ResiliencePolicy, TonCenterGateway,
};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lottery_bridge=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .init();
    }
}

fn load_config() -> Result<BridgeConfig> {
    match std::env::var("LOTTERY_CONFIG_FILE") {
        Ok(path) if !path.is_empty() => {
            info!(path = %path, "Loading configuration file");
            BridgeConfig::from_file(path)
        }
        _ => BridgeConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Lottery bridge starting"
    );

    let config = load_config()?;

    info!(
        ton_api = %config.ton.base_url,
        contract = %config.ton.contract_address,
        gas_station = %config.ton.gas_station_address,
        check_interval = config.draw_check_interval_secs,
        ledger = %config.draw_ledger_path,
        health_port = config.health_port,
        "Configuration loaded"
    );

    let gateway = TonCenterGateway::new(&config.ton, ResiliencePolicy::new(&config.resilience))?;
    let ledger = FileDrawLedger::open(&config.draw_ledger_path).await?;
    info!(path = %ledger.path().display(), "Draw ledger opened");

    // Create shared stats
    let stats = Arc::new(RwLock::new(BridgeStats::default()));

    // Create health state
    let health_state = Arc::new(HealthState::new(config.clone(), Arc::clone(&stats)));

    let service =
        DrawService::new(&config, gateway, ledger).with_health_state(Arc::clone(&health_state));

    let health_server = HealthServer::new(Arc::clone(&health_state), config.health_port);

    // Run both services concurrently
    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                error!(error = %e, "Draw service failed");
                return Err(e);
            }
        }
        result = health_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "Health server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Lottery bridge stopped");
    Ok(())
}
