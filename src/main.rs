//! Liquidation engine
//!
//! Watches lending protocols for liquidation signals, validates each
//! opportunity against price, balance and profit gates, and submits the
//! liquidation transaction from a local signer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_api::{PriceApi, PriceApiClient};
use liquidator_chain::gas::create_gas_strategy;
use liquidator_chain::{
    ChainClient, EventSource, GasOracle, NonceManager, ProviderManager, TransactionSigner,
    WsLogSubscriber,
};
use liquidator_core::{
    AssetValuer, BalanceValidator, BotConfig, DeploymentConfig, LiquidationMetrics,
    LiquidationPipeline, OpportunityValidator, Orchestrator, PriceOracle, ProtocolAdapters,
    TokenRegistry, TransactionExecutor,
};

/// Environment variable names.
mod env {
    pub const DEPLOYMENT_FILE: &str = "DEPLOYMENT_FILE";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

const DEFAULT_DEPLOYMENT: &str = "deployments/mainnet.toml";
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Deployment file: first argument, then DEPLOYMENT_FILE, then the default
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(env::DEPLOYMENT_FILE).ok())
        .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string());
    let deployment = DeploymentConfig::from_file(&path)?;
    let bot = deployment.bot_config();
    bot.validate().context("invalid bot configuration")?;
    bot.log_config();

    info!(
        deployment = %path,
        chain = %deployment.chain.name,
        chain_id = deployment.chain.chain_id,
        protocols = ?deployment.protocols.enabled_kinds(),
        "Starting liquidation engine"
    );

    let components = initialize_components(&deployment, &bot).await?;
    let Components {
        orchestrator,
        event_source,
        gas,
    } = components;

    let status_task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let status = orchestrator.status().await;
                match serde_json::to_string(&status) {
                    Ok(json) => info!(status = %json, "Status"),
                    Err(e) => warn!(error = %e, "Could not serialize status"),
                }
            }
        })
    };

    let channels = event_source
        .start()
        .await
        .context("opening event subscriptions")?;

    info!("Starting main event loop...");
    let outcome = tokio::select! {
        result = orchestrator.run(channels) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    event_source.stop();
    gas.stop();
    status_task.abort();

    if let Err(e) = outcome {
        error!(error = %e, "Event ingestion failed; exiting for restart");
        return Err(e.into());
    }
    info!("Liquidation engine stopped");
    Ok(())
}

/// Human-readable output by default, JSON with `LOG_FORMAT=json`.
fn init_tracing() {
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug")),
        )
        .init();
}

struct Components {
    orchestrator: Arc<Orchestrator>,
    event_source: EventSource,
    gas: Arc<GasOracle>,
}

async fn initialize_components(deployment: &DeploymentConfig, bot: &BotConfig) -> Result<Components> {
    info!("Initializing components...");
    let chain_config = &deployment.chain;

    // Provider manager
    let provider = ProviderManager::new(&chain_config.http_url, chain_config.send_url.as_deref()).await?;
    let chain: Arc<dyn ChainClient> = Arc::new(provider);

    // Signer
    let signer = Arc::new(TransactionSigner::from_private_key(
        &chain_config.private_key,
        chain_config.chain_id,
    )?);
    info!(address = %signer.address(), "Transaction signer initialized");

    // Token registry and price oracle
    let registry = Arc::new(TokenRegistry::new(
        deployment.tokens.clone(),
        &chain_config.native_symbol,
        chain_config.wrapped_native,
    ));
    let apis = deployment
        .price_apis
        .iter()
        .map(|config| Ok(Arc::new(PriceApiClient::new(config.clone())?) as Arc<dyn PriceApi>))
        .collect::<Result<Vec<_>>>()?;
    info!(tokens = registry.len(), price_apis = apis.len(), "Token registry loaded");

    let oracle = Arc::new(PriceOracle::with_default_sources(
        chain.clone(),
        registry.clone(),
        apis,
        bot.cache.price_ttl(),
        bot.cache.max_entries,
    ));
    let health = oracle.health_check().await;
    if !health.healthy {
        warn!(last_price = ?health.last_price, "Price oracle unhealthy at startup");
    }

    // Gas oracle
    let gas = Arc::new(GasOracle::new(
        chain.clone(),
        create_gas_strategy(bot.gas.eip1559, bot.gas.priority_fee_wei()),
        bot.gas.oracle_config(),
    ));
    gas.start();

    // Nonces
    let nonces = Arc::new(NonceManager::new(
        chain.clone(),
        signer.address(),
        bot.execution.nonce_refresh(),
    ));
    let next_nonce = nonces.refresh().await?;
    info!(nonce = next_nonce, "Nonce manager synchronized");

    // Protocol adapters
    let valuer = Arc::new(AssetValuer::new(chain.clone(), oracle.clone()));
    let adapters = Arc::new(ProtocolAdapters::from_config(
        &deployment.protocols,
        valuer,
        bot.cache.position_ttl(),
        bot.cache.max_entries,
    ));
    info!(protocols = ?adapters.enabled(), "Protocol adapters configured");

    // Decision and execution
    let balances = Arc::new(BalanceValidator::new(
        chain.clone(),
        registry,
        signer.address(),
        bot.cache.balance_ttl(),
        bot.cache.max_entries,
        bot.balance.min_useful_fraction,
    ));
    let validator = Arc::new(OpportunityValidator::new(
        adapters.clone(),
        oracle.clone(),
        balances.clone(),
        gas.clone(),
        &deployment.protocols,
        bot,
    ));
    let signer_address = signer.address();
    let executor = Arc::new(TransactionExecutor::new(
        chain,
        adapters.clone(),
        gas.clone(),
        nonces,
        signer,
        &bot.execution,
    ));

    let metrics = Arc::new(LiquidationMetrics::new());
    let pipeline = Arc::new(LiquidationPipeline::new(
        validator,
        executor,
        adapters,
        balances,
        metrics.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(pipeline, metrics, oracle, signer_address));

    // Event source
    let event_source = EventSource::new(
        Arc::new(WsLogSubscriber::new(chain_config.ws_url.clone())),
        deployment.protocols.subscriptions(),
        bot.events.source_config(),
    );

    info!("All components initialized");

    Ok(Components {
        orchestrator,
        event_source,
        gas,
    })
}
