//! Stablecoin bridge - step pipeline across Ethereum, Terra and Solana
//!
//! Users compose an ordered list of bridge, swap and deposit steps. Each step
//! estimates as its input changes and executes once activated; the sequencer
//! activates the next step when the previous one completes.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod adapter;
mod api;
mod config;
mod error;
mod metrics;
mod registry;
mod sequencer;
mod step;
mod wallet;

#[cfg(test)]
mod testing;

use adapter::{AdapterSet, OneInchClient, StepInput};
use config::Settings;
use metrics::MetricsServer;
use sequencer::{SequencerEngine, SequencerHandle};
use step::StepRegistry;
use wallet::{
    CosmosWallet, EthersWallet, EvmWallet, LcdWallet, RpcSolanaWallet, SigningExtension,
    SolanaWallet, WalletHub, WalletProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting stablecoin bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let network = settings.network.network_type;
    let registry = Arc::new(settings.active_registry().clone());
    info!("Loaded configuration for {}", network);

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // Connect wallets; a chain whose wallet fails stays disconnected
    let wallets = Arc::new(connect_wallets(&settings, &http).await);
    for summary in wallets.summaries().await {
        info!(
            "{} wallet {} on {} (balance {:?})",
            summary.chain, summary.address, summary.network_type, summary.balance
        );
    }

    // Initialize adapters and the sequencer
    let quoter = Arc::new(OneInchClient::new(http.clone(), &settings.swap.base_url));
    let adapters = Arc::new(AdapterSet::new(
        registry.clone(),
        &settings.execution,
        &settings.swap,
        quoter,
    ));
    let step_registry = Arc::new(StepRegistry::default());

    let shutdown = CancellationToken::new();
    let (engine, sequencer) = SequencerEngine::new(
        step_registry.clone(),
        adapters,
        wallets.clone(),
        &settings.sequencer,
        shutdown.clone(),
    );

    let engine_handle = tokio::spawn(async move {
        if let Err(e) = engine.run().await {
            error!("Sequencer error: {}", e);
        }
    });

    if let Err(e) = preload_steps(&settings, &sequencer).await {
        warn!("Failed to preload steps: {}", e);
    }

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            sequencer: sequencer.clone(),
            registry: step_registry.clone(),
            wallets: wallets.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Stablecoin bridge is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    shutdown.cancel();
    if let Err(e) = engine_handle.await {
        warn!("Sequencer task ended abnormally: {}", e);
    }

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Stablecoin bridge stopped");
    Ok(())
}

async fn connect_wallets(settings: &Settings, http: &reqwest::Client) -> WalletHub {
    let network = settings.network.network_type;
    let registry = settings.active_registry();
    let mut hub = WalletHub::default();

    if let Some(evm) = &settings.wallets.evm {
        let connected = registry.evm_stable().and_then(|token| {
            let wallet = EthersWallet::from_env(
                &evm.private_key_env,
                &registry.evm.rpc_url,
                registry.evm.chain_id,
                network,
                token.evm_address()?,
                settings.execution.confirmation_timeout(),
            )?;
            Ok((wallet, token.decimals))
        });
        match connected {
            Ok((wallet, decimals)) => {
                let wallet: Arc<dyn EvmWallet> = Arc::new(wallet);
                hub.evm = Some(Arc::new(WalletProvider::connect(wallet, network, decimals).await));
            }
            Err(e) => warn!("EVM wallet not connected: {}", e),
        }
    }

    if let Some(terra) = &settings.wallets.terra {
        let extension = terra
            .extension_url
            .as_deref()
            .map(|url| SigningExtension::new(http.clone(), url, "terra"));
        let wallet: Arc<dyn CosmosWallet> = Arc::new(LcdWallet::new(
            http.clone(),
            &registry.terra.lcd_url,
            &terra.address,
            &registry.terra.stable_denom,
            &registry.terra.chain_id,
            network,
            extension,
        ));
        hub.terra = Some(Arc::new(
            WalletProvider::connect(wallet, network, registry.terra.decimals).await,
        ));
    }

    if let Some(solana) = &settings.wallets.solana {
        let extension = solana
            .extension_url
            .as_deref()
            .map(|url| SigningExtension::new(http.clone(), url, "solana"));
        let wallet: Arc<dyn SolanaWallet> = Arc::new(RpcSolanaWallet::new(
            http.clone(),
            &registry.solana.rpc_url,
            &solana.public_key,
            &registry.solana.stable_mint,
            network,
            extension,
            settings.execution.confirmation_timeout(),
        ));
        hub.solana = Some(Arc::new(
            WalletProvider::connect(wallet, network, registry.solana.decimals).await,
        ));
    }

    hub
}

/// Add the configured start-up steps and optionally start the run
async fn preload_steps(settings: &Settings, sequencer: &SequencerHandle) -> error::BridgeResult<()> {
    let offset = sequencer.snapshot().await?.steps.len();

    for (i, initial) in settings.sequencer.initial_steps.iter().enumerate() {
        let index = offset + i;
        let descriptor = sequencer.add_step().await?;

        if descriptor.title != initial.title {
            sequencer.select_step_type(index, initial.title.clone()).await?;
        }

        if let Some(amount) = &initial.amount {
            let input = StepInput {
                amount: amount.clone(),
                from_token: initial.from_token.clone(),
                to_token: initial.to_token.clone(),
            };
            sequencer.set_input(index, input).await?;
        }
    }

    if settings.sequencer.auto_execute && !settings.sequencer.initial_steps.is_empty() {
        info!("Auto-executing preloaded steps");
        sequencer.execute().await?;
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stablecoin_bridge=debug,hyper=warn,reqwest=warn"));

    // BRIDGE_LOG_FORMAT=json switches to structured output
    let json = std::env::var("BRIDGE_LOG_FORMAT").map_or(false, |v| v == "json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
