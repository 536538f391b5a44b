//! shadow-relayer
//!
//! HTTP relay service for the Shadow privacy pools.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shadow_relayer::{
    app_router, RelayService, RelayerConfig, RelayerPool, ServiceOptions, SolanaSettlement,
};
use shadow_verifier::Groth16Verifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shadow_relayer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = RelayerConfig::from_env()?;

    info!("Starting shadow-relayer v{}", env!("CARGO_PKG_VERSION"));
    info!("RPC: {}", config.rpc_url);
    info!("Program: {}", config.program_id);

    let verifier = Groth16Verifier::from_json_file(&config.verification_key_path)?;
    info!(
        "Verification key loaded ({} public inputs)",
        verifier.public_input_count()
    );

    let relayers = RelayerPool::load_dir(&config.wallet_dir, config.relayer_count)?;
    if relayers.is_empty() {
        tracing::warn!(
            "no relayer keys found in {}, withdrawals will be refused",
            config.wallet_dir.display()
        );
    }
    info!("{} relayers loaded", relayers.len());

    let settlement = SolanaSettlement::new(config.rpc_url.clone(), config.program_id);
    let service = RelayService::new(
        config.pools.clone(),
        relayers,
        Arc::new(verifier),
        Arc::new(settlement),
        ServiceOptions::from(&config),
    )
    .context("failed to initialize pools")?;
    for pool in service.state.pools().pools() {
        info!(
            "Pool {}: {} (vault {})",
            pool.id,
            pool.denomination_label(),
            pool.vault
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = service.poller.clone();
    let poll_interval = config.poll_interval;
    let poller_handle = tokio::spawn(async move {
        poller.run(poll_interval, shutdown_rx).await;
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = app_router(service.state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    shutdown_tx.send(true).ok();
    poller_handle.await.ok();
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install CTRL+C signal handler: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
