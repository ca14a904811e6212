// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! UCloud RPC server
//!
//! Serves registered calls over HTTP and WebSocket, with bearer authentication and a
//! migrated database behind them.

use std::sync::Arc;

use anyhow::Result;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ucloud_rpc::auth::{AuthInterceptor, SignedIntentFilter};
use ucloud_rpc::config::Config;
use ucloud_rpc::health;
use ucloud_rpc::server::RpcServer;
use ucloud_sql::{ConnectionFactory, MigrationHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ucloud_rpc=info".parse()?)
                .add_directive("ucloud_sql=info".parse()?),
        )
        .init();

    info!("Starting UCloud RPC server");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        db_pool_size = config.db_pool_size,
        development_mode = config.development_mode,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let factory = ConnectionFactory::connect(&config.database_url, config.db_pool_size).await?;
    factory.health_check().await?;
    info!("Database health check passed");

    info!("Running database migrations...");
    let applied = MigrationHandler::new(factory.clone()).migrate().await?;
    info!(applied = applied.len(), "Migrations completed");

    let mut server = RpcServer::new();
    server
        .attach_filter(Arc::new(AuthInterceptor::from_config(&config)))
        .attach_filter(Arc::new(SignedIntentFilter));
    health::register(&mut server, factory.clone())?;

    let app = server.into_router()?.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    factory.close().await;
    info!("Shutdown complete");

    Ok(())
}
