// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `core.health`: liveness and database reachability.

use std::time::Instant;

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ucloud_sql::ConnectionFactory;

use crate::calls::{CallDescription, RequestBinding, base_context};
use crate::error::{CommonErrorMessage, SetupError};
use crate::roles::{AccessRight, Roles};
use crate::server::{OutgoingCallResponse, RpcServer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// `ok` or `degraded`
    pub status: String,
    pub database: bool,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
}

pub fn health_call() -> CallDescription<(), HealthStatus, CommonErrorMessage> {
    CallDescription::builder("core", "health")
        .roles(Roles::PUBLIC)
        .access(AccessRight::Read)
        .http(
            Method::GET,
            format!("{}/health", base_context("core")),
            RequestBinding::None,
        )
        .websocket(base_context("core"))
        .build()
}

/// Register the `core.health` handler. Reports 503 while the database is unreachable.
pub fn register(server: &mut RpcServer, factory: ConnectionFactory) -> Result<(), SetupError> {
    let started = Instant::now();
    let started_at = Utc::now();

    server.implement(&health_call(), move |_ctx, _request: ()| {
        let factory = factory.clone();
        Box::pin(async move {
            let database = match factory.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Database health check failed");
                    false
                }
            };

            let (status, label) = if database {
                (StatusCode::OK, "ok")
            } else {
                (StatusCode::SERVICE_UNAVAILABLE, "degraded")
            };

            Ok(OutgoingCallResponse::Ok {
                result: HealthStatus {
                    status: label.to_string(),
                    database,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    started_at,
                    uptime_seconds: started.elapsed().as_secs(),
                },
                status,
            })
        })
    })?;

    Ok(())
}
