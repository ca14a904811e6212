// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the call pipeline.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type using [`RpcError`].
pub type Result<T> = std::result::Result<T, RpcError>;

/// A failure that is turned into a status code (and possibly a body) for the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{status}: {why}")]
pub struct RpcError {
    /// Status sent to the caller.
    pub status: StatusCode,
    /// Human-readable reason.
    pub why: String,
    /// Optional machine-readable code.
    pub error_code: Option<String>,
}

impl RpcError {
    pub fn new(status: StatusCode, why: impl Into<String>) -> Self {
        Self {
            status,
            why: why.into(),
            error_code: None,
        }
    }

    /// An error carrying only a status; the reason is the canonical status text.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or("Unknown"))
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn bad_request() -> Self {
        Self::from_status(StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized() -> Self {
        Self::from_status(StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::from_status(StatusCode::FORBIDDEN)
    }

    pub fn not_found() -> Self {
        Self::from_status(StatusCode::NOT_FOUND)
    }

    pub fn internal() -> Self {
        Self::from_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Whether this is a server-side failure whose details must not reach the caller.
    pub fn is_internal(&self) -> bool {
        self.status.is_server_error()
    }

    /// The wire payload for this error. Internal failures are reduced to the canonical
    /// reason of their status.
    pub fn to_common_message(&self) -> CommonErrorMessage {
        if self.is_internal() {
            let why = self.status.canonical_reason().unwrap_or("Internal Server Error");
            CommonErrorMessage::new(why, self.error_code.clone())
        } else {
            CommonErrorMessage::new(self.why.clone(), self.error_code.clone())
        }
    }
}

impl From<ucloud_sql::SqlError> for RpcError {
    fn from(e: ucloud_sql::SqlError) -> Self {
        tracing::warn!(error = %e, "Database error while handling call");
        RpcError::internal()
    }
}

/// Default error payload of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonErrorMessage {
    pub why: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CommonErrorMessage {
    pub fn new(why: impl Into<String>, error_code: Option<String>) -> Self {
        Self {
            why: why.into(),
            error_code,
        }
    }
}

/// Authentication and authorization failures.
///
/// The variants stay distinct for logging; every one of them reaches the caller as 401.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("Role {role} is not allowed to call {call}")]
    RoleMismatch { role: String, call: String },

    #[error("Token does not cover required scope {required}")]
    MissingScope { required: String },
}

impl AuthError {
    /// Short tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::RoleMismatch { .. } => "role_mismatch",
            AuthError::MissingScope { .. } => "missing_scope",
        }
    }
}

impl From<AuthError> for RpcError {
    fn from(_: AuthError) -> Self {
        RpcError::unauthorized()
    }
}

/// Errors raised while assembling an [`RpcServer`](crate::server::RpcServer).
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SetupError {
    #[error("Call {0} already has a handler")]
    DuplicateHandler(String),

    #[error("Call {0} has no transport binding")]
    NoTransport(String),

    #[error("Call {call} has an invalid HTTP method {method}")]
    InvalidMethod { call: String, method: String },

    #[error("Route {method} {path} is bound by more than one call")]
    DuplicateRoute { method: String, path: String },

    #[error("Call {call} is bound to path {path:?}, which does not start with '/'")]
    InvalidPath { call: String, path: String },
}
