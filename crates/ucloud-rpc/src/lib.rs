// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! UCloud RPC
//!
//! Declares calls once and serves them over HTTP and WebSocket:
//!
//! ```text
//!  HTTP request ──► HttpInterceptor ─┐
//!                                    ├─► RpcServer ─► filters (auth, intent) ─► handler
//!  WS frame ──► WebSocketInterceptor ┘
//! ```
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`calls`] | [`CallDescription`] and the naming/route conventions |
//! | [`server`] | [`RpcServer`], filters, response encoding |
//! | [`auth`] | bearer validation, role and scope checks |
//! | [`decoder`] | query/header parameter decoding |
//! | [`context`] | per-call [`IngoingCall`] |
//!
//! Persistence lives in the `ucloud-sql` crate.

pub mod auth;
pub mod calls;
pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod health;
pub mod http;
pub mod roles;
pub mod server;
pub mod websocket;

pub use auth::{AuthInterceptor, JwtTokenValidation, SignedIntentFilter, TokenClaims, TokenValidation};
pub use calls::{CallDescription, CallInfo, RequestBinding};
pub use config::{Config, ConfigError};
pub use context::{IngoingCall, Transport};
pub use error::{AuthError, CommonErrorMessage, RpcError, SetupError};
pub use roles::{AccessRight, Role, Roles, SecurityPrincipal, SecurityPrincipalToken, SecurityScope};
pub use server::{
    EncodedResponse, HandlerFuture, IngoingCallFilter, IngoingRequestInterceptor, OutgoingCallResponse,
    ResponseBody, RpcServer,
};
