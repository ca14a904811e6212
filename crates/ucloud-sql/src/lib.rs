// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! UCloud SQL - sessions, named-parameter statements and tracked migrations
//!
//! This crate is the database surface used by UCloud services. It sits on top of a
//! sqlx `AnyPool`, so the same code runs against PostgreSQL in production and SQLite
//! in tests.
//!
//! # Overview
//!
//! ```text
//! ┌──────────────────────┐   with_session   ┌──────────────────────────┐
//! │  ConnectionFactory   │─────────────────►│ Connection (transaction) │
//! │  (pool of sessions)  │                  │  prepare_statement(sql)  │
//! └──────────────────────┘                  └────────────┬─────────────┘
//!                                                        │ invoke
//!                                                        ▼
//!                                           ┌──────────────────────────┐
//!                                           │      ResultCursor        │
//!                                           │ rows or an update count  │
//!                                           └──────────────────────────┘
//! ```
//!
//! | Type | Role |
//! |------|------|
//! | [`ConnectionFactory`] | Pool; opens sessions, health check |
//! | [`DbContext`] | A factory or a live session, with `with_session` |
//! | [`Connection`] | Session with explicit transaction state |
//! | [`PreparedStatement`] | SQL with `:name` placeholders, typed binds |
//! | [`ResultCursor`] | Forward-only typed row reader |
//! | [`MigrationHandler`] | Runs each registered [`MigrationScript`] once |
//!
//! # Sessions
//!
//! `with_session` on a factory opens a session, runs the closure inside a transaction
//! and always releases the session. The transaction commits when the closure succeeds
//! and rolls back when it fails; the closure's error is returned unchanged. On an
//! existing session the closure runs directly.

pub mod connection;
pub mod cursor;
pub mod error;
pub mod migrations;
pub mod statement;
pub mod value;

pub use connection::{Connection, ConnectionFactory, DEFAULT_POOL_SIZE, DbContext};
pub use cursor::ResultCursor;
pub use error::{Result, SqlError};
pub use migrations::{MigrationError, MigrationHandler, MigrationPhase, MigrationScript};
pub use statement::{PlaceholderStyle, PreparedStatement};
pub use value::{SqlType, SqlValue};
