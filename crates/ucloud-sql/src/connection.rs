// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection pool, sessions and transaction scoping.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::TryStreamExt;
use futures::future::BoxFuture;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Either, Executor, Statement};
use tracing::{debug, info, warn};

use crate::cursor::ResultCursor;
use crate::error::{Result, SqlError};
use crate::statement::{PlaceholderStyle, PreparedStatement};
use crate::value::SqlValue;

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Pool of database connections.
///
/// Backed by a sqlx `AnyPool`, so any URL with an installed driver works
/// (`postgres://...`, `sqlite://...`).
#[derive(Clone)]
pub struct ConnectionFactory {
    pool: AnyPool,
    open_sessions: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("pool_size", &self.pool.size())
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

impl ConnectionFactory {
    /// Connect a pool of at most `pool_size` connections to `url`.
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect(url)
            .await?;

        info!(pool_size = pool_size, "Database pool connected");

        Ok(Self {
            pool,
            open_sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Check out a connection from the pool.
    pub async fn open_connection(&self) -> Result<Connection> {
        let inner = self.pool.acquire().await?;
        let style = PlaceholderStyle::for_backend(inner.backend_name());
        self.open_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Connection {
            inner: Some(inner),
            style,
            transaction_open: false,
            open_sessions: self.open_sessions.clone(),
        })
    }

    /// Number of connections currently checked out through this factory.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Run `select 1` on a pooled connection.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("select 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// A [`DbContext`] that opens a new session per `with_session` call.
    pub fn ctx(&self) -> DbContext<'_> {
        DbContext::Factory(self)
    }
}

/// A checked-out database session.
///
/// Tracks its transaction state explicitly. Dropping a session with an open
/// transaction closes the underlying connection instead of returning it to the pool.
pub struct Connection {
    inner: Option<PoolConnection<Any>>,
    style: PlaceholderStyle,
    transaction_open: bool,
    open_sessions: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("style", &self.style)
            .field("transaction_open", &self.transaction_open)
            .finish()
    }
}

impl Connection {
    fn raw(&mut self) -> Result<&mut PoolConnection<Any>> {
        self.inner
            .as_mut()
            .ok_or(SqlError::TransactionState("connection already closed"))
    }

    /// Placeholder style of the connected backend.
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Whether a transaction is currently open on this session.
    pub fn in_transaction(&self) -> bool {
        self.transaction_open
    }

    /// Create a statement for this session's backend.
    pub fn prepare_statement(&self, sql: impl Into<String>) -> PreparedStatement {
        PreparedStatement::new(sql, self.style)
    }

    /// Execute SQL text without parameters. Multiple statements are allowed.
    pub async fn execute_raw(&mut self, sql: &str) -> Result<()> {
        let conn = self.raw()?;
        (&mut **conn).execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    pub(crate) async fn execute_compiled(
        &mut self,
        sql: &str,
        values: &[&SqlValue],
    ) -> Result<ResultCursor> {
        let conn = self.raw()?;

        let mut query = sqlx::query(sql);
        for value in values {
            query = value.bind_to(query);
        }

        // Parameter types come from the bound values. Preparing without them first
        // lets Postgres infer (and cache) the wrong type for a parameter it only
        // sees in a projection.
        let mut rows = Vec::new();
        let mut rows_affected = 0;
        {
            let mut results = (&mut **conn).fetch_many(query);
            while let Some(item) = results.try_next().await? {
                match item {
                    Either::Left(result) => rows_affected += result.rows_affected(),
                    Either::Right(row) => rows.push(row),
                }
            }
        }

        if !rows.is_empty() {
            return Ok(ResultCursor::from_rows(rows));
        }

        // No rows: a query with an empty result or a plain update. The statement
        // was cached by the execution above, so this does not prepare it again.
        let statement = (&mut **conn).prepare(sql).await?;
        if statement.columns().is_empty() {
            Ok(ResultCursor::from_update_count(rows_affected))
        } else {
            Ok(ResultCursor::from_rows(rows))
        }
    }

    /// Open a transaction.
    pub async fn begin(&mut self) -> Result<()> {
        if self.transaction_open {
            return Err(SqlError::TransactionState("transaction already open"));
        }
        self.execute_raw("BEGIN").await?;
        self.transaction_open = true;
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        if !self.transaction_open {
            return Err(SqlError::TransactionState("no transaction to commit"));
        }
        let result = self.execute_raw("COMMIT").await;
        self.transaction_open = false;
        result
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        if !self.transaction_open {
            return Err(SqlError::TransactionState("no transaction to roll back"));
        }
        let result = self.execute_raw("ROLLBACK").await;
        self.transaction_open = false;
        result
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds. When `f` fails the transaction is rolled back and
    /// the error from `f` is returned unchanged. If a transaction is already open,
    /// `f` joins it and the outer scope decides the outcome.
    pub async fn with_transaction<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
    where
        E: From<SqlError>,
        F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, std::result::Result<T, E>>,
    {
        if self.transaction_open {
            return f(self).await;
        }

        self.begin().await?;
        match f(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }

    /// Return the session to the pool, rolling back any open transaction first.
    pub async fn close(mut self) {
        if self.transaction_open {
            debug!("Rolling back open transaction on close");
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "Rollback failed while closing session");
            }
        }
        // Drop returns the connection to the pool.
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut conn) = self.inner.take() {
            if self.transaction_open {
                warn!("Session dropped with an open transaction, discarding connection");
                conn.close_on_drop();
            }
        }
    }
}

/// Where a unit of database work runs: a fresh session from a pool, or an
/// existing session.
pub enum DbContext<'a> {
    /// Open a new session per call.
    Factory(&'a ConnectionFactory),
    /// Reuse a live session.
    Connection(&'a mut Connection),
}

impl<'a> From<&'a ConnectionFactory> for DbContext<'a> {
    fn from(factory: &'a ConnectionFactory) -> Self {
        DbContext::Factory(factory)
    }
}

impl<'a> From<&'a mut Connection> for DbContext<'a> {
    fn from(conn: &'a mut Connection) -> Self {
        DbContext::Connection(conn)
    }
}

impl DbContext<'_> {
    /// Run `f` with a session.
    ///
    /// On a factory a new session is opened, `f` runs inside a transaction, and the
    /// session is released on every exit path. On an existing connection `f` runs
    /// directly against it.
    ///
    /// ```ignore
    /// let count = factory.ctx().with_session(|conn| Box::pin(async move {
    ///     let mut rows = conn.prepare_statement("select count(*) from tags").invoke(conn).await?;
    ///     rows.next();
    ///     Ok::<_, SqlError>(rows.get_long(0)?.unwrap_or(0))
    /// })).await?;
    /// ```
    pub async fn with_session<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
    where
        E: From<SqlError>,
        F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, std::result::Result<T, E>>,
    {
        match self {
            DbContext::Factory(factory) => {
                let mut conn = factory.open_connection().await?;
                let result = conn.with_transaction(f).await;
                conn.close().await;
                result
            }
            DbContext::Connection(conn) => f(&mut **conn).await,
        }
    }
}
