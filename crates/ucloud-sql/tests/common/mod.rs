// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ucloud-sql tests.
//!
//! Each test gets its own SQLite database file in a temporary directory. Tests that
//! need PostgreSQL use [`TestDb::postgres`], which gives every test a fresh schema in the
//! database named by `UCLOUD_TEST_PG_URL`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use ucloud_sql::ConnectionFactory;

/// Environment variable naming the PostgreSQL database used by the Postgres tests.
pub const PG_URL_VAR: &str = "UCLOUD_TEST_PG_URL";

static SCHEMA_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A connection factory backed by a throwaway database.
pub struct TestDb {
    pub factory: ConnectionFactory,
    // Held so the directory outlives the pool.
    _dir: Option<TempDir>,
    // Postgres server URL and the schema owned by this test.
    schema: Option<(String, String)>,
}

impl TestDb {
    pub async fn new() -> Self {
        Self::with_pool_size(2).await
    }

    pub async fn with_pool_size(pool_size: u32) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());

        let factory = ConnectionFactory::connect(&url, pool_size)
            .await
            .expect("Failed to open SQLite database");

        Self {
            factory,
            _dir: Some(dir),
            schema: None,
        }
    }

    /// Connect to `UCLOUD_TEST_PG_URL` with a fresh schema on the search path.
    ///
    /// Returns `None` when the variable is not set.
    pub async fn postgres() -> Option<Self> {
        let base_url = std::env::var(PG_URL_VAR).ok()?;
        let schema = format!(
            "ucloud_test_{}_{}",
            std::process::id(),
            SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst)
        );

        let admin = ConnectionFactory::connect(&base_url, 1)
            .await
            .expect("Failed to connect to PostgreSQL");
        let mut conn = admin.open_connection().await.expect("Failed to open connection");
        conn.execute_raw(&format!("drop schema if exists {schema} cascade; create schema {schema}"))
            .await
            .expect("Failed to create test schema");
        conn.close().await;
        admin.close().await;

        let separator = if base_url.contains('?') { '&' } else { '?' };
        let url = format!("{base_url}{separator}options=-c%20search_path%3D{schema}");
        let factory = ConnectionFactory::connect(&url, 2)
            .await
            .expect("Failed to connect to PostgreSQL");

        Some(Self {
            factory,
            _dir: None,
            schema: Some((base_url, schema)),
        })
    }

    /// Close the pool and drop the Postgres schema, if any.
    pub async fn cleanup(self) {
        self.factory.close().await;
        if let Some((base_url, schema)) = self.schema {
            let admin = ConnectionFactory::connect(&base_url, 1)
                .await
                .expect("Failed to connect to PostgreSQL");
            let mut conn = admin.open_connection().await.expect("Failed to open connection");
            conn.execute_raw(&format!("drop schema if exists {schema} cascade"))
                .await
                .ok();
            conn.close().await;
            admin.close().await;
        }
    }

    /// Execute SQL text outside of any explicit transaction.
    pub async fn exec(&self, sql: &str) {
        let mut conn = self
            .factory
            .open_connection()
            .await
            .expect("Failed to open connection");
        conn.execute_raw(sql).await.expect("Failed to execute SQL");
        conn.close().await;
    }

    /// Count rows in `table`.
    pub async fn count(&self, table: &str) -> i64 {
        let mut conn = self
            .factory
            .open_connection()
            .await
            .expect("Failed to open connection");
        let stmt = conn.prepare_statement(format!("select count(*) from {table}"));
        let mut cursor = stmt.invoke(&mut conn).await.expect("Count query failed");
        assert!(cursor.next());
        let count = cursor.get_long(0).expect("Failed to read count").unwrap_or(0);
        conn.close().await;
        count
    }
}

/// Skip the current test when `UCLOUD_TEST_PG_URL` is not set.
#[macro_export]
macro_rules! postgres_db_or_skip {
    () => {
        match common::TestDb::postgres().await {
            Some(db) => db,
            None => {
                eprintln!("Skipping test: UCLOUD_TEST_PG_URL not set");
                return;
            }
        }
    };
}
