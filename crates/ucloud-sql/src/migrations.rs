// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracked schema migrations.
//!
//! Every registered script id is recorded in `migrations`. A script runs only when
//! its id is missing from `completed_migrations`, and it is marked complete in the
//! same transaction that applied it. A crash mid-way therefore leaves the script
//! pending, and it runs again on the next start.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::connection::{Connection, ConnectionFactory};
use crate::error::SqlError;

type ScriptFn =
    Arc<dyn for<'c> Fn(&'c mut Connection) -> BoxFuture<'c, Result<(), SqlError>> + Send + Sync>;

/// A unit of schema change identified by a unique id.
pub struct MigrationScript {
    id: String,
    execute: ScriptFn,
}

impl fmt::Debug for MigrationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationScript").field("id", &self.id).finish()
    }
}

impl MigrationScript {
    /// A script backed by a closure that runs against the migration session.
    pub fn new<F>(id: impl Into<String>, execute: F) -> Self
    where
        F: for<'c> Fn(&'c mut Connection) -> BoxFuture<'c, Result<(), SqlError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            execute: Arc::new(execute),
        }
    }

    /// A script that executes SQL text. The text may contain several statements.
    pub fn sql(id: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql: String = sql.into();
        Self::new(id, move |conn| {
            let sql = sql.clone();
            Box::pin(async move { conn.execute_raw(&sql).await })
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Migration step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Creating the bookkeeping tables.
    Initialize,
    /// Recording registered script ids.
    Register,
    /// Looking up scripts that have not completed.
    FetchMissing,
    /// Running a script.
    Execute,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MigrationPhase::Initialize => "initializing migration tables",
            MigrationPhase::Register => "registering migrations",
            MigrationPhase::FetchMissing => "fetching missing migrations",
            MigrationPhase::Execute => "executing migration",
        };
        f.write_str(text)
    }
}

/// Errors raised by [`MigrationHandler`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    /// A script with the same id is already registered.
    #[error("Migration script '{0}' is already registered")]
    DuplicateScript(String),

    /// A migration step failed.
    #[error("Failed {phase}{}: {source}", .migration_id.as_deref().map(|id| format!(" '{id}'")).unwrap_or_default())]
    Failed {
        phase: MigrationPhase,
        migration_id: Option<String>,
        #[source]
        source: SqlError,
    },
}

impl MigrationError {
    fn failed(phase: MigrationPhase, migration_id: Option<&str>) -> impl FnOnce(SqlError) -> Self {
        let migration_id = migration_id.map(str::to_string);
        move |source| MigrationError::Failed {
            phase,
            migration_id,
            source,
        }
    }

    /// The phase that failed, if this is a phase failure.
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            MigrationError::Failed { phase, .. } => Some(*phase),
            MigrationError::DuplicateScript(_) => None,
        }
    }

    /// The id of the script involved, if any.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrationError::Failed { migration_id, .. } => migration_id.as_deref(),
            MigrationError::DuplicateScript(id) => Some(id),
        }
    }
}

const CREATE_MIGRATIONS: &str = "
create table if not exists migrations(
    id text primary key
)";

const CREATE_COMPLETED_MIGRATIONS: &str = "
create table if not exists completed_migrations(
    id text primary key references migrations(id),
    completed_at timestamp not null default current_timestamp
)";

const REGISTER_MIGRATION: &str = "
insert into migrations(id) values (:id)
on conflict (id) do nothing";

const FIND_MISSING_MIGRATIONS: &str = "
select m.id
from migrations m
left join completed_migrations cm on m.id = cm.id
where cm.id is null";

const COMPLETE_MIGRATION: &str = "
insert into completed_migrations(id, completed_at) values (:id, current_timestamp)";

/// Registers migration scripts and applies the ones that have not completed.
#[derive(Debug)]
pub struct MigrationHandler {
    factory: ConnectionFactory,
    scripts: Vec<MigrationScript>,
    ids: HashSet<String>,
}

impl MigrationHandler {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            scripts: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Register a script. Scripts run in registration order.
    pub fn add_script(&mut self, script: MigrationScript) -> Result<&mut Self, MigrationError> {
        if !self.ids.insert(script.id.clone()) {
            return Err(MigrationError::DuplicateScript(script.id));
        }
        self.scripts.push(script);
        Ok(self)
    }

    /// Ids of the registered scripts, in registration order.
    pub fn script_ids(&self) -> impl Iterator<Item = &str> {
        self.scripts.iter().map(MigrationScript::id)
    }

    /// Apply every registered script that has not completed yet.
    ///
    /// Returns the ids of the scripts that ran.
    #[instrument(skip(self), fields(scripts = self.scripts.len()))]
    pub async fn migrate(&self) -> Result<Vec<String>, MigrationError> {
        self.initialize().await?;
        self.register().await?;
        let missing = self.find_missing().await?;

        let mut executed = Vec::new();
        for script in self.scripts.iter().filter(|s| missing.contains(&s.id)) {
            self.run_script(script).await?;
            executed.push(script.id.clone());
        }

        if executed.is_empty() {
            debug!("Schema is up to date");
        } else {
            info!(count = executed.len(), "Applied migrations");
        }
        Ok(executed)
    }

    async fn initialize(&self) -> Result<(), MigrationError> {
        self.factory
            .ctx()
            .with_session(|conn| {
                Box::pin(async move {
                    conn.execute_raw(CREATE_MIGRATIONS).await?;
                    conn.execute_raw(CREATE_COMPLETED_MIGRATIONS).await
                })
            })
            .await
            .map_err(MigrationError::failed(MigrationPhase::Initialize, None))
    }

    async fn register(&self) -> Result<(), MigrationError> {
        let ids: Vec<String> = self.scripts.iter().map(|s| s.id.clone()).collect();
        self.factory
            .ctx()
            .with_session(|conn| {
                Box::pin(async move {
                    let mut stmt = conn.prepare_statement(REGISTER_MIGRATION);
                    for id in &ids {
                        stmt.reset();
                        stmt.bind_string("id", id.as_str());
                        stmt.invoke_and_discard(conn).await?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(MigrationError::failed(MigrationPhase::Register, None))
    }

    async fn find_missing(&self) -> Result<HashSet<String>, MigrationError> {
        self.factory
            .ctx()
            .with_session(|conn| {
                Box::pin(async move {
                    let mut missing = HashSet::new();
                    let mut stmt = conn.prepare_statement(FIND_MISSING_MIGRATIONS);
                    stmt.use_and_invoke(
                        conn,
                        |_| {},
                        |row| {
                            if let Some(id) = row.get_string(0)? {
                                missing.insert(id);
                            }
                            Ok(())
                        },
                    )
                    .await?;
                    Ok(missing)
                })
            })
            .await
            .map_err(MigrationError::failed(MigrationPhase::FetchMissing, None))
    }

    async fn run_script(&self, script: &MigrationScript) -> Result<(), MigrationError> {
        info!(migration_id = %script.id, "Running migration");
        let execute = script.execute.clone();
        let id = script.id.clone();
        self.factory
            .ctx()
            .with_session(|conn| {
                Box::pin(async move {
                    execute(conn).await?;
                    let mut stmt = conn.prepare_statement(COMPLETE_MIGRATION);
                    stmt.use_and_invoke_and_discard(conn, |s| {
                        s.bind_string("id", id.as_str());
                    })
                    .await
                })
            })
            .await
            .map_err(MigrationError::failed(
                MigrationPhase::Execute,
                Some(&script.id),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::Failed {
            phase: MigrationPhase::Execute,
            migration_id: Some("tags-1".to_string()),
            source: SqlError::TransactionState("boom"),
        };
        assert_eq!(
            err.to_string(),
            "Failed executing migration 'tags-1': Invalid transaction state: boom"
        );
        assert_eq!(err.phase(), Some(MigrationPhase::Execute));
        assert_eq!(err.migration_id(), Some("tags-1"));

        let err = MigrationError::Failed {
            phase: MigrationPhase::Initialize,
            migration_id: None,
            source: SqlError::TransactionState("boom"),
        };
        assert_eq!(
            err.to_string(),
            "Failed initializing migration tables: Invalid transaction state: boom"
        );
    }

    #[test]
    fn test_script_sql_keeps_id() {
        let script = MigrationScript::sql("create-tags", "create table tags(id int)");
        assert_eq!(script.id(), "create-tags");
        assert!(format!("{script:?}").contains("create-tags"));
    }
}
