// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for sessions, transactions, statements and cursors against SQLite.

mod common;

use common::TestDb;
use ucloud_sql::{DbContext, SqlError};

#[derive(Debug)]
enum TestError {
    Sql(SqlError),
    Rejected(&'static str),
}

impl From<SqlError> for TestError {
    fn from(e: SqlError) -> Self {
        TestError::Sql(e)
    }
}

const CREATE_TAGS: &str = "create table tags(id bigint primary key, title text not null, owner text)";

async fn tags_db() -> TestDb {
    let db = TestDb::new().await;
    db.exec(CREATE_TAGS).await;
    db
}

// ============================================================================
// Sessions and transactions
// ============================================================================

#[tokio::test]
async fn test_with_session_commits_on_success() {
    let db = tags_db().await;

    let inserted = db
        .factory
        .ctx()
        .with_session(|conn| {
            Box::pin(async move {
                let mut stmt =
                    conn.prepare_statement("insert into tags(id, title) values (:id, :title)");
                stmt.bind_long("id", 1).bind_string("title", "first");
                let mut cursor = stmt.invoke(conn).await?;
                assert!(cursor.next());
                Ok::<_, SqlError>(cursor.get_long(0)?)
            })
        })
        .await
        .unwrap();

    assert_eq!(inserted, Some(1));
    assert_eq!(db.count("tags").await, 1);
    assert_eq!(db.factory.open_sessions(), 0);
}

#[tokio::test]
async fn test_with_session_rolls_back_and_returns_error_unchanged() {
    let db = tags_db().await;

    let result: Result<(), TestError> = db
        .factory
        .ctx()
        .with_session(|conn| {
            Box::pin(async move {
                let mut stmt =
                    conn.prepare_statement("insert into tags(id, title) values (:id, :title)");
                stmt.bind_long("id", 1).bind_string("title", "doomed");
                stmt.invoke_and_discard(conn).await?;
                Err(TestError::Rejected("business rule"))
            })
        })
        .await;

    assert!(matches!(result, Err(TestError::Rejected("business rule"))));
    assert_eq!(db.count("tags").await, 0, "Insert should be rolled back");
    assert_eq!(db.factory.open_sessions(), 0, "Session should be released");
}

#[tokio::test]
async fn test_with_session_releases_session_on_driver_error() {
    let db = tags_db().await;

    let result: Result<(), TestError> = db
        .factory
        .ctx()
        .with_session(|conn| {
            Box::pin(async move {
                conn.execute_raw("insert into missing_table values (1)").await?;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(TestError::Sql(SqlError::Driver(_)))));
    assert_eq!(db.factory.open_sessions(), 0);

    // Pool is still usable afterwards
    assert_eq!(db.count("tags").await, 0);
}

#[tokio::test]
async fn test_with_session_on_connection_is_passthrough() {
    let db = tags_db().await;

    let mut conn = db.factory.open_connection().await.unwrap();
    conn.begin().await.unwrap();

    DbContext::from(&mut conn)
        .with_session(|c| {
            Box::pin(async move {
                assert!(c.in_transaction());
                let mut stmt = c.prepare_statement("insert into tags(id, title) values (:id, 'x')");
                stmt.bind_long("id", 7);
                stmt.invoke_and_discard(c).await
            })
        })
        .await
        .unwrap();

    // The outer transaction is still open and owned by the caller
    assert!(conn.in_transaction());
    conn.rollback().await.unwrap();
    conn.close().await;

    assert_eq!(db.count("tags").await, 0);
    assert_eq!(db.factory.open_sessions(), 0);
}

#[tokio::test]
async fn test_nested_with_transaction_joins_outer() {
    let db = tags_db().await;

    let mut conn = db.factory.open_connection().await.unwrap();
    let result: Result<(), TestError> = conn
        .with_transaction(|c| {
            Box::pin(async move {
                c.with_transaction(|inner| {
                    Box::pin(async move {
                        inner
                            .execute_raw("insert into tags(id, title) values (1, 'a')")
                            .await?;
                        Ok::<_, TestError>(())
                    })
                })
                .await?;
                Err(TestError::Rejected("outer fails"))
            })
        })
        .await;

    assert!(result.is_err());
    assert!(!conn.in_transaction());
    conn.close().await;
    assert_eq!(db.count("tags").await, 0, "Inner work belongs to the outer transaction");
}

#[tokio::test]
async fn test_transaction_state_errors() {
    let db = TestDb::new().await;
    let mut conn = db.factory.open_connection().await.unwrap();

    assert!(matches!(
        conn.commit().await,
        Err(SqlError::TransactionState(_))
    ));
    conn.begin().await.unwrap();
    assert!(matches!(
        conn.begin().await,
        Err(SqlError::TransactionState(_))
    ));
    conn.rollback().await.unwrap();
    conn.close().await;
}

#[tokio::test]
async fn test_dropping_connection_decrements_open_sessions() {
    let db = TestDb::new().await;
    {
        let _a = db.factory.open_connection().await.unwrap();
        let _b = db.factory.open_connection().await.unwrap();
        assert_eq!(db.factory.open_sessions(), 2);
    }
    assert_eq!(db.factory.open_sessions(), 0);
}

#[tokio::test]
async fn test_health_check() {
    let db = TestDb::new().await;
    db.factory.health_check().await.unwrap();
}

// ============================================================================
// Statements
// ============================================================================

#[tokio::test]
async fn test_repeated_named_parameter() {
    let db = tags_db().await;
    db.exec("insert into tags(id, title, owner) values (1, 'a', 'alice'), (2, 'b', 'bob')")
        .await;

    let mut conn = db.factory.open_connection().await.unwrap();
    let mut stmt = conn.prepare_statement(
        "with wanted as (select :id as id) \
         select t.title, :id from tags t join wanted w on t.id = w.id where t.id = :id",
    );
    assert_eq!(stmt.parameter_positions("id"), &[0, 1, 2]);

    stmt.bind_long("id", 2);
    let mut cursor = stmt.invoke(&mut conn).await.unwrap();
    assert!(cursor.next());
    assert_eq!(cursor.get_string(0).unwrap().as_deref(), Some("b"));
    assert_eq!(cursor.get_long(1).unwrap(), Some(2));
    assert!(!cursor.next());

    conn.close().await;
}

#[tokio::test]
async fn test_unbound_parameter_fails_before_execution() {
    let db = tags_db().await;
    let mut conn = db.factory.open_connection().await.unwrap();

    let mut stmt = conn.prepare_statement("select title from tags where id = :id and owner = :owner");
    stmt.bind_long("id", 1);

    let err = stmt.invoke(&mut conn).await.unwrap_err();
    assert!(matches!(err, SqlError::UnboundParameter { ref name } if name == "owner"));
    conn.close().await;
}

#[tokio::test]
async fn test_statement_reuse_with_reset() {
    let db = tags_db().await;
    let mut conn = db.factory.open_connection().await.unwrap();

    let mut stmt = conn.prepare_statement("insert into tags(id, title, owner) values (:id, :title, :owner)");
    for (id, title) in [(1i64, "a"), (2, "b"), (3, "c")] {
        stmt.reset();
        stmt.bind_long("id", id)
            .bind_string("title", title)
            .bind_string_nullable("owner", None::<String>);
        stmt.invoke_and_discard(&mut conn).await.unwrap();
    }
    conn.close().await;

    assert_eq!(db.count("tags").await, 3);
}

#[tokio::test]
async fn test_use_and_invoke_reads_every_row() {
    let db = tags_db().await;
    db.exec("insert into tags(id, title, owner) values (1, 'a', 'alice'), (2, 'b', 'alice'), (3, 'c', 'bob')")
        .await;

    let mut conn = db.factory.open_connection().await.unwrap();
    let mut stmt = conn.prepare_statement("select title from tags where owner = :owner order by id");
    let mut titles = Vec::new();
    stmt.use_and_invoke(
        &mut conn,
        |s| {
            s.bind_string("owner", "alice");
        },
        |row| {
            titles.push(row.get_string(0)?.unwrap_or_default());
            Ok(())
        },
    )
    .await
    .unwrap();
    conn.close().await;

    assert_eq!(titles, vec!["a", "b"]);
}

#[tokio::test]
async fn test_use_and_invoke_and_discard() {
    let db = tags_db().await;
    let mut conn = db.factory.open_connection().await.unwrap();

    let mut stmt = conn.prepare_statement("insert into tags(id, title) values (:id, :title)");
    stmt.use_and_invoke_and_discard(&mut conn, |s| {
        s.bind_long("id", 10).bind_string("title", "ten");
    })
    .await
    .unwrap();
    conn.close().await;

    assert_eq!(db.count("tags").await, 1);
}

// ============================================================================
// Cursors
// ============================================================================

#[tokio::test]
async fn test_update_count_cursor() {
    let db = tags_db().await;
    db.exec("insert into tags(id, title, owner) values (1, 'a', 'alice'), (2, 'b', 'alice'), (3, 'c', 'bob')")
        .await;

    let mut conn = db.factory.open_connection().await.unwrap();
    let mut stmt = conn.prepare_statement("update tags set title = 'x' where owner = :owner");
    stmt.bind_string("owner", "alice");

    let mut cursor = stmt.invoke(&mut conn).await.unwrap();
    assert!(cursor.is_update_count());
    assert!(cursor.next());
    assert_eq!(cursor.get_long(0).unwrap(), Some(2));
    assert!(!cursor.next());
    conn.close().await;
}

#[tokio::test]
async fn test_empty_result_is_not_update_count() {
    let db = tags_db().await;
    let mut conn = db.factory.open_connection().await.unwrap();

    let mut stmt = conn.prepare_statement("select title from tags where id = :id");
    stmt.bind_long("id", 99);
    let mut cursor = stmt.invoke(&mut conn).await.unwrap();
    assert!(!cursor.is_update_count());
    assert!(!cursor.next());
    conn.close().await;
}

#[tokio::test]
async fn test_cursor_exhaustion_is_permanent() {
    let db = tags_db().await;
    db.exec("insert into tags(id, title) values (1, 'a'), (2, 'b')").await;

    let mut conn = db.factory.open_connection().await.unwrap();
    let stmt = conn.prepare_statement("select id from tags order by id");
    let mut cursor = stmt.invoke(&mut conn).await.unwrap();

    assert!(matches!(cursor.get_long(0), Err(SqlError::NoCurrentRow)));
    assert!(cursor.next());
    assert_eq!(cursor.get_long(0).unwrap(), Some(1));
    assert!(cursor.next());
    assert_eq!(cursor.get_long(0).unwrap(), Some(2));
    assert!(!cursor.next());
    assert!(!cursor.next());
    assert!(!cursor.next());
    assert!(matches!(cursor.get_long(0), Err(SqlError::NoCurrentRow)));
    conn.close().await;
}

#[tokio::test]
async fn test_typed_getters_and_nulls() {
    let db = TestDb::new().await;
    db.exec("create table samples(id integer, enabled boolean, ratio double precision, note text)")
        .await;

    let mut conn = db.factory.open_connection().await.unwrap();
    let mut insert = conn.prepare_statement(
        "insert into samples(id, enabled, ratio, note) values (:id, :enabled, :ratio, :note)",
    );
    insert
        .bind_int("id", 5)
        .bind_bool("enabled", true)
        .bind_double("ratio", 0.25)
        .bind_null("note");
    insert.invoke_and_discard(&mut conn).await.unwrap();

    let stmt = conn.prepare_statement("select id, enabled, ratio, note from samples");
    let mut cursor = stmt.invoke(&mut conn).await.unwrap();
    assert!(cursor.next());
    assert_eq!(cursor.column_count().unwrap(), 4);
    assert_eq!(cursor.get_int(0).unwrap(), Some(5));
    assert_eq!(cursor.get_bool(1).unwrap(), Some(true));
    assert_eq!(cursor.get_double(2).unwrap(), Some(0.25));
    assert_eq!(cursor.get_string(3).unwrap(), None);
    assert!(matches!(
        cursor.get_long(9),
        Err(SqlError::ColumnOutOfRange { index: 9, .. })
    ));
    conn.close().await;
}
