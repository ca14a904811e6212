// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ucloud-rpc tests.
//!
//! [`TestApp`] wires a small set of calls into a router behind the real auth filters and a
//! throwaway SQLite database. Requests go through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use ucloud_rpc::auth::{Audience, AuthInterceptor, JwtTokenValidation, SignedIntentFilter, TokenClaims};
use ucloud_rpc::calls::CallDescription;
use ucloud_rpc::decoder::{FieldKind, ParamField, ParamSchema};
use ucloud_rpc::error::{CommonErrorMessage, RpcError};
use ucloud_rpc::health;
use ucloud_rpc::roles::{Role, Roles};
use ucloud_rpc::server::{OutgoingCallResponse, RpcServer};
use ucloud_sql::{ConnectionFactory, MigrationHandler, MigrationScript, SqlError};

pub const SECRET: &[u8] = b"user-secret";
pub const PROVIDER_SECRET: &[u8] = b"provider-secret";

/// Mint an HS512 token for `username` with the given role and scopes.
pub fn token(username: &str, role: Role, scopes: &[&str], secret: &[u8]) -> String {
    let now = chrono::Utc::now().timestamp();
    TokenClaims {
        sub: username.to_string(),
        role,
        aud: Audience::Many(scopes.iter().map(|s| s.to_string()).collect()),
        iat: now,
        exp: now + 600,
        principal_type: None,
        public_session_reference: None,
        extended_by: None,
        extended_by_chain: Vec::new(),
    }
    .sign(secret)
    .expect("Failed to sign token")
}

pub fn user_token() -> String {
    token("alice", Role::User, &["all:write"], SECRET)
}

pub fn admin_token() -> String {
    token("root", Role::Admin, &["all:write"], SECRET)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseRequest {
    pub path: String,
    pub items_per_page: Option<i32>,
    pub page: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateNote {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Note {
    pub id: i64,
    pub owner: String,
    pub text: String,
}

pub fn browse_files() -> CallDescription<BrowseRequest, Value, CommonErrorMessage> {
    let schema = ParamSchema::new()
        .field(ParamField::new("path", FieldKind::String))
        .field(ParamField::new("itemsPerPage", FieldKind::Int).nullable())
        .field(ParamField::new("page", FieldKind::Int).nullable());
    CallDescription::browse("files", "", schema)
        .roles(Roles::END_USER)
        .build()
}

pub fn purge() -> CallDescription<(), (), CommonErrorMessage> {
    CallDescription::update("admin", "purge").roles(Roles::ADMIN).build()
}

pub fn create_note() -> CallDescription<CreateNote, Note, CommonErrorMessage> {
    CallDescription::create("notes", "").build()
}

pub fn browse_notes() -> CallDescription<(), Vec<Note>, CommonErrorMessage> {
    CallDescription::browse("notes", "", ParamSchema::new()).build()
}

pub fn protected_note() -> CallDescription<(), (), CommonErrorMessage> {
    CallDescription::update("notes", "protected").build()
}

pub fn explode() -> CallDescription<(), (), CommonErrorMessage> {
    CallDescription::update("boom", "explode").roles(Roles::PUBLIC).build()
}

pub fn provider_suspend() -> CallDescription<(), String, CommonErrorMessage> {
    CallDescription::update("ucloud/k8s/jobs", "suspend")
        .roles(Roles::PROVIDER)
        .build()
}

/// A router plus the state its handlers touch.
pub struct TestApp {
    pub router: Router,
    pub factory: ConnectionFactory,
    pub browse_hits: Arc<AtomicUsize>,
    pub purge_hits: Arc<AtomicUsize>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_development_mode(false).await
    }

    pub async fn with_development_mode(development_mode: bool) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("rpc.db").display());
        let factory = ConnectionFactory::connect(&url, 2)
            .await
            .expect("Failed to open SQLite database");

        let mut migrations = MigrationHandler::new(factory.clone());
        migrations
            .add_script(MigrationScript::sql(
                "notes-v1",
                "create table notes(id integer primary key autoincrement, owner text not null, text text not null)",
            ))
            .expect("Failed to add migration");
        migrations.migrate().await.expect("Migrations failed");

        let browse_hits = Arc::new(AtomicUsize::new(0));
        let purge_hits = Arc::new(AtomicUsize::new(0));

        let mut server = RpcServer::new();
        server
            .attach_filter(Arc::new(
                AuthInterceptor::new(
                    Arc::new(JwtTokenValidation::hs512(SECRET)),
                    Arc::new(JwtTokenValidation::hs512(PROVIDER_SECRET)),
                )
                .development_mode(development_mode),
            ))
            .attach_filter(Arc::new(SignedIntentFilter));

        let hits = browse_hits.clone();
        server
            .implement(&browse_files(), move |ctx, req: BrowseRequest| {
                let hits = hits.clone();
                Box::pin(async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let username = ctx
                        .security_principal()
                        .map(|p| p.username.clone())
                        .unwrap_or_default();
                    Ok(OutgoingCallResponse::ok(json!({
                        "username": username,
                        "request": req,
                        "signedIntent": ctx.signed_intent(),
                    })))
                })
            })
            .expect("Failed to implement files.browse");

        let hits = purge_hits.clone();
        server
            .implement(&purge(), move |_ctx, _req: ()| {
                let hits = hits.clone();
                Box::pin(async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(OutgoingCallResponse::ok(()))
                })
            })
            .expect("Failed to implement admin.purge");

        let db = factory.clone();
        server
            .implement(&create_note(), move |ctx, req: CreateNote| {
                let db = db.clone();
                Box::pin(async move {
                    let owner = ctx
                        .security_principal()
                        .map(|p| p.username.clone())
                        .ok_or_else(RpcError::unauthorized)?;
                    let text = req.text;
                    let note = db
                        .ctx()
                        .with_session(move |conn| {
                            Box::pin(async move {
                                let mut insert = conn.prepare_statement(
                                    "insert into notes(owner, text) values (:owner, :text)",
                                );
                                insert.bind_string("owner", owner.clone()).bind_string("text", text.clone());
                                insert.invoke_and_discard(conn).await?;

                                let mut latest = conn.prepare_statement(
                                    "select id from notes where owner = :owner order by id desc limit 1",
                                );
                                latest.bind_string("owner", owner.clone());
                                let mut cursor = latest.invoke(conn).await?;
                                cursor.next();
                                let id = cursor.get_long(0)?.unwrap_or(0);
                                Ok::<_, SqlError>(Note { id, owner, text })
                            })
                        })
                        .await?;
                    Ok(OutgoingCallResponse::Ok {
                        result: note,
                        status: StatusCode::CREATED,
                    })
                })
            })
            .expect("Failed to implement notes.create");

        let db = factory.clone();
        server
            .implement(&browse_notes(), move |ctx, _req: ()| {
                let db = db.clone();
                Box::pin(async move {
                    let owner = ctx
                        .security_principal()
                        .map(|p| p.username.clone())
                        .ok_or_else(RpcError::unauthorized)?;
                    let notes = db
                        .ctx()
                        .with_session(move |conn| {
                            Box::pin(async move {
                                let mut notes = Vec::new();
                                let mut select = conn.prepare_statement(
                                    "select id, owner, text from notes where owner = :owner order by id",
                                );
                                select
                                    .use_and_invoke(
                                        conn,
                                        |stmt| {
                                            stmt.bind_string("owner", owner.clone());
                                        },
                                        |row| {
                                            notes.push(Note {
                                                id: row.get_long(0)?.unwrap_or(0),
                                                owner: row.get_string(1)?.unwrap_or_default(),
                                                text: row.get_string(2)?.unwrap_or_default(),
                                            });
                                            Ok(())
                                        },
                                    )
                                    .await?;
                                Ok::<_, SqlError>(notes)
                            })
                        })
                        .await?;
                    Ok(OutgoingCallResponse::ok(notes))
                })
            })
            .expect("Failed to implement notes.browse");

        server
            .implement(&protected_note(), |_ctx, _req: ()| {
                Box::pin(async move {
                    Ok(OutgoingCallResponse::error(
                        CommonErrorMessage::new("Not your note", Some("NOT_OWNER".into())),
                        StatusCode::FORBIDDEN,
                    ))
                })
            })
            .expect("Failed to implement notes.protected");

        server
            .implement(&explode(), |_ctx, _req: ()| {
                Box::pin(async move {
                    let items: Vec<u8> = Vec::new();
                    let fourth: u8 = items[3];
                    tracing::info!(fourth, "unreachable");
                    Ok(OutgoingCallResponse::ok(()))
                })
            })
            .expect("Failed to implement boom.explode");

        server
            .implement(&provider_suspend(), |ctx, _req: ()| {
                Box::pin(async move {
                    let username = ctx
                        .security_principal()
                        .map(|p| p.username.clone())
                        .unwrap_or_default();
                    Ok(OutgoingCallResponse::ok(username))
                })
            })
            .expect("Failed to implement provider suspend");

        health::register(&mut server, factory.clone()).expect("Failed to implement core.health");

        let router = server.into_router().expect("Failed to build router");

        Self {
            router,
            factory,
            browse_hits,
            purge_hits,
            _dir: dir,
        }
    }

    /// Send a request and return the status and the JSON body (`Null` when empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Response body is not JSON")
        };
        (status, body)
    }
}

/// Build a request with an optional bearer and JSON body.
pub fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {bearer}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}
