// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Call descriptions.
//!
//! A [`CallDescription`] names one RPC endpoint: its request, success and error payload
//! types, who may call it, and how it is reached over HTTP and/or WebSocket. Descriptions
//! are built once at startup and never change afterwards.
//!
//! ```ignore
//! let browse = CallDescription::<BrowseRequest, Page<File>, CommonErrorMessage>::browse(
//!     "files",
//!     "",
//!     browse_schema(),
//! )
//! .roles(Roles::END_USER)
//! .build();
//! ```

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use axum::http::Method;

use crate::decoder::ParamSchema;
use crate::error::CommonErrorMessage;
use crate::roles::{AccessRight, Roles, SecurityScope};

/// How the request value is read from an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBinding {
    /// The request type is the unit type; nothing is read.
    None,
    /// The entire body is JSON for the request type.
    EntireBody,
    /// Fields are read from query parameters.
    Query(ParamSchema),
    /// Fields are read from headers.
    Headers(ParamSchema),
}

/// HTTP route of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBinding {
    pub method: Method,
    pub path: String,
    pub request: RequestBinding,
}

/// WebSocket route of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketBinding {
    pub path: String,
}

/// Type-erased description of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub namespace: String,
    pub name: String,
    /// `namespace.name`
    pub full_name: String,
    pub roles: Roles,
    pub access: AccessRight,
    pub required_scope: SecurityScope,
    pub http: Option<HttpBinding>,
    pub websocket: Option<WebSocketBinding>,
    /// Whether the declared error type is [`CommonErrorMessage`].
    pub error_is_common: bool,
    /// Whether the request type is `()`; such calls ignore whatever payload arrives.
    pub request_is_unit: bool,
}

impl CallInfo {
    /// The route that identifies the call for path-based policy (HTTP first, then WebSocket).
    pub fn route_path(&self) -> Option<&str> {
        self.http
            .as_ref()
            .map(|h| h.path.as_str())
            .or_else(|| self.websocket.as_ref().map(|w| w.path.as_str()))
    }

    /// Whether the call lives in the provider namespace (`/ucloud/...`).
    pub fn is_provider_call(&self) -> bool {
        self.route_path()
            .is_some_and(|p| p.starts_with("/ucloud/"))
    }
}

impl fmt::Display for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// A typed call with request `R`, success payload `S` and error payload `E`.
pub struct CallDescription<R, S, E = CommonErrorMessage> {
    info: Arc<CallInfo>,
    _types: PhantomData<fn(R) -> (S, E)>,
}

impl<R, S, E> Clone for CallDescription<R, S, E> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            _types: PhantomData,
        }
    }
}

impl<R, S, E> fmt::Debug for CallDescription<R, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallDescription").field(&self.info).finish()
    }
}

impl<R, S, E> CallDescription<R, S, E> {
    pub fn info(&self) -> &Arc<CallInfo> {
        &self.info
    }

    pub fn full_name(&self) -> &str {
        &self.info.full_name
    }
}

/// Base path for a namespace. Everything lives under `/api/` except provider (`ucloud/...`)
/// and `auth` namespaces.
pub fn base_context(namespace: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.starts_with("auth") || namespace.starts_with("ucloud/") {
        format!("/{namespace}")
    } else {
        format!("/api/{namespace}")
    }
}

fn capitalized(operation: &str) -> String {
    let mut chars = operation.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn join_path(base: &str, operation: &str) -> String {
    if operation.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{operation}")
    }
}

impl<R: 'static, S: 'static, E: 'static> CallDescription<R, S, E> {
    /// Start describing the call `namespace.name`. Namespaces may use `/` for nesting;
    /// the full name uses `.` instead.
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> CallBuilder<R, S, E> {
        CallBuilder {
            namespace: namespace.into(),
            name: name.into(),
            roles: Roles::END_USER,
            access: AccessRight::ReadWrite,
            scope: None,
            http: None,
            websocket: None,
            _types: PhantomData,
        }
    }

    /// `GET /api/<namespace>/retrieve<Op>`, request from query parameters.
    pub fn retrieve(namespace: &str, operation: &str, schema: ParamSchema) -> CallBuilder<R, S, E> {
        let op = capitalized(operation);
        let path = format!("{}/retrieve{op}", base_context(namespace));
        Self::builder(namespace, format!("retrieve{op}"))
            .access(AccessRight::Read)
            .http(Method::GET, path, RequestBinding::Query(schema))
    }

    /// `GET /api/<namespace>/browse<Op>`, request from query parameters.
    pub fn browse(namespace: &str, operation: &str, schema: ParamSchema) -> CallBuilder<R, S, E> {
        let op = capitalized(operation);
        let path = format!("{}/browse{op}", base_context(namespace));
        Self::builder(namespace, format!("browse{op}"))
            .access(AccessRight::Read)
            .http(Method::GET, path, RequestBinding::Query(schema))
    }

    /// `POST /api/<namespace>/search<Op>`, request from the body.
    pub fn search(namespace: &str, operation: &str) -> CallBuilder<R, S, E> {
        let op = capitalized(operation);
        let path = format!("{}/search{op}", base_context(namespace));
        Self::builder(namespace, format!("search{op}"))
            .access(AccessRight::Read)
            .http(Method::POST, path, RequestBinding::EntireBody)
    }

    /// `POST /api/<namespace>[/<op>]`, request from the body.
    pub fn create(namespace: &str, operation: &str) -> CallBuilder<R, S, E> {
        let path = join_path(&base_context(namespace), operation);
        Self::builder(namespace, format!("create{}", capitalized(operation)))
            .http(Method::POST, path, RequestBinding::EntireBody)
    }

    /// `DELETE /api/<namespace>[/<op>]`, request from the body.
    pub fn delete(namespace: &str, operation: &str) -> CallBuilder<R, S, E> {
        let path = join_path(&base_context(namespace), operation);
        Self::builder(namespace, format!("delete{}", capitalized(operation)))
            .http(Method::DELETE, path, RequestBinding::EntireBody)
    }

    /// `POST /api/<namespace>/<op>`, request from the body.
    pub fn update(namespace: &str, operation: &str) -> CallBuilder<R, S, E> {
        let path = join_path(&base_context(namespace), operation);
        Self::builder(namespace, operation)
            .http(Method::POST, path, RequestBinding::EntireBody)
    }

    /// `GET /api/<namespace>/<op>`, request from query parameters.
    pub fn query_parameters(namespace: &str, operation: &str, schema: ParamSchema) -> CallBuilder<R, S, E> {
        let path = join_path(&base_context(namespace), operation);
        Self::builder(namespace, operation)
            .access(AccessRight::Read)
            .http(Method::GET, path, RequestBinding::Query(schema))
    }
}

/// Builder for [`CallDescription`].
pub struct CallBuilder<R, S, E> {
    namespace: String,
    name: String,
    roles: Roles,
    access: AccessRight,
    scope: Option<SecurityScope>,
    http: Option<HttpBinding>,
    websocket: Option<WebSocketBinding>,
    _types: PhantomData<fn(R) -> (S, E)>,
}

impl<R: 'static, S: 'static, E: 'static> CallBuilder<R, S, E> {
    /// Roles allowed to make the call (default: [`Roles::END_USER`]).
    pub fn roles(mut self, roles: Roles) -> Self {
        self.roles = roles;
        self
    }

    /// Access right of the default required scope (default: read/write).
    pub fn access(mut self, access: AccessRight) -> Self {
        self.access = access;
        self
    }

    /// Override the required scope.
    pub fn scope(mut self, scope: SecurityScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn http(mut self, method: Method, path: impl Into<String>, request: RequestBinding) -> Self {
        self.http = Some(HttpBinding {
            method,
            path: path.into(),
            request,
        });
        self
    }

    pub fn websocket(mut self, path: impl Into<String>) -> Self {
        self.websocket = Some(WebSocketBinding { path: path.into() });
        self
    }

    pub fn build(self) -> CallDescription<R, S, E> {
        let full_name = format!("{}.{}", self.namespace.replace('/', "."), self.name);
        let required_scope = self
            .scope
            .unwrap_or_else(|| SecurityScope::for_call(&full_name, self.access));

        CallDescription {
            info: Arc::new(CallInfo {
                namespace: self.namespace,
                name: self.name,
                full_name,
                roles: self.roles,
                access: self.access,
                required_scope,
                http: self.http,
                websocket: self.websocket,
                error_is_common: TypeId::of::<E>() == TypeId::of::<CommonErrorMessage>(),
                request_is_unit: TypeId::of::<R>() == TypeId::of::<()>(),
            }),
            _types: PhantomData,
        }
    }
}
