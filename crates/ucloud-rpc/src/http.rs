// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter, on};
use bytes::Bytes;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::calls::{CallInfo, RequestBinding};
use crate::context::{DeliveredResponse, HttpExchange, IngoingCall, Transport};
use crate::decoder::{QueryParams, decode_params};
use crate::error::{RpcError, SetupError};
use crate::server::{EncodedResponse, IngoingRequestInterceptor, ResponseBody, RpcServer};
use crate::websocket::WebSocketInterceptor;

/// Largest request body read into memory.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Serves calls with an HTTP binding.
#[derive(Default)]
pub struct HttpInterceptor {
    /// path -> calls bound to it, one per method
    routes: BTreeMap<String, Vec<Arc<CallInfo>>>,
}

impl HttpInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when a WebSocket upgrade would share a path with a `GET` call.
    pub(crate) fn check_conflicts(&self, websocket: &WebSocketInterceptor) -> Result<(), SetupError> {
        for path in websocket.paths() {
            let taken = self
                .routes
                .get(path)
                .is_some_and(|calls| calls.iter().any(|c| http_method_of(c) == Some(&axum::http::Method::GET)));
            if taken {
                return Err(SetupError::DuplicateRoute {
                    method: "GET".into(),
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn install(self, mut router: Router, server: Arc<RpcServer>) -> Result<Router, SetupError> {
        let interceptor = Arc::new(self);

        for (path, calls) in &interceptor.routes {
            let mut method_router: MethodRouter = MethodRouter::new();
            for call in calls {
                let Some(binding) = call.http.as_ref() else {
                    continue;
                };
                let filter = MethodFilter::try_from(binding.method.clone()).map_err(|_| {
                    SetupError::InvalidMethod {
                        call: call.full_name.clone(),
                        method: binding.method.to_string(),
                    }
                })?;

                let server = server.clone();
                let interceptor = interceptor.clone();
                let call = call.clone();
                method_router = method_router.merge(on(filter, move |request: Request| {
                    let server = server.clone();
                    let interceptor = interceptor.clone();
                    let call = call.clone();
                    async move { interceptor.serve(&server, &call, request).await }
                }));
            }
            router = router.route(path, method_router);
        }

        Ok(router)
    }

    async fn serve(&self, server: &RpcServer, call: &CallInfo, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let mut ctx = IngoingCall::new(Transport::Http(HttpExchange::with_pending_body(
            parts.method,
            parts.uri,
            parts.headers,
            body,
        )));
        server.handle_incoming_call(self, &mut ctx, call).await;

        ctx.take_http_response()
            .unwrap_or_else(|| StatusCode::OK.into_response())
    }
}

fn http_method_of(call: &CallInfo) -> Option<&axum::http::Method> {
    call.http.as_ref().map(|h| &h.method)
}

impl IngoingRequestInterceptor for HttpInterceptor {
    fn add_call_listener_for_call(&mut self, call: Arc<CallInfo>) -> Result<(), SetupError> {
        let Some(binding) = call.http.as_ref() else {
            return Err(SetupError::NoTransport(call.full_name.clone()));
        };
        if !binding.path.starts_with('/') {
            return Err(SetupError::InvalidPath {
                call: call.full_name.clone(),
                path: binding.path.clone(),
            });
        }

        let calls = self.routes.entry(binding.path.clone()).or_default();
        if calls.iter().any(|c| http_method_of(c) == Some(&binding.method)) {
            return Err(SetupError::DuplicateRoute {
                method: binding.method.to_string(),
                path: binding.path.clone(),
            });
        }
        debug!(call = %call.full_name, method = %binding.method, path = %binding.path, "Bound HTTP route");
        calls.push(call);
        Ok(())
    }

    fn load_request<'a>(
        &'a self,
        ctx: &'a mut IngoingCall,
        call: &'a CallInfo,
    ) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            let Transport::Http(http) = ctx.transport_mut() else {
                return Ok(());
            };
            let Some(body) = http.take_pending_body() else {
                return Ok(());
            };
            let reads_body = !call.request_is_unit
                && call
                    .http
                    .as_ref()
                    .is_some_and(|binding| matches!(binding.request, RequestBinding::EntireBody));
            if !reads_body {
                return Ok(());
            }

            http.body = axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
                debug!(error = %e, "Failed to read request body");
                RpcError::bad_request()
            })?;
            Ok(())
        })
    }

    fn parse_request(&self, ctx: &IngoingCall, call: &CallInfo) -> Result<Value, RpcError> {
        let Transport::Http(http) = ctx.transport() else {
            return Err(RpcError::internal());
        };
        let Some(binding) = call.http.as_ref() else {
            return Err(RpcError::internal());
        };
        if call.request_is_unit {
            return Ok(Value::Null);
        }

        let decoded = match &binding.request {
            RequestBinding::None => return Ok(Value::Null),
            RequestBinding::EntireBody => {
                if http.body.is_empty() {
                    debug!("Request body is empty");
                    return Err(RpcError::bad_request());
                }
                return serde_json::from_slice(&http.body).map_err(|e| {
                    debug!(error = %e, "Request body is not valid JSON");
                    RpcError::bad_request()
                });
            }
            RequestBinding::Query(schema) => {
                let params = QueryParams::parse(http.uri.query().unwrap_or(""));
                decode_params(schema, &params)
            }
            RequestBinding::Headers(schema) => decode_params(schema, &http.headers),
        };

        decoded.map_err(|e| {
            debug!(error = %e, "Failed to decode request parameters");
            RpcError::bad_request()
        })
    }

    fn produce_response(&self, ctx: &mut IngoingCall, _call: &CallInfo, response: EncodedResponse) {
        let http_response = match response.body {
            ResponseBody::AlreadyDelivered => return,
            ResponseBody::Empty => DeliveredResponse::new(response.status, Bytes::new()),
            ResponseBody::Json(value) => json_response(response.status, &value),
        };
        // Only fails for WebSocket calls, which never reach this interceptor.
        let _ = ctx.deliver_http(http_response);
    }
}

fn json_response(status: StatusCode, value: &Value) -> DeliveredResponse {
    let mut response = DeliveredResponse::new(status, value.to_string());
    response
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}
