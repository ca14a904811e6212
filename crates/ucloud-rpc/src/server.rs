// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Call dispatch.
//!
//! [`RpcServer`] owns the handler table and the filter chain. Transport interceptors
//! (HTTP, WebSocket) turn raw traffic into an [`IngoingCall`] and hand it to
//! [`RpcServer::handle_incoming_call`], which runs:
//!
//! ```text
//! lookup handler ─► before_parsing* ─► parse ─► decode ─► after_parsing*
//!       ─► handler ─► before_response* ─► produce response ─► after_response*
//! ```
//!
//! Any failure on the way short-circuits to the error response; `after_response`
//! filters run for every call regardless of the outcome.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::calls::{CallDescription, CallInfo};
use crate::context::IngoingCall;
use crate::error::{RpcError, SetupError};
use crate::http::HttpInterceptor;
use crate::websocket::WebSocketInterceptor;

/// Future returned by call handlers.
pub type HandlerFuture<'a, S, E> = BoxFuture<'a, Result<OutgoingCallResponse<S, E>, RpcError>>;

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingCallResponse<S, E> {
    Ok { result: S, status: StatusCode },
    Error { error: Option<E>, status: StatusCode },
    /// The handler wrote the response itself.
    AlreadyDelivered,
}

impl<S, E> OutgoingCallResponse<S, E> {
    pub fn ok(result: S) -> Self {
        Self::Ok {
            result,
            status: StatusCode::OK,
        }
    }

    pub fn error(error: E, status: StatusCode) -> Self {
        Self::Error {
            error: Some(error),
            status,
        }
    }

    pub fn status_only(status: StatusCode) -> Self {
        Self::Error {
            error: None,
            status,
        }
    }
}

impl<S: Serialize, E: Serialize> OutgoingCallResponse<S, E> {
    /// Encode into the transport-neutral form.
    pub fn encode(self) -> Result<EncodedResponse, RpcError> {
        match self {
            OutgoingCallResponse::Ok { result, status } => Ok(EncodedResponse {
                status,
                body: ResponseBody::Json(to_json(&result)?),
            }),
            OutgoingCallResponse::Error {
                error: Some(error),
                status,
            } => Ok(EncodedResponse {
                status,
                body: ResponseBody::Json(to_json(&error)?),
            }),
            OutgoingCallResponse::Error { error: None, status } => {
                Ok(EncodedResponse::empty(status))
            }
            OutgoingCallResponse::AlreadyDelivered => Ok(EncodedResponse {
                status: StatusCode::OK,
                body: ResponseBody::AlreadyDelivered,
            }),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| {
        warn!(error = %e, "Failed to encode response");
        RpcError::internal()
    })
}

/// Response ready to be written by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResponse {
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl EncodedResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
        }
    }

    /// The error response for `err` on `call`. Only calls declaring
    /// [`CommonErrorMessage`](crate::error::CommonErrorMessage) as their error type get a body.
    pub fn from_error(call: &CallInfo, err: &RpcError) -> Self {
        if !call.error_is_common {
            return Self::empty(err.status);
        }
        match serde_json::to_value(err.to_common_message()) {
            Ok(body) => Self {
                status: err.status,
                body: ResponseBody::Json(body),
            },
            Err(_) => Self::empty(err.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Empty,
    AlreadyDelivered,
}

/// A hook around every call. All methods default to doing nothing.
#[async_trait]
pub trait IngoingCallFilter: Send + Sync {
    /// Whether this filter applies to the call at all.
    fn can_use_context(&self, _ctx: &IngoingCall) -> bool {
        true
    }

    async fn before_parsing(&self, _ctx: &mut IngoingCall, _call: &CallInfo) -> Result<(), RpcError> {
        Ok(())
    }

    async fn after_parsing(
        &self,
        _ctx: &mut IngoingCall,
        _call: &CallInfo,
        _request: &Value,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    async fn before_response(
        &self,
        _ctx: &mut IngoingCall,
        _call: &CallInfo,
        _status: StatusCode,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    /// Runs after the response was produced, for every call. Cannot fail the call.
    async fn after_response(
        &self,
        _ctx: &IngoingCall,
        _call: &CallInfo,
        _status: StatusCode,
        _elapsed: Duration,
    ) {
    }
}

/// A transport that feeds calls into the server.
pub trait IngoingRequestInterceptor: Send + Sync {
    /// Register a call this transport should listen for.
    fn add_call_listener_for_call(&mut self, call: Arc<CallInfo>) -> Result<(), SetupError>;

    /// Read the parts of the exchange that are only read once the call got past the
    /// `before_parsing` filters, such as a request body.
    fn load_request<'a>(
        &'a self,
        _ctx: &'a mut IngoingCall,
        _call: &'a CallInfo,
    ) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async { Ok(()) })
    }

    /// Read the request value of `call` out of the exchange.
    fn parse_request(&self, ctx: &IngoingCall, call: &CallInfo) -> Result<Value, RpcError>;

    /// Write the response back to the caller.
    fn produce_response(&self, ctx: &mut IngoingCall, call: &CallInfo, response: EncodedResponse);
}

trait ErasedHandler: Send + Sync {
    fn decode(&self, raw: &Value) -> Result<Box<dyn Any + Send>, RpcError>;

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut IngoingCall,
        request: Box<dyn Any + Send>,
    ) -> BoxFuture<'a, Result<EncodedResponse, RpcError>>;
}

struct TypedHandler<R, S, E, F> {
    handler: F,
    _types: PhantomData<fn(R) -> (S, E)>,
}

impl<R, S, E, F> ErasedHandler for TypedHandler<R, S, E, F>
where
    R: DeserializeOwned + Send + 'static,
    S: Serialize + Send + 'static,
    E: Serialize + Send + 'static,
    F: for<'a> Fn(&'a mut IngoingCall, R) -> HandlerFuture<'a, S, E> + Send + Sync + 'static,
{
    fn decode(&self, raw: &Value) -> Result<Box<dyn Any + Send>, RpcError> {
        <R as serde::Deserialize>::deserialize(raw)
            .map(|request| Box::new(request) as Box<dyn Any + Send>)
            .map_err(|e| {
                debug!(error = %e, "Request does not match the call's request type");
                RpcError::bad_request()
            })
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut IngoingCall,
        request: Box<dyn Any + Send>,
    ) -> BoxFuture<'a, Result<EncodedResponse, RpcError>> {
        Box::pin(async move {
            let request = request.downcast::<R>().map_err(|_| RpcError::internal())?;
            (self.handler)(ctx, *request).await?.encode()
        })
    }
}

struct RegisteredCall {
    info: Arc<CallInfo>,
    handler: Arc<dyn ErasedHandler>,
}

/// The call table plus the filter chain.
#[derive(Default)]
pub struct RpcServer {
    filters: Vec<Arc<dyn IngoingCallFilter>>,
    handlers: HashMap<String, RegisteredCall>,
    order: Vec<String>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter. Filters run in attachment order.
    pub fn attach_filter(&mut self, filter: Arc<dyn IngoingCallFilter>) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Register the handler of `call`.
    pub fn implement<R, S, E, F>(
        &mut self,
        call: &CallDescription<R, S, E>,
        handler: F,
    ) -> Result<&mut Self, SetupError>
    where
        R: DeserializeOwned + Send + 'static,
        S: Serialize + Send + 'static,
        E: Serialize + Send + 'static,
        F: for<'a> Fn(&'a mut IngoingCall, R) -> HandlerFuture<'a, S, E> + Send + Sync + 'static,
    {
        let info = call.info().clone();
        if info.http.is_none() && info.websocket.is_none() {
            return Err(SetupError::NoTransport(info.full_name.clone()));
        }
        if self.handlers.contains_key(&info.full_name) {
            return Err(SetupError::DuplicateHandler(info.full_name.clone()));
        }

        debug!(call = %info.full_name, "Registered call handler");
        self.order.push(info.full_name.clone());
        self.handlers.insert(
            info.full_name.clone(),
            RegisteredCall {
                info,
                handler: Arc::new(TypedHandler {
                    handler,
                    _types: PhantomData,
                }),
            },
        );
        Ok(self)
    }

    /// Registered calls, in registration order.
    pub fn calls(&self) -> impl Iterator<Item = &Arc<CallInfo>> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name).map(|r| &r.info))
    }

    pub fn call(&self, full_name: &str) -> Option<&Arc<CallInfo>> {
        self.handlers.get(full_name).map(|r| &r.info)
    }

    /// Run one call through the pipeline and hand the response to `source`.
    /// Returns the status that was produced.
    pub async fn handle_incoming_call<I>(
        &self,
        source: &I,
        ctx: &mut IngoingCall,
        call: &CallInfo,
    ) -> StatusCode
    where
        I: IngoingRequestInterceptor + ?Sized,
    {
        let span = info_span!("call", call = %call.full_name, job_id = %ctx.job_id());
        async {
            let start = Instant::now();
            let view: &IngoingCall = ctx;
            let filters: Vec<_> = self
                .filters
                .iter()
                .filter(|f| f.can_use_context(view))
                .cloned()
                .collect();

            let response = match self.run_pipeline(source, ctx, call, &filters).await {
                Ok(response) => response,
                Err(err) => {
                    if err.is_internal() {
                        warn!(error = %err, "Call failed");
                    } else {
                        debug!(error = %err, "Call rejected");
                    }
                    EncodedResponse::from_error(call, &err)
                }
            };

            let status = response.status;
            source.produce_response(ctx, call, response);

            let elapsed = start.elapsed();
            for filter in &filters {
                filter.after_response(ctx, call, status, elapsed).await;
            }
            info!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "Call completed");
            status
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline<I>(
        &self,
        source: &I,
        ctx: &mut IngoingCall,
        call: &CallInfo,
        filters: &[Arc<dyn IngoingCallFilter>],
    ) -> Result<EncodedResponse, RpcError>
    where
        I: IngoingRequestInterceptor + ?Sized,
    {
        let Some(registered) = self.handlers.get(&call.full_name) else {
            error!("No handler registered for call");
            return Err(RpcError::internal());
        };

        for filter in filters {
            filter.before_parsing(ctx, call).await?;
        }

        source.load_request(ctx, call).await?;
        let raw = source.parse_request(ctx, call)?;
        let request = registered.handler.decode(&raw)?;

        for filter in filters {
            filter.after_parsing(ctx, call, &raw).await?;
        }

        let response = AssertUnwindSafe(registered.handler.invoke(ctx, request))
            .catch_unwind()
            .await
            .map_err(|panic| {
                error!(panic = panic_message(&*panic), "Handler panicked");
                RpcError::internal()
            })??;

        for filter in filters {
            filter.before_response(ctx, call, response.status).await?;
        }

        Ok(response)
    }

    /// Bind every registered call to its transports and build the router.
    pub fn into_router(self) -> Result<Router, SetupError> {
        let mut http = HttpInterceptor::new();
        let mut websocket = WebSocketInterceptor::new();

        for info in self.calls() {
            if info.http.is_some() {
                http.add_call_listener_for_call(info.clone())?;
            }
            if info.websocket.is_some() {
                websocket.add_call_listener_for_call(info.clone())?;
            }
        }
        http.check_conflicts(&websocket)?;

        let server = Arc::new(self);
        let router = http.install(Router::new(), server.clone())?;
        let router = websocket.install(router, server);
        Ok(router.fallback(|| async { StatusCode::NOT_FOUND }))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}
