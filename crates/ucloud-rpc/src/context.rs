// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-call context.
//!
//! An [`IngoingCall`] lives for exactly one call. It carries the transport exchange the
//! call arrived on and an attribute bag that filters use to hand data to each other and to
//! the handler (the validated token, the raw bearer, the signed intent).

use std::sync::{Mutex, PoisonError};

use axum::body::Body;
use axum::http::{Extensions, HeaderMap, Method, StatusCode, Uri, header};
use axum::response::Response;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RpcError;
use crate::roles::{SecurityPrincipal, SecurityPrincipalToken};
use crate::websocket::ServerFrame;

/// Header carrying a caller-supplied job id.
pub const JOB_ID_HEADER: &str = "Job-Id";
/// Header carrying a signed intent.
pub const SIGNED_INTENT_HEADER: &str = "UCloud-Signed-Intent";

/// The bearer that authenticated the call, stored after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// A signed intent presented with the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIntent(pub String);

/// An HTTP request being served.
#[derive(Debug)]
pub struct HttpExchange {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Request body not read yet. Held behind a mutex only so the exchange stays `Sync`.
    pub(crate) pending_body: Mutex<Option<Body>>,
    pub(crate) response: Option<DeliveredResponse>,
}

/// A response written to an HTTP exchange, turned into an [`axum`] response once the
/// pipeline is done.
#[derive(Debug, Clone)]
pub struct DeliveredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DeliveredResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl HttpExchange {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            pending_body: Mutex::new(None),
            response: None,
        }
    }

    /// An exchange whose body is read only when the call needs it.
    pub(crate) fn with_pending_body(method: Method, uri: Uri, headers: HeaderMap, body: Body) -> Self {
        let mut exchange = Self::new(method, uri, headers, Bytes::new());
        exchange.pending_body = Mutex::new(Some(body));
        exchange
    }

    /// Take the unread body, if any.
    pub(crate) fn take_pending_body(&mut self) -> Option<Body> {
        self.pending_body
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// One request frame received on a WebSocket connection.
#[derive(Debug)]
pub struct WebSocketExchange {
    pub stream_id: String,
    pub payload: Value,
    pub bearer: Option<String>,
    pub signed_intent: Option<String>,
    pub(crate) outgoing: mpsc::UnboundedSender<ServerFrame>,
}

/// Transport a call arrived on.
#[derive(Debug)]
pub enum Transport {
    Http(HttpExchange),
    WebSocket(WebSocketExchange),
}

/// Context of one ingoing call.
#[derive(Debug)]
pub struct IngoingCall {
    transport: Transport,
    job_id: String,
    attributes: Extensions,
}

impl IngoingCall {
    pub fn new(transport: Transport) -> Self {
        let job_id = match &transport {
            Transport::Http(http) => http
                .headers
                .get(JOB_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            Transport::WebSocket(_) => None,
        }
        .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            transport,
            job_id,
            attributes: Extensions::new(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    /// Bearer as presented by the caller, before any validation.
    pub fn raw_bearer(&self) -> Option<&str> {
        match &self.transport {
            Transport::Http(http) => http
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(strip_bearer_prefix),
            Transport::WebSocket(ws) => ws.bearer.as_deref().filter(|b| !b.is_empty()),
        }
    }

    /// Signed intent as presented by the caller.
    pub fn raw_signed_intent(&self) -> Option<&str> {
        match &self.transport {
            Transport::Http(http) => http
                .headers
                .get(SIGNED_INTENT_HEADER)
                .and_then(|v| v.to_str().ok()),
            Transport::WebSocket(ws) => ws.signed_intent.as_deref(),
        }
        .filter(|v| !v.is_empty())
    }

    /// The validated token, if the call was authenticated.
    pub fn security_token(&self) -> Option<&SecurityPrincipalToken> {
        self.attributes.get::<SecurityPrincipalToken>()
    }

    pub fn security_principal(&self) -> Option<&SecurityPrincipal> {
        self.security_token().map(|t| &t.principal)
    }

    /// The bearer that authenticated the call.
    pub fn bearer(&self) -> Option<&str> {
        self.attributes.get::<BearerToken>().map(|b| b.0.as_str())
    }

    pub fn signed_intent(&self) -> Option<&str> {
        self.attributes.get::<SignedIntent>().map(|s| s.0.as_str())
    }

    /// Push an intermediate message to the caller. Only WebSocket calls can stream.
    pub fn send_message<T: Serialize>(&self, payload: &T) -> Result<(), RpcError> {
        let Transport::WebSocket(ws) = &self.transport else {
            tracing::warn!(job_id = %self.job_id, "Streaming is not supported over HTTP");
            return Err(RpcError::internal());
        };

        let payload = serde_json::to_value(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to encode streamed message");
            RpcError::internal()
        })?;

        ws.outgoing
            .send(ServerFrame::Message {
                stream_id: ws.stream_id.clone(),
                payload,
            })
            .map_err(|_| {
                tracing::debug!(stream_id = %ws.stream_id, "Connection closed before message was sent");
                RpcError::internal()
            })
    }

    /// Deliver a prebuilt HTTP response. Handlers that do this return
    /// [`OutgoingCallResponse::AlreadyDelivered`](crate::server::OutgoingCallResponse::AlreadyDelivered).
    pub fn deliver_http(&mut self, response: DeliveredResponse) -> Result<(), RpcError> {
        match &mut self.transport {
            Transport::Http(http) => {
                http.response = Some(response);
                Ok(())
            }
            Transport::WebSocket(_) => Err(RpcError::internal()),
        }
    }

    pub(crate) fn take_http_response(&mut self) -> Option<Response> {
        match &mut self.transport {
            Transport::Http(http) => http.response.take().map(DeliveredResponse::into_response),
            Transport::WebSocket(_) => None,
        }
    }
}

fn strip_bearer_prefix(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
