// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebSocket transport.
//!
//! One connection multiplexes many calls. Every client frame names a call and a stream id;
//! the server answers with any number of `message` frames followed by exactly one
//! `response` frame for that stream id.
//!
//! ```text
//! client: {"call":"files.browse","streamId":"1","payload":{...},"bearer":"..."}
//! server: {"type":"message","streamId":"1","payload":{...}}
//! server: {"type":"response","streamId":"1","payload":{...},"status":200}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::calls::CallInfo;
use crate::context::{IngoingCall, Transport, WebSocketExchange};
use crate::error::{RpcError, SetupError};
use crate::server::{EncodedResponse, IngoingRequestInterceptor, ResponseBody, RpcServer};

/// Calls a single connection may have in flight. Further frames wait until one finishes.
pub const MAX_IN_FLIGHT_CALLS: usize = 64;

/// A request frame sent by the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub call: String,
    pub stream_id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub bearer: Option<String>,
    #[serde(default)]
    pub signed_intent: Option<String>,
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Message { stream_id: String, payload: Value },
    #[serde(rename_all = "camelCase")]
    Response {
        stream_id: String,
        payload: Value,
        status: u16,
    },
}

/// Serves calls with a WebSocket binding.
#[derive(Default)]
pub struct WebSocketInterceptor {
    /// path -> full call name -> call
    paths: BTreeMap<String, HashMap<String, Arc<CallInfo>>>,
}

impl WebSocketInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub(crate) fn install(self, mut router: Router, server: Arc<RpcServer>) -> Router {
        let interceptor = Arc::new(self);

        for path in interceptor.paths.keys() {
            let server = server.clone();
            let interceptor = interceptor.clone();
            let path_key = path.clone();
            router = router.route(
                path,
                get(move |upgrade: WebSocketUpgrade| {
                    let server = server.clone();
                    let interceptor = interceptor.clone();
                    let path = path_key.clone();
                    async move {
                        upgrade.on_upgrade(move |socket| serve_socket(socket, server, interceptor, path))
                    }
                }),
            );
        }

        router
    }

    /// Handle one text frame received on the connection bound to `path`.
    pub(crate) async fn handle_frame(
        &self,
        server: &RpcServer,
        path: &str,
        text: &str,
        outgoing: &mpsc::UnboundedSender<ServerFrame>,
    ) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Discarding frame that is not JSON");
                return;
            }
        };

        let frame = match ClientFrame::deserialize(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Malformed request frame");
                if let Some(stream_id) = raw.get("streamId").and_then(Value::as_str) {
                    let _ = outgoing.send(ServerFrame::Response {
                        stream_id: stream_id.to_string(),
                        payload: Value::Null,
                        status: 400,
                    });
                }
                return;
            }
        };

        let call = self
            .paths
            .get(path)
            .and_then(|calls| calls.get(&frame.call))
            .cloned();
        let Some(call) = call else {
            debug!(call = %frame.call, path, "Unknown call on WebSocket");
            let _ = outgoing.send(ServerFrame::Response {
                stream_id: frame.stream_id,
                payload: Value::Null,
                status: 404,
            });
            return;
        };

        let mut ctx = IngoingCall::new(Transport::WebSocket(WebSocketExchange {
            stream_id: frame.stream_id,
            payload: frame.payload,
            bearer: frame.bearer,
            signed_intent: frame.signed_intent,
            outgoing: outgoing.clone(),
        }));
        server.handle_incoming_call(self, &mut ctx, &call).await;
    }

    /// Handle `text` on its own task once the connection has a free call slot.
    ///
    /// Returns `None` if `limit` was closed.
    pub(crate) async fn spawn_frame(
        self: &Arc<Self>,
        server: &Arc<RpcServer>,
        limit: &Arc<Semaphore>,
        path: &str,
        text: String,
        outgoing: &mpsc::UnboundedSender<ServerFrame>,
    ) -> Option<JoinHandle<()>> {
        let permit = limit.clone().acquire_owned().await.ok()?;
        let interceptor = self.clone();
        let server = server.clone();
        let path = path.to_string();
        let outgoing = outgoing.clone();
        Some(tokio::spawn(async move {
            interceptor.handle_frame(&server, &path, &text, &outgoing).await;
            drop(permit);
        }))
    }
}

async fn serve_socket(
    socket: WebSocket,
    server: Arc<RpcServer>,
    interceptor: Arc<WebSocketInterceptor>,
    path: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let limit = Arc::new(Semaphore::new(MAX_IN_FLIGHT_CALLS));
    debug!(path = %path, "WebSocket connection opened");
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket read failed");
                break;
            }
        };

        if interceptor
            .spawn_frame(&server, &limit, &path, text.as_str().to_owned(), &tx)
            .await
            .is_none()
        {
            break;
        }
    }

    // The writer drains until every in-flight call has dropped its sender.
    drop(tx);
    let _ = writer.await;
    debug!(path = %path, "WebSocket connection closed");
}

impl IngoingRequestInterceptor for WebSocketInterceptor {
    fn add_call_listener_for_call(&mut self, call: Arc<CallInfo>) -> Result<(), SetupError> {
        let Some(binding) = call.websocket.as_ref() else {
            return Err(SetupError::NoTransport(call.full_name.clone()));
        };
        if !binding.path.starts_with('/') {
            return Err(SetupError::InvalidPath {
                call: call.full_name.clone(),
                path: binding.path.clone(),
            });
        }
        debug!(call = %call.full_name, path = %binding.path, "Bound WebSocket call");
        self.paths
            .entry(binding.path.clone())
            .or_default()
            .insert(call.full_name.clone(), call.clone());
        Ok(())
    }

    fn parse_request(&self, ctx: &IngoingCall, call: &CallInfo) -> Result<Value, RpcError> {
        let Transport::WebSocket(ws) = ctx.transport() else {
            return Err(RpcError::internal());
        };
        if call.request_is_unit {
            return Ok(Value::Null);
        }
        Ok(ws.payload.clone())
    }

    fn produce_response(&self, ctx: &mut IngoingCall, _call: &CallInfo, response: EncodedResponse) {
        let Transport::WebSocket(ws) = ctx.transport() else {
            return;
        };
        let payload = match response.body {
            ResponseBody::AlreadyDelivered => return,
            ResponseBody::Empty => Value::Null,
            ResponseBody::Json(value) => value,
        };
        let sent = ws.outgoing.send(ServerFrame::Response {
            stream_id: ws.stream_id.clone(),
            payload,
            status: response.status.as_u16(),
        });
        if sent.is_err() {
            debug!(stream_id = %ws.stream_id, "Connection closed before response was sent");
        }
    }
}
