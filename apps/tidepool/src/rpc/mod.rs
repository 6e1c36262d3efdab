//! MessagePack-RPC framing over an outbound byte sink.
//!
//! Requests are `[0, id, method, params]`, responses `[1, id, error, result]`
//! and notifications `[2, method, params]`. Responses are matched against an
//! outstanding table for logging only; nothing waits on them.

use std::collections::HashMap;
use std::time::Instant;

use msgpack_wire::{EncodeError, Value, encode};
use thiserror::Error;
use tracing::{debug, trace, warn};
use transport_ring::{PushOutcome, RingProducer};

use crate::grid::{RedrawEvent, parse_redraw};
use crate::metrics;

pub type RequestId = u32;

pub const REQUEST: i64 = 0;
pub const RESPONSE: i64 = 1;
pub const NOTIFICATION: i64 = 2;

/// Oldest entries are evicted past this many unanswered calls.
const MAX_OUTSTANDING: usize = 1024;

/// Where encoded messages go. Implementations may drop bytes under pressure.
pub trait OutboundSink {
    fn send(&mut self, bytes: &[u8]) -> PushOutcome;
}

impl OutboundSink for RingProducer {
    fn send(&mut self, bytes: &[u8]) -> PushOutcome {
        self.push(bytes)
    }
}

/// In-memory sink, mostly for tests and capture tooling.
impl OutboundSink for Vec<u8> {
    fn send(&mut self, bytes: &[u8]) -> PushOutcome {
        self.extend_from_slice(bytes);
        PushOutcome {
            written: bytes.len(),
            dropped: 0,
        }
    }
}

/// Answers requests the editor sends to the host.
pub trait RequestResponder: Send {
    /// `Ok(result)` is sent with a nil error; `Err(error)` with a nil result.
    fn respond(&mut self, method: &str, params: &Value) -> Result<Value, Value>;
}

impl<F> RequestResponder for F
where
    F: FnMut(&str, &Value) -> Result<Value, Value> + Send,
{
    fn respond(&mut self, method: &str, params: &Value) -> Result<Value, Value> {
        self(method, params)
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to encode `{method}`: {source}")]
    Encode {
        method: String,
        #[source]
        source: EncodeError,
    },
    #[error("invalid rpc message: {0}")]
    InvalidMessage(String),
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A peer request that the configured responder answered.
    Request { id: RequestId, method: String },
    /// A peer request dropped because no responder is configured.
    UnhandledRequest { id: RequestId, method: String },
    Response {
        id: RequestId,
        /// Method of the matching call, when it was still outstanding.
        method: Option<String>,
        error: Value,
        result: Value,
    },
    Redraw(Vec<RedrawEvent>),
    Notification { method: String, params: Value },
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    sent_at: Instant,
}

pub struct RpcChannel<S> {
    sink: S,
    next_id: RequestId,
    outstanding: HashMap<RequestId, PendingCall>,
    responder: Option<Box<dyn RequestResponder>>,
}

impl<S: OutboundSink> RpcChannel<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_id: 0,
            outstanding: HashMap::new(),
            responder: None,
        }
    }

    pub fn set_responder(&mut self, responder: Option<Box<dyn RequestResponder>>) {
        self.responder = responder;
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Sends `[0, id, method, params]` and returns the id used.
    pub fn call(&mut self, method: &str, params: Vec<Value>) -> Result<RequestId, RpcError> {
        let id = self.next_id;
        let message = Value::Array(vec![
            Value::from(REQUEST),
            Value::from(id),
            Value::from(method),
            Value::Array(params),
        ]);
        self.send(method, &message)?;
        self.next_id = self.next_id.wrapping_add(1);

        if self.outstanding.len() >= MAX_OUTSTANDING {
            self.evict_oldest();
        }
        self.outstanding.insert(
            id,
            PendingCall {
                method: method.to_owned(),
                sent_at: Instant::now(),
            },
        );
        trace!(id, method, "rpc call sent");
        Ok(id)
    }

    /// Sends `[2, method, params]`.
    pub fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        let message = Value::Array(vec![
            Value::from(NOTIFICATION),
            Value::from(method),
            Value::Array(params),
        ]);
        self.send(method, &message)
    }

    /// Sends `[1, id, error, result]`.
    pub fn respond(&mut self, id: RequestId, error: Value, result: Value) -> Result<(), RpcError> {
        let message = Value::Array(vec![Value::from(RESPONSE), Value::from(id), error, result]);
        self.send("<response>", &message)
    }

    fn send(&mut self, method: &str, message: &Value) -> Result<(), RpcError> {
        let bytes = encode(message).map_err(|source| RpcError::Encode {
            method: method.to_owned(),
            source,
        })?;
        let outcome = self.sink.send(&bytes);
        if outcome.dropped > 0 {
            metrics::RING_DROPPED_BYTES.inc_by(outcome.dropped as u64);
            warn!(
                method,
                written = outcome.written,
                dropped = outcome.dropped,
                "outbound message truncated"
            );
        }
        Ok(())
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .outstanding
            .iter()
            .min_by_key(|(_, pending)| pending.sent_at)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            if let Some(pending) = self.outstanding.remove(&id) {
                debug!(id, method = %pending.method, "evicting unanswered call");
            }
        }
    }

    /// Classifies one decoded message.
    pub fn dispatch(&mut self, message: Value) -> Result<Inbound, RpcError> {
        let items = match message {
            Value::Array(items) => items,
            other => {
                metrics::RPC_MESSAGES.with_label_values(&["invalid"]).inc();
                return Err(RpcError::InvalidMessage(format!(
                    "expected array, got {}",
                    other.kind()
                )));
            }
        };
        let inbound = match items.first().and_then(Value::as_i64) {
            Some(REQUEST) => self.dispatch_request(items),
            Some(RESPONSE) => self.dispatch_response(items),
            Some(NOTIFICATION) => dispatch_notification(items),
            other => Err(RpcError::InvalidMessage(format!(
                "unknown message type {other:?}"
            ))),
        };
        let kind = match &inbound {
            Ok(Inbound::Request { .. }) => "request",
            Ok(Inbound::UnhandledRequest { .. }) => "unhandled_request",
            Ok(Inbound::Response { .. }) => "response",
            Ok(Inbound::Redraw(_)) => "redraw",
            Ok(Inbound::Notification { .. }) => "notification",
            Err(_) => "invalid",
        };
        metrics::RPC_MESSAGES.with_label_values(&[kind]).inc();
        inbound
    }

    fn dispatch_request(&mut self, items: Vec<Value>) -> Result<Inbound, RpcError> {
        let [_, id, method, params] = <[Value; 4]>::try_from(items).map_err(|items| {
            RpcError::InvalidMessage(format!("request has {} elements, expected 4", items.len()))
        })?;
        let id = message_id(&id)?;
        let method = method_name(&method)?;

        let Some(responder) = self.responder.as_mut() else {
            metrics::UNHANDLED_REQUESTS.inc();
            warn!(id, method = %method, "dropping peer request; no responder configured");
            return Ok(Inbound::UnhandledRequest { id, method });
        };
        let (error, result) = match responder.respond(&method, &params) {
            Ok(result) => (Value::Nil, result),
            Err(error) => (error, Value::Nil),
        };
        debug!(id, method = %method, failed = !error.is_nil(), "answering peer request");
        self.respond(id, error, result)?;
        Ok(Inbound::Request { id, method })
    }

    fn dispatch_response(&mut self, items: Vec<Value>) -> Result<Inbound, RpcError> {
        let [_, id, error, result] = <[Value; 4]>::try_from(items).map_err(|items| {
            RpcError::InvalidMessage(format!("response has {} elements, expected 4", items.len()))
        })?;
        let id = message_id(&id)?;
        let method = match self.outstanding.remove(&id) {
            Some(pending) => {
                let elapsed_ms = pending.sent_at.elapsed().as_millis() as u64;
                if error.is_nil() {
                    debug!(id, method = %pending.method, elapsed_ms, "rpc response");
                } else {
                    warn!(id, method = %pending.method, elapsed_ms, error = ?error, "rpc error response");
                }
                Some(pending.method)
            }
            None => {
                warn!(id, "response for unknown request id");
                None
            }
        };
        Ok(Inbound::Response {
            id,
            method,
            error,
            result,
        })
    }
}

fn dispatch_notification(items: Vec<Value>) -> Result<Inbound, RpcError> {
    let [_, method, params] = <[Value; 3]>::try_from(items).map_err(|items| {
        RpcError::InvalidMessage(format!(
            "notification has {} elements, expected 3",
            items.len()
        ))
    })?;
    let method = method_name(&method)?;
    if method == "redraw" {
        return Ok(Inbound::Redraw(parse_redraw(&params)));
    }
    trace!(method = %method, "notification");
    Ok(Inbound::Notification { method, params })
}

fn message_id(value: &Value) -> Result<RequestId, RpcError> {
    value
        .as_u64()
        .and_then(|id| RequestId::try_from(id).ok())
        .ok_or_else(|| RpcError::InvalidMessage(format!("bad message id {value:?}")))
}

fn method_name(value: &Value) -> Result<String, RpcError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| RpcError::InvalidMessage(format!("method is a {}, expected str", value.kind())))
}
