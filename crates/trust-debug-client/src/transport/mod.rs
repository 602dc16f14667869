//! Request/response correlation and event demultiplexing.
//! - Transport::open: start routing messages from a Channel
//! - send_request/request: sequence-tagged round trips
//! - subscribe: per-subscriber engine event streams
//! - dispose: close the channel and reject pending requests
//! - channel/framing: how channels are obtained

mod channel;
mod framing;

pub use channel::{Channel, Connector, ProcessConnector};
pub use framing::{read_message, spawn_stream_channel, write_message};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{DebugError, DebugResult};
use crate::protocol::{EngineEvent, IncomingMessage, MessageType, Request, Response};
use crate::signal::{Signal, Subscription};

type PendingReply = oneshot::Sender<DebugResult<Response<Value>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Open,
    Closed,
    Disposed,
}

struct TransportInner {
    next_seq: AtomicU32,
    link: Mutex<LinkState>,
    pending: Mutex<HashMap<u32, PendingReply>>,
    outgoing: Mutex<Option<UnboundedSender<Value>>>,
    events: Signal<EngineEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Option<Duration>,
}

/// Handle to one engine conversation. Cloning shares the same channel.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("link", &*self.inner.link.lock())
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

impl Transport {
    /// Start routing messages from `channel`. The returned subscription is
    /// registered before any message is read, so no event can be missed.
    pub fn open(
        channel: Channel,
        request_timeout: Option<Duration>,
    ) -> (Self, Subscription<EngineEvent>) {
        let (outgoing, incoming) = channel.into_parts();
        let inner = Arc::new(TransportInner {
            next_seq: AtomicU32::new(1),
            link: Mutex::new(LinkState::Open),
            pending: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(Some(outgoing)),
            events: Signal::new(),
            reader: Mutex::new(None),
            request_timeout,
        });
        let events = inner.events.subscribe();
        let reader = tokio::spawn(read_loop(Arc::clone(&inner), incoming));
        *inner.reader.lock() = Some(reader);
        (Self { inner }, events)
    }

    pub fn subscribe(&self) -> Subscription<EngineEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.inner.link.lock() == LinkState::Open
    }

    /// Send `command` and wait for its own response, whatever order
    /// responses arrive in. Failure envelopes become `ProtocolError`.
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> DebugResult<Option<Value>> {
        let (seq, reply) = self.dispatch(command, arguments)?;
        let outcome = match self.inner.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.pending.lock().remove(&seq);
                    return Err(DebugError::protocol(format!(
                        "request '{command}' timed out after {}ms",
                        limit.as_millis()
                    )));
                }
            },
            None => reply.await,
        };
        let response = outcome.map_err(|_| DebugError::Disposed)??;
        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| format!("request '{command}' failed"));
            return Err(DebugError::Protocol(message));
        }
        Ok(response.body)
    }

    /// Typed round trip; a body that does not match `B` is a `ProtocolError`.
    pub async fn request<A, B>(&self, command: &str, arguments: &A) -> DebugResult<B>
    where
        A: Serialize + ?Sized,
        B: DeserializeOwned,
    {
        let body = self
            .send_request(command, Some(encode_arguments(command, arguments)?))
            .await?;
        decode_body(command, body.unwrap_or(Value::Null))
    }

    /// Like [`Transport::request`], but an absent body yields `B::default()`.
    pub async fn request_or_default<A, B>(&self, command: &str, arguments: &A) -> DebugResult<B>
    where
        A: Serialize + ?Sized,
        B: DeserializeOwned + Default,
    {
        let body = self
            .send_request(command, Some(encode_arguments(command, arguments)?))
            .await?;
        match body {
            None | Some(Value::Null) => Ok(B::default()),
            Some(body) => decode_body(command, body),
        }
    }

    /// Close the channel; every pending and future request fails with `Disposed`.
    pub fn dispose(&self) {
        self.inner.close(LinkState::Disposed, DebugError::Disposed);
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
    }

    fn dispatch(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> DebugResult<(u32, oneshot::Receiver<DebugResult<Response<Value>>>)> {
        let link = self.inner.link.lock();
        match *link {
            LinkState::Disposed => return Err(DebugError::Disposed),
            LinkState::Closed => return Err(DebugError::protocol("engine channel closed")),
            LinkState::Open => {}
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            seq,
            message_type: MessageType::Request,
            command: command.to_string(),
            arguments,
        };
        let message = serde_json::to_value(&request)
            .map_err(|err| DebugError::protocol(format!("failed to encode '{command}': {err}")))?;
        trace!("-> {message}");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.pending.lock().insert(seq, reply_tx);
        let sent = self
            .inner
            .outgoing
            .lock()
            .as_ref()
            .is_some_and(|outgoing| outgoing.send(message).is_ok());
        drop(link);
        if !sent {
            self.inner.pending.lock().remove(&seq);
            return Err(DebugError::protocol("engine channel closed"));
        }
        debug!(command, seq, "request sent");
        Ok((seq, reply_rx))
    }
}

impl TransportInner {
    fn route(&self, message: Value) {
        trace!("<- {message}");
        match IncomingMessage::parse(message) {
            Ok(IncomingMessage::Response(response)) => {
                let waiter = self.pending.lock().remove(&response.request_seq);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(response));
                    }
                    None => debug!(
                        request_seq = response.request_seq,
                        command = %response.command,
                        "dropping response without a pending request"
                    ),
                }
            }
            Ok(IncomingMessage::Event(event)) => match EngineEvent::parse(event) {
                Ok(event) => self.events.emit(event),
                Err(err) => debug!("dropping engine event: {err}"),
            },
            Err(err) => warn!("dropping engine message: {err}"),
        }
    }

    fn close(&self, next: LinkState, error: DebugError) {
        let waiters = {
            let mut link = self.link.lock();
            if *link == LinkState::Disposed {
                return;
            }
            *link = next;
            self.outgoing.lock().take();
            self.pending
                .lock()
                .drain()
                .map(|(_, waiter)| waiter)
                .collect::<Vec<_>>()
        };
        if !waiters.is_empty() {
            debug!(count = waiters.len(), "rejecting pending requests: {error}");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        self.events.close();
    }
}

async fn read_loop(inner: Arc<TransportInner>, mut incoming: UnboundedReceiver<Value>) {
    while let Some(message) = incoming.recv().await {
        inner.route(message);
    }
    debug!("engine channel closed");
    inner.close(
        LinkState::Closed,
        DebugError::protocol("engine channel closed"),
    );
}

fn encode_arguments<A: Serialize + ?Sized>(command: &str, arguments: &A) -> DebugResult<Value> {
    serde_json::to_value(arguments)
        .map_err(|err| DebugError::protocol(format!("failed to encode '{command}' args: {err}")))
}

fn decode_body<B: DeserializeOwned>(command: &str, body: Value) -> DebugResult<B> {
    serde_json::from_value(body)
        .map_err(|err| DebugError::protocol(format!("invalid '{command}' response: {err}")))
}
