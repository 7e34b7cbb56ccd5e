//! JSON-RPC session over a [`Channel`].
//!
//! Requests get a monotonically increasing id and park a oneshot in the
//! pending map. A single pump task reads inbound frames and routes each
//! response to the waiter holding its id, so concurrent requests may be
//! answered in any order. When the inbound side ends the session is marked
//! closed and every waiter fails with `ConnectionLost`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use blitz_types::error::TransportError;
use blitz_types::rpc::{RpcRequest, RpcResponse};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Channel;

type PendingMap = HashMap<u64, oneshot::Sender<RpcResponse>>;

struct Shared {
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark closed and drop every waiter. Dropped senders surface as
    /// `ConnectionLost` on the receiving side.
    fn close(&self) {
        let mut pending = self.pending();
        self.closed.store(true, Ordering::SeqCst);
        let dropped = pending.len();
        pending.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "session closed with requests in flight");
        }
    }
}

/// Removes a pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

pub struct RpcSession {
    outbound: mpsc::Sender<String>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    pump: JoinHandle<()>,
}

impl RpcSession {
    /// Take ownership of a channel and start routing its inbound frames.
    pub fn start(channel: Channel) -> Self {
        let Channel {
            outbound,
            mut inbound,
            shutdown,
        } = channel;

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let pump_shared = Arc::clone(&shared);
        let pump = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                dispatch_frame(&pump_shared, &frame);
            }
            tracing::info!("remote channel closed");
            pump_shared.close();
        });

        Self {
            outbound,
            shared,
            next_id: AtomicU64::new(1),
            shutdown,
            pump,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response under `timeout`.
    ///
    /// A timeout is reported as [`TransportError::Timeout`] and never retried
    /// here. A remote error object becomes [`TransportError::Remote`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionLost);
            }
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            shared: self.shared.as_ref(),
            id,
        };

        let frame = serde_json::to_string(&RpcRequest::call(id, method, params))
            .map_err(|e| TransportError::Protocol(format!("encode {method}: {e}")))?;
        tracing::debug!(request_id = id, method, "sending request");

        // The deadline covers the send too: a stalled writer must not hold a
        // caller past its timeout.
        let exchange = async {
            if self.outbound.send(frame).await.is_err() {
                self.shared.close();
                return Err(TransportError::ConnectionLost);
            }
            rx.await.map_err(|_| TransportError::ConnectionLost)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                tracing::warn!(
                    request_id = id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(TransportError::Timeout {
                    method: method.to_string(),
                    after_ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(response)) => response.into_result().map_err(|err| TransportError::Remote {
                code: err.code,
                message: err.message,
            }),
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionLost);
        }
        let frame = serde_json::to_string(&RpcRequest::notification(method, params))
            .map_err(|e| TransportError::Protocol(format!("encode {method}: {e}")))?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionLost)
    }

    /// Close the session and ask the channel's IO tasks to stop.
    pub fn close(&self) {
        self.shared.close();
        self.shutdown.cancel();
        self.pump.abort();
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.shared.pending().len()
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.pump.abort();
    }
}

/// Route one inbound frame to its waiter. Anything unroutable is logged.
fn dispatch_frame(shared: &Shared, frame: &str) {
    let response: RpcResponse = match serde_json::from_str(frame) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                error = %e,
                frame_len = frame.len(),
                "protocol error: malformed frame dropped"
            );
            return;
        }
    };

    let Some(id) = response.correlation_id() else {
        match &response.method {
            Some(method) => tracing::debug!(method = %method, "ignoring server notification"),
            None => tracing::warn!("protocol error: response without id dropped"),
        }
        return;
    };

    let waiter = shared.pending().remove(&id);
    match waiter {
        Some(tx) => {
            // The waiter may have timed out in the meantime.
            let _ = tx.send(response);
        }
        None => {
            tracing::warn!(request_id = id, "protocol error: response for unknown request id")
        }
    }
}
