//! Request → reply correlation.
//!
//! Every correlated send registers a [`PendingRequest`] keyed by a fresh
//! correlation id. Exactly one of reply, deadline expiry or connection loss
//! removes the entry and completes its single-shot slot; whichever path wins
//! the removal from the map is the only one that can complete it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{PeerError, Result};
use crate::packet::Packet;

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant instead of overflowing.
///
/// `Duration::MAX` and other huge timeouts therefore mean "wait until
/// resolved or disconnected".
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Value copy of the request fields a reply consumer needs for context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub packet_type: String,
    pub sender_id: Uuid,
    pub sender_username: String,
}

impl RequestContext {
    /// Capture the context of an outgoing request.
    pub fn of(packet: &Packet) -> Self {
        Self {
            packet_type: packet.packet_type.clone(),
            sender_id: packet.sender_id,
            sender_username: packet.sender_username.clone(),
        }
    }
}

/// A resolved request: the reply packet plus the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub request: RequestContext,
    pub packet: Packet,
}

impl Reply {
    /// The reply payload.
    pub fn payload(&self) -> &Bytes {
        &self.packet.payload
    }

    /// The reply type tag.
    pub fn packet_type(&self) -> &str {
        &self.packet.packet_type
    }
}

struct PendingRequest {
    connection_id: Uuid,
    deadline: Instant,
    timeout: Duration,
    request: RequestContext,
    completion: SyncSender<Result<Reply>>,
}

impl PendingRequest {
    fn complete(self, outcome: Result<Reply>) {
        // Capacity 1 and a single completer: this never blocks. A dropped
        // receiver means the caller stopped waiting, which is fine.
        let _ = self.completion.try_send(outcome);
    }
}

/// Outstanding request → reply expectations, shared by every connection of an endpoint.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<Uuid, PendingRequest>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request expected to be answered through `connection_id`.
    ///
    /// The returned handle carries the fresh correlation id to stamp on the
    /// outgoing packet, and blocks on [`PendingReply::wait`] until resolution.
    pub fn begin_request(
        self: &Arc<Self>,
        connection_id: Uuid,
        request: RequestContext,
        timeout: Duration,
    ) -> PendingReply {
        let (completion, rx) = mpsc::sync_channel(1);
        let deadline = deadline_after(timeout);
        let mut pending = Some(PendingRequest {
            connection_id,
            deadline,
            timeout,
            request,
            completion,
        });

        let id = loop {
            let candidate = Uuid::new_v4();
            if let Entry::Vacant(slot) = self.pending.entry(candidate) {
                if let Some(pending) = pending.take() {
                    slot.insert(pending);
                }
                break candidate;
            }
        };

        trace!(correlation_id = %id, %connection_id, ?timeout, "request registered");

        PendingReply {
            id,
            deadline,
            timeout,
            rx,
            table: Arc::clone(self),
        }
    }

    /// Complete the request `id` with its reply.
    ///
    /// Returns `false` when no such request is pending (late or duplicate reply).
    pub fn resolve(&self, id: Uuid, packet: Packet) -> bool {
        match self.pending.remove(&id) {
            Some((_, pending)) => {
                let request = pending.request.clone();
                pending.complete(Ok(Reply { request, packet }));
                true
            }
            None => false,
        }
    }

    /// Drop a pending request without completing it.
    pub fn cancel(&self, id: Uuid) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every request whose deadline has passed. Returns how many expired.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        self.drain_where(|pending| pending.deadline <= now, |pending| {
            PeerError::CorrelationTimeout(pending.timeout)
        })
    }

    /// Fail every request waiting on `connection_id` with `ConnectionLost`.
    pub fn fail_all_for(&self, connection_id: Uuid) -> usize {
        let failed = self.drain_where(
            |pending| pending.connection_id == connection_id,
            |_| PeerError::ConnectionLost,
        );
        if failed > 0 {
            debug!(%connection_id, failed, "failed pending requests for lost connection");
        }
        failed
    }

    /// Number of requests currently awaiting resolution.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn drain_where(
        &self,
        matches: impl Fn(&PendingRequest) -> bool,
        failure: impl Fn(&PendingRequest) -> PeerError,
    ) -> usize {
        let ids: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| matches(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut drained = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove_if(&id, |_, pending| matches(pending)) {
                let err = failure(&pending);
                pending.complete(Err(err));
                drained += 1;
            }
        }
        drained
    }
}

/// Caller-side handle of a pending request.
///
/// Dropping the handle without waiting withdraws the request from the table.
pub struct PendingReply {
    id: Uuid,
    deadline: Instant,
    timeout: Duration,
    rx: Receiver<Result<Reply>>,
    table: Arc<CorrelationTable>,
}

impl PendingReply {
    /// Correlation id to stamp on the outgoing request.
    pub fn correlation_id(&self) -> Uuid {
        self.id
    }

    /// Block until the request is answered, times out, or its connection is lost.
    pub fn wait(self) -> Result<Reply> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                if self.table.cancel(self.id) {
                    return Err(PeerError::CorrelationTimeout(self.timeout));
                }
                // Another path removed the entry first; its outcome is in flight.
                self.rx
                    .recv()
                    .unwrap_or(Err(PeerError::CorrelationTimeout(self.timeout)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PeerError::ConnectionLost),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.cancel(self.id);
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Background thread that periodically expires overdue requests.
///
/// Waiters already time out on their own; the sweep reclaims entries whose
/// callers are slow to wake and keeps `len()` honest.
pub struct ExpirySweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Start sweeping `table` every `interval`.
    pub fn spawn(table: &Arc<CorrelationTable>, interval: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let weak: Weak<CorrelationTable> = Arc::downgrade(table);
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("vein-sweeper".to_string())
            .spawn(move || loop {
                thread::park_timeout(interval);
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                match weak.upgrade() {
                    Some(table) => {
                        let expired = table.expire_overdue();
                        if expired > 0 {
                            debug!(expired, "expired overdue requests");
                        }
                    }
                    None => break,
                }
            })
            .map_err(PeerError::Spawn)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the sweeper and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
