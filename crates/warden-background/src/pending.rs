//! Pending request store
//!
//! Requests that wait for out-of-band user confirmation. `enqueue` hands the
//! caller a future; a later message settles it through `resolve`, `reject`
//! or `cancel`. The responder is removed from the map in the same critical
//! section that settles it, so an id settles exactly once.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use warden_core::{Error, Result};

/// Default number of settled ids remembered
pub const DEFAULT_SETTLED_HISTORY: usize = 256;

/// Lifecycle of a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Waiting for the user
    Pending,
    /// Approved
    Resolved,
    /// Rejected or cancelled
    Rejected,
    /// Approved and consumed by the originating handler
    Completed,
}

/// Pending request as shown to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest<P> {
    /// Request id
    pub id: String,
    /// Current status
    pub status: RequestStatus,
    /// What the user is asked to confirm
    pub payload: P,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

struct Slot<P, R> {
    seq: u64,
    request: PendingRequest<P>,
    responder: oneshot::Sender<Result<R>>,
}

struct State<P, R> {
    next_seq: u64,
    pending: HashMap<String, Slot<P, R>>,
    settled: VecDeque<(String, RequestStatus)>,
}

/// Future returned by [`PendingRequestStore::enqueue`]
#[must_use = "the request settles through this future"]
pub struct PendingResponse<R> {
    id: String,
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> PendingResponse<R> {
    /// Id of the request this future waits on
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<R> Future for PendingResponse<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped responder means the store went away with the request
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(Error::Cancelled)))
    }
}

/// Keyed queue of externally resolved requests
pub struct PendingRequestStore<P, R> {
    name: &'static str,
    history: usize,
    state: Arc<Mutex<State<P, R>>>,
    updates: watch::Sender<Vec<PendingRequest<P>>>,
}

impl<P, R> PendingRequestStore<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Create an empty store; `name` tags log lines
    pub fn new(name: &'static str, history: usize) -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            name,
            history: history.max(1),
            state: Arc::new(Mutex::new(State {
                next_seq: 0,
                pending: HashMap::new(),
                settled: VecDeque::new(),
            })),
            updates,
        }
    }

    /// Queue a request and return the future its caller awaits
    pub fn enqueue(&self, id: &str, payload: P) -> Result<PendingResponse<R>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.pending.contains_key(id) {
                return Err(Error::validation(format!(
                    "Request {} is already pending",
                    id
                )));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                id.to_string(),
                Slot {
                    seq,
                    request: PendingRequest {
                        id: id.to_string(),
                        status: RequestStatus::Pending,
                        payload,
                        created_at: chrono::Utc::now().timestamp(),
                    },
                    responder: tx,
                },
            );
        }

        tracing::info!(
            event = "request_enqueued",
            queue = self.name,
            request_id = %id,
            "Request waiting for confirmation"
        );
        self.publish();

        Ok(PendingResponse {
            id: id.to_string(),
            rx,
        })
    }

    /// Approve request `id`
    pub fn resolve(&self, id: &str, result: R) -> Result<()> {
        self.settle(id, Ok(result), RequestStatus::Resolved)
    }

    /// Refuse request `id` with `error`
    pub fn reject(&self, id: &str, error: Error) -> Result<()> {
        self.settle(id, Err(error), RequestStatus::Rejected)
    }

    /// Cancel request `id`; the caller sees [`Error::Cancelled`]
    pub fn cancel(&self, id: &str) -> Result<()> {
        self.reject(id, Error::Cancelled)
    }

    fn settle(&self, id: &str, outcome: Result<R>, status: RequestStatus) -> Result<()> {
        let slot = {
            let mut state = self.state.lock();
            let slot = state.pending.remove(id).ok_or_else(|| Error::StaleRequest {
                id: id.to_string(),
            })?;
            self.remember(&mut state, id, status);
            slot
        };

        let outcome_label = match &outcome {
            Ok(_) => "resolved".to_string(),
            Err(e) => e.to_string(),
        };
        if slot.responder.send(outcome).is_err() {
            tracing::debug!(
                queue = self.name,
                request_id = %id,
                "Requester went away before settlement"
            );
        }

        tracing::info!(
            event = "request_settled",
            queue = self.name,
            request_id = %id,
            outcome = %outcome_label,
            "Request settled"
        );
        self.publish();
        Ok(())
    }

    fn remember(&self, state: &mut State<P, R>, id: &str, status: RequestStatus) {
        state.settled.retain(|(settled, _)| settled != id);
        state.settled.push_back((id.to_string(), status));
        while state.settled.len() > self.history {
            state.settled.pop_front();
        }
    }

    /// Mark an approved request as consumed by its handler
    pub fn complete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.settled.iter_mut().find(|(settled, _)| settled == id) {
            Some((_, status)) if *status == RequestStatus::Resolved => {
                *status = RequestStatus::Completed;
                Ok(())
            }
            _ => Err(Error::StaleRequest { id: id.to_string() }),
        }
    }

    /// Status of `id`, pending or recently settled
    pub fn status(&self, id: &str) -> Option<RequestStatus> {
        let state = self.state.lock();
        if state.pending.contains_key(id) {
            return Some(RequestStatus::Pending);
        }
        state
            .settled
            .iter()
            .find(|(settled, _)| settled == id)
            .map(|(_, status)| *status)
    }

    /// Payload of a pending request
    pub fn payload(&self, id: &str) -> Result<P> {
        self.state
            .lock()
            .pending
            .get(id)
            .map(|slot| slot.request.payload.clone())
            .ok_or_else(|| Error::StaleRequest { id: id.to_string() })
    }

    /// Pending requests in arrival order
    pub fn snapshot(&self) -> Vec<PendingRequest<P>> {
        let state = self.state.lock();
        let mut slots: Vec<&Slot<P, R>> = state.pending.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.request.clone()).collect()
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns `true` when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watch the pending list
    pub fn subscribe(&self) -> watch::Receiver<Vec<PendingRequest<P>>> {
        self.updates.subscribe()
    }

    /// Cancel everything still pending
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.state.lock().pending.keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id).is_ok()).count()
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.updates.send_replace(snapshot);
    }
}
