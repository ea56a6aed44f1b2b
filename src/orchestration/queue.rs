// Priority queue feeding the dispatch loop.
//
// Ordering is priority descending, then enqueue sequence ascending, so
// equal-priority requests dispatch in arrival order. A request keeps its
// original sequence number across re-enqueues, which puts a retried
// request ahead of anything that arrived after it.

use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::ModelKind;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::oneshot;
use tracing::debug;

/// Payload handed to the provider once the request is admitted.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub prompt: String,
    pub model: ModelKind,
    pub priority: i32,
    pub source_lang: String,
    pub target_lang: String,
}

/// What a dispatched request resolves to.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub text: String,
    pub tokens_used: u64,
    /// Model that actually served the request (post-fallback).
    pub model: ModelKind,
}

pub struct QueuedRequest {
    pub request: TranslationRequest,
    pub handle: oneshot::Sender<TranslationResult<DispatchOutcome>>,
    /// Assigned on first enqueue, preserved across re-enqueues.
    pub seq: u64,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority wins, then lower seq.
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct PriorityRequestQueue {
    heap: Mutex<BinaryHeap<QueuedRequest>>,
    next_seq: AtomicU64,
}

impl PriorityRequestQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Enqueue a new request, assigning its sequence number. Returns the
    /// receiver the caller awaits for the outcome.
    pub fn enqueue(
        &self,
        request: TranslationRequest,
    ) -> oneshot::Receiver<TranslationResult<DispatchOutcome>> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(seq, priority = request.priority, "request enqueued");
        self.heap.lock().push(QueuedRequest {
            request,
            handle: tx,
            seq,
        });
        rx
    }

    /// Put a dequeued request back without assigning a new sequence number.
    pub fn requeue(&self, queued: QueuedRequest) {
        debug!(seq = queued.seq, "request requeued");
        self.heap.lock().push(queued);
    }

    /// Highest-priority request, or None when empty.
    pub fn dequeue_next(&self) -> Option<QueuedRequest> {
        self.heap.lock().pop()
    }

    /// Resolve every pending request with Cancelled. Returns how many were
    /// dropped. In-flight dispatches are unaffected.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<QueuedRequest> = {
            let mut heap = self.heap.lock();
            heap.drain().collect()
        };
        let count = drained.len();
        for queued in drained {
            let _ = queued.handle.send(Err(TranslationError::Cancelled));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

impl Default for PriorityRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
