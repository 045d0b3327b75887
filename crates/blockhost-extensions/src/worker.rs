//! Sandboxed-worker bookkeeping.
//!
//! Sandboxed loads do not run in the host process; each one waits for a
//! dedicated worker context.  [`WorkerQueue`] holds the requests in FIFO
//! order, hands out never-reused numeric handles as workers announce
//! themselves, and tracks which request each handle belongs to until the
//! worker finishes initializing.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::error::Result;

/// Opaque identifier for one worker context.  Handles are allocated
/// monotonically and never reused within a registry's lifetime.
pub type WorkerHandle = u32;

/// A sandboxed load waiting for a worker, with the channel that resolves the
/// originating `load` call.
#[derive(Debug)]
pub struct PendingWorkerRequest {
    pub url: String,
    pub completion: oneshot::Sender<Result<WorkerHandle>>,
}

/// The pairing of a newly available worker with the load it will serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub handle: WorkerHandle,
    pub url: String,
}

/// FIFO queue of pending sandboxed loads plus the in-flight assignments
/// whose workers have not reported initialization yet.
#[derive(Debug, Default)]
pub struct WorkerQueue {
    unassigned: VecDeque<PendingWorkerRequest>,
    assigned: HashMap<WorkerHandle, PendingWorkerRequest>,
    next_handle: WorkerHandle,
}

impl WorkerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sandboxed load behind every load already waiting.
    pub fn enqueue(&mut self, request: PendingWorkerRequest) {
        self.unassigned.push_back(request);
    }

    /// Pair the next waiting load with a fresh worker handle.
    ///
    /// Returns `None` when nothing is waiting; the handle counter does not
    /// advance in that case.
    pub fn allocate(&mut self) -> Option<WorkerAssignment> {
        let request = self.unassigned.pop_front()?;
        let handle = self.next_handle;
        self.next_handle += 1;
        let assignment = WorkerAssignment {
            handle,
            url: request.url.clone(),
        };
        self.assigned.insert(handle, request);
        Some(assignment)
    }

    /// Remove and return the in-flight request for `handle`, if the handle
    /// is currently assigned.  A second take for the same handle yields
    /// `None`.
    pub fn take_assigned(&mut self, handle: WorkerHandle) -> Option<PendingWorkerRequest> {
        self.assigned.remove(&handle)
    }

    pub fn pending_len(&self) -> usize {
        self.unassigned.len()
    }

    pub fn assigned_len(&self) -> usize {
        self.assigned.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
