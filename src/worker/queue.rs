//! Work items for channel workers
//!
//! `RequestQueue` is what a worker consumes; `WorkQueue` is the in-process
//! implementation. Requests and unsolicited items are served before
//! low-priority requests, each group in FIFO order.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Kind of queued work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Request,
    RequestLowPriority,
    Unsolicited,
}

/// One unit of work for a channel worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub kind: ItemKind,
    /// Request or event identifier, meaningful to the handler
    pub id: u32,
    pub payload: Vec<u8>,
    /// Opaque token the handler uses to answer the requester
    pub token: u64,
}

impl QueueItem {
    pub fn request(id: u32, payload: impl Into<Vec<u8>>, token: u64) -> Self {
        Self {
            kind: ItemKind::Request,
            id,
            payload: payload.into(),
            token,
        }
    }

    pub fn low_priority(id: u32, payload: impl Into<Vec<u8>>, token: u64) -> Self {
        Self {
            kind: ItemKind::RequestLowPriority,
            ..Self::request(id, payload, token)
        }
    }

    pub fn unsolicited(id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ItemKind::Unsolicited,
            ..Self::request(id, payload, 0)
        }
    }
}

/// Source of work for a channel worker
pub trait RequestQueue: Send + Sync {
    /// Block until an item is available; `None` means stop waiting
    fn pop(&self) -> Option<QueueItem>;

    /// Make a blocked (or the next) `pop` return `None`
    fn unblock(&self);
}

#[derive(Default)]
struct Items {
    urgent: VecDeque<QueueItem>,
    low: VecDeque<QueueItem>,
    unblocked: bool,
}

/// Blocking two-level priority queue
#[derive(Default)]
pub struct WorkQueue {
    items: Mutex<Items>,
    ready: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: QueueItem) {
        let mut items = self.items.lock();
        match item.kind {
            ItemKind::RequestLowPriority => items.low.push_back(item),
            ItemKind::Request | ItemKind::Unsolicited => items.urgent.push_back(item),
        }
        self.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        let items = self.items.lock();
        items.urgent.len() + items.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestQueue for WorkQueue {
    fn pop(&self) -> Option<QueueItem> {
        let mut guard = self.items.lock();
        loop {
            let items = &mut *guard;
            if items.unblocked {
                items.unblocked = false;
                return None;
            }
            if let Some(item) = items.urgent.pop_front().or_else(|| items.low.pop_front()) {
                return Some(item);
            }
            self.ready.wait(&mut guard);
        }
    }

    fn unblock(&self) {
        self.items.lock().unblocked = true;
        self.ready.notify_all();
    }
}
