//! Recent-contacts queue.
//!
//! Every inbound call records its sender here. When a link set is still
//! empty (right after join, for instance) the repair loops and `select` pop
//! the most recent contact as a fallback starting point. Entries are not
//! deduplicated: a peer that calls often is proportionally more likely to be
//! picked.

use crate::node::Node;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded LIFO of recent RPC senders. The oldest entry is dropped when full.
pub struct ContactsQueue {
    entries: Mutex<VecDeque<Node>>,
    capacity: usize,
}

impl ContactsQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Record a sender.
    pub fn push(&self, node: Node) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(node);
    }

    /// Take the most recently recorded sender.
    pub fn pop(&self) -> Option<Node> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
