//! One-shot reply correlation.
//!
//! A correlator queues one-shot subscriptions per wire tag. An inbound
//! frame consumes the oldest subscription for its tag; cancellation drains
//! every queue at once. Within a tag delivery is FIFO; across tags there is
//! no ordering.
//!
//! The storage is generic over the subscription type `F`, so callers in
//! different layers can queue whatever closure shape their call sites need
//! and do the typed decode at the subscribe site.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// A subscription was terminated before a matching frame arrived.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

/// What a subscription is resolved with.
#[derive(Debug)]
pub enum Delivery<'a> {
    /// A matching frame's payload bytes.
    Frame(&'a [u8]),
    /// The subscription was cancelled.
    Cancelled,
}

/// Per-tag FIFO queues of one-shot subscriptions.
#[derive(Debug)]
pub struct Correlator<F> {
    queues: HashMap<u16, VecDeque<F>>,
    pending: usize,
}

impl<F> Correlator<F> {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            pending: 0,
        }
    }

    /// Queue a one-shot subscription for `tag`.
    pub fn subscribe(&mut self, tag: u16, sub: F) {
        self.queues.entry(tag).or_default().push_back(sub);
        self.pending += 1;
    }

    /// Pop the oldest subscription for `tag`, if any.
    ///
    /// The subscription is gone once taken; redelivery requires a new
    /// `subscribe` call.
    pub fn take(&mut self, tag: u16) -> Option<F> {
        let sub = self.queues.get_mut(&tag)?.pop_front()?;
        debug_assert!(self.pending > 0);
        self.pending -= 1;
        Some(sub)
    }

    /// Drain every queue, returning all subscriptions for cancellation.
    ///
    /// The current queues are swapped out wholesale: subscriptions made
    /// while the returned batch is being cancelled land in fresh queues and
    /// are not part of the batch.
    pub fn cancel(&mut self) -> Vec<F> {
        let queues = std::mem::take(&mut self.queues);
        self.pending = 0;
        queues.into_values().flatten().collect()
    }

    /// Number of queued subscriptions across all tags.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// True when no subscriptions are queued.
    pub fn done(&self) -> bool {
        self.pending == 0
    }
}

impl<F> Default for Correlator<F> {
    fn default() -> Self {
        Self::new()
    }
}
