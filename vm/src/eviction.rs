//! Victim selection.
//!
//! When the allocator has no free frame, one resident page must give its
//! frame up. The [`EvictionPolicy`] decides which. The context tells the
//! policy about every page that becomes resident and every page that stops
//! being resident for a reason other than eviction (unmap, exit); the policy
//! hands back victims through [`EvictionPolicy::select_victim`], the single
//! "select and remove" operation.
//!
//! Two policies are provided:
//! - [`Fifo`]: the page made resident the longest time ago.
//! - [`Clock`]: second chance over the same order, skipping (and clearing)
//!   pages whose accessed bit is set.

use crate::{PageKey, config::PolicyKind};
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};

/// A page-replacement policy.
pub trait EvictionPolicy: Send {
    /// `key` became resident. Re-inserting a tracked page makes it the
    /// newest.
    fn on_resident(&mut self, key: PageKey);

    /// `key` is no longer resident and must not be selected.
    fn on_release(&mut self, key: PageKey);

    /// Puts a page returned by [`select_victim`](Self::select_victim) back
    /// as the oldest page, after its eviction failed.
    fn reinstate(&mut self, key: PageKey);

    /// Selects the next victim and stops tracking it.
    ///
    /// `probe(key)` clears the accessed bit of `key` and returns its
    /// previous value. Policies that do not use access information never
    /// call it.
    fn select_victim(&mut self, probe: &mut dyn FnMut(PageKey) -> bool) -> Option<PageKey>;

    /// Tracked pages, oldest first.
    fn order(&self) -> Vec<PageKey>;

    /// Number of tracked pages.
    fn len(&self) -> usize;

    /// Returns true if no page is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the policy selected by `kind`.
pub fn new_policy(kind: PolicyKind) -> Box<dyn EvictionPolicy> {
    match kind {
        PolicyKind::Fifo => Box::new(Fifo::new()),
        PolicyKind::Clock => Box::new(Clock::new()),
    }
}

// Resident pages ordered by residency age. Smaller sequence is older.
#[derive(Default)]
struct Queue {
    by_seq: BTreeMap<i64, PageKey>,
    seq_of: BTreeMap<PageKey, i64>,
    head: i64,
    tail: i64,
}

impl Queue {
    fn push_newest(&mut self, key: PageKey) {
        self.remove(key);
        self.head += 1;
        self.by_seq.insert(self.head, key);
        self.seq_of.insert(key, self.head);
    }

    fn push_oldest(&mut self, key: PageKey) {
        self.remove(key);
        self.tail -= 1;
        self.by_seq.insert(self.tail, key);
        self.seq_of.insert(key, self.tail);
    }

    fn remove(&mut self, key: PageKey) {
        if let Some(seq) = self.seq_of.remove(&key) {
            self.by_seq.remove(&seq);
        }
    }

    fn pop_oldest(&mut self) -> Option<PageKey> {
        let (_, key) = self.by_seq.pop_first()?;
        self.seq_of.remove(&key);
        Some(key)
    }

    fn order(&self) -> Vec<PageKey> {
        self.by_seq.values().copied().collect()
    }

    fn len(&self) -> usize {
        self.by_seq.len()
    }
}

/// First-in, first-out replacement.
#[derive(Default)]
pub struct Fifo {
    queue: Queue,
}

impl Fifo {
    /// Creates an empty FIFO policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for Fifo {
    fn on_resident(&mut self, key: PageKey) {
        self.queue.push_newest(key);
    }

    fn on_release(&mut self, key: PageKey) {
        self.queue.remove(key);
    }

    fn reinstate(&mut self, key: PageKey) {
        self.queue.push_oldest(key);
    }

    fn select_victim(&mut self, _probe: &mut dyn FnMut(PageKey) -> bool) -> Option<PageKey> {
        self.queue.pop_oldest()
    }

    fn order(&self) -> Vec<PageKey> {
        self.queue.order()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Second-chance replacement.
#[derive(Default)]
pub struct Clock {
    queue: Queue,
}

impl Clock {
    /// Creates an empty clock policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for Clock {
    fn on_resident(&mut self, key: PageKey) {
        self.queue.push_newest(key);
    }

    fn on_release(&mut self, key: PageKey) {
        self.queue.remove(key);
    }

    fn reinstate(&mut self, key: PageKey) {
        self.queue.push_oldest(key);
    }

    fn select_victim(&mut self, probe: &mut dyn FnMut(PageKey) -> bool) -> Option<PageKey> {
        // After one full sweep every accessed bit is clear.
        for _ in 0..=self.queue.len() {
            let key = self.queue.pop_oldest()?;
            if probe(key) {
                self.queue.push_newest(key);
            } else {
                return Some(key);
            }
        }
        self.queue.pop_oldest()
    }

    fn order(&self) -> Vec<PageKey> {
        self.queue.order()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
