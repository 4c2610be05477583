// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data objects and their reclamation ring.
//!
//! A data object owns the element chain of one cached response plus the
//! captured response metadata. Objects are reference counted by reader
//! attachment (`clients`) and carry an `invalid` flag raised when the
//! owning entry replaces or drops them; a draining object keeps serving
//! in-flight readers until its count hits zero, at which point the ring
//! reclaims it.
//!
//! The ring is a FIFO of reclamation candidates: every object enters it at
//! creation and the housekeeper inspects one head per tick, either freeing
//! it or rotating it to the back so progress is made across the whole set.

use super::element::Element;
use super::stats::Stats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Response metadata captured at store time and re-emitted with hits.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub content_type: Option<Vec<u8>>,
    pub transfer_encoding: Option<Vec<u8>>,
    /// Declared content length when the request carried one, otherwise the
    /// observed byte count.
    pub content_length: u64,
    /// True when the stored framing is `Transfer-Encoding: chunked`.
    pub chunked: bool,
}

#[derive(Debug, Default)]
struct Chain {
    elements: Vec<Element>,
    info: ObjectInfo,
}

/// Owner of one cached response body and metadata.
#[derive(Debug, Default)]
pub struct DataObject {
    clients: AtomicU32,
    invalid: AtomicBool,
    chain: Mutex<Chain>,
}

impl DataObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one element, charging its payload against the data budget.
    pub fn append(&self, element: Element, stats: &Stats) {
        stats.add_used(element.mem_size());
        self.chain.lock().elements.push(element);
    }

    pub fn element_count(&self) -> usize {
        self.chain.lock().elements.len()
    }

    /// Run `f` against the element at `idx` without cloning its payload.
    pub fn with_element<R>(&self, idx: usize, f: impl FnOnce(&Element) -> R) -> Option<R> {
        let chain = self.chain.lock();
        chain.elements.get(idx).map(f)
    }

    pub fn set_info(&self, info: ObjectInfo) {
        self.chain.lock().info = info;
    }

    pub fn info(&self) -> ObjectInfo {
        self.chain.lock().info.clone()
    }

    /// Register a reader; called under the dict lock when a VALID entry is
    /// observed.
    pub fn attach_reader(&self) {
        self.clients.fetch_add(1, Ordering::AcqRel);
    }

    /// Detach a reader; the last one off a draining object makes it
    /// reclaimable.
    pub fn release_reader(&self) {
        self.clients.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn clients(&self) -> u32 {
        self.clients.load(Ordering::Acquire)
    }

    /// Demote to draining; raised when the owning entry is replaced or
    /// invalidated.
    pub fn invalidate(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Draining with no readers left.
    pub fn is_reclaimable(&self) -> bool {
        self.is_invalid() && self.clients() == 0
    }

    /// Free the element chain and metadata, returning the freed payload
    /// bytes to the budget.
    fn reclaim(&self, stats: &Stats) -> u64 {
        let mut chain = self.chain.lock();
        let freed: u64 = chain.elements.iter().map(Element::mem_size).sum();
        chain.elements.clear();
        chain.elements.shrink_to_fit();
        chain.info = ObjectInfo::default();
        stats.sub_used(freed);
        freed
    }
}

/// RAII reader attachment to a data object.
///
/// Created under the dict lock when a hit attaches; dropping it detaches,
/// so an abandoned applet can never leak a reader count.
#[derive(Debug)]
pub struct ReaderGuard {
    data: Arc<DataObject>,
}

impl ReaderGuard {
    /// Attach to `data`; caller holds the dict lock.
    pub(crate) fn attach(data: Arc<DataObject>) -> Self {
        data.attach_reader();
        Self { data }
    }

    pub fn object(&self) -> &DataObject {
        &self.data
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.data.release_reader();
    }
}

/// FIFO of reclamation candidates, mutated only under the ring lock.
#[derive(Debug, Default)]
pub struct DataRing {
    queue: VecDeque<Arc<DataObject>>,
}

impl DataRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread a freshly allocated object into the ring.
    pub fn insert(&mut self, data: Arc<DataObject>) {
        self.queue.push_back(data);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Inspect the ring head: free it when draining and unreferenced,
    /// otherwise rotate it to the back. At most one removal per call.
    ///
    /// Returns the freed payload bytes, 0 when nothing was reclaimed.
    pub fn cleanup_tick(&mut self, stats: &Stats) -> u64 {
        let Some(head) = self.queue.front() else {
            return 0;
        };

        if head.is_reclaimable() {
            let head = self.queue.pop_front().expect("head checked above");
            let freed = head.reclaim(stats);
            stats.reclaimed.fetch_add(1, Ordering::Relaxed);
            freed
        } else {
            let head = self.queue.pop_front().expect("head checked above");
            self.queue.push_back(head);
            0
        }
    }
}
