// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared in-memory store.
//!
//! Holds the three pieces of engine-wide state behind their own locks:
//! the entry dictionary, the data-object reclamation ring, and the atomic
//! stats. The two mutexes are leaf-level and never nested; callers take
//! one, do bounded work, and release it before any I/O.

/// Data objects and the reclamation ring.
pub mod data;
/// The entry dictionary.
pub mod dict;
/// Stored message elements.
pub mod element;
/// Engine-wide accounting.
pub mod stats;

pub use data::{DataObject, DataRing, ObjectInfo, ReaderGuard};
pub use dict::{Dictionary, Entry, EntryState};
pub use element::Element;
pub use stats::{Stats, StatsSnapshot};

use crate::config::EngineConfig;
use parking_lot::Mutex;
use std::sync::Arc;

/// Engine-wide shared state.
#[derive(Debug)]
pub struct Store {
    pub(crate) dict: Mutex<Dictionary>,
    pub(crate) ring: Mutex<DataRing>,
    stats: Stats,
}

impl Store {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dict: Mutex::new(Dictionary::new(config.bucket_count())),
            ring: Mutex::new(DataRing::new()),
            stats: Stats::new(config.data_size),
        }
    }

    /// Allocate a data object and thread it into the reclamation ring.
    pub fn new_data(&self) -> Arc<DataObject> {
        let data = Arc::new(DataObject::new());
        self.ring.lock().insert(Arc::clone(&data));
        data
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}
