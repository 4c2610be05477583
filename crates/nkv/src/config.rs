// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration - single source of truth for budgets and quotas.
//!
//! Two levels:
//!
//! - **Engine-wide** ([`EngineConfig`]): on/off switch, persistence root,
//!   memory budgets, per-tick housekeeper work quotas.
//! - **Per-route** ([`Rule`]): disk mode, TTL, key recipe. Rules are loaded
//!   and matched by the host proxy; the engine only consumes them.

use crate::key::KeyComponent;
use std::path::PathBuf;

/// Default dictionary budget in bytes (sizes the bucket array).
pub const DEFAULT_DICT_SIZE: u64 = 1 << 20;

/// Default data budget in bytes (bounds cached element payloads).
pub const DEFAULT_DATA_SIZE: u64 = 16 << 20;

/// Default dictionary slots swept per housekeeper tick.
pub const DEFAULT_DICT_CLEANER: usize = 1000;

/// Default data-ring rotations per housekeeper tick.
pub const DEFAULT_DATA_CLEANER: usize = 1000;

/// Default disk-cleanup steps per housekeeper tick.
pub const DEFAULT_DISK_CLEANER: usize = 100;

/// Default lazy-load steps per housekeeper tick.
pub const DEFAULT_DISK_LOADER: usize = 100;

/// Default async-persist quota. The housekeeper overrides the effective
/// value with [`crate::housekeeper::DISK_SAVER_CAP`] each tick.
pub const DEFAULT_DISK_SAVER: usize = 100;

/// Bytes of dictionary budget reserved per bucket slot when deriving the
/// bucket count from `dict_size`.
pub(crate) const DICT_SLOT_BYTES: u64 = 128;

/// Minimum number of dictionary buckets regardless of budget.
pub(crate) const DICT_MIN_BUCKETS: usize = 16;

/// How a rule's entries relate to the persistence directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskMode {
    /// Memory only; nothing touches the disk.
    Off,
    /// Disk only; memory keeps the entry identity, reads stream the file.
    Only,
    /// Memory plus synchronous disk writes while the body is ingested.
    Sync,
    /// Memory first; the housekeeper persists eligible entries later.
    Async,
}

impl DiskMode {
    /// Stable on-disk encoding of the mode, stored in the META block.
    pub fn as_u8(self) -> u8 {
        match self {
            DiskMode::Off => 0,
            DiskMode::Only => 1,
            DiskMode::Sync => 2,
            DiskMode::Async => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DiskMode::Off),
            1 => Some(DiskMode::Only),
            2 => Some(DiskMode::Sync),
            3 => Some(DiskMode::Async),
            _ => None,
        }
    }

    /// True when entry creation must open a disk file up front.
    pub fn writes_through(self) -> bool {
        matches!(self, DiskMode::Sync | DiskMode::Only)
    }
}

/// Per-route cache policy, matched by the host and consumed by the engine.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Diagnostic name for logs.
    pub name: String,
    /// Persistence mode for entries stored under this rule.
    pub mode: DiskMode,
    /// Time-to-live in seconds; 0 means never expire.
    pub ttl_secs: u64,
    /// Key recipe, evaluated in declaration order.
    pub key: Vec<KeyComponent>,
}

impl Rule {
    /// A memory-only rule with infinite TTL and the default key recipe
    /// (method, scheme, host, uri).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: DiskMode::Off,
            ttl_secs: 0,
            key: vec![
                KeyComponent::Method,
                KeyComponent::Scheme,
                KeyComponent::Host,
                KeyComponent::Uri,
            ],
        }
    }

    pub fn mode(mut self, mode: DiskMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ttl_secs(mut self, ttl: u64) -> Self {
        self.ttl_secs = ttl;
        self
    }

    pub fn key(mut self, recipe: Vec<KeyComponent>) -> Self {
        self.key = recipe;
        self
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Master switch; a disabled engine refuses to construct.
    pub status: bool,
    /// Persistence root; `None` disables every disk path.
    pub root: Option<PathBuf>,
    /// Dictionary byte budget; sizes the bucket array.
    pub dict_size: u64,
    /// Data byte budget; element payloads beyond it fail with 507.
    pub data_size: u64,
    /// Dictionary slots swept per tick.
    pub dict_cleaner: usize,
    /// Data-ring rotations per tick.
    pub data_cleaner: usize,
    /// Disk-cleanup steps per tick.
    pub disk_cleaner: usize,
    /// Lazy-load steps per tick.
    pub disk_loader: usize,
    /// Async-persist quota; overridden by the fixed cap at runtime.
    pub disk_saver: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            status: true,
            root: None,
            dict_size: DEFAULT_DICT_SIZE,
            data_size: DEFAULT_DATA_SIZE,
            dict_cleaner: DEFAULT_DICT_CLEANER,
            data_cleaner: DEFAULT_DATA_CLEANER,
            disk_cleaner: DEFAULT_DISK_CLEANER,
            disk_loader: DEFAULT_DISK_LOADER,
            disk_saver: DEFAULT_DISK_SAVER,
        }
    }

    pub fn status(mut self, on: bool) -> Self {
        self.status = on;
        self
    }

    /// Enable persistence under `root`; the directory tree is created at
    /// engine init and a failure there is fatal.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn dict_size(mut self, bytes: u64) -> Self {
        self.dict_size = bytes;
        self
    }

    pub fn data_size(mut self, bytes: u64) -> Self {
        self.data_size = bytes;
        self
    }

    pub fn dict_cleaner(mut self, quota: usize) -> Self {
        self.dict_cleaner = quota;
        self
    }

    pub fn data_cleaner(mut self, quota: usize) -> Self {
        self.data_cleaner = quota;
        self
    }

    pub fn disk_cleaner(mut self, quota: usize) -> Self {
        self.disk_cleaner = quota;
        self
    }

    pub fn disk_loader(mut self, quota: usize) -> Self {
        self.disk_loader = quota;
        self
    }

    pub fn disk_saver(mut self, quota: usize) -> Self {
        self.disk_saver = quota;
        self
    }

    /// Number of dictionary buckets implied by `dict_size` (power of two).
    pub(crate) fn bucket_count(&self) -> usize {
        let slots = (self.dict_size / DICT_SLOT_BYTES) as usize;
        slots.next_power_of_two().max(DICT_MIN_BUCKETS)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
