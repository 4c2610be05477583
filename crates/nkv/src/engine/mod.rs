// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The engine facade and request dispatch.
//!
//! [`Engine`] owns the shared store and the optional persistence store
//! behind one cheaply cloneable handle. The host builds an [`Applet`] per
//! request via [`Engine::handle`]; dispatch runs the read path (memory hit,
//! disk hit, miss), the write admission protocol, or the delete, and parks
//! everything else on a synthesized status response.

/// The per-request applet.
pub mod applet;
/// The write transaction.
pub(crate) mod txn;

pub use applet::{Applet, Progress};

use crate::config::{DiskMode, EngineConfig, Rule};
use crate::error::EngineError;
use crate::http::{Method, Request};
use crate::key;
use crate::now_ms;
use crate::persist::{EntryReader, MetaError, PersistStore};
use crate::store::dict::EntryState;
use crate::store::{ReaderGuard, StatsSnapshot, Store};
use applet::AppletState;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Shared engine state; everything hangs off one `Arc`.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) store: Store,
    pub(crate) persist: Option<PersistStore>,
}

/// Process-wide engine handle.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Read-path outcome, decided under the dict lock.
enum Lookup {
    Hit(ReaderGuard),
    Disk(EntryReader),
    Miss,
}

impl Engine {
    /// Initialize the engine: validate budgets and create the persistence
    /// tree. Failures here are fatal for the host.
    pub fn new(config: EngineConfig) -> crate::Result<Self> {
        if !config.status {
            return Err(EngineError::Disabled);
        }
        if config.dict_size == 0 || config.data_size == 0 {
            return Err(EngineError::Config(
                "dict_size and data_size must be non-zero".into(),
            ));
        }

        let persist = match &config.root {
            Some(root) => Some(PersistStore::new(root)?),
            None => None,
        };

        let store = Store::new(&config);
        info!(
            "engine up: {} buckets, {} byte data budget, persistence {}",
            config.bucket_count(),
            config.data_size,
            persist
                .as_ref()
                .map(|p| p.root().display().to_string())
                .unwrap_or_else(|| "off".into())
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                persist,
            }),
        })
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.store.stats().snapshot()
    }

    /// Build the applet for one request under its matched rule.
    pub fn handle(&self, req: &Request, rule: &Arc<Rule>) -> Applet {
        let key = match key::build(&rule.key, req) {
            Ok(key) => key,
            Err(err) => {
                debug!("key build failed: {}", err);
                return Applet::new(
                    self.clone(),
                    AppletState::Simple {
                        status: 400,
                        step: 0,
                    },
                );
            }
        };
        let hash = key::hash64(&key);
        let stats = self.inner.store.stats();

        let state = match req.method {
            Method::Get => match self.lookup(&key, hash, rule.mode) {
                Lookup::Hit(guard) => {
                    stats.hits.fetch_add(1, Ordering::Relaxed);
                    AppletState::Hit {
                        guard,
                        cursor: 0,
                        eom_sent: false,
                    }
                }
                Lookup::Disk(reader) => {
                    stats.disk_hits.fetch_add(1, Ordering::Relaxed);
                    AppletState::HitDisk {
                        reader,
                        header: None,
                        offset: 0,
                        stalled: None,
                        eom_sent: false,
                    }
                }
                Lookup::Miss => {
                    stats.misses.fetch_add(1, Ordering::Relaxed);
                    AppletState::Simple {
                        status: 404,
                        step: 0,
                    }
                }
            },

            Method::Post | Method::Put => match txn::admit(&self.inner, req, rule, key.clone(), hash) {
                Ok(txn::Admission::Created(txn)) => AppletState::Create(txn),
                Ok(txn::Admission::Wait) => AppletState::Wait {
                    req: Box::new(req.clone()),
                    rule: Arc::clone(rule),
                    key,
                    hash,
                },
                Ok(txn::Admission::Full) => AppletState::Simple {
                    status: 507,
                    step: 0,
                },
                Ok(txn::Admission::Empty) => AppletState::Simple {
                    status: 400,
                    step: 0,
                },
                Err(err) => {
                    warn!("admission failed: {}", err);
                    AppletState::Simple {
                        status: err.status().unwrap_or(500),
                        step: 0,
                    }
                }
            },

            Method::Delete => {
                let removed = self.delete_key(&key, hash);
                AppletState::Simple {
                    status: if removed { 200 } else { 404 },
                    step: 0,
                }
            }

            Method::Other => AppletState::Simple {
                status: 405,
                step: 0,
            },
        };

        Applet::new(self.clone(), state)
    }

    /// Invalidate the entry for `{key, hash}` across every tier.
    ///
    /// The entry flips to INVALID, its data object drains, and any disk
    /// file is unlinked so the value stops being served from the disk path
    /// as well.
    pub fn delete_key(&self, key: &[u8], hash: u64) -> bool {
        let mut file: Option<PathBuf> = None;
        let removed = {
            let mut dict = self.inner.store.dict.lock();
            match dict.get_mut(key, hash) {
                Some(entry) => {
                    entry.state = EntryState::Invalid;
                    if let Some(data) = entry.data.take() {
                        data.invalidate();
                    }
                    file = entry.file.take();
                    true
                }
                None => false,
            }
        };

        if let (Some(path), Some(persist)) = (file, &self.inner.persist) {
            persist.unlink(&path);
        }
        if removed {
            self.inner
                .store
                .stats()
                .deletes
                .fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Decide the read path for `{key, hash}`.
    ///
    /// Memory VALID wins and attaches a reader under the dict lock. An
    /// INVALID entry with a file, or a complete miss under a disk-enabled
    /// rule, falls through to record validation; corrupt records are
    /// unlinked and demoted to a miss.
    fn lookup(&self, key: &[u8], hash: u64, mode: DiskMode) -> Lookup {
        let now = now_ms();

        enum AfterLock {
            Hit(ReaderGuard),
            CheckFile(PathBuf),
            Probe,
            Miss,
        }

        let decision = {
            let mut dict = self.inner.store.dict.lock();
            match dict.get_mut(key, hash) {
                Some(entry) if entry.state == EntryState::Valid => {
                    if entry.expired(now) {
                        // TTL passed before the sweep got here; expire in
                        // place so the reader sees a miss.
                        entry.state = EntryState::Invalid;
                        if let Some(data) = entry.data.take() {
                            data.invalidate();
                        }
                        match entry.file.clone() {
                            Some(file) => AfterLock::CheckFile(file),
                            None => AfterLock::Miss,
                        }
                    } else {
                        match &entry.data {
                            Some(data) => AfterLock::Hit(ReaderGuard::attach(Arc::clone(data))),
                            None => AfterLock::Miss,
                        }
                    }
                }
                Some(entry) if entry.state == EntryState::Invalid => match entry.file.clone() {
                    Some(file) => AfterLock::CheckFile(file),
                    None => AfterLock::Miss,
                },
                Some(_) => AfterLock::Miss,
                None => {
                    if self.inner.persist.is_some() && mode != DiskMode::Off {
                        AfterLock::Probe
                    } else {
                        AfterLock::Miss
                    }
                }
            }
        };

        match decision {
            AfterLock::Hit(guard) => Lookup::Hit(guard),

            AfterLock::CheckFile(path) => {
                let persist = match &self.inner.persist {
                    Some(p) => p,
                    None => return Lookup::Miss,
                };
                match persist.validate(&path, key, hash, now) {
                    Ok(reader) => Lookup::Disk(reader),
                    Err(MetaError::Expired) => Lookup::Miss,
                    Err(err) => {
                        warn!("unlinking corrupt record {}: {}", path.display(), err);
                        persist.unlink(&path);
                        let mut dict = self.inner.store.dict.lock();
                        if let Some(entry) = dict.get_mut(key, hash) {
                            if entry.file.as_deref() == Some(path.as_path()) {
                                entry.file = None;
                            }
                        }
                        Lookup::Miss
                    }
                }
            }

            AfterLock::Probe => match &self.inner.persist {
                Some(persist) => match persist.probe(key, hash, now) {
                    Some((_, reader)) => Lookup::Disk(reader),
                    None => Lookup::Miss,
                },
                None => Lookup::Miss,
            },

            AfterLock::Miss => Lookup::Miss,
        }
    }
}
