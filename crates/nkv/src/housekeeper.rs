// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background maintenance.
//!
//! One housekeeper instance runs per engine, on a single designated thread.
//! Each [`Housekeeper::tick`] performs bounded work quanta per phase, taking
//! the minimum lock for each and releasing it before the next:
//!
//! 1. **Dictionary sweep** - expire entries, unlink the drained INVALID ones.
//! 2. **Data reclamation** - rotate the ring head, free drained objects.
//! 3. **Disk cleanup** - unlink corrupt or expired-and-unclaimed records.
//! 4. **Lazy load** - after a restart, resurrect the on-disk index as
//!    INVALID entries so reads fall through to the disk path.
//! 5. **Async persist** - write VALID async-rule entries that have no file
//!    yet, up to the fixed per-tick cap.
//!
//! Failures inside a phase are dropped for that tick and retried on the
//! next one; corrupt records are removed on sight.

use crate::engine::Engine;
use crate::now_ms;
use crate::persist::{EntryReader, EntryWriter};
use crate::store::dict::EntryState;
use crate::store::DataObject;
use crate::config::DiskMode;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fixed per-tick cap on async-persist work, applied regardless of the
/// configured `disk_saver` quota.
pub const DISK_SAVER_CAP: usize = 1000;

/// Walk state over the 256 shard directories.
#[derive(Debug, Default)]
struct ShardCursor {
    idx: usize,
    files: VecDeque<PathBuf>,
}

/// One entry eligible for async persistence, snapshotted under the dict
/// lock and written outside it.
struct PersistCandidate {
    key: Vec<u8>,
    hash: u64,
    expire_ms: u64,
    data: Arc<DataObject>,
}

/// Bounded background maintenance task.
pub struct Housekeeper {
    engine: Engine,
    loaded: bool,
    loader: ShardCursor,
    cleaner: ShardCursor,
    persist_idx: usize,
}

impl Housekeeper {
    pub fn new(engine: &Engine) -> Self {
        let loaded = engine.inner().persist.is_none();
        Self {
            engine: engine.clone(),
            loaded,
            loader: ShardCursor::default(),
            cleaner: ShardCursor::default(),
            persist_idx: 0,
        }
    }

    /// True once the lazy loader has walked every shard.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Run one full maintenance tick within the configured quotas.
    pub fn tick(&mut self) {
        let now = now_ms();
        let engine = self.engine.clone();
        let inner = engine.inner();
        let config = &inner.config;

        for _ in 0..config.dict_cleaner {
            inner.store.dict.lock().sweep_slot(now);
        }

        for _ in 0..config.data_cleaner {
            inner.store.ring.lock().cleanup_tick(inner.store.stats());
        }

        if inner.persist.is_some() {
            if self.loaded {
                for _ in 0..config.disk_cleaner {
                    self.cleaner_step(now);
                }
            } else {
                for _ in 0..config.disk_loader {
                    self.loader_step();
                    if self.loaded {
                        break;
                    }
                }
            }

            if self.loaded {
                for _ in 0..DISK_SAVER_CAP {
                    self.persist_step(now);
                }
            }
        }
    }

    /// One disk-cleanup quantum: either list the next shard or judge one
    /// file from the current one.
    fn cleaner_step(&mut self, now: u64) {
        let engine = self.engine.clone();
        let inner = engine.inner();
        let Some(persist) = inner.persist.as_ref() else {
            return;
        };

        let Some(path) = self.cleaner.files.pop_front() else {
            self.cleaner.files = persist.shard_files(self.cleaner.idx).into();
            self.cleaner.idx = (self.cleaner.idx + 1) % crate::persist::SHARD_COUNT;
            return;
        };

        persist.cleanup_file(&path, now, |hash, key| {
            let dict = inner.store.dict.lock();
            dict.get(key, hash)
                .map(|e| e.state == EntryState::Valid)
                .unwrap_or(false)
        });
    }

    /// One lazy-load quantum: list the next shard or resurrect one record
    /// as an INVALID disk-backed entry. Wrapping the shard index completes
    /// the load.
    fn loader_step(&mut self) {
        let engine = self.engine.clone();
        let inner = engine.inner();
        let Some(persist) = inner.persist.as_ref() else {
            self.loaded = true;
            return;
        };

        let Some(path) = self.loader.files.pop_front() else {
            if self.loader.idx >= crate::persist::SHARD_COUNT {
                self.loaded = true;
                self.loader.idx = 0;
                info!("disk index load complete");
                return;
            }
            self.loader.files = persist.shard_files(self.loader.idx).into();
            self.loader.idx += 1;
            return;
        };

        let loaded = EntryReader::open(&path).and_then(|reader| {
            let key = reader.read_key()?;
            Ok((reader.meta().clone(), key))
        });

        match loaded {
            Ok((meta, key)) => {
                let mut dict = inner.store.dict.lock();
                if dict.set_from_disk(key, meta.hash, meta.expire_ms, path) {
                    debug!("loaded record hash={:016x}", meta.hash);
                }
            }
            Err(err) => {
                warn!("unlinking unreadable record {}: {}", path.display(), err);
                persist.unlink(&path);
            }
        }
    }

    /// One async-persist quantum: snapshot the eligible entries of the
    /// bucket under the cursor, write their records outside the lock, then
    /// attach the files to entries that are still unchanged.
    fn persist_step(&mut self, now: u64) {
        let engine = self.engine.clone();
        let inner = engine.inner();
        let Some(persist) = inner.persist.as_ref() else {
            return;
        };

        let candidates: Vec<PersistCandidate> = {
            let dict = inner.store.dict.lock();
            if dict.used() == 0 {
                return;
            }
            let idx = self.persist_idx;
            self.persist_idx = (self.persist_idx + 1) % dict.bucket_count();

            dict.bucket_entries(idx)
                .iter()
                .filter(|e| {
                    e.state == EntryState::Valid
                        && e.file.is_none()
                        && !e.expired(now)
                        && e.rule.as_ref().map(|r| r.mode) == Some(DiskMode::Async)
                })
                .filter_map(|e| {
                    e.data.as_ref().map(|data| PersistCandidate {
                        key: e.key.clone(),
                        hash: e.hash,
                        expire_ms: e.expire_ms,
                        data: Arc::clone(data),
                    })
                })
                .collect()
        };

        for candidate in candidates {
            match self.write_candidate(&candidate) {
                Ok(path) => {
                    let attached = {
                        let mut dict = inner.store.dict.lock();
                        match dict
                            .get_mut(&candidate.key, candidate.hash)
                            .filter(|e| e.state == EntryState::Valid && e.file.is_none())
                        {
                            Some(entry) => {
                                entry.file = Some(path.clone());
                                true
                            }
                            None => false,
                        }
                    };
                    if !attached {
                        // Entry changed while we were writing; the new
                        // generation owns the key now.
                        persist.unlink(&path);
                    }
                }
                Err(err) => {
                    warn!(
                        "async persist failed for hash={:016x}: {}",
                        candidate.hash, err
                    );
                }
            }
        }
    }

    /// Serialize one element chain into a fresh record file.
    ///
    /// Non-DATA elements carry their 4-byte info word (header region); DATA
    /// elements contribute raw payload bytes only.
    fn write_candidate(
        &self,
        candidate: &PersistCandidate,
    ) -> Result<PathBuf, crate::persist::MetaError> {
        let inner = self.engine.inner();
        let persist = inner.persist.as_ref().ok_or_else(|| {
            crate::persist::MetaError::Io(std::io::Error::other("persistence disabled"))
        })?;

        let path = persist.new_entry_path(candidate.hash);
        let mut writer = EntryWriter::create(
            path,
            DiskMode::Async.as_u8(),
            candidate.hash,
            &candidate.key,
        )?;

        let mut cache_len = 0u64;
        let mut header_len = 0u64;
        for idx in 0..candidate.data.element_count() {
            let step = candidate.data.with_element(idx, |e| {
                if !e.is_data() {
                    writer.write_info(e.info)?;
                    cache_len += 4;
                    header_len += 4 + e.mem_size();
                }
                writer.write_bytes(&e.data)?;
                cache_len += e.mem_size();
                Ok::<(), std::io::Error>(())
            });
            match step {
                Some(Ok(())) => {}
                Some(Err(err)) => return Err(err.into()),
                None => break,
            }
        }

        writer.finalize(candidate.expire_ms, header_len as u32, cache_len)
    }

    /// Spawn the periodic tick loop on a background thread.
    pub fn start(mut self, interval: Duration) -> std::io::Result<HousekeeperHandle> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);

        let handle = thread::Builder::new()
            .name("nkv-housekeeper".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    self.tick();
                    thread::sleep(interval);
                }
            })?;

        Ok(HousekeeperHandle {
            stop_flag,
            handle: Some(handle),
        })
    }
}

/// Handle to a running housekeeper thread; stopping joins it.
pub struct HousekeeperHandle {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HousekeeperHandle {
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HousekeeperHandle {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
