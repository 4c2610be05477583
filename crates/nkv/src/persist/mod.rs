// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk persistence store.
//!
//! Entry files live under a configured root, sharded into 16x16
//! subdirectories addressed by the top byte of the entry hash: shard index
//! `i` maps to `<root>/<x>/<y>` with `x` the high and `y` the low nibble of
//! `i`, each a single hex digit. A file is named
//! `<hash as 16 hex digits>-<uniq>` so several generations of one key can
//! coexist briefly; validation picks the live one and corrupt leftovers are
//! unlinked on sight.
//!
//! All 256 shard directories are created at engine init; failure there is
//! fatal. Everything after init is self-healing: a record that fails
//! validation is removed and the access treated as a miss.

/// Entry file I/O.
pub mod io;
/// On-disk record META block.
pub mod meta;

pub use io::{parse_header_region, EntryReader, EntryWriter};
pub use meta::{Meta, MetaError};

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of shard directories (16 x 16).
pub const SHARD_COUNT: usize = 256;

/// Root of the persistence directory tree.
#[derive(Debug)]
pub struct PersistStore {
    root: PathBuf,
    uniq: AtomicU64,
}

impl PersistStore {
    /// Create the root and all shard directories; errors here abort engine
    /// init.
    pub fn new(root: &Path) -> std::io::Result<Self> {
        for idx in 0..SHARD_COUNT {
            fs::create_dir_all(shard_dir(root, idx))?;
        }

        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);

        Ok(Self {
            root: root.to_path_buf(),
            uniq: AtomicU64::new(seed),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shard directory for index `0..256`.
    pub fn shard_dir(&self, idx: usize) -> PathBuf {
        shard_dir(&self.root, idx)
    }

    /// Shard directory owning `hash` (top byte selects the shard).
    fn entry_dir(&self, hash: u64) -> PathBuf {
        self.shard_dir((hash >> 56) as usize)
    }

    /// Fresh file path for a new record of `hash`.
    pub fn new_entry_path(&self, hash: u64) -> PathBuf {
        let uniq = self.uniq.fetch_add(1, Ordering::Relaxed);
        self.entry_dir(hash)
            .join(format!("{:016x}-{:x}", hash, uniq))
    }

    /// Open and fully validate the record at `path`.
    pub fn validate(
        &self,
        path: &Path,
        key: &[u8],
        hash: u64,
        now_ms: u64,
    ) -> Result<EntryReader, MetaError> {
        let reader = EntryReader::open(path)?;
        reader.validate(key, hash, now_ms)?;
        Ok(reader)
    }

    /// Look for a live record of `{key, hash}` without any dictionary
    /// entry to point at it (the pre-load window after a restart).
    ///
    /// Scans the owning shard for files named with the hash prefix; corrupt
    /// candidates are unlinked on the way, expired ones are left for the
    /// disk cleaner.
    pub fn probe(&self, key: &[u8], hash: u64, now_ms: u64) -> Option<(PathBuf, EntryReader)> {
        let prefix = format!("{:016x}", hash);
        let dir = fs::read_dir(self.entry_dir(hash)).ok()?;

        for entry in dir.flatten() {
            let path = entry.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
            {
                continue;
            }

            match self.validate(&path, key, hash, now_ms) {
                Ok(reader) => return Some((path, reader)),
                Err(MetaError::Expired) => {}
                Err(err) => {
                    warn!("unlinking corrupt record {}: {}", path.display(), err);
                    let _ = fs::remove_file(&path);
                }
            }
        }
        None
    }

    /// Files currently present in shard `idx`.
    pub fn shard_files(&self, idx: usize) -> Vec<PathBuf> {
        let Ok(dir) = fs::read_dir(self.shard_dir(idx)) else {
            return Vec::new();
        };
        dir.flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect()
    }

    /// Remove one file, logging failures.
    pub fn unlink(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            warn!("failed to unlink {}: {}", path.display(), err);
        }
    }

    /// Disk-cleaner check for one file: unlink when the record is corrupt,
    /// or expired without a VALID in-memory entry still claiming it.
    /// Returns true when the file was removed.
    pub fn cleanup_file(
        &self,
        path: &Path,
        now_ms: u64,
        has_valid_entry: impl FnOnce(u64, &[u8]) -> bool,
    ) -> bool {
        let checked = EntryReader::open(path).and_then(|reader| {
            let key = reader.read_key()?;
            Ok((reader.meta().clone(), key))
        });

        match checked {
            Ok((meta, key)) => {
                if meta.expired(now_ms) && !has_valid_entry(meta.hash, &key) {
                    self.unlink(path);
                    true
                } else {
                    false
                }
            }
            Err(err) => {
                warn!("unlinking corrupt record {}: {}", path.display(), err);
                self.unlink(path);
                true
            }
        }
    }
}

fn shard_dir(root: &Path, idx: usize) -> PathBuf {
    debug_assert!(idx < SHARD_COUNT);
    root.join(format!("{:x}", (idx >> 4) & 0xF))
        .join(format!("{:x}", idx & 0xF))
}
