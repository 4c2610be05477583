// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # NKV - Embedded HTTP Key/Value Cache Engine
//!
//! A tiered key/value cache engine addressed purely through HTTP verbs,
//! designed to be embedded inside a reverse proxy. A write request (POST/PUT)
//! stores the request body under a key derived from the request line and
//! headers; a read request (GET) returns the stored body with its captured
//! metadata; DELETE removes it. Entries live in shared memory, optionally
//! backed by an on-disk persistence directory, in one of four modes:
//! memory-only, memory+sync-disk, memory+async-disk, or disk-only.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nkv::{Engine, EngineConfig, Method, Request, Rule};
//! use std::sync::Arc;
//!
//! fn main() -> nkv::Result<()> {
//!     let engine = Engine::new(EngineConfig::new().data_size(64 << 20))?;
//!     let rule = Arc::new(Rule::new("default"));
//!
//!     let req = Request::new(Method::Post, "/users/42").header("content-length", "5");
//!     let mut applet = engine.handle(&req, &rule);
//!     applet.ingest(b"hello")?;
//!     applet.end_of_message()?;
//!     // poll the applet against the host channels until Progress::Done
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                            Host Proxy                               |
//! |   request parsing -> rule match -> applet poll loop -> sockets      |
//! +---------------------------------------------------------------------+
//! |                         Engine State Machine                        |
//! |   INIT -> HIT | HIT_DISK | CREATE | WAIT | 4xx/5xx -> DONE          |
//! +---------------------------------------------------------------------+
//! |                        Shared Memory Store                          |
//! |   Dictionary (entries) | Data ring (reclaim) | Element chains       |
//! +---------------------------------------------------------------------+
//! |                        Persistence Store                            |
//! |   <root>/<x>/<y>/<hash>-<uniq> : META | key | headers | payload     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! The background [`Housekeeper`] rotates through the dictionary and the data
//! ring in bounded quanta per tick: expiring entries, reclaiming detached
//! data objects, lazy-loading the on-disk index after a restart, unlinking
//! corrupt or expired files, and asynchronously persisting eligible entries.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Engine`] | Process-wide engine handle, factory for request applets |
//! | [`Applet`] | Per-request cooperative state machine polled by the host |
//! | [`Rule`] | Per-route policy: disk mode, TTL, key recipe |
//! | [`Request`] | Host-provided view of the parsed request head |
//! | [`Housekeeper`] | Bounded background maintenance task |

/// Engine configuration, per-route rules and disk modes.
pub mod config;
/// Request state machine and the engine facade.
pub mod engine;
/// Error types for the engine facade and its subsystems.
pub mod error;
/// Background maintenance: sweep, reclaim, disk load/cleanup, async persist.
pub mod housekeeper;
/// HTTP message-block model shared with the host proxy.
pub mod http;
/// Key derivation from rule recipes, and key hashing.
pub mod key;
/// On-disk persistence: record format, entry files, shard directories.
pub mod persist;
/// Shared in-memory store: dictionary, data objects, element chains, stats.
pub mod store;

pub use config::{DiskMode, EngineConfig, Rule};
pub use engine::{Applet, Engine, Progress};
pub use error::EngineError;
pub use housekeeper::{Housekeeper, HousekeeperHandle};
pub use http::{BlockType, InputChannel, Method, OutputChannel, Request, Scheme};
pub use key::KeyComponent;
pub use store::stats::StatsSnapshot;

/// Convenience result alias for engine operations.
pub type Result<T> = std::result::Result<T, error::EngineError>;

/// Milliseconds since the Unix epoch; the engine's notion of "now".
///
/// Expiry timestamps (`expire_ms`) are absolute values on this clock, with 0
/// reserved for "never expires".
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-memory host channels for exercising applets in unit tests.
#[cfg(test)]
pub(crate) mod test_channels {
    use crate::http::{self, BlockType, InputChannel, OutputChannel};

    /// Request-side stub; records whether the applet drained it.
    #[derive(Debug, Default)]
    pub struct MemInput {
        pub drained: bool,
    }

    impl InputChannel for MemInput {
        fn drain(&mut self) {
            self.drained = true;
        }
    }

    /// Response-side buffer with optional backpressure.
    #[derive(Debug)]
    pub struct MemOutput {
        pub blocks: Vec<(u32, Vec<u8>)>,
        /// Remaining push slots; `None` means unbounded.
        pub room: Option<usize>,
        pub peer_shut: bool,
        pub shut: bool,
    }

    impl MemOutput {
        pub fn unbounded() -> Self {
            Self {
                blocks: Vec::new(),
                room: None,
                peer_shut: false,
                shut: false,
            }
        }

        pub fn with_capacity(room: usize) -> Self {
            Self {
                room: Some(room),
                ..Self::unbounded()
            }
        }

        pub fn make_room(&mut self, n: usize) {
            if let Some(room) = self.room.as_mut() {
                *room += n;
            }
        }

        pub fn block_types(&self) -> Vec<BlockType> {
            self.blocks
                .iter()
                .filter_map(|(info, _)| http::block_type(*info))
                .collect()
        }

        /// Status parsed from the first status-line block.
        pub fn status(&self) -> Option<u16> {
            self.blocks.iter().find_map(|(info, data)| {
                if http::block_type(*info) != Some(BlockType::StatusLine) {
                    return None;
                }
                let text = std::str::from_utf8(data).ok()?;
                text.split_whitespace().nth(1)?.parse().ok()
            })
        }
    }

    impl OutputChannel for MemOutput {
        fn has_room(&self) -> bool {
            self.room.map(|r| r > 0).unwrap_or(true)
        }

        fn push(&mut self, info: u32, data: &[u8]) -> bool {
            match self.room.as_mut() {
                Some(0) => false,
                Some(room) => {
                    *room -= 1;
                    self.blocks.push((info, data.to_vec()));
                    true
                }
                None => {
                    self.blocks.push((info, data.to_vec()));
                    true
                }
            }
        }

        fn is_shut(&self) -> bool {
            self.peer_shut
        }

        fn shut_read(&mut self) {
            self.shut = true;
        }
    }
}
