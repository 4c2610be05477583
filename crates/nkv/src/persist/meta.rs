// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk record META block.
//!
//! Every entry file starts with a fixed 56-byte little-endian META:
//!
//! ```text
//! +---------------------------------------------------------------+
//! | Magic (8) | Version (4) | Mode (1) | Pad (3) | Hash (8)       |
//! | ExpireMs (8) | HeaderLen (4) | KeyLen (4) | CacheLen (8)      |
//! | Reserved (8)                                                  |
//! +---------------------------------------------------------------+
//! ```
//!
//! Magic and version gate compatibility: a mismatch makes the whole file
//! invalid and the reader unlinks it on access. Writers emit a placeholder
//! META at create time and back-patch the final `header_len`, `cache_len`
//! and `expire_ms` when the entry finishes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Magic bytes: "NKVSTOR\0".
pub const MAGIC: [u8; 8] = [0x4E, 0x4B, 0x56, 0x53, 0x54, 0x4F, 0x52, 0x00];

/// Current record format version.
pub const META_VERSION: u32 = 1;

/// Record validation errors.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid record magic")]
    BadMagic,

    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("record hash does not match the request key")]
    HashMismatch,

    #[error("record key bytes do not match the request key")]
    KeyMismatch,

    #[error("record expiry has passed")]
    Expired,

    #[error("corrupt header region")]
    CorruptRegion,
}

/// Fixed-size record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Disk mode the record was written under (`DiskMode::as_u8`).
    pub mode: u8,
    /// 64-bit key hash.
    pub hash: u64,
    /// Absolute expiry in milliseconds; 0 = never.
    pub expire_ms: u64,
    /// Bytes of the header region (info words included).
    pub header_len: u32,
    /// Bytes of the key.
    pub key_len: u32,
    /// Total cached bytes (header region plus payload).
    pub cache_len: u64,
}

impl Meta {
    pub const SIZE: usize = 56;

    pub fn new(mode: u8, hash: u64, key_len: u32) -> Self {
        Self {
            mode,
            hash,
            expire_ms: 0,
            header_len: 0,
            key_len,
            cache_len: 0,
        }
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        self.expire_ms != 0 && now_ms >= self.expire_ms
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u32::<LittleEndian>(META_VERSION)?;
        w.write_all(&[self.mode, 0, 0, 0])?;
        w.write_u64::<LittleEndian>(self.hash)?;
        w.write_u64::<LittleEndian>(self.expire_ms)?;
        w.write_u32::<LittleEndian>(self.header_len)?;
        w.write_u32::<LittleEndian>(self.key_len)?;
        w.write_u64::<LittleEndian>(self.cache_len)?;
        w.write_u64::<LittleEndian>(0)?; // reserved
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, MetaError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(MetaError::BadMagic);
        }

        let version = r.read_u32::<LittleEndian>()?;
        if version != META_VERSION {
            return Err(MetaError::VersionMismatch {
                expected: META_VERSION,
                got: version,
            });
        }

        let mut mode_pad = [0u8; 4];
        r.read_exact(&mut mode_pad)?;

        let meta = Self {
            mode: mode_pad[0],
            hash: r.read_u64::<LittleEndian>()?,
            expire_ms: r.read_u64::<LittleEndian>()?,
            header_len: r.read_u32::<LittleEndian>()?,
            key_len: r.read_u32::<LittleEndian>()?,
            cache_len: r.read_u64::<LittleEndian>()?,
        };
        let _reserved = r.read_u64::<LittleEndian>()?;
        Ok(meta)
    }
}
