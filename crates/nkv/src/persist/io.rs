// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entry file I/O.
//!
//! [`EntryWriter`] drives the write protocol: placeholder META, key bytes,
//! header region as `{info, bytes}` pairs, raw payload bytes, then a
//! seek-back finalize that patches the META with the final lengths and
//! expiry. [`EntryReader`] validates records and serves the two regions to
//! the disk-hit path. Positioned reads go through `FileExt` so concurrent
//! readers of one file never share a cursor.

use super::meta::{Meta, MetaError};
use crate::http;
use crate::store::element::Element;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Streaming writer for one entry file.
#[derive(Debug)]
pub struct EntryWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    meta: Meta,
}

impl EntryWriter {
    /// Create (or truncate) the entry file, reserve the META region and
    /// emit the key bytes.
    ///
    /// The reserved region stays zeroed until [`EntryWriter::finalize`], so
    /// an abandoned partial file fails the magic check and the disk cleaner
    /// unlinks it.
    pub fn create(path: PathBuf, mode: u8, hash: u64, key: &[u8]) -> Result<Self, MetaError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&[0u8; Meta::SIZE])?;
        writer.write_all(key)?;

        let meta = Meta::new(mode, hash, key.len() as u32);
        Ok(Self { writer, path, meta })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one 4-byte info word (header region framing).
    pub fn write_info(&mut self, info: u32) -> io::Result<()> {
        self.writer.write_u32::<LittleEndian>(info)
    }

    /// Append raw bytes (key, element payloads, body data).
    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    /// Back-patch the META with the final lengths and expiry and flush.
    pub fn finalize(
        mut self,
        expire_ms: u64,
        header_len: u32,
        cache_len: u64,
    ) -> Result<PathBuf, MetaError> {
        self.meta.expire_ms = expire_ms;
        self.meta.header_len = header_len;
        self.meta.cache_len = cache_len;

        self.writer.seek(SeekFrom::Start(0))?;
        self.meta.write(&mut self.writer)?;
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Validated reader over one entry file.
#[derive(Debug)]
pub struct EntryReader {
    file: File,
    meta: Meta,
}

impl EntryReader {
    /// Open the file and read its META; magic/version failures surface as
    /// corruption.
    pub fn open(path: &Path) -> Result<Self, MetaError> {
        let mut file = File::open(path)?;
        let meta = Meta::read(&mut file)?;
        Ok(Self { file, meta })
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn read_key(&self) -> io::Result<Vec<u8>> {
        let mut key = vec![0u8; self.meta.key_len as usize];
        self.file.read_exact_at(&mut key, Meta::SIZE as u64)?;
        Ok(key)
    }

    /// Check the record against the request identity and the clock.
    pub fn validate(&self, key: &[u8], hash: u64, now_ms: u64) -> Result<(), MetaError> {
        if self.meta.hash != hash {
            return Err(MetaError::HashMismatch);
        }
        if self.read_key()? != key {
            return Err(MetaError::KeyMismatch);
        }
        if self.meta.expired(now_ms) {
            return Err(MetaError::Expired);
        }
        Ok(())
    }

    /// The serialized header region: status line, headers, EOH.
    pub fn read_header_region(&self) -> io::Result<Vec<u8>> {
        let mut region = vec![0u8; self.meta.header_len as usize];
        let offset = Meta::SIZE as u64 + u64::from(self.meta.key_len);
        self.file.read_exact_at(&mut region, offset)?;
        Ok(region)
    }

    /// File offset where the payload region starts.
    pub fn payload_offset(&self) -> u64 {
        Meta::SIZE as u64 + u64::from(self.meta.key_len) + u64::from(self.meta.header_len)
    }

    /// Positioned payload read; returns 0 at EOF.
    pub fn read_payload(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }
}

/// Parse a header region back into elements.
///
/// Each block is a little-endian info word followed by `payload_size(info)`
/// bytes; anything that does not line up is corruption.
pub fn parse_header_region(region: &[u8]) -> Result<Vec<Element>, MetaError> {
    let mut elements = Vec::new();
    let mut at = 0usize;

    while at < region.len() {
        if at + 4 > region.len() {
            return Err(MetaError::CorruptRegion);
        }
        let info = u32::from_le_bytes([region[at], region[at + 1], region[at + 2], region[at + 3]]);
        at += 4;

        if http::block_type(info).is_none() {
            return Err(MetaError::CorruptRegion);
        }
        let size = http::payload_size(info);
        if at + size > region.len() {
            return Err(MetaError::CorruptRegion);
        }

        elements.push(Element {
            info,
            data: region[at..at + size].to_vec(),
        });
        at += size;
    }

    Ok(elements)
}
