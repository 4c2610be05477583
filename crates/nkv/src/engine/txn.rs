// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The write transaction.
//!
//! Covers a store request from admission to publication: claim or create
//! the dictionary entry, synthesize the response header elements, ingest
//! body blocks into the element chain (and through to disk for write-through
//! rules), then finish by patching the META and flipping the entry state.
//!
//! The dict lock is held only for the admission decision and the final
//! state flip; every allocation and all I/O happens between the two.

use super::EngineInner;
use crate::config::{DiskMode, Rule};
use crate::error::EngineError;
use crate::http::Request;
use crate::persist::EntryWriter;
use crate::store::dict::EntryState;
use crate::store::{DataObject, Element, ObjectInfo};
use crate::now_ms;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Outcome of the admission check.
pub(crate) enum Admission {
    /// This writer owns the entry; the transaction is live.
    Created(Box<WriteTxn>),
    /// Another writer holds the entry in CREATING; retry next tick.
    Wait,
    /// Memory quota exceeded (507).
    Full,
    /// Body required but the request declares no framing (400).
    Empty,
}

/// In-flight store request.
pub(crate) struct WriteTxn {
    key: Vec<u8>,
    hash: u64,
    rule: Arc<Rule>,
    data: Arc<DataObject>,
    /// Declared Content-Length, 0 when absent (`cache_len`).
    declared_len: u64,
    /// True when the request carried a Content-Length header at all;
    /// distinguishes `Content-Length: 0` from chunked-only framing.
    has_length: bool,
    /// Observed bytes: synthesized header bytes plus body (`cache_len2`).
    observed_len: u64,
    /// Body bytes alone; a chunked transaction that never sees one is
    /// aborted.
    body_len: u64,
    /// Bytes of the serialized header region, info words included.
    header_len: u64,
    chunked: bool,
    content_type: Option<Vec<u8>>,
    transfer_encoding: Option<Vec<u8>>,
    disk: Option<EntryWriter>,
}

/// Run the admission protocol for a store request.
///
/// Quota first, then under the dict lock: a CREATING entry sends this
/// writer to WAIT; any other entry is replaced (its data object demoted to
/// draining); an absent key gets a fresh CREATING entry. The replaced
/// entry's old disk file is unlinked after the lock drops so only one file
/// per `{hash, key}` survives.
pub(crate) fn admit(
    inner: &EngineInner,
    req: &Request,
    rule: &Arc<Rule>,
    key: Vec<u8>,
    hash: u64,
) -> Result<Admission, EngineError> {
    if req.content_length().is_none() && !req.is_chunked() {
        return Ok(Admission::Empty);
    }

    if inner.store.stats().full() {
        return Ok(Admission::Full);
    }

    if rule.mode.writes_through() && inner.persist.is_none() {
        return Err(EngineError::Config(format!(
            "rule '{}' requires a persistence root",
            rule.name
        )));
    }

    // Allocate the data object before taking the dict lock; a WAIT outcome
    // just demotes it straight back to the ring.
    let data = inner.store.new_data();

    let mut wait = false;
    let mut old_file: Option<PathBuf> = None;
    {
        let mut dict = inner.store.dict.lock();
        let mut absent = true;
        if let Some(entry) = dict.get_mut(&key, hash) {
            absent = false;
            if entry.state == EntryState::Creating {
                wait = true;
            } else {
                if let Some(old) = entry.data.take() {
                    old.invalidate();
                }
                entry.state = EntryState::Creating;
                entry.data = Some(Arc::clone(&data));
                entry.rule = Some(Arc::clone(rule));
                entry.expire_ms = 0;
                old_file = entry.file.take();
            }
        }
        if absent {
            dict.set(key.clone(), hash, Arc::clone(rule), Arc::clone(&data));
        }
    }

    if wait {
        data.invalidate();
        return Ok(Admission::Wait);
    }

    if let Some(old) = old_file {
        if let Some(persist) = &inner.persist {
            persist.unlink(&old);
        }
    }

    let mut txn = WriteTxn {
        key,
        hash,
        rule: Arc::clone(rule),
        data,
        declared_len: req.content_length().unwrap_or(0),
        has_length: req.content_length().is_some(),
        observed_len: 0,
        body_len: 0,
        header_len: 0,
        chunked: req.is_chunked(),
        content_type: req.content_type().map(|v| v.to_vec()),
        transfer_encoding: req.transfer_encoding_joined(),
        disk: None,
    };

    txn.synthesize_header(inner, req)?;
    txn.open_disk(inner)?;

    debug!(
        "create key hash={:016x} rule={} mode={:?}",
        hash, rule.name, rule.mode
    );
    Ok(Admission::Created(Box::new(txn)))
}

impl WriteTxn {
    /// Build the stored response head: status line, at most one framing
    /// header, the request's content type when it has one, then EOH.
    /// Framing mirrors the request: a non-zero declared Content-Length is
    /// echoed, otherwise chunked requests get `Transfer-Encoding: chunked`.
    fn synthesize_header(&mut self, inner: &EngineInner, req: &Request) -> Result<(), EngineError> {
        let stats = inner.store.stats();

        let sl = Element::status_line(crate::http::status_line_bytes(200));
        self.header_len += 4 + sl.mem_size();
        self.observed_len += 4 + sl.mem_size();
        self.data.append(sl, stats);

        if self.declared_len > 0 {
            let value = req
                .header_value("content-length")
                .ok_or_else(|| EngineError::Internal("content-length vanished".into()))?;
            let hdr = Element::header(b"content-length", value);
            self.header_len += 4 + hdr.mem_size();
            self.observed_len += 4 + hdr.mem_size();
            self.data.append(hdr, stats);
        } else if self.chunked {
            let hdr = Element::header(b"transfer-encoding", b"chunked");
            self.header_len += 4 + hdr.mem_size();
            self.observed_len += 4 + hdr.mem_size();
            self.data.append(hdr, stats);
        }

        if let Some(ct) = req.content_type() {
            let hdr = Element::header(b"content-type", ct);
            self.header_len += 4 + hdr.mem_size();
            self.observed_len += 4 + hdr.mem_size();
            self.data.append(hdr, stats);
        }

        // EOH counts toward the header region but not the observed bytes.
        let eoh = Element::eoh();
        self.header_len += 4 + eoh.mem_size();
        self.data.append(eoh, stats);

        Ok(())
    }

    /// For write-through rules, open the entry file and stream the header
    /// elements already in the chain.
    fn open_disk(&mut self, inner: &EngineInner) -> Result<(), EngineError> {
        if !self.rule.mode.writes_through() {
            return Ok(());
        }
        let persist = inner
            .persist
            .as_ref()
            .ok_or_else(|| EngineError::Internal("write-through rule without root".into()))?;

        let path = persist.new_entry_path(self.hash);
        let mut writer = EntryWriter::create(path, self.rule.mode.as_u8(), self.hash, &self.key)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        for idx in 0..self.data.element_count() {
            let res = self.data.with_element(idx, |e| {
                writer.write_info(e.info)?;
                writer.write_bytes(&e.data)
            });
            match res {
                Some(Ok(())) => {}
                Some(Err(err)) => return Err(err.into()),
                None => break,
            }
        }

        self.disk = Some(writer);
        Ok(())
    }

    /// Ingest one body block.
    ///
    /// Disk-only rules stream straight to the file; everything else copies
    /// into the element chain, mirroring to disk under sync rules. A full
    /// budget mid-stream aborts the transaction.
    pub(crate) fn ingest(&mut self, inner: &EngineInner, bytes: &[u8]) -> Result<(), EngineError> {
        if bytes.is_empty() {
            return Ok(());
        }

        if self.rule.mode == DiskMode::Only {
            let writer = self
                .disk
                .as_mut()
                .ok_or_else(|| EngineError::Internal("disk writer missing".into()))?;
            writer.write_bytes(bytes)?;
            self.observed_len += bytes.len() as u64;
            self.body_len += bytes.len() as u64;
            return Ok(());
        }

        if inner.store.stats().full() {
            return Err(EngineError::ResourceExhausted);
        }

        self.data
            .append(Element::data_block(bytes), inner.store.stats());

        if self.rule.mode == DiskMode::Sync {
            let writer = self
                .disk
                .as_mut()
                .ok_or_else(|| EngineError::Internal("disk writer missing".into()))?;
            writer.write_bytes(bytes)?;
        }

        self.observed_len += bytes.len() as u64;
        self.body_len += bytes.len() as u64;
        Ok(())
    }

    /// End of message: capture the response metadata, patch the META for
    /// disk rules, and publish the entry.
    ///
    /// Disk-only entries finish INVALID with their file attached, so every
    /// read goes through the disk path; everything else becomes VALID.
    pub(crate) fn finish(&mut self, inner: &EngineInner) -> Result<(), EngineError> {
        // A chunked request that declared no length and delivered no body
        // has nothing to publish. Content-Length: 0 still does.
        if !self.has_length && self.body_len == 0 {
            self.abort(inner);
            return Err(EngineError::Internal("empty transaction".into()));
        }

        let expire_ms = if self.rule.ttl_secs == 0 {
            0
        } else {
            now_ms() + self.rule.ttl_secs * 1000
        };

        let content_length = if self.declared_len > 0 {
            self.declared_len
        } else {
            self.observed_len
        };

        // I/O first, dict lock after.
        let file = match self.disk.take() {
            Some(writer) => {
                let cache_len = content_length;
                Some(
                    writer
                        .finalize(expire_ms, self.header_len as u32, cache_len)
                        .map_err(|e| EngineError::Internal(e.to_string()))?,
                )
            }
            None => None,
        };

        self.data.set_info(ObjectInfo {
            content_type: self.content_type.take(),
            transfer_encoding: self.transfer_encoding.take(),
            content_length,
            chunked: self.chunked,
        });

        let mut stale_file: Option<PathBuf> = None;
        let mut vanished = true;
        {
            let mut dict = inner.store.dict.lock();
            if let Some(entry) = dict.get_mut(&self.key, self.hash) {
                vanished = false;
                entry.expire_ms = expire_ms;
                if self.rule.mode == DiskMode::Only {
                    entry.state = EntryState::Invalid;
                    entry.data = None;
                } else {
                    entry.state = EntryState::Valid;
                }
                if let Some(f) = &file {
                    stale_file = entry.file.replace(f.clone());
                }
            }
        }

        if vanished {
            // Entry swept mid-build (deleted and reclaimed); nothing to
            // publish into.
            warn!("entry vanished before finish, hash={:016x}", self.hash);
            self.data.invalidate();
            if let (Some(f), Some(p)) = (&file, &inner.persist) {
                p.unlink(f);
            }
            return Err(EngineError::Internal("entry vanished".into()));
        }

        if self.rule.mode == DiskMode::Only {
            self.data.invalidate();
        }

        if let (Some(old), Some(persist)) = (stale_file, &inner.persist) {
            persist.unlink(&old);
        }

        inner.store.stats().writes.fetch_add(1, Ordering::Relaxed);
        debug!("finish key hash={:016x} len={}", self.hash, content_length);
        Ok(())
    }

    /// Abort the transaction: invalidate the entry and demote its data
    /// object. A partial disk file is left behind for the cleaner (its META
    /// region is still zeroed, so it fails validation on sight).
    pub(crate) fn abort(&mut self, inner: &EngineInner) {
        self.disk = None;
        self.data.invalidate();

        let mut dict = inner.store.dict.lock();
        if let Some(entry) = dict.get_mut(&self.key, self.hash) {
            if entry.state == EntryState::Creating {
                entry.state = EntryState::Invalid;
                entry.data = None;
            }
        }
    }
}
