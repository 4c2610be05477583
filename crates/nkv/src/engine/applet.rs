// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-request applet.
//!
//! A cooperatively scheduled state machine: the host builds one applet per
//! request, feeds it body blocks during a store, and polls it whenever the
//! output side has room. Every poll does bounded work and returns
//! [`Progress::Pending`] (come back later) or [`Progress::Done`]. A full
//! output buffer suspends the applet at its exact cursor; a peer that shut
//! the write side short-circuits to DONE. Dropping an applet mid-stream
//! releases its reader attachment, so abandoned requests never pin a
//! draining data object.

use super::txn::{Admission, WriteTxn};
use super::Engine;
use crate::config::Rule;
use crate::error::EngineError;
use crate::http::{self, InputChannel, OutputChannel, Request};
use crate::persist::{self, EntryReader};
use crate::store::{Element, ReaderGuard};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// Result of one applet poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More work pending; poll again when the host has room or input.
    Pending,
    /// Response fully emitted (or aborted); the applet is finished.
    Done,
}

/// Read chunk size for the disk-hit payload loop.
const DISK_CHUNK: usize = 16 * 1024;

pub(crate) enum AppletState {
    /// Store in progress; body blocks arrive via `ingest`.
    Create(Box<WriteTxn>),
    /// A concurrent writer owns the entry; re-run admission on poll.
    Wait {
        req: Box<Request>,
        rule: Arc<Rule>,
        key: Vec<u8>,
        hash: u64,
    },
    /// Serving the element chain of a VALID entry.
    Hit {
        guard: ReaderGuard,
        cursor: usize,
        eom_sent: bool,
    },
    /// Streaming a validated on-disk record.
    HitDisk {
        reader: EntryReader,
        /// Parsed header-region blocks not yet emitted.
        header: Option<VecDeque<Element>>,
        /// Absolute payload offset of the next read.
        offset: u64,
        /// A payload block that did not fit last poll.
        stalled: Option<Element>,
        eom_sent: bool,
    },
    /// Emitting a synthesized status-only response.
    Simple { status: u16, step: u8 },
    Done,
}

/// Per-request cooperative state machine.
pub struct Applet {
    engine: Engine,
    state: AppletState,
}

impl Applet {
    pub(crate) fn new(engine: Engine, state: AppletState) -> Self {
        Self { engine, state }
    }

    /// True while admission is parked behind a concurrent creator.
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, AppletState::Wait { .. })
    }

    /// True while the applet accepts body blocks.
    pub fn is_writable(&self) -> bool {
        matches!(self.state, AppletState::Create(_))
    }

    /// Feed one request body block into a store in progress.
    pub fn ingest(&mut self, bytes: &[u8]) -> crate::Result<()> {
        match &mut self.state {
            AppletState::Create(txn) => match txn.ingest(self.engine.inner(), bytes) {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!("ingest aborted: {}", err);
                    txn.abort(self.engine.inner());
                    self.state = AppletState::Simple {
                        status: err.status().unwrap_or(500),
                        step: 0,
                    };
                    Err(err)
                }
            },
            _ => Err(EngineError::Pending),
        }
    }

    /// Signal end of the request body; publishes the entry.
    pub fn end_of_message(&mut self) -> crate::Result<()> {
        match std::mem::replace(&mut self.state, AppletState::Done) {
            AppletState::Create(mut txn) => match txn.finish(self.engine.inner()) {
                Ok(()) => {
                    self.state = AppletState::Simple {
                        status: 200,
                        step: 0,
                    };
                    Ok(())
                }
                Err(err) => {
                    self.state = AppletState::Simple {
                        status: err.status().unwrap_or(500),
                        step: 0,
                    };
                    Err(err)
                }
            },
            other => {
                self.state = other;
                Err(EngineError::Pending)
            }
        }
    }

    /// Run one quantum of response work.
    pub fn poll(&mut self, req: &mut dyn InputChannel, res: &mut dyn OutputChannel) -> Progress {
        if res.is_shut() {
            // Peer gave up; drop any reader attachment and drain.
            self.state = AppletState::Done;
        }

        match std::mem::replace(&mut self.state, AppletState::Done) {
            AppletState::Create(txn) => {
                // Response comes after end_of_message; nothing to emit yet.
                self.state = AppletState::Create(txn);
                Progress::Pending
            }

            AppletState::Wait {
                req: held,
                rule,
                key,
                hash,
            } => self.retry_admission(held, rule, key, hash),

            AppletState::Hit {
                guard,
                mut cursor,
                eom_sent,
            } => {
                let count = guard.object().element_count();
                while cursor < count {
                    let pushed = guard
                        .object()
                        .with_element(cursor, |e| res.push(e.info, &e.data))
                        .unwrap_or(true);
                    if !pushed {
                        self.state = AppletState::Hit {
                            guard,
                            cursor,
                            eom_sent,
                        };
                        return Progress::Pending;
                    }
                    cursor += 1;
                }

                if !eom_sent {
                    let eom = Element::eom();
                    if !res.push(eom.info, &eom.data) {
                        self.state = AppletState::Hit {
                            guard,
                            cursor,
                            eom_sent,
                        };
                        return Progress::Pending;
                    }
                }

                // Guard drops here, detaching the reader.
                self.complete(req, res)
            }

            AppletState::HitDisk {
                reader,
                header,
                mut offset,
                stalled,
                eom_sent,
            } => self.serve_disk(req, res, reader, header, &mut offset, stalled, eom_sent),

            AppletState::Simple { status, mut step } => {
                while step < 3 {
                    let element = match step {
                        0 => Element::status_line(http::status_line_bytes(status)),
                        1 => Element::eoh(),
                        _ => Element::eom(),
                    };
                    if !res.push(element.info, &element.data) {
                        self.state = AppletState::Simple { status, step };
                        return Progress::Pending;
                    }
                    step += 1;
                }
                self.complete(req, res)
            }

            AppletState::Done => self.complete(req, res),
        }
    }

    /// Re-run admission for a parked writer.
    fn retry_admission(
        &mut self,
        req: Box<Request>,
        rule: Arc<Rule>,
        key: Vec<u8>,
        hash: u64,
    ) -> Progress {
        match super::txn::admit(self.engine.inner(), &req, &rule, key.clone(), hash) {
            Ok(Admission::Created(txn)) => {
                self.state = AppletState::Create(txn);
            }
            Ok(Admission::Wait) => {
                self.state = AppletState::Wait {
                    req,
                    rule,
                    key,
                    hash,
                };
            }
            Ok(Admission::Full) => {
                self.state = AppletState::Simple {
                    status: 507,
                    step: 0,
                };
            }
            Ok(Admission::Empty) => {
                self.state = AppletState::Simple {
                    status: 400,
                    step: 0,
                };
            }
            Err(err) => {
                warn!("admission failed: {}", err);
                self.state = AppletState::Simple {
                    status: err.status().unwrap_or(500),
                    step: 0,
                };
            }
        }
        Progress::Pending
    }

    /// One quantum of the disk-hit stream: header blocks, then payload
    /// chunks as DATA blocks, then EOM.
    #[allow(clippy::too_many_arguments)]
    fn serve_disk(
        &mut self,
        req: &mut dyn InputChannel,
        res: &mut dyn OutputChannel,
        reader: EntryReader,
        header: Option<VecDeque<Element>>,
        offset: &mut u64,
        mut stalled: Option<Element>,
        mut eom_sent: bool,
    ) -> Progress {
        let mut header = match header {
            Some(h) => h,
            None => {
                let parsed = reader
                    .read_header_region()
                    .map_err(persist::MetaError::from)
                    .and_then(|region| persist::parse_header_region(&region));
                match parsed {
                    Ok(elements) => {
                        *offset = reader.payload_offset();
                        elements.into()
                    }
                    Err(err) => {
                        // Mid-serve corruption: close the stream short.
                        warn!("disk record unreadable mid-serve: {}", err);
                        return self.complete(req, res);
                    }
                }
            }
        };

        while let Some(front) = header.front() {
            if !res.push(front.info, &front.data) {
                self.state = AppletState::HitDisk {
                    reader,
                    header: Some(header),
                    offset: *offset,
                    stalled,
                    eom_sent,
                };
                return Progress::Pending;
            }
            header.pop_front();
        }

        if let Some(block) = stalled.take() {
            if !res.push(block.info, &block.data) {
                self.state = AppletState::HitDisk {
                    reader,
                    header: Some(header),
                    offset: *offset,
                    stalled: Some(block),
                    eom_sent,
                };
                return Progress::Pending;
            }
        }

        while !eom_sent {
            let mut buf = vec![0u8; DISK_CHUNK];
            let n = match reader.read_payload(*offset, &mut buf) {
                Ok(n) => n,
                Err(err) => {
                    warn!("disk payload read failed: {}", err);
                    return self.complete(req, res);
                }
            };

            if n == 0 {
                let eom = Element::eom();
                if !res.push(eom.info, &eom.data) {
                    self.state = AppletState::HitDisk {
                        reader,
                        header: Some(header),
                        offset: *offset,
                        stalled: None,
                        eom_sent,
                    };
                    return Progress::Pending;
                }
                eom_sent = true;
                break;
            }

            buf.truncate(n);
            let block = Element::data_block(&buf);
            *offset += n as u64;
            if !res.push(block.info, &block.data) {
                self.state = AppletState::HitDisk {
                    reader,
                    header: Some(header),
                    offset: *offset,
                    stalled: Some(block),
                    eom_sent,
                };
                return Progress::Pending;
            }
        }

        self.complete(req, res)
    }

    /// Terminal handling shared by every path: shut the read side, eat the
    /// rest of the request, stay in DONE.
    fn complete(&mut self, req: &mut dyn InputChannel, res: &mut dyn OutputChannel) -> Progress {
        res.shut_read();
        req.drain();
        self.state = AppletState::Done;
        debug!("applet done");
        Progress::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::http::{BlockType, Method};
    use crate::test_channels::{MemInput, MemOutput};

    fn engine() -> Engine {
        Engine::new(EngineConfig::new()).expect("engine")
    }

    fn drive(applet: &mut Applet) -> MemOutput {
        let mut input = MemInput::default();
        let mut output = MemOutput::unbounded();
        while applet.poll(&mut input, &mut output) == Progress::Pending {}
        output
    }

    #[test]
    fn test_unsupported_method_is_405() {
        let engine = engine();
        let rule = Arc::new(Rule::new("r"));
        let req = Request::new(Method::Other, "/x");
        let mut applet = engine.handle(&req, &rule);

        let out = drive(&mut applet);
        assert_eq!(out.status(), Some(405));
        assert!(out.shut);
    }

    #[test]
    fn test_miss_is_404() {
        let engine = engine();
        let rule = Arc::new(Rule::new("r"));
        let req = Request::new(Method::Get, "/missing");
        let mut applet = engine.handle(&req, &rule);

        let out = drive(&mut applet);
        assert_eq!(out.status(), Some(404));
    }

    #[test]
    fn test_bad_uri_is_400() {
        let engine = engine();
        let rule = Arc::new(Rule::new("r"));
        let req = Request::new(Method::Get, "no-slash");
        let mut applet = engine.handle(&req, &rule);

        let out = drive(&mut applet);
        assert_eq!(out.status(), Some(400));
    }

    #[test]
    fn test_simple_response_respects_backpressure() {
        let engine = engine();
        let rule = Arc::new(Rule::new("r"));
        let req = Request::new(Method::Get, "/missing");
        let mut applet = engine.handle(&req, &rule);

        let mut input = MemInput::default();
        let mut output = MemOutput::with_capacity(1);

        // one block per poll: SL, EOH, EOM
        assert_eq!(applet.poll(&mut input, &mut output), Progress::Pending);
        assert_eq!(output.blocks.len(), 1);
        output.make_room(1);
        assert_eq!(applet.poll(&mut input, &mut output), Progress::Pending);
        output.make_room(1);
        assert_eq!(applet.poll(&mut input, &mut output), Progress::Done);
        assert_eq!(output.blocks.len(), 3);
        assert_eq!(output.block_types(), vec![
            BlockType::StatusLine,
            BlockType::Eoh,
            BlockType::Eom
        ]);
    }

    #[test]
    fn test_shut_peer_short_circuits() {
        let engine = engine();
        let rule = Arc::new(Rule::new("r"));
        let req = Request::new(Method::Get, "/missing");
        let mut applet = engine.handle(&req, &rule);

        let mut input = MemInput::default();
        let mut output = MemOutput::unbounded();
        output.peer_shut = true;

        assert_eq!(applet.poll(&mut input, &mut output), Progress::Done);
        assert!(output.blocks.is_empty());
        assert!(input.drained);
    }

    #[test]
    fn test_ingest_rejected_outside_create() {
        let engine = engine();
        let rule = Arc::new(Rule::new("r"));
        let req = Request::new(Method::Get, "/x");
        let mut applet = engine.handle(&req, &rule);
        assert!(matches!(applet.ingest(b"x"), Err(EngineError::Pending)));
        assert!(matches!(
            applet.end_of_message(),
            Err(EngineError::Pending)
        ));
    }
}
