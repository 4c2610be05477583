// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared harness for the integration suites: in-memory host channels and
//! one-call request drivers.

use nkv::{
    Applet, BlockType, Engine, InputChannel, Method, OutputChannel, Progress, Request, Rule,
};
use std::sync::Arc;

/// Request-side stub.
#[derive(Debug, Default)]
pub struct HostInput {
    pub drained: bool,
}

impl InputChannel for HostInput {
    fn drain(&mut self) {
        self.drained = true;
    }
}

/// Response-side buffer with optional backpressure.
#[derive(Debug)]
pub struct HostOutput {
    pub blocks: Vec<(u32, Vec<u8>)>,
    pub room: Option<usize>,
    pub peer_shut: bool,
    pub shut: bool,
}

impl HostOutput {
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

    pub fn status(&self) -> Option<u16> {
        self.blocks.iter().find_map(|(info, data)| {
            if nkv::http::block_type(*info) != Some(BlockType::StatusLine) {
                return None;
            }
            let text = std::str::from_utf8(data).ok()?;
            text.split_whitespace().nth(1)?.parse().ok()
        })
    }

    pub fn body(&self) -> Vec<u8> {
        self.blocks
            .iter()
            .filter(|(info, _)| nkv::http::block_type(*info) == Some(BlockType::Data))
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<Vec<u8>> {
        self.blocks.iter().find_map(|(info, data)| {
            if nkv::http::block_type(*info) != Some(BlockType::Header) {
                return None;
            }
            let name_len = (*info & 0xFF) as usize;
            if data[..name_len].eq_ignore_ascii_case(name.as_bytes()) {
                Some(data[name_len..].to_vec())
            } else {
                None
            }
        })
    }

    pub fn block_types(&self) -> Vec<BlockType> {
        self.blocks
            .iter()
            .filter_map(|(info, _)| nkv::http::block_type(*info))
            .collect()
    }
}

impl OutputChannel for HostOutput {
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

/// Poll `applet` to completion against unbounded channels.
pub fn drive(applet: &mut Applet) -> HostOutput {
    let mut input = HostInput::default();
    let mut output = HostOutput::unbounded();
    let mut spins = 0;
    while applet.poll(&mut input, &mut output) == Progress::Pending {
        spins += 1;
        assert!(spins < 100_000, "applet failed to settle");
        std::thread::yield_now();
    }
    output
}

/// Store `body` under `uri`, waiting out any concurrent creator.
pub fn post(engine: &Engine, rule: &Arc<Rule>, uri: &str, body: &[u8]) -> HostOutput {
    post_with(engine, rule, uri, body, &[])
}

/// Store with extra request headers (content-length is always set).
pub fn post_with(
    engine: &Engine,
    rule: &Arc<Rule>,
    uri: &str,
    body: &[u8],
    headers: &[(&str, &str)],
) -> HostOutput {
    let mut req =
        Request::new(Method::Post, uri).header("content-length", body.len().to_string());
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let mut applet = engine.handle(&req, rule);

    let mut input = HostInput::default();
    let mut output = HostOutput::unbounded();
    let mut spins = 0;
    while applet.is_waiting() {
        applet.poll(&mut input, &mut output);
        spins += 1;
        assert!(spins < 100_000, "writer starved in WAIT");
        std::thread::yield_now();
    }

    if applet.is_writable() {
        if applet.ingest(body).is_ok() {
            let _ = applet.end_of_message();
        }
    }
    drive(&mut applet)
}

/// Fetch `uri`.
pub fn get(engine: &Engine, rule: &Arc<Rule>, uri: &str) -> HostOutput {
    let req = Request::new(Method::Get, uri);
    let mut applet = engine.handle(&req, rule);
    drive(&mut applet)
}

/// Delete `uri`.
pub fn delete(engine: &Engine, rule: &Arc<Rule>, uri: &str) -> HostOutput {
    let req = Request::new(Method::Delete, uri);
    let mut applet = engine.handle(&req, rule);
    drive(&mut applet)
}
