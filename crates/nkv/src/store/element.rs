// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stored message elements.
//!
//! An element is one HTTP message block captured into the cache: the packed
//! info word plus the verbatim payload bytes. Elements are owned by their
//! data object's chain and released as a unit with it.

use crate::http::{self, BlockType};

/// One cached message block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Packed `type:4 | length:28` word; see [`crate::http`].
    pub info: u32,
    /// Verbatim payload bytes.
    pub data: Vec<u8>,
}

impl Element {
    /// Status-line element for a synthesized response.
    pub fn status_line(line: Vec<u8>) -> Self {
        let info = http::encode_info(BlockType::StatusLine, line.len());
        Self { info, data: line }
    }

    /// Header element; the name is stored lowercase, payload is name bytes
    /// then value bytes with the split lengths packed into the info word.
    pub fn header(name: &[u8], value: &[u8]) -> Self {
        let info = http::encode_header_info(BlockType::Header, name.len(), value.len());
        let mut data = Vec::with_capacity(name.len() + value.len());
        data.extend(name.iter().map(|b| b.to_ascii_lowercase()));
        data.extend_from_slice(value);
        Self { info, data }
    }

    /// End-of-headers marker.
    pub fn eoh() -> Self {
        Self {
            info: http::encode_info(BlockType::Eoh, 0),
            data: Vec::new(),
        }
    }

    /// Body data element holding a copy of the block bytes.
    pub fn data_block(bytes: &[u8]) -> Self {
        Self {
            info: http::encode_info(BlockType::Data, bytes.len()),
            data: bytes.to_vec(),
        }
    }

    /// End-of-message marker.
    pub fn eom() -> Self {
        Self {
            info: http::encode_info(BlockType::Eom, 0),
            data: Vec::new(),
        }
    }

    pub fn block_type(&self) -> Option<BlockType> {
        http::block_type(self.info)
    }

    pub fn is_data(&self) -> bool {
        self.block_type() == Some(BlockType::Data)
    }

    /// Payload bytes charged against the data budget.
    pub fn mem_size(&self) -> u64 {
        self.data.len() as u64
    }
}
