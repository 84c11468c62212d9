// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Cap on buffered bytes per direction. Parsers needing more are assumed to
/// be lost and must unregister.
pub const MAX_PARSER_BUF: usize = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("parser buffer would exceed {MAX_PARSER_BUF} bytes")]
pub struct BufOverflow;

/// Bounded per-direction reassembly buffer for parsers whose messages span
/// packet boundaries.
#[derive(Debug, Default)]
pub struct ParserBuf {
    bufs: [Vec<u8>; 2],
}

impl ParserBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends payload; refuses to grow past the cap so a lost stream can
    /// not hold memory hostage.
    pub fn add(&mut self, which: usize, data: &[u8]) -> Result<(), BufOverflow> {
        if self.bufs[which].len() + data.len() > MAX_PARSER_BUF {
            return Err(BufOverflow);
        }
        self.bufs[which].extend_from_slice(data);
        Ok(())
    }

    #[inline]
    pub fn data(&self, which: usize) -> &[u8] {
        &self.bufs[which]
    }

    #[inline]
    pub fn len(&self, which: usize) -> usize {
        self.bufs[which].len()
    }

    pub fn is_empty(&self, which: usize) -> bool {
        self.bufs[which].is_empty()
    }

    /// Drops a consumed prefix.
    pub fn del(&mut self, which: usize, n: usize) {
        let n = n.min(self.bufs[which].len());
        self.bufs[which].drain(..n);
    }

    /// Advances past bytes the parser never wants to see again.
    pub fn skip(&mut self, which: usize, n: usize) {
        self.del(which, n);
    }
}
