// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Block-aligned compressed output.
//!
//! Compressed pcap stays randomly addressable because the codec is forced
//! to a full flush at configured intervals: a decoder can start cold at any
//! block boundary. Each packet's packed position is
//! `(compressed_block_start << 20) | offset_within_block`, leaving 20 bits
//! for the uncompressed offset inside the block and ~33 bits for the
//! compressed file offset.

use anyhow::{Context, Result};
use flate2::{Compress, Compression, Crc, FlushCompress, Status};

use crate::cfg::enums::CompressionMode;

/// Bits reserved for the within-block offset in packed positions.
pub const WITHIN_BLOCK_BITS: u32 = 20;

/// Blocks end a little short of the 20-bit limit so a record header never
/// straddles the encodable range.
const BLOCK_OFFSET_LIMIT: u32 = (1 << WITHIN_BLOCK_BITS) - 16;

const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 3];

enum Codec {
    None,
    Gzip {
        deflate: Box<Compress>,
        crc: Crc,
        header_written: bool,
    },
    Zstd {
        encoder: Box<zstd::stream::raw::Encoder<'static>>,
    },
}

/// Compressing appender with forced block boundaries and packed positions.
pub struct BlockWriter {
    codec: Codec,
    /// Compressed bytes not yet handed to the uploader.
    part_buf: Vec<u8>,
    /// Compressed bytes already shipped as parts.
    shipped: u64,
    last_block_start: u64,
    offset_in_block: u32,
    data_since_mini: u32,
    block_size: u32,
    finished: bool,
}

fn compress_bound(n: usize) -> usize {
    n + n / 255 + 64
}

impl BlockWriter {
    pub fn new(mode: CompressionMode, level: u32, block_size: u32) -> Result<Self> {
        let codec = match mode {
            CompressionMode::None => Codec::None,
            CompressionMode::Gzip => {
                let level = if level == 0 {
                    Compression::default()
                } else {
                    Compression::new(level.min(9))
                };
                Codec::Gzip {
                    deflate: Box::new(Compress::new(level, false)),
                    crc: Crc::new(),
                    header_written: false,
                }
            },
            CompressionMode::Zstd => {
                let encoder = zstd::stream::raw::Encoder::new(level as i32)
                    .context("failed to create zstd encoder")?;
                Codec::Zstd {
                    encoder: Box::new(encoder),
                }
            },
        };
        Ok(BlockWriter {
            codec,
            part_buf: Vec::with_capacity(1 << 16),
            shipped: 0,
            last_block_start: 0,
            offset_in_block: 0,
            data_since_mini: 0,
            block_size,
            finished: false,
        })
    }

    /// Total compressed (or raw) bytes produced so far.
    #[inline]
    pub fn total_out(&self) -> u64 {
        self.shipped + self.part_buf.len() as u64
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self.codec, Codec::None)
    }

    fn run_deflate(
        deflate: &mut Compress,
        out: &mut Vec<u8>,
        mut input: &[u8],
        flush: FlushCompress,
    ) -> Result<()> {
        loop {
            if out.capacity() - out.len() < 128 {
                out.reserve(compress_bound(input.len()).max(4096));
            }
            let before_in = deflate.total_in();
            let status = deflate
                .compress_vec(input, out, flush)
                .context("deflate failed")?;
            let consumed = (deflate.total_in() - before_in) as usize;
            input = &input[consumed..];

            let out_full = out.capacity() == out.len();
            match status {
                Status::StreamEnd => return Ok(()),
                _ if matches!(flush, FlushCompress::Finish) => continue,
                _ if input.is_empty() && !out_full => return Ok(()),
                _ => continue,
            }
        }
    }

    fn run_zstd(
        encoder: &mut zstd::stream::raw::Encoder<'static>,
        out: &mut Vec<u8>,
        input: &[u8],
        end_frame: bool,
    ) -> Result<()> {
        use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

        let mut inb = InBuffer::around(input);
        loop {
            out.reserve(compress_bound(input.len()).max(4096));
            let mut outb = OutBuffer::around(out);
            encoder.run(&mut inb, &mut outb).context("zstd run failed")?;
            drop(outb);
            if inb.pos >= input.len() {
                break;
            }
        }
        if end_frame {
            loop {
                out.reserve(4096);
                let mut outb = OutBuffer::around(out);
                let remaining = encoder
                    .finish(&mut outb, true)
                    .context("zstd finish failed")?;
                drop(outb);
                if remaining == 0 {
                    break;
                }
            }
            encoder.reinit().context("zstd reinit failed")?;
        }
        Ok(())
    }

    fn write_compressed(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.codec {
            Codec::None => {
                self.part_buf.extend_from_slice(data);
            },
            Codec::Gzip {
                deflate,
                crc,
                header_written,
            } => {
                if !*header_written {
                    self.part_buf.extend_from_slice(&GZIP_HEADER);
                    *header_written = true;
                }
                crc.update(data);
                Self::run_deflate(deflate, &mut self.part_buf, data, FlushCompress::None)?;
            },
            Codec::Zstd { encoder } => {
                Self::run_zstd(encoder, &mut self.part_buf, data, false)?;
            },
        }
        Ok(())
    }

    /// Forces a full flush so the next byte written starts an independently
    /// decodable block.
    pub fn new_block(&mut self) -> Result<()> {
        match &mut self.codec {
            Codec::None => {},
            Codec::Gzip {
                deflate,
                header_written,
                ..
            } => {
                if !*header_written {
                    self.part_buf.extend_from_slice(&GZIP_HEADER);
                    *header_written = true;
                }
                Self::run_deflate(
                    deflate,
                    &mut self.part_buf,
                    &[],
                    FlushCompress::Full,
                )?;
            },
            Codec::Zstd { encoder } => {
                Self::run_zstd(encoder, &mut self.part_buf, &[], true)?;
            },
        }
        self.last_block_start = self.total_out();
        self.offset_in_block = 0;
        self.data_since_mini = 0;
        Ok(())
    }

    /// Emits pending compressed bytes (without a block boundary) so the
    /// position accounting sees the real compressed size.
    fn mini_flush(&mut self) -> Result<()> {
        match &mut self.codec {
            Codec::None => {},
            Codec::Gzip { deflate, .. } => {
                Self::run_deflate(
                    deflate,
                    &mut self.part_buf,
                    &[],
                    FlushCompress::Sync,
                )?;
            },
            Codec::Zstd { encoder } => {
                use zstd::stream::raw::{Operation, OutBuffer};
                loop {
                    self.part_buf.reserve(4096);
                    let mut outb = OutBuffer::around(&mut self.part_buf);
                    let remaining =
                        encoder.flush(&mut outb).context("zstd flush failed")?;
                    drop(outb);
                    if remaining == 0 {
                        break;
                    }
                }
            },
        }
        self.data_since_mini = 0;
        Ok(())
    }

    /// Guarantees the upcoming record fits the current block, rolling the
    /// block early when the projected compressed size would overshoot.
    fn ensure_space(&mut self, space: usize) -> Result<()> {
        if matches!(self.codec, Codec::None) {
            return Ok(());
        }
        let projected = self.total_out() - self.last_block_start
            + 64
            + compress_bound(space + self.data_since_mini as usize) as u64;
        if projected >= self.block_size as u64 {
            self.mini_flush()?;
            let projected = self.total_out() - self.last_block_start
                + 64
                + compress_bound(space) as u64;
            if projected >= 3 * self.block_size as u64 / 4 {
                self.new_block()?;
            }
        }
        Ok(())
    }

    /// Appends bytes; when `packet_header` is set the returned value is the
    /// position encoding for the record that starts here, and `extra` is
    /// the packet length that will follow.
    pub fn append(
        &mut self,
        data: &[u8],
        packet_header: bool,
        extra: usize,
    ) -> Result<u64> {
        if packet_header {
            self.ensure_space(data.len() + extra)?;
        }

        let pos = if matches!(self.codec, Codec::None) {
            self.total_out()
        } else {
            (self.last_block_start << WITHIN_BLOCK_BITS) | self.offset_in_block as u64
        };

        self.write_compressed(data)?;
        self.offset_in_block += data.len() as u32;
        self.data_since_mini += data.len() as u32;

        if !packet_header
            && (self.offset_in_block >= BLOCK_OFFSET_LIMIT
                || self.total_out() > self.last_block_start + self.block_size as u64)
        {
            self.new_block()?;
        }

        Ok(pos)
    }

    /// Ends the stream: final flush plus the gzip trailer when applicable.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match &mut self.codec {
            Codec::None => {},
            Codec::Gzip {
                deflate,
                crc,
                header_written,
            } => {
                if !*header_written {
                    self.part_buf.extend_from_slice(&GZIP_HEADER);
                    *header_written = true;
                }
                Self::run_deflate(
                    deflate,
                    &mut self.part_buf,
                    &[],
                    FlushCompress::Finish,
                )?;
                self.part_buf.extend_from_slice(&crc.sum().to_le_bytes());
                self.part_buf
                    .extend_from_slice(&(crc.amount()).to_le_bytes());
            },
            Codec::Zstd { encoder } => {
                Self::run_zstd(encoder, &mut self.part_buf, &[], true)?;
            },
        }
        Ok(())
    }

    /// Hands out a full upload part once enough compressed bytes exist.
    pub fn take_part(&mut self, min_size: usize) -> Option<Vec<u8>> {
        if self.part_buf.len() < min_size {
            return None;
        }
        self.shipped += self.part_buf.len() as u64;
        Some(std::mem::replace(
            &mut self.part_buf,
            Vec::with_capacity(1 << 16),
        ))
    }

    /// Drains whatever is left, for the final part.
    pub fn take_rest(&mut self) -> Option<Vec<u8>> {
        if self.part_buf.is_empty() {
            return None;
        }
        self.shipped += self.part_buf.len() as u64;
        Some(std::mem::take(&mut self.part_buf))
    }
}
