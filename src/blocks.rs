//! block storage adapter: chunk opaque bytes onto a 16-byte-block medium
//!
//! mifare classic style addressing: every 4th block is a sector trailer
//! holding access keys, not data, and must never be written. both the write
//! and the read side walk the same deterministic skip sequence from the same
//! base block, so the chunk layout needs no side table beyond the byte
//! length of the payload.

use crate::{Error, Result};

/// physical block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// first usable data block (sector 0 holds the manufacturer block)
pub const DATA_BASE_BLOCK: u8 = 4;

/// a medium addressable in fixed 16-byte blocks
pub trait BlockMedium {
    fn write_block(&mut self, index: u8, data: &[u8; BLOCK_SIZE]) -> Result<()>;
    fn read_block(&mut self, index: u8) -> Result<[u8; BLOCK_SIZE]>;
}

/// sector trailer blocks (3, 7, 11, ...) are reserved and skipped
pub fn is_reserved(index: u8) -> bool {
    (index + 1) % 4 == 0
}

/// number of blocks needed for a payload of `len` bytes
pub fn blocks_for_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

/// write `data` starting at `start`, zero-padding the final partial block.
/// stops at the first failed block. returns the next free block index.
pub fn write(medium: &mut dyn BlockMedium, start: u8, data: &[u8]) -> Result<u8> {
    let mut block = start;
    for chunk in data.chunks(BLOCK_SIZE) {
        if is_reserved(block) {
            block += 1;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        buf[..chunk.len()].copy_from_slice(chunk);
        medium.write_block(block, &buf)?;
        block += 1;
    }
    Ok(block)
}

/// read `count` data blocks starting at `start`, walking the same skip
/// sequence as [`write`]
pub fn read(medium: &mut dyn BlockMedium, start: u8, count: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(count * BLOCK_SIZE);
    let mut block = start;
    for _ in 0..count {
        if is_reserved(block) {
            block += 1;
        }
        out.extend_from_slice(&medium.read_block(block)?);
        block += 1;
    }
    Ok(out)
}

/// strip the zero padding appended by the final partial block
pub fn trim_zeros(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}
