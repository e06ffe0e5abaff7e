//! XOR combine engine: chunk buffers and batched XOR accumulation.
//!
//! `combine` seeds the target with the first source and XORs the rest in,
//! several sources per pass over the target. The same routine computes
//! redundant content from encodings, temporaries from their equations, and
//! lost data from decodings.

mod buffers;
#[cfg(test)]
mod xor_tests;

pub use buffers::LineBuffers;

use std::collections::TryReserveError;

use crate::error::{Error, Result};

/// Default number of sources folded into the target per pass.
pub const DEFAULT_XOR_BATCH: usize = 4;

/// ChunkBuf holds one chunk: `blocks` contiguous blocks of `block_size` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkBuf {
    block_size: usize,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for ChunkBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBuf")
            .field("block_size", &self.block_size)
            .field("blocks", &self.blocks())
            .finish()
    }
}

impl ChunkBuf {
    /// `try_zeroed` allocates a zero-filled chunk, reporting allocation failure.
    ///
    /// # Errors
    /// Returns the allocator's error when the chunk cannot be reserved.
    pub fn try_zeroed(block_size: usize, blocks: usize) -> std::result::Result<Self, TryReserveError> {
        let len = block_size.saturating_mul(blocks);
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len)?;
        bytes.resize(len, 0);
        Ok(Self { block_size, bytes })
    }

    #[must_use]
    pub fn zeroed(block_size: usize, blocks: usize) -> Self {
        Self {
            block_size,
            bytes: vec![0u8; block_size * blocks],
        }
    }

    /// `filled` returns a chunk with every byte set to `value`.
    #[must_use]
    pub fn filled(block_size: usize, blocks: usize, value: u8) -> Self {
        Self {
            block_size,
            bytes: vec![value; block_size * blocks],
        }
    }

    /// `from_bytes` wraps existing bytes.
    ///
    /// # Errors
    /// Returns [`Error::Misaligned`] when `bytes` is not a whole number of blocks.
    pub fn from_bytes(block_size: usize, bytes: Vec<u8>) -> Result<Self> {
        if block_size == 0 || bytes.len() % block_size != 0 {
            return Err(Error::Misaligned(format!(
                "{} bytes is not a multiple of block size {block_size}",
                bytes.len()
            )));
        }
        Ok(Self { block_size, bytes })
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn blocks(&self) -> usize {
        if self.block_size == 0 {
            0
        } else {
            self.bytes.len() / self.block_size
        }
    }

    /// `shape` returns `(block_size, blocks)`; XOR requires equal shapes.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.block_size, self.blocks())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// `block` returns block `i` of the chunk.
    ///
    /// # Panics
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn block(&self, i: usize) -> &[u8] {
        let start = i * self.block_size;
        &self.bytes[start..start + self.block_size]
    }

    /// `block_mut` returns block `i` of the chunk mutably.
    ///
    /// # Panics
    /// Panics if `i` is out of range.
    pub fn block_mut(&mut self, i: usize) -> &mut [u8] {
        let start = i * self.block_size;
        &mut self.bytes[start..start + self.block_size]
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

fn check_shape(target: &ChunkBuf, source: &ChunkBuf) -> Result<()> {
    if target.shape() == source.shape() {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: target.shape(),
            actual: source.shape(),
        })
    }
}

/// `combine` overwrites `target` with the XOR of all `sources`.
///
/// # Arguments
/// * `target` - Destination chunk; its previous contents are discarded.
/// * `sources` - Chunks to combine, all with the target's shape.
/// * `batch` - Number of sources folded in per pass over the target.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] before touching `target` if any source differs in shape,
/// and [`Error::Layout`] when `sources` is empty.
pub fn combine(target: &mut ChunkBuf, sources: &[&ChunkBuf], batch: usize) -> Result<()> {
    let Some((first, rest)) = sources.split_first() else {
        return Err(Error::Layout("XOR of no sources".into()));
    };
    for src in sources {
        check_shape(target, src)?;
    }

    target.bytes.copy_from_slice(&first.bytes);
    for group in rest.chunks(batch.max(1)) {
        xor_batch(&mut target.bytes, group);
    }
    Ok(())
}

/// One pass over `dst`, folding every source of the group in word by word.
fn xor_batch(dst: &mut [u8], group: &[&ChunkBuf]) {
    const W: usize = std::mem::size_of::<u64>();
    let words = dst.len() / W;

    for w in 0..words {
        let range = w * W..(w + 1) * W;
        let mut acc = read_word(&dst[range.clone()]);
        for src in group {
            acc ^= read_word(&src.bytes[range.clone()]);
        }
        dst[range].copy_from_slice(&acc.to_ne_bytes());
    }
    for i in words * W..dst.len() {
        for src in group {
            dst[i] ^= src.bytes[i];
        }
    }
}

#[inline]
fn read_word(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    u64::from_ne_bytes(word)
}
