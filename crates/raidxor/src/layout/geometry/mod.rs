//! Geometry helpers for mapping logical byte offsets to strips and chunks.


use crate::error::{Error, Result};

/// Geometry describes the byte layout of blocks, chunks and strips.
///
/// A block is the granularity of request segments and line buffers. A chunk
/// is `blocks_per_chunk` blocks and is what one unit stores for one strip. A
/// strip is one chunk per data unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: usize,
    pub blocks_per_chunk: usize,
    pub data_units: usize,
    /// Usable bytes on every member device.
    pub unit_len: u64,
}

impl Geometry {
    /// `new` validates and builds a geometry.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when any dimension is zero or a member cannot hold one chunk.
    pub fn new(
        block_size: usize,
        blocks_per_chunk: usize,
        data_units: usize,
        unit_len: u64,
    ) -> Result<Self> {
        if block_size == 0 || blocks_per_chunk == 0 || data_units == 0 {
            return Err(Error::Config(format!(
                "block_size={block_size}, blocks_per_chunk={blocks_per_chunk}, \
                 data_units={data_units} must all be non-zero"
            )));
        }
        let geom = Self {
            block_size,
            blocks_per_chunk,
            data_units,
            unit_len,
        };
        if geom.strip_count() == 0 {
            return Err(Error::Config(format!(
                "unit length {unit_len} is smaller than one chunk ({} bytes)",
                geom.chunk_size()
            )));
        }
        Ok(geom)
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.block_size * self.blocks_per_chunk
    }

    #[must_use]
    pub const fn strip_size(&self) -> usize {
        self.chunk_size() * self.data_units
    }

    #[must_use]
    pub const fn blocks_per_strip(&self) -> usize {
        self.blocks_per_chunk * self.data_units
    }

    /// `strip_count` returns how many whole strips fit on the members.
    #[must_use]
    pub const fn strip_count(&self) -> u64 {
        self.unit_len / self.chunk_size() as u64
    }

    /// `capacity` returns the logical array size in bytes.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.strip_count() * self.strip_size() as u64
    }

    /// `locate` maps a logical byte offset to its aligned strip offset and in-strip offset.
    ///
    /// # Arguments
    /// * `offset` - Logical byte offset.
    ///
    /// # Returns
    /// A tuple of `(strip_offset, in_strip_offset)`.
    #[must_use]
    pub fn locate(&self, offset: u64) -> (u64, usize) {
        let strip = self.strip_size() as u64;
        let in_strip = offset % strip;
        // in_strip < strip_size, which is a usize.
        (offset - in_strip, in_strip as usize)
    }

    /// `device_offset` returns the byte offset on every member for the strip at `strip_offset`.
    ///
    /// # Arguments
    /// * `strip_offset` - Aligned logical offset of the strip.
    #[must_use]
    pub fn device_offset(&self, strip_offset: u64) -> u64 {
        (strip_offset / self.strip_size() as u64) * self.chunk_size() as u64
    }

    /// `block_position` maps a block-aligned in-strip offset to `(data_ordinal, block_in_chunk)`.
    ///
    /// The strip is laid out as data unit 0's chunk, then data unit 1's chunk, and so on.
    #[must_use]
    pub const fn block_position(&self, in_strip: usize) -> (usize, usize) {
        let block = in_strip / self.block_size;
        (block / self.blocks_per_chunk, block % self.blocks_per_chunk)
    }
}
