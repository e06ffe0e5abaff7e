use std::collections::TryReserveError;

use crate::error::{Error, Result};
use crate::layout::model::{Equation, Source, TempIndex, UnitIndex};
use crate::xor::{ChunkBuf, combine};

/// Per-line staging buffers: one chunk per unit and one per temporary.
///
/// Unit slots are emptied while their chunk is lent to an in-flight
/// sub-request and refilled when the sub-request completes.
#[derive(Debug)]
pub struct LineBuffers {
    units: Vec<Option<ChunkBuf>>,
    temps: Vec<Option<ChunkBuf>>,
}

impl LineBuffers {
    /// `try_alloc` allocates zeroed chunks for every unit and temporary.
    ///
    /// # Errors
    /// Returns the allocator's error if any chunk cannot be reserved.
    pub fn try_alloc(
        n_units: usize,
        n_temps: usize,
        block_size: usize,
        blocks: usize,
    ) -> std::result::Result<Self, TryReserveError> {
        let alloc = |n: usize| -> std::result::Result<Vec<Option<ChunkBuf>>, TryReserveError> {
            let mut v = Vec::new();
            v.try_reserve_exact(n)?;
            for _ in 0..n {
                v.push(Some(ChunkBuf::try_zeroed(block_size, blocks)?));
            }
            Ok(v)
        };
        Ok(Self {
            units: alloc(n_units)?,
            temps: alloc(n_temps)?,
        })
    }

    /// `footprint` returns the bytes a line with this shape holds.
    #[must_use]
    pub const fn footprint(n_units: usize, n_temps: usize, block_size: usize, blocks: usize) -> usize {
        (n_units + n_temps) * block_size * blocks
    }

    #[must_use]
    pub fn unit(&self, u: UnitIndex) -> Option<&ChunkBuf> {
        self.units.get(u)?.as_ref()
    }

    pub fn unit_mut(&mut self, u: UnitIndex) -> Option<&mut ChunkBuf> {
        self.units.get_mut(u)?.as_mut()
    }

    #[must_use]
    pub fn temp(&self, t: TempIndex) -> Option<&ChunkBuf> {
        self.temps.get(t)?.as_ref()
    }

    /// `take_unit` lends a unit's chunk out, leaving its slot empty.
    pub fn take_unit(&mut self, u: UnitIndex) -> Option<ChunkBuf> {
        self.units.get_mut(u)?.take()
    }

    /// `put_unit` returns a lent chunk to its slot.
    pub fn put_unit(&mut self, u: UnitIndex, buf: ChunkBuf) {
        if let Some(slot) = self.units.get_mut(u) {
            *slot = Some(buf);
        }
    }

    /// `all_present` reports whether no chunk is currently lent out.
    #[must_use]
    pub fn all_present(&self) -> bool {
        self.units.iter().chain(self.temps.iter()).all(Option::is_some)
    }

    fn slot(&mut self, src: Source) -> Option<&mut Option<ChunkBuf>> {
        match src {
            Source::Unit(u) => self.units.get_mut(u),
            Source::Temp(t) => self.temps.get_mut(t),
        }
    }

    fn resolve(&self, src: Source) -> Result<&ChunkBuf> {
        let slot = match src {
            Source::Unit(u) => self.units.get(u),
            Source::Temp(t) => self.temps.get(t),
        };
        slot.and_then(Option::as_ref)
            .ok_or_else(|| Error::Layout(format!("source {src} has no buffer")))
    }

    /// `compute` overwrites the `target` chunk with the XOR of the equation's sources.
    ///
    /// Temporaries referenced by `eq` must already hold their values for this pass.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] when the target or a source has no buffer (including a
    /// source equal to the target) and [`Error::ShapeMismatch`] on mismatched chunks.
    pub fn compute(&mut self, target: Source, eq: &Equation, batch: usize) -> Result<()> {
        let mut dst = self
            .slot(target)
            .and_then(Option::take)
            .ok_or_else(|| Error::Layout(format!("target {target} has no buffer")))?;

        let result = eq
            .sources()
            .iter()
            .map(|s| self.resolve(*s))
            .collect::<Result<Vec<&ChunkBuf>>>()
            .and_then(|srcs| combine(&mut dst, &srcs, batch));

        if let Some(slot) = self.slot(target) {
            *slot = Some(dst);
        }
        result
    }
}
