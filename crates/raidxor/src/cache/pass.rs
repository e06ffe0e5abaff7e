use crate::error::Result;
use crate::layout::model::{Equation, Source, UnitIndex};
use crate::xor::LineBuffers;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Writeback,
    Recovery,
}

/// XOR work detached from a line so it can run without the engine lock.
///
/// The pass owns the line's buffers until it is handed back to the cache.
#[derive(Debug)]
pub struct XorPass {
    pub(crate) line: usize,
    pub(crate) kind: PassKind,
    pub(crate) buffers: LineBuffers,
    pub(crate) steps: Vec<(Source, Equation)>,
    /// Units rebuilt by a recovery pass.
    pub(crate) rebuilt: Vec<UnitIndex>,
}

impl XorPass {
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub const fn kind(&self) -> PassKind {
        self.kind
    }

    /// `steps` lists `(target, equation)` pairs in evaluation order.
    #[must_use]
    pub fn steps(&self) -> &[(Source, Equation)] {
        &self.steps
    }

    /// `run` evaluates every step in order.
    ///
    /// # Errors
    /// Stops at the first step whose buffers are missing or mis-shaped.
    pub fn run(&mut self, batch: usize) -> Result<()> {
        for (target, eq) in &self.steps {
            self.buffers.compute(*target, eq, batch)?;
        }
        Ok(())
    }
}
