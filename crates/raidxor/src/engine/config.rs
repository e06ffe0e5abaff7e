use crate::error::{Error, Result};
use crate::xor::DEFAULT_XOR_BATCH;

/// Default number of cache lines.
pub const DEFAULT_LINES: usize = 10;

/// Tunables for one engine instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub lines: usize,
    /// Upper bound on bytes held by line buffers; `None` means unbounded.
    pub max_buffer_bytes: Option<usize>,
    /// Sources XORed per pass over the target.
    pub xor_batch: usize,
    /// Derive a decoding with the GF(2) solver whenever a data unit lacks a usable one.
    pub derive_decodings: bool,
    /// Treat an unrecoverable line as a hard stop.
    pub halt_on_unrecoverable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lines: DEFAULT_LINES,
            max_buffer_bytes: None,
            xor_batch: DEFAULT_XOR_BATCH,
            derive_decodings: false,
            halt_on_unrecoverable: false,
        }
    }
}

impl EngineConfig {
    /// `validate` rejects configurations the engine cannot run with.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for zero lines or a zero XOR batch.
    pub fn validate(&self) -> Result<()> {
        if self.lines == 0 {
            return Err(Error::Config("lines must be at least 1".into()));
        }
        if self.xor_batch == 0 {
            return Err(Error::Config("xor_batch must be at least 1".into()));
        }
        Ok(())
    }
}
