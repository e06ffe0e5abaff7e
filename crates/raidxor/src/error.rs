//! Error type shared by every engine operation.

use thiserror::Error;

use crate::cache::LineState;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to request completions and engine callers.
///
/// The enum is `Clone` so that every request queued on an abandoned line can
/// receive the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The engine is draining and no longer admits requests.
    #[error("array is stopping")]
    Stopping,

    /// The engine entered its hard-error state.
    #[error("array halted: {0}")]
    Halted(String),

    /// Request shape does not match the block layout.
    #[error("misaligned request: {0}")]
    Misaligned(String),

    #[error("request at offset {offset} with length {len} spans more than one strip")]
    SpansStrips { offset: u64, len: u64 },

    #[error("request at offset {offset} with length {len} exceeds capacity {capacity}")]
    OutOfRange { offset: u64, len: u64, capacity: u64 },

    /// XOR sources or target disagree on (block size, block count).
    #[error("buffer shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("cannot allocate buffers for line {line}")]
    Allocation { line: usize },

    #[error("no cache line available")]
    NoLine,

    #[error("line {line} in state {state} cannot {op}")]
    InvalidTransition {
        line: usize,
        state: LineState,
        op: &'static str,
    },

    /// A faulty data unit has no usable decoding.
    #[error("unit {unit} is faulty and has no usable decoding")]
    NoDecoding { unit: usize },

    /// Every request queued on an abandoned line fails with this.
    #[error("strip at offset {strip} could not be recovered: {reason}")]
    Unrecoverable { strip: u64, reason: String },

    #[error("invalid layout: {0}")]
    Layout(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// `is_contract_violation` reports whether the error is a caller-side layout violation.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Misaligned(_)
                | Self::SpansStrips { .. }
                | Self::OutOfRange { .. }
                | Self::ShapeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_classified() {
        assert!(Error::Misaligned("x".into()).is_contract_violation());
        assert!(Error::SpansStrips { offset: 0, len: 1 }.is_contract_violation());
        assert!(!Error::Stopping.is_contract_violation());
        assert!(!Error::NoDecoding { unit: 1 }.is_contract_violation());
    }

    #[test]
    fn display_includes_state_name() {
        let err = Error::InvalidTransition {
            line: 2,
            state: LineState::Loading,
            op: "bind",
        };
        assert_eq!(err.to_string(), "line 2 in state LOADING cannot bind");
    }
}
