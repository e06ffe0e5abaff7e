use std::fmt;
use std::time::Instant;

use crate::error::Result;
use crate::metrics::{self, ArrayOp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Completion callback; receives the segments back (filled, for reads) or the failure.
pub type RequestCallback = Box<dyn FnOnce(Result<Vec<Vec<u8>>>) + Send + 'static>;

/// An application I/O: one direction, a logical offset and block-sized segments.
pub struct Request {
    pub(crate) direction: Direction,
    pub(crate) offset: u64,
    pub(crate) segments: Vec<Vec<u8>>,
    created: Instant,
    done: RequestCallback,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("direction", &self.direction)
            .field("offset", &self.offset)
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn new<F>(direction: Direction, offset: u64, segments: Vec<Vec<u8>>, done: F) -> Self
    where
        F: FnOnce(Result<Vec<Vec<u8>>>) + Send + 'static,
    {
        Self {
            direction,
            offset,
            segments,
            created: Instant::now(),
            done: Box::new(done),
        }
    }

    /// `read` builds a read of `segments.len()` blocks starting at `offset`.
    pub fn read<F>(offset: u64, segments: Vec<Vec<u8>>, done: F) -> Self
    where
        F: FnOnce(Result<Vec<Vec<u8>>>) + Send + 'static,
    {
        Self::new(Direction::Read, offset, segments, done)
    }

    pub fn write<F>(offset: u64, segments: Vec<Vec<u8>>, done: F) -> Self
    where
        F: FnOnce(Result<Vec<Vec<u8>>>) + Send + 'static,
    {
        Self::new(Direction::Write, offset, segments, done)
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// `len` returns the total byte length across segments.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `complete` hands the outcome to the caller's callback.
    pub fn complete(self, result: Result<()>) {
        metrics::record_array_op(ArrayOp {
            op: self.direction,
            bytes: self.len(),
            latency_seconds: self.created.elapsed().as_secs_f64(),
            error: result.is_err(),
        });
        let Self { segments, done, .. } = self;
        done(result.map(|()| segments));
    }
}

/// A request admitted to a line, with its byte offset inside the strip.
#[derive(Debug)]
pub struct Queued {
    pub request: Request,
    pub in_strip: usize,
}
