//! The raw block transport seam between the engine and member devices.

pub mod memory;

pub use memory::MemTransport;

use crate::cache::Direction;
use crate::layout::model::UnitIndex;
use crate::xor::ChunkBuf;

/// One per-unit sub-request of a line transfer.
///
/// The chunk buffer is moved into the sub-request and handed back through
/// the completion, so the line never aliases a buffer the device is using.
#[derive(Debug)]
pub struct UnitIo {
    pub unit: UnitIndex,
    pub direction: Direction,
    /// Byte offset on the member device.
    pub device_offset: u64,
    pub buf: ChunkBuf,
}

/// Called exactly once per issued sub-request, from any thread.
pub type IoCompletion = Box<dyn FnOnce(ChunkBuf, std::io::Result<()>) + Send + 'static>;

/// Transport issues sub-requests to member devices.
///
/// Implementations may complete synchronously inside `issue` or later from
/// another thread. The engine never holds its lock while calling `issue`.
pub trait Transport: Send + Sync + 'static {
    /// `issue` starts one transfer and arranges for `done` to run when it finishes.
    ///
    /// Reads fill `io.buf` from the device; writes persist it.
    fn issue(&self, io: UnitIo, done: IoCompletion);
}
