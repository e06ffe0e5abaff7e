use std::collections::HashSet;
use std::io;

use parking_lot::Mutex;
use tracing::trace;

use crate::cache::Direction;
use crate::layout::model::UnitIndex;
use crate::transport::{IoCompletion, Transport, UnitIo};
use crate::xor::ChunkBuf;

struct Held {
    buf: ChunkBuf,
    result: io::Result<()>,
    done: IoCompletion,
}

/// In-memory member devices with fault injection.
///
/// With `hold` enabled, transfers are performed immediately but their
/// completions are parked until [`MemTransport::release`] runs them, which
/// lets callers observe lines while a transfer is in flight.
pub struct MemTransport {
    devices: Vec<Mutex<Vec<u8>>>,
    failed: Mutex<HashSet<UnitIndex>>,
    hold: Mutex<bool>,
    held: Mutex<Vec<Held>>,
    issued: Mutex<Vec<(UnitIndex, Direction, u64)>>,
}

impl MemTransport {
    /// `new` creates `units` zeroed devices of `unit_len` bytes each.
    #[must_use]
    pub fn new(units: usize, unit_len: usize) -> Self {
        Self {
            devices: (0..units).map(|_| Mutex::new(vec![0u8; unit_len])).collect(),
            failed: Mutex::new(HashSet::new()),
            hold: Mutex::new(false),
            held: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// `fail_unit` makes every later transfer to `unit` fail.
    pub fn fail_unit(&self, unit: UnitIndex) {
        self.failed.lock().insert(unit);
    }

    pub fn set_hold(&self, hold: bool) {
        *self.hold.lock() = hold;
    }

    /// `release` runs every parked completion and returns how many ran.
    pub fn release(&self) -> usize {
        let parked = std::mem::take(&mut *self.held.lock());
        let n = parked.len();
        for h in parked {
            (h.done)(h.buf, h.result);
        }
        n
    }

    #[must_use]
    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// `issued` returns every `(unit, direction, device_offset)` seen so far.
    #[must_use]
    pub fn issued(&self) -> Vec<(UnitIndex, Direction, u64)> {
        self.issued.lock().clone()
    }

    /// `read_device` copies `len` bytes straight from a device, bypassing fault injection.
    #[must_use]
    pub fn read_device(&self, unit: UnitIndex, offset: usize, len: usize) -> Option<Vec<u8>> {
        let dev = self.devices.get(unit)?.lock();
        dev.get(offset..offset + len).map(<[u8]>::to_vec)
    }

    /// `write_device` overwrites device bytes directly.
    pub fn write_device(&self, unit: UnitIndex, offset: usize, bytes: &[u8]) -> bool {
        let Some(dev) = self.devices.get(unit) else {
            return false;
        };
        let mut dev = dev.lock();
        match dev.get_mut(offset..offset + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn perform(&self, io: &mut UnitIo) -> io::Result<()> {
        if self.failed.lock().contains(&io.unit) {
            return Err(io::Error::other(format!("unit {} failed", io.unit)));
        }
        let dev = self
            .devices
            .get(io.unit)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such unit"))?;
        let mut dev = dev.lock();
        let start = usize::try_from(io.device_offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let len = io.buf.len();
        let range = dev
            .get_mut(start..start + len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "beyond device end"))?;
        match io.direction {
            Direction::Read => io.buf.as_mut_slice().copy_from_slice(range),
            Direction::Write => range.copy_from_slice(io.buf.as_slice()),
        }
        Ok(())
    }
}

impl Transport for MemTransport {
    fn issue(&self, mut io: UnitIo, done: IoCompletion) {
        let result = self.perform(&mut io);
        trace!(unit = io.unit, dir = %io.direction, offset = io.device_offset, ok = result.is_ok(), "mem transfer");
        let record = (io.unit, io.direction, io.device_offset);
        // A transfer shows up in `issued` only once its completion is parked or running.
        if *self.hold.lock() {
            self.held.lock().push(Held {
                buf: io.buf,
                result,
                done,
            });
            self.issued.lock().push(record);
        } else {
            self.issued.lock().push(record);
            done(io.buf, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn issue_read(t: &MemTransport, unit: UnitIndex) -> Arc<Mutex<Option<(Vec<u8>, bool)>>> {
        let out = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&out);
        t.issue(
            UnitIo {
                unit,
                direction: Direction::Read,
                device_offset: 4,
                buf: ChunkBuf::zeroed(4, 1),
            },
            Box::new(move |buf, res| *slot.lock() = Some((buf.into_inner(), res.is_ok()))),
        );
        out
    }

    #[test]
    fn reads_back_device_bytes() {
        let t = MemTransport::new(2, 16);
        assert!(t.write_device(1, 4, &[9, 8, 7, 6]));
        let out = issue_read(&t, 1);
        assert_eq!(*out.lock(), Some((vec![9, 8, 7, 6], true)));
        assert_eq!(t.issued(), vec![(1, Direction::Read, 4)]);
    }

    #[test]
    fn failed_unit_reports_error_and_returns_buffer() {
        let t = MemTransport::new(2, 16);
        t.fail_unit(0);
        let out = issue_read(&t, 0);
        let (buf, ok) = out.lock().clone().expect("completion ran");
        assert!(!ok);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn held_completions_run_on_release() {
        let t = MemTransport::new(1, 16);
        t.set_hold(true);
        let out = issue_read(&t, 0);
        assert!(out.lock().is_none());
        assert_eq!(t.held(), 1);
        assert_eq!(t.release(), 1);
        assert!(out.lock().is_some());
    }
}
