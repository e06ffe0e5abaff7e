
use std::fmt::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{info, trace};

use crate::cache::Direction;
use crate::layout::model::UnitIndex;
use crate::retention::disk::Disk;
use crate::transport::{IoCompletion, Transport, UnitIo};

/// One disk image per unit, served as a synchronous [`Transport`].
pub struct DiskArray(Vec<Mutex<Disk>>);

impl DiskArray {
    /// `open` opens or creates one image of `len` bytes per path, in unit order.
    ///
    /// # Errors
    /// Returns an error if any image cannot be opened or mapped.
    pub fn open(paths: &[PathBuf], len: u64) -> anyhow::Result<Self> {
        let disks = paths
            .iter()
            .map(|p| Disk::open_prealloc(p, len).map(Mutex::new))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self(disks))
    }

    #[must_use]
    pub fn disk_len(&self) -> u64 {
        self.0.first().map_or(0, |d| d.lock().len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `needs_rebuild` lists units whose image is missing or awaiting rebuild.
    ///
    /// The engine should start with these units marked faulty.
    #[must_use]
    pub fn needs_rebuild(&self) -> Vec<UnitIndex> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                let d = d.lock();
                d.is_missing() || d.needs_rebuild
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// # Errors
    /// Returns an error for an unknown disk or a failed rename.
    pub fn fail_disk(&self, i: usize) -> anyhow::Result<()> {
        let Some(disk) = self.0.get(i) else {
            anyhow::bail!("disk index out of range: {i} (disks={})", self.0.len());
        };
        disk.lock().fail()
    }

    /// # Errors
    /// Returns an error for an unknown disk or if the image cannot be recreated.
    pub fn replace_disk(&self, i: usize) -> anyhow::Result<()> {
        let Some(disk) = self.0.get(i) else {
            anyhow::bail!("disk index out of range: {i} (disks={})", self.0.len());
        };
        disk.lock().replace()
    }

    /// `adopt_blank` trusts a freshly created array: all-zero members are a
    /// consistent XOR layout.
    ///
    /// Returns `false` and changes nothing unless every disk is present and awaiting
    /// rebuild.
    ///
    /// # Errors
    /// Returns an error if a rebuild marker cannot be removed.
    pub fn adopt_blank(&self) -> anyhow::Result<bool> {
        let blank = self.0.iter().all(|d| {
            let d = d.lock();
            !d.is_missing() && d.needs_rebuild
        });
        if !blank {
            return Ok(false);
        }
        for disk in &self.0 {
            disk.lock().mark_rebuilt()?;
        }
        info!(disks = self.0.len(), "blank array adopted");
        Ok(true)
    }

    /// `flush` syncs every operational image.
    ///
    /// # Errors
    /// Returns the first flush failure.
    pub fn flush(&self) -> anyhow::Result<()> {
        for disk in &self.0 {
            let d = disk.lock();
            if d.is_operational() {
                d.flush()?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn status_string(&self) -> String {
        let mut out = String::new();
        for (i, d) in self.0.iter().enumerate() {
            let d = d.lock();
            let state = if d.is_missing() {
                "FAILED"
            } else if d.needs_rebuild {
                "NEEDS_REBUILD"
            } else {
                "OK"
            };
            let exists = d.path().exists();
            let _ = writeln!(
                out,
                "disk {i}: {state} (image_exists={exists}, path={})",
                d.path().display()
            );
        }
        out
    }
}

impl Transport for DiskArray {
    fn issue(&self, mut io: UnitIo, done: IoCompletion) {
        let result = match self.0.get(io.unit) {
            Some(disk) => match io.direction {
                Direction::Read => disk.lock().read_at(io.device_offset, io.buf.as_mut_slice()),
                Direction::Write => disk.lock().write_at(io.device_offset, io.buf.as_slice()),
            },
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no disk for unit {}", io.unit),
            )),
        };
        trace!(unit = io.unit, dir = %io.direction, offset = io.device_offset, ok = result.is_ok(), "disk transfer");
        done(io.buf, result);
    }
}
