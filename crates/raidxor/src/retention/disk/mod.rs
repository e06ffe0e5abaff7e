#[cfg(test)]
mod disk_tests;

use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use memmap2::{MmapMut, MmapOptions};
use tracing::{info, warn};

/// A member device backed by a memory-mapped image file.
pub struct Disk {
    path: PathBuf,
    file: Option<File>,
    map: Option<MmapMut>,
    len: u64,
    /// The image exists but its contents are not trusted (new or replaced).
    pub needs_rebuild: bool,
}

fn rebuild_marker(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".needs-rebuild");
    PathBuf::from(name)
}

fn map_file(file: &File, len: u64) -> anyhow::Result<MmapMut> {
    let map_len = usize::try_from(len)
        .map_err(|_| anyhow::anyhow!("disk length {len} exceeds addressable size"))?;
    // SAFETY: the image is opened read-write by this process only; the map is
    // dropped before the file handle and never outlives `Disk`.
    let map = unsafe { MmapOptions::new().len(map_len).map_mut(file)? };
    Ok(map)
}

impl Disk {
    /// `open_prealloc` opens (or creates) an image of exactly `len` bytes.
    ///
    /// A freshly created or empty image gets a rebuild marker; any image carrying
    /// one is reported through [`Disk::needs_rebuild`].
    ///
    /// # Errors
    /// Returns an error if the disk image cannot be created/opened or mapped.
    pub fn open_prealloc(path: impl AsRef<Path>, len: u64) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open disk image {}", path.display()))?;

        let prev_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        file.set_len(len)?;
        let map = map_file(&file, len)?;

        let marker = rebuild_marker(&path);
        let fresh = !existed || prev_len == 0;
        if fresh {
            File::create(&marker)
                .with_context(|| format!("create rebuild marker {}", marker.display()))?;
        }
        let needs_rebuild = fresh || marker.exists();
        Ok(Self {
            path,
            file: Some(file),
            map: Some(map),
            len,
            needs_rebuild,
        })
    }

    /// Mark this disk as failed (hot-remove).
    ///
    /// This will:
    /// - rename the underlying image to `*.failed.<ts>` (if it exists),
    /// - drop the mmap + file handle so the array stops using it.
    ///
    /// # Errors
    /// Returns an error if the disk image cannot be renamed.
    pub fn fail(&mut self) -> anyhow::Result<()> {
        if self.path.exists() {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let failed_path = self.path.with_extension(format!("img.failed.{ts}"));
            std::fs::rename(&self.path, &failed_path).with_context(|| {
                format!("rename {} to {}", self.path.display(), failed_path.display())
            })?;
            warn!(path = %self.path.display(), to = %failed_path.display(), "disk failed");
        }

        self.map.take();
        self.file.take();
        Ok(())
    }

    /// Replace this disk with a fresh, zeroed image (hot-swap).
    ///
    /// The image keeps a rebuild marker until [`Disk::mark_rebuilt`] is called.
    ///
    /// # Errors
    /// Returns an error if the disk image cannot be recreated or mapped.
    pub fn replace(&mut self) -> anyhow::Result<()> {
        self.map.take();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("recreate disk image {}", self.path.display()))?;
        file.set_len(self.len)?;
        let map = map_file(&file, self.len)?;
        File::create(rebuild_marker(&self.path))?;

        self.file = Some(file);
        self.map = Some(map);
        self.needs_rebuild = true;
        info!(path = %self.path.display(), "disk replaced");
        Ok(())
    }

    /// `mark_rebuilt` trusts the image contents again.
    ///
    /// # Errors
    /// Returns an error if the rebuild marker cannot be removed.
    pub fn mark_rebuilt(&mut self) -> anyhow::Result<()> {
        let marker = rebuild_marker(&self.path);
        if marker.exists() {
            std::fs::remove_file(&marker)?;
        }
        self.needs_rebuild = false;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn is_operational(&self) -> bool {
        self.file.is_some() && self.map.is_some()
    }

    /// Missing from the array's point of view (failed / removed / unlinked).
    #[must_use]
    pub fn is_missing(&self) -> bool {
        if !self.is_operational() {
            return true;
        }
        self.file
            .as_ref()
            .and_then(|f| f.metadata().ok().map(|meta| meta.nlink() == 0))
            .unwrap_or(true)
    }

    fn range(&self, off: u64, n: usize) -> io::Result<std::ops::Range<usize>> {
        if self.is_missing() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("disk {} is missing", self.path.display()),
            ));
        }
        let start = usize::try_from(off)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let end = start
            .checked_add(n)
            .filter(|end| (*end as u64) <= self.len)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{n} bytes at {off} exceed disk length {}", self.len),
                )
            })?;
        Ok(start..end)
    }

    /// `read_at` fills `buf` from byte `off`.
    ///
    /// # Errors
    /// Fails when the disk is missing or the range runs past the end of the image.
    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<()> {
        let range = self.range(off, buf.len())?;
        let map = self
            .map
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "disk is not mapped"))?;
        buf.copy_from_slice(&map[range]);
        Ok(())
    }

    /// `write_at` stores `data` at byte `off`.
    ///
    /// Writes land in the page cache; call [`Disk::flush`] for durability.
    ///
    /// # Errors
    /// Fails when the disk is missing or the range runs past the end of the image.
    pub fn write_at(&mut self, off: u64, data: &[u8]) -> io::Result<()> {
        let range = self.range(off, data.len())?;
        let map = self
            .map
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "disk is not mapped"))?;
        map[range].copy_from_slice(data);
        Ok(())
    }

    /// `flush` writes dirty pages of the map back to the image.
    ///
    /// # Errors
    /// Returns the underlying `msync` failure.
    pub fn flush(&self) -> io::Result<()> {
        match self.map.as_ref() {
            Some(map) => map.flush(),
            None => Ok(()),
        }
    }
}
