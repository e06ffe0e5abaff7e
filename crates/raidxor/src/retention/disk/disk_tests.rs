use rand::RngCore;
use tempfile::{NamedTempFile, TempDir};

use crate::retention::disk::Disk;

const DISK_LEN: u64 = 1 << 20;

#[test]
fn open_prealloc_creates_and_sizes_file() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("disk0.img");

    let d = Disk::open_prealloc(&path, DISK_LEN).expect("open_prealloc");
    assert_eq!(d.len(), DISK_LEN, "disk length must match requested");
    let meta = std::fs::metadata(&path).expect("metadata");
    assert_eq!(meta.len(), DISK_LEN, "backing file must be pre-sized");
    assert!(d.needs_rebuild, "a new image is not trusted");
    drop(d);
    let d = Disk::open_prealloc(&path, DISK_LEN).expect("reopen");
    assert!(d.needs_rebuild, "a blank image stays untrusted across reopen");
}

#[test]
fn existing_image_is_trusted() {
    let tf = NamedTempFile::new().expect("tmp file");
    std::fs::write(tf.path(), vec![1u8; 64]).expect("seed image");

    let d = Disk::open_prealloc(tf.path(), DISK_LEN).expect("open_prealloc");
    assert!(!d.needs_rebuild);
    let mut buf = [0u8; 64];
    d.read_at(0, &mut buf).expect("read");
    assert_eq!(buf, [1u8; 64]);
}

#[test]
fn write_then_read_roundtrip_same_session() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("disk.img");
    let mut d = Disk::open_prealloc(&path, DISK_LEN).expect("open_prealloc");

    let off = 64 * 1024 + 123;
    let mut data = vec![0u8; 8192];
    rand::rng().fill_bytes(&mut data);
    d.write_at(off, &data).expect("write");

    let mut back = vec![0u8; data.len()];
    d.read_at(off, &mut back).expect("read");
    assert_eq!(back, data, "roundtrip must match");
}

#[test]
fn durability_reopen_and_read_back() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("disk.img");
    let off = DISK_LEN / 2 - 200;

    {
        let mut d = Disk::open_prealloc(&path, DISK_LEN).expect("open_prealloc");
        d.write_at(off, b"hello-from-mmap!").expect("write");
        d.flush().expect("flush");
    }

    let d2 = Disk::open_prealloc(&path, DISK_LEN).expect("reopen");
    let mut buf = vec![0u8; 16];
    d2.read_at(off, &mut buf).expect("read");
    assert_eq!(&buf, b"hello-from-mmap!");
}

#[test]
fn transfers_past_end_fail_without_touching_the_buffer() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("disk.img");
    let mut d = Disk::open_prealloc(&path, DISK_LEN).expect("open_prealloc");

    let mut buf = vec![0xCCu8; 4096];
    let err = d.read_at(DISK_LEN - 512, &mut buf).expect_err("short read");
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    assert!(buf.iter().all(|&b| b == 0xCC), "buffer must be untouched");

    assert!(d.write_at(DISK_LEN - 100, &[0x5A; 500]).is_err());
    let mut tail = [0u8; 100];
    d.read_at(DISK_LEN - 100, &mut tail).expect("read tail");
    assert!(tail.iter().all(|&b| b == 0));
}

#[test]
fn failed_disk_is_renamed_and_refuses_io() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("disk1.img");
    let mut d = Disk::open_prealloc(&path, DISK_LEN).expect("open_prealloc");

    d.fail().expect("fail");
    assert!(d.is_missing());
    assert!(!path.exists());
    let renamed = std::fs::read_dir(dir.path())
        .expect("list dir")
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("disk1.img.failed."));
    assert!(renamed, "failed image must be kept aside");

    let mut buf = [0u8; 8];
    let err = d.read_at(0, &mut buf).expect_err("missing disk");
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[test]
fn replaced_disk_needs_rebuild_until_marked() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("disk2.img");
    {
        let mut d = Disk::open_prealloc(&path, DISK_LEN).expect("open_prealloc");
        d.write_at(0, &[7u8; 32]).expect("write");
        d.fail().expect("fail");
        d.replace().expect("replace");
        assert!(d.is_operational());
        assert!(d.needs_rebuild);
        let mut buf = [0xFFu8; 32];
        d.read_at(0, &mut buf).expect("read");
        assert_eq!(buf, [0u8; 32], "replacement starts zeroed");
    }

    let mut reopened = Disk::open_prealloc(&path, DISK_LEN).expect("reopen");
    assert!(reopened.needs_rebuild, "marker survives reopen");
    reopened.mark_rebuilt().expect("mark");
    drop(reopened);
    let again = Disk::open_prealloc(&path, DISK_LEN).expect("reopen");
    assert!(!again.needs_rebuild);
}
