#[cfg(test)]
mod commands_tests;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rand::RngCore;
use raidxor::{DiskArray, Engine, EngineConfig, Geometry, Transport};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cli::{ArrayArgs, Command, DiskArgs, ReadArgs, SelftestArgs, WriteArgs};
use crate::layout::build_model;

fn disk_paths(args: &ArrayArgs, disk_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(disk_dir)
        .with_context(|| format!("failed to create disk directory {}", disk_dir.display()))?;
    Ok((0..args.disks)
        .map(|i| disk_dir.join(format!("disk-{i}.img")))
        .collect())
}

fn open_array(args: &ArrayArgs, disk_dir: &Path) -> Result<Arc<DiskArray>> {
    let paths = disk_paths(args, disk_dir)?;
    let array = DiskArray::open(&paths, args.disk_len)
        .with_context(|| format!("failed to open disk images in {}", disk_dir.display()))?;
    Ok(Arc::new(array))
}

/// `start_engine` runs the engine over `array`, treating every image that is
/// missing or awaiting rebuild as a faulty unit.
fn start_engine(args: &ArrayArgs, array: &Arc<DiskArray>) -> Result<Engine> {
    let mut model = build_model(args)?;
    for unit in array.needs_rebuild() {
        model.mark_faulty(unit).context("mark untrusted disk faulty")?;
    }
    let geometry = Geometry::new(
        args.block_size,
        args.blocks_per_chunk,
        model.data_units().len(),
        array.disk_len(),
    )
    .context("invalid geometry")?;
    let config = EngineConfig {
        lines: args.lines,
        max_buffer_bytes: args.max_buffer_bytes,
        derive_decodings: args.derive_decodings,
        ..EngineConfig::default()
    };
    let transport: Arc<dyn Transport> = array.clone();
    Engine::start(model, geometry, config, transport).context("failed to start engine")
}

/// `finish` drains the engine and syncs the images.
fn finish(engine: &Engine, array: &DiskArray) -> Result<()> {
    engine.drain_and_stop().context("drain engine")?;
    array.flush().context("flush disk images")
}

pub fn run(command: &Command, args: &ArrayArgs) -> Result<()> {
    match command {
        Command::Init => init(args),
        Command::Write(w) => write(args, w),
        Command::Read(r) => read(args, r),
        Command::FailDisk(d) => fail_disk(args, d),
        Command::ReplaceDisk(d) => replace_disk(args, d),
        Command::Status => status(args),
        Command::Selftest(s) => selftest(args, s).map(|_| ()),
    }
}

fn init(args: &ArrayArgs) -> Result<()> {
    build_model(args)?;
    let array = open_array(args, &args.disk_dir)?;
    if array.adopt_blank()? {
        info!(dir = %args.disk_dir.display(), disks = array.len(), "array initialized");
    } else {
        warn!(dir = %args.disk_dir.display(), "existing images kept");
    }
    print!("{}", array.status_string());
    Ok(())
}

fn write(args: &ArrayArgs, w: &WriteArgs) -> Result<()> {
    let mut data = match &w.input {
        Some(path) => std::fs::read(path).with_context(|| format!("read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("read stdin")?;
            buf
        }
    };
    if data.is_empty() {
        bail!("nothing to write");
    }
    let len = data.len();

    let array = open_array(args, &args.disk_dir)?;
    let engine = start_engine(args, &array)?;
    // The tail block keeps whatever follows the input on the array.
    let tail = len % args.block_size;
    if tail != 0 {
        let tail_off = w.offset + (len - tail) as u64;
        let existing = engine
            .read_at(tail_off, args.block_size)
            .with_context(|| format!("read tail block at {tail_off}"))?;
        data.extend_from_slice(&existing[tail..]);
    }
    engine
        .write_at(w.offset, &data)
        .with_context(|| format!("write {len} bytes at {}", w.offset))?;
    finish(&engine, &array)?;
    info!(offset = w.offset, bytes = len, written = data.len(), "write complete");
    Ok(())
}

fn read(args: &ArrayArgs, r: &ReadArgs) -> Result<()> {
    let array = open_array(args, &args.disk_dir)?;
    let engine = start_engine(args, &array)?;
    let mut data = engine
        .read_at(r.offset, r.len.next_multiple_of(args.block_size))
        .with_context(|| format!("read {} bytes at {}", r.len, r.offset))?;
    finish(&engine, &array)?;
    data.truncate(r.len);

    match &r.output {
        Some(path) => {
            std::fs::write(path, &data).with_context(|| format!("write {}", path.display()))?;
        }
        None => std::io::stdout().lock().write_all(&data).context("write stdout")?,
    }
    Ok(())
}

fn fail_disk(args: &ArrayArgs, d: &DiskArgs) -> Result<()> {
    let array = open_array(args, &args.disk_dir)?;
    array.fail_disk(d.index)?;
    print!("{}", array.status_string());
    Ok(())
}

fn replace_disk(args: &ArrayArgs, d: &DiskArgs) -> Result<()> {
    let array = open_array(args, &args.disk_dir)?;
    array.replace_disk(d.index)?;
    print!("{}", array.status_string());
    Ok(())
}

fn status(args: &ArrayArgs) -> Result<()> {
    let array = open_array(args, &args.disk_dir)?;
    let engine = start_engine(args, &array)?;
    let geometry = *engine.geometry();
    print!("{}", array.status_string());
    println!(
        "geometry: block={} chunk={} strip={} capacity={}",
        geometry.block_size,
        geometry.chunk_size(),
        geometry.strip_size(),
        geometry.capacity()
    );
    print!("{}", engine.status());
    finish(&engine, &array)
}

fn digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// `selftest` runs in a scratch directory next to the array and returns the
/// payload digest.
fn selftest(args: &ArrayArgs, s: &SelftestArgs) -> Result<String> {
    let dir = args.disk_dir.join("selftest");
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("clear scratch directory {}", dir.display()))?;
    }
    if s.fail >= args.disks {
        bail!("--fail {} is out of range (disks={})", s.fail, args.disks);
    }

    let array = open_array(args, &dir)?;
    array.adopt_blank()?;
    let engine = start_engine(args, &array)?;
    let len = engine.geometry().strip_size() * s.strips;
    let mut payload = vec![0u8; len];
    rand::rng().fill_bytes(&mut payload);
    let expected = digest(&payload);
    engine.write_at(0, &payload).context("selftest write")?;
    finish(&engine, &array)?;
    info!(bytes = len, sha256 = %expected, "payload written");

    array.fail_disk(s.fail)?;
    let engine = start_engine(args, &array)?;
    let back = engine.read_at(0, len).context("selftest read after disk failure")?;
    finish(&engine, &array)?;
    let actual = digest(&back);
    if actual != expected {
        bail!("selftest digest mismatch: wrote {expected}, read {actual}");
    }

    std::fs::remove_dir_all(&dir)
        .with_context(|| format!("remove scratch directory {}", dir.display()))?;
    println!("selftest ok: {len} bytes survived loss of disk {} (sha256 {actual})", s.fail);
    Ok(actual)
}
