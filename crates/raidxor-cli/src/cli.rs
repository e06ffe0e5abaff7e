use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use raidxor::engine::DEFAULT_LINES;

/// DEFAULT_DISK_LEN is the default disk image length in bytes.
pub const DEFAULT_DISK_LEN: u64 = 16 * 1024 * 1024;
/// DEFAULT_BLOCK_SIZE is the default request block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// DEFAULT_BLOCKS_PER_CHUNK is the default number of blocks per unit chunk.
pub const DEFAULT_BLOCKS_PER_CHUNK: usize = 16;

#[derive(Parser)]
#[command(name = "raidxor", author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub array: ArrayArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the disk images and adopt them as a blank array.
    Init,

    /// Write a file (or stdin) at a block-aligned offset.
    Write(WriteArgs),

    /// Read bytes at a block-aligned offset to a file (or stdout).
    Read(ReadArgs),

    /// Hot-remove a member image.
    FailDisk(DiskArgs),

    /// Put a fresh, zeroed image in place of a member.
    ReplaceDisk(DiskArgs),

    /// Print member images, units and cache lines.
    Status,

    /// Write random data, fail a member, and verify the data reads back.
    Selftest(SelftestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ArrayArgs {
    #[arg(long, env = "RAIDXOR_DISK_DIR", default_value = "./disks")]
    pub disk_dir: PathBuf,

    /// Number of member images (units).
    #[arg(long, env = "RAIDXOR_DISKS", default_value_t = 4)]
    pub disks: usize,

    #[arg(long, env = "RAIDXOR_DISK_LEN", default_value_t = DEFAULT_DISK_LEN)]
    pub disk_len: u64,

    #[arg(long, env = "RAIDXOR_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    #[arg(long, env = "RAIDXOR_BLOCKS_PER_CHUNK", default_value_t = DEFAULT_BLOCKS_PER_CHUNK)]
    pub blocks_per_chunk: usize,

    /// Redundant unit and its encoding, e.g. `3=0^1^2`. Without any, the last
    /// disk holds the parity of all others.
    #[arg(long = "encoding", value_name = "UNIT=EQ")]
    pub encodings: Vec<String>,

    /// Shared temporary, e.g. `t0=0^1`.
    #[arg(long = "temp", value_name = "tN=EQ")]
    pub temps: Vec<String>,

    /// Decoding for a data unit, e.g. `1=3^0^2`.
    #[arg(long = "decoding", value_name = "UNIT=EQ")]
    pub decodings: Vec<String>,

    #[arg(long, env = "RAIDXOR_LINES", default_value_t = DEFAULT_LINES)]
    pub lines: usize,

    #[arg(long, env = "RAIDXOR_MAX_BUFFER_BYTES")]
    pub max_buffer_bytes: Option<usize>,

    /// Derive missing decodings from the encodings.
    #[arg(long, env = "RAIDXOR_DERIVE_DECODINGS")]
    pub derive_decodings: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    #[arg(long)]
    pub offset: u64,

    /// Input file; stdin when omitted. A partial last block keeps the array bytes after it.
    #[arg(long)]
    pub input: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    #[arg(long)]
    pub offset: u64,

    #[arg(long)]
    pub len: usize,

    /// Output file; stdout when omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DiskArgs {
    pub index: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SelftestArgs {
    /// Strips of random data to write.
    #[arg(long, default_value_t = 4)]
    pub strips: usize,

    /// Member to fail after writing.
    #[arg(long, default_value_t = 0)]
    pub fail: usize,
}
