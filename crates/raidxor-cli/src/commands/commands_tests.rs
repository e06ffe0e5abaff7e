use clap::Parser;
use tempfile::TempDir;

use super::*;
use crate::cli::Cli;

fn parse(dir: &TempDir, extra: &[&str], command: &[&str]) -> Cli {
    let disk_dir = dir.path().to_string_lossy().into_owned();
    let mut argv = vec![
        "raidxor",
        "--disk-dir",
        disk_dir.as_str(),
        "--disk-len",
        "65536",
        "--block-size",
        "512",
        "--blocks-per-chunk",
        "2",
    ];
    argv.extend_from_slice(extra);
    argv.extend_from_slice(command);
    Cli::try_parse_from(argv).expect("parse")
}

fn exec(dir: &TempDir, extra: &[&str], command: &[&str]) -> Result<()> {
    let cli = parse(dir, extra, command);
    run(&cli.command, &cli.array)
}

#[test]
fn init_creates_a_trusted_array() {
    let dir = TempDir::new().expect("tmp dir");
    exec(&dir, &[], &["init"]).expect("init");
    for i in 0..4 {
        assert!(dir.path().join(format!("disk-{i}.img")).exists());
    }
    let cli = parse(&dir, &[], &["status"]);
    let array = open_array(&cli.array, &cli.array.disk_dir).expect("open");
    assert!(array.needs_rebuild().is_empty());
}

#[test]
fn file_roundtrip_survives_failed_disk() {
    let dir = TempDir::new().expect("tmp dir");
    exec(&dir, &[], &["init"]).expect("init");

    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&input, &payload).expect("seed input");
    let input_arg = input.to_string_lossy().into_owned();
    let output_arg = output.to_string_lossy().into_owned();

    exec(&dir, &[], &["write", "--offset", "1024", "--input", input_arg.as_str()]).expect("write");
    exec(&dir, &[], &["fail-disk", "1"]).expect("fail disk");
    exec(&dir, &[], &["read", "--offset", "1024", "--len", "5000", "--output", output_arg.as_str()])
        .expect("read");
    assert_eq!(std::fs::read(&output).expect("output"), payload);
}

#[test]
fn short_write_keeps_the_rest_of_its_block() {
    let dir = TempDir::new().expect("tmp dir");
    exec(&dir, &[], &["init"]).expect("init");

    let block = dir.path().join("block.bin");
    let patch = dir.path().join("patch.bin");
    let output = dir.path().join("out.bin");
    let pattern: Vec<u8> = (0..512u32).map(|i| (i % 199) as u8 + 1).collect();
    std::fs::write(&block, &pattern).expect("seed block");
    std::fs::write(&patch, b"xyz").expect("seed patch");
    let block_arg = block.to_string_lossy().into_owned();
    let patch_arg = patch.to_string_lossy().into_owned();
    let output_arg = output.to_string_lossy().into_owned();

    exec(&dir, &[], &["write", "--offset", "0", "--input", block_arg.as_str()]).expect("write block");
    exec(&dir, &[], &["write", "--offset", "0", "--input", patch_arg.as_str()]).expect("write patch");
    exec(&dir, &[], &["read", "--offset", "0", "--len", "512", "--output", output_arg.as_str()])
        .expect("read");

    let mut expected = b"xyz".to_vec();
    expected.extend_from_slice(&pattern[3..]);
    assert_eq!(std::fs::read(&output).expect("output"), expected);
}

#[test]
fn replaced_disk_is_reported_for_rebuild() {
    let dir = TempDir::new().expect("tmp dir");
    exec(&dir, &[], &["init"]).expect("init");
    exec(&dir, &[], &["fail-disk", "3"]).expect("fail");
    exec(&dir, &[], &["replace-disk", "3"]).expect("replace");

    let cli = parse(&dir, &[], &["status"]);
    let array = open_array(&cli.array, &cli.array.disk_dir).expect("open");
    assert_eq!(array.needs_rebuild(), vec![3]);
    exec(&dir, &[], &["status"]).expect("status with a faulty parity unit");
}

#[test]
fn selftest_verifies_and_cleans_up() {
    let dir = TempDir::new().expect("tmp dir");
    let cli = parse(&dir, &[], &["selftest", "--strips", "3", "--fail", "2"]);
    let Command::Selftest(s) = &cli.command else {
        panic!("expected selftest");
    };
    let digest = selftest(&cli.array, s).expect("selftest");
    assert_eq!(digest.len(), 64);
    assert!(!dir.path().join("selftest").exists());
}

#[test]
fn selftest_with_derived_decodings() {
    let dir = TempDir::new().expect("tmp dir");
    let layout = ["--disks", "5", "--encoding", "3=0^1^2", "--encoding", "4=0^1", "--derive-decodings"];
    exec(&dir, &layout, &["selftest", "--strips", "2", "--fail", "0"]).expect("selftest");
}

#[test]
fn out_of_range_disk_is_an_error() {
    let dir = TempDir::new().expect("tmp dir");
    exec(&dir, &[], &["init"]).expect("init");
    assert!(exec(&dir, &[], &["fail-disk", "7"]).is_err());
    assert!(exec(&dir, &[], &["selftest", "--fail", "7"]).is_err());
}
