#![forbid(unsafe_code)]

use e2s_harness::ImageBuilder;
use std::path::Path;
use std::process::{Command, Output};

fn e2s(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_e2s"))
        .args(args)
        .env_remove("E2S_LOG")
        .output()
        .expect("run e2s")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8(output.stdout.clone())
        .expect("utf8 stdout")
        .lines()
        .map(str::to_owned)
        .collect()
}

fn write_image(dir: &Path, builder: &ImageBuilder) -> String {
    let path = dir.join("fs.img");
    builder.build().expect("build").write_to(&path).expect("write");
    path.to_string_lossy().into_owned()
}

#[test]
fn dumps_a_fresh_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(dir.path(), &ImageBuilder::new());

    let output = e2s(&[&image]);
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stderr.is_empty(), "stderr: {:?}", output.stderr);

    let lines = stdout_lines(&output);
    assert_eq!(lines[0], "SUPERBLOCK,1024,128,1024,128,8192,128,11");
    assert_eq!(lines[1], "GROUP,0,1024,128,1001,117,3,4,5");
    assert!(lines.iter().any(|l| l.starts_with("INODE,2,d,755,")));
    let dirents: Vec<&String> = lines.iter().filter(|l| l.starts_with("DIRENT,2,")).collect();
    assert_eq!(dirents.len(), 3);
    assert!(dirents[2].ends_with(",'lost+found'"));
}

#[test]
fn output_is_identical_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(
        dir.path(),
        &ImageBuilder::new().add_file("data", 100).add_dir("d", 10),
    );
    let first = e2s(&[&image]);
    let second = e2s(&[&image]);
    assert_eq!(first.status.code(), Some(0));
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn json_mode_emits_one_object_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(dir.path(), &ImageBuilder::new());

    let csv = stdout_lines(&e2s(&[&image]));
    let output = e2s(&["--json", &image]);
    assert_eq!(output.status.code(), Some(0));
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), csv.len());

    let first: serde_json::Value = serde_json::from_str(&lines[0]).expect("json line");
    assert_eq!(first["record"], "superblock");
    assert_eq!(first["block_size"], 1024);
    for line in &lines {
        let value: serde_json::Value = serde_json::from_str(line).expect("json line");
        assert!(value["record"].is_string());
    }
}

#[test]
fn stop_at_first_zero_flag_reaches_the_walker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(dir.path(), &ImageBuilder::new().add_sparse_file("s", &[12, 13, 20]));

    let skip = stdout_lines(&e2s(&[&image]));
    let stop = stdout_lines(&e2s(&["--stop-at-first-zero", &image]));
    let count = |lines: &[String]| lines.iter().filter(|l| l.starts_with("INDIRECT,12,")).count();
    assert_eq!(count(&skip), 3);
    assert_eq!(count(&stop), 2);
}

#[test]
fn legacy_remainder_flag_reaches_the_group_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(
        dir.path(),
        &ImageBuilder::new()
            .blocks_count(2048)
            .blocks_per_group(1024)
            .inodes_per_group(64),
    );
    let lines = stdout_lines(&e2s(&["--legacy-group-remainder", &image]));
    assert!(lines.iter().any(|l| l.starts_with("GROUP,1,0,0,")));
    let lines = stdout_lines(&e2s(&[&image]));
    assert!(lines.iter().any(|l| l.starts_with("GROUP,1,1024,64,")));
}

#[test]
fn bad_magic_exits_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("zeros.img");
    std::fs::write(&path, vec![0_u8; 64 * 1024]).expect("write");

    let output = e2s(&[path.to_str().expect("utf8 path")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("corrupted file system."), "{stderr}");
}

#[test]
fn usage_and_io_errors_exit_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.img");
    let missing = missing.to_str().expect("utf8 path");

    assert_eq!(e2s(&[]).status.code(), Some(1));
    assert_eq!(e2s(&["a.img", "b.img"]).status.code(), Some(1));
    assert_eq!(e2s(&["--bogus", "a.img"]).status.code(), Some(1));

    let output = e2s(&[missing]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());

    // Too short to hold a superblock.
    let short = dir.path().join("short.img");
    std::fs::write(&short, [0_u8; 100]).expect("write");
    assert_eq!(e2s(&[short.to_str().expect("utf8 path")]).status.code(), Some(1));
}

#[test]
fn help_goes_to_stdout() {
    let output = e2s(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("--stop-at-first-zero"));
    assert!(output.stderr.is_empty());

    let output = e2s(&["a.img", "b.img", "--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("USAGE:"));
}

#[test]
fn log_filter_writes_to_stderr_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(dir.path(), &ImageBuilder::new());

    let quiet = e2s(&[&image]);
    let output = Command::new(env!("CARGO_BIN_EXE_e2s"))
        .arg(&image)
        .env("E2S_LOG", "debug")
        .output()
        .expect("run e2s");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, quiet.stdout);
    assert!(String::from_utf8_lossy(&output.stderr).contains("decoded superblock"));
}
