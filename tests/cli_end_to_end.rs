use std::{
    fs,
    process::{Command as StdCommand, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

fn mdtools() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mdtools"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn render_reads_stdin_and_writes_fragment() {
    mdtools()
        .args(["render", "-"])
        .write_stdin("# Hello\n\n- a\n- b\n")
        .assert()
        .success()
        .stdout(contains("<h1>Hello</h1>"))
        .stdout(contains("<li>a</li>"));
}

#[test]
fn worker_echoes_request_ids() {
    let assert = mdtools()
        .arg("worker")
        .write_stdin("{\"content\":\"**bold**\",\"id\":\"req-7\"}\nnot json\n")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(stdout.contains("\"id\":\"req-7\""));
    assert!(stdout.contains("<strong>bold</strong>"));
    assert!(stdout.contains("\"error\":\"invalid request"));
}

#[test]
fn bind_merges_files_in_order() {
    let dir = TempDir::new().expect("temp dir");
    let first = dir.path().join("a.md");
    let second = dir.path().join("b.md");
    fs::write(&first, "# A").expect("write a");
    fs::write(&second, "# B").expect("write b");

    mdtools()
        .arg("bind")
        .arg(&second)
        .arg(&first)
        .arg("--out-dir")
        .arg(dir.path())
        .assert()
        .success();

    let merged: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("binding_"))
        .collect();
    assert_eq!(merged.len(), 1);
    let content = fs::read_to_string(merged[0].path()).expect("read merged");
    assert_eq!(content, "# B\n\n---\n\n# A");
}

#[test]
fn bind_rejects_non_markdown_files() {
    let dir = TempDir::new().expect("temp dir");
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, "plain").expect("write notes");

    mdtools()
        .arg("bind")
        .arg(&notes)
        .arg("--out-dir")
        .arg(dir.path())
        .assert()
        .code(2);
}

#[test]
fn export_standalone_writes_html_page() {
    let source_dir = TempDir::new().expect("temp dir");
    let out_dir = TempDir::new().expect("temp dir");
    let input = source_dir.path().join("report.md");
    fs::write(&input, "# Report\n\n```rust\nfn main() {}\n```\n").expect("write input");

    mdtools()
        .args(["export", "--format", "standalone", "--theme", "dark"])
        .arg(&input)
        .arg("--out-dir")
        .arg(out_dir.path())
        .assert()
        .success();

    let page = fs::read_to_string(out_dir.path().join("report.html")).expect("exported page");
    assert!(page.starts_with("<!DOCTYPE html>"));
    assert!(page.contains("<title>report</title>"));
    assert!(page.contains("data-theme=\"dark\""));
    assert!(page.contains("<h1>Report</h1>"));
}

#[test]
fn unknown_export_format_is_a_usage_error() {
    let dir = TempDir::new().expect("temp dir");
    let input = dir.path().join("a.md");
    fs::write(&input, "x").expect("write input");

    mdtools()
        .args(["export", "--format", "pdf"])
        .arg(&input)
        .assert()
        .code(2);
}

#[test]
fn invalid_configuration_is_a_usage_error() {
    mdtools()
        .args(["render", "--theme", "sepia", "-"])
        .write_stdin("# x")
        .assert()
        .code(2)
        .stderr(contains("render.theme"));
}

#[test]
fn watch_waits_for_a_missing_input_to_appear() {
    let dir = TempDir::new().expect("temp dir");
    let input = dir.path().join("draft.md");
    let output = dir.path().join("preview.html");

    let mut child = StdCommand::new(assert_cmd::cargo::cargo_bin!("mdtools"))
        .arg("watch")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .args(["--poll-ms", "20", "--debounce-ms", "0", "--no-diagrams"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn watch");

    thread::sleep(Duration::from_millis(300));
    assert!(
        child.try_wait().expect("poll child").is_none(),
        "watch exited while the input was missing"
    );

    fs::write(&input, "# Saved").expect("write input");
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut preview = String::new();
    while Instant::now() < deadline {
        preview = fs::read_to_string(&output).unwrap_or_default();
        if preview.contains("<h1>Saved</h1>") {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    child.kill().expect("stop watch");
    let _ = child.wait();
    assert!(preview.contains("<h1>Saved</h1>"));
}
