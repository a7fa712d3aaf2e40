//! End-to-end scenarios against the real launcher binary, with a
//! shell-script standing in for the configurator.
//!
//! Each test stages a private directory tree: the launcher binary copied in
//! as `app`, and a `jaunch/` sibling directory holding an executable
//! `jaunch` script. The script consumes the framed stdin protocol (and can
//! record the received argument vector) before printing a canned directive
//! stream.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

fn stage(directives: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let launcher = dir.path().join("app");
    fs::copy(assert_cmd::cargo::cargo_bin("jaunch"), &launcher).unwrap();
    fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755)).unwrap();

    let config_dir = dir.path().join("jaunch");
    fs::create_dir(&config_dir).unwrap();
    write_configurator(&config_dir.join("jaunch"), directives);

    (dir, launcher)
}

fn write_configurator(path: &Path, directives: &str) {
    let script = format!(
        "#!/bin/sh\n\
         IFS= read -r n\n\
         i=0\n\
         while [ \"$i\" -lt \"$n\" ]; do\n\
         \tIFS= read -r line\n\
         \tif [ -n \"$JAUNCH_ARGS_FILE\" ]; then printf '%s\\n' \"$line\" >> \"$JAUNCH_ARGS_FILE\"; fi\n\
         \ti=$((i + 1))\n\
         done\n\
         cat <<'JAUNCH_EOF'\n\
         {directives}\n\
         JAUNCH_EOF\n"
    );
    fs::write(path, script).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn abort_exits_zero_without_loading_anything() {
    let (_dir, launcher) = stage("ABORT");
    let status = Command::new(&launcher).arg("--headless").status().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn setcwd_then_abort_exits_zero() {
    let (_dir, launcher) = stage("SETCWD\n1\n/tmp\nABORT");
    let status = Command::new(&launcher).arg("--headless").status().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn error_directive_becomes_the_exit_code() {
    let (_dir, launcher) = stage("ERROR\n3\n42\nFoo\nBar");
    let output = Command::new(&launcher).arg("--headless").output().unwrap();
    assert_eq!(output.status.code(), Some(42));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Foo"), "stderr was: {stderr}");
    assert!(stderr.contains("Bar"), "stderr was: {stderr}");
}

#[test]
fn error_directive_code_is_clamped_to_twenty() {
    let (_dir, launcher) = stage("ERROR\n2\n1\nOops");
    let status = Command::new(&launcher).arg("--headless").status().unwrap();
    assert_eq!(status.code(), Some(20));
}

#[test]
fn unknown_directive_exits_with_its_code() {
    let (_dir, launcher) = stage("BADNAME\n0");
    let output = Command::new(&launcher).arg("--headless").output().unwrap();
    assert_eq!(output.status.code(), Some(16));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Unknown directive: BADNAME"),
        "stderr was: {stderr}"
    );
}

#[test]
fn argv_reaches_the_configurator_framed_and_intact() {
    let (dir, launcher) = stage("ABORT");
    let args_file = dir.path().join("received-args");

    let status = Command::new(&launcher)
        .args(["--headless", "with spaces", "--flag=value"])
        .env("JAUNCH_ARGS_FILE", &args_file)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let received = fs::read_to_string(&args_file).unwrap();
    let received: Vec<&str> = received.lines().collect();
    assert_eq!(received.len(), 5);
    assert_eq!(received[0], launcher.to_str().unwrap());
    assert!(received[1].starts_with("--jaunch-target-arch="));
    assert_eq!(&received[2..], ["--headless", "with spaces", "--flag=value"]);
}

#[test]
fn missing_configurator_is_a_command_path_error() {
    let (dir, launcher) = stage("ABORT");
    fs::remove_dir_all(dir.path().join("jaunch")).unwrap();

    let status = Command::new(&launcher).arg("--headless").status().unwrap();
    assert_eq!(status.code(), Some(13));
}
