#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/motecli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

/// Runs `motelink emulate` for the life of the test.
struct EmulatorProcess {
    child: Child,
    dir: PathBuf,
}

impl EmulatorProcess {
    fn start(tag: &str, extra: &[&str]) -> Self {
        let dir = unique_temp_dir(tag);
        let child = Command::new(env!("CARGO_BIN_EXE_motelink"))
            .args(["--log-level", "error", "emulate"])
            .arg(&dir)
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("emulate command should start");
        wait_for_socket(&dir.join("control.sock"), Duration::from_secs(5));
        Self { child, dir }
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_motelink"));
        command.args(["--log-level", "error", "--format", "json"]);
        let (name, rest) = args.split_first().expect("subcommand required");
        command.arg(name).arg(&self.dir).args(rest);
        command.output().expect("command should run")
    }
}

impl Drop for EmulatorProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn status_reports_battery_and_leds() {
    let emulator = EmulatorProcess::start("status", &["--battery", "0x40"]);

    let output = emulator.run(&["status"]);
    assert!(output.status.success(), "status failed: {output:?}");
    let json: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).expect("status should print JSON");
    assert_eq!(json["battery"], 64);
    assert_eq!(json["leds"], 0);
    assert_eq!(json["extension_present"], false);
}

#[test]
fn write_then_read_eeprom() {
    let emulator = EmulatorProcess::start("memory", &[]);

    let output = emulator.run(&["write", "--offset", "0x0100", "--data", "de:ad:be:ef"]);
    assert!(output.status.success(), "write failed: {output:?}");
    assert!(stdout(&output).contains("\"written\":4"));

    let output = emulator.run(&["read", "--offset", "0x0100", "--len", "4"]);
    assert!(output.status.success(), "read failed: {output:?}");
    let json: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).expect("read should print JSON");
    assert_eq!(json["data"], "deadbeef");
    assert_eq!(json["len"], 4);
}

#[test]
fn rejected_read_exits_with_device_error() {
    let emulator = EmulatorProcess::start("nack", &[]);

    let output = emulator.run(&["read", "--offset", "0x1800", "--len", "8"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error code 8"));
}

#[test]
fn detect_names_the_extension() {
    let emulator = EmulatorProcess::start("detect", &["--extension", "nunchuk"]);

    let output = emulator.run(&["detect"]);
    assert!(output.status.success(), "detect failed: {output:?}");
    let json: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).expect("detect should print JSON");
    assert_eq!(json["extension"], "nunchuk");
    assert_eq!(json["motionplus"], false);
}

#[test]
fn monitor_stops_after_count() {
    let emulator = EmulatorProcess::start("monitor", &[]);

    let output = emulator.run(&["monitor", "--mode", "btn", "--count", "1"]);
    assert!(output.status.success(), "monitor failed: {output:?}");
    let text = stdout(&output);
    let line = text.lines().next().expect("one batch should print");
    let json: serde_json::Value = serde_json::from_str(line).expect("batch should be JSON");
    assert_eq!(json["events"][0]["type"], "buttons");
    assert!(json["timestamp"].as_f64().is_some());
}

#[test]
fn missing_device_times_out_with_124() {
    let dir = unique_temp_dir("missing");

    let output = Command::new(env!("CARGO_BIN_EXE_motelink"))
        .args(["--log-level", "error", "status"])
        .arg(&dir)
        .args(["--timeout", "200ms"])
        .output()
        .expect("status should run");

    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_motelink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        format!("motelink {}", env!("CARGO_PKG_VERSION"))
    );
}
