#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::{Command, Output};

use hifc::frame::{build_message, Envelope, TraceWriter, AUDIO, RTC};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "hifc-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn hifc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hifc"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("HIFC_BUS")
        .env_remove("HIFC_CONFIG")
        .output()
        .expect("hifc should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect()
}

#[test]
fn version_prints_package_version() {
    let output = hifc(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("hifc {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_reports_protocol_limits() {
    let output = hifc(&["--format", "json", "version", "--extended"]);
    assert!(output.status.success());
    let info = &json_lines(&output)[0];
    assert_eq!(info["name"], "hifc");
    assert_eq!(info["protocol"]["max_chunk"], 256);
    assert_eq!(info["protocol"]["max_message"], 65536);
    assert_eq!(info["protocol"]["streams"], 22);
}

#[test]
fn classify_reports_formats_as_json() {
    let output = hifc(&["--format", "json", "classify", "0x00", "0x09", "0xc3", "0xff"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let rows = json_lines(&output);
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["format"], "FixedRead0");
    assert_eq!(rows[1]["format"], "FixedRead1");
    assert_eq!(rows[2]["format"], "VariableReadWrite3");
    assert_eq!(rows[2]["header_len"], 4);
    assert_eq!(rows[3]["supported"], false);
}

#[test]
fn classify_without_opcodes_covers_every_byte() {
    let output = hifc(&["--format", "json", "classify", "--supported-only"]);
    assert!(output.status.success());
    let rows = json_lines(&output);
    assert!(rows.iter().all(|row| row["supported"] == true));
    // 0x46..=0x4F, 0x76..=0x7F and 0xF6..=0xFF are unassigned.
    assert_eq!(rows.len(), 256 - 10 - 10 - 10);
}

#[test]
fn trace_decodes_capture_file() {
    let dir = unique_temp_dir("trace");
    let path = dir.join("capture.bin");
    {
        let file = std::fs::File::create(&path).expect("capture should be creatable");
        let mut writer = TraceWriter::new(file);
        let message = build_message(RTC, 0x0003, 0, b"tick").unwrap().freeze();
        writer
            .write_envelope(&Envelope::message(RTC, message))
            .unwrap();
        writer
            .write_envelope(&Envelope::message(AUDIO, &b"pcm"[..]))
            .unwrap();
        let mut samples = vec![0u8; 12];
        samples.extend_from_slice(&[0x2A, 0, 0, 0, 0, 0, 0]);
        writer
            .write_envelope(&Envelope::stream(2, samples))
            .unwrap();
    }

    let path_arg = path.to_str().expect("temp path should be UTF-8");
    let output = hifc(&["--format", "json", "trace", path_arg]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let rows = json_lines(&output);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["kind"], "message");
    assert_eq!(rows[0]["api"], 3);
    assert_eq!(rows[2]["kind"], "stream");
    assert_eq!(rows[2]["stream"], 2);
    assert_eq!(rows[2]["sample_bytes"], 12);
    assert_eq!(rows[2]["sample_timestamp"], 0x2A);

    let filtered = hifc(&[
        "--format",
        "json",
        "trace",
        path_arg,
        "--handlers",
        "0x0e",
        "--summary",
    ]);
    let rows = json_lines(&filtered);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["handler"], AUDIO);
    assert_eq!(rows[0]["payload_bytes"], 3);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn truncated_capture_fails() {
    let dir = unique_temp_dir("truncated");
    let path = dir.join("capture.bin");
    // Head promises 16 payload bytes that never arrive.
    std::fs::write(&path, [1u8, 0, 0, 0, 16, 0, RTC, 0, 1, 2]).unwrap();

    let output = hifc(&["trace", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("trace decode failed"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_capture_file_fails() {
    let output = hifc(&["trace", "/nonexistent/hifc-capture.bin"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_bus_is_a_usage_error() {
    let output = hifc(&["send", "--data", "x"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--bus"));
}

#[cfg(target_os = "linux")]
#[test]
fn send_to_missing_device_is_transport_error() {
    let output = hifc(&["send", "--bus", "i2c:/nonexistent/i2c-9@0x24", "--data", "x"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("open failed"));
}

#[test]
fn doctor_fails_on_unusable_bus() {
    let output = Command::new(env!("CARGO_BIN_EXE_hifc"))
        .args(["--format", "json", "doctor"])
        .env("HIFC_BUS", "i2c:/nonexistent/i2c-9@0x24")
        .env_remove("HIFC_CONFIG")
        .output()
        .expect("hifc should run");
    assert_eq!(output.status.code(), Some(30));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor output should be JSON");
    assert_eq!(report["overall"], "fail");
    let checks = report["checks"].as_array().unwrap();
    assert!(checks
        .iter()
        .any(|c| c["name"] == "device_access" && c["status"] == "fail"));
}
