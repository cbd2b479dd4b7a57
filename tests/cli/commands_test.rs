//! Tests for the `get`, `keys` and `run` commands.

use std::io::Write;

use frame_supervisor::config::ConfigFacade;

use super::run_binary;

#[test]
fn keys_lists_every_config_key() {
    let output = run_binary(&["keys"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), ConfigFacade::KEYS.len());
    assert!(lines.contains(&"max_queue_size = 4"));
    assert!(lines.contains(&"frame_format = bgr24"));
    assert!(lines.contains(&"scale_filter = bilinear"));
}

#[test]
fn get_applies_overrides() {
    let output = run_binary(&["get", "options", "--set", "options=rtsp_transport=tcp; stimeout=5"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "rtsp_transport=tcp;stimeout=5"
    );
}

#[test]
fn get_rejects_unknown_key() {
    let output = run_binary(&["get", "no_such_key"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no_such_key"));
}

#[test]
fn set_rejects_invalid_value() {
    let output = run_binary(&["get", "width", "--set", "width=wide"]);
    assert!(!output.status.success());
}

#[test]
fn set_requires_key_value_pair() {
    let output = run_binary(&["keys", "--set", "width"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("KEY=VALUE"));
}

#[test]
fn config_file_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "src = \"testsrc://solid\"\nmax_queue_size = 9").unwrap();
    let path = file.path().to_string_lossy().to_string();

    let output = run_binary(&["get", "max_queue_size", "--config", &path]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "9");
}

#[test]
fn missing_config_file_is_an_error() {
    let output = run_binary(&["keys", "--config", "/nonexistent/frame-supervisor.toml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn run_decodes_for_the_given_duration() {
    let output = run_binary(&[
        "run",
        "testsrc://bars?width=8&height=8&fps=50",
        "--duration",
        "1.5",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary = stdout.lines().last().expect("summary line");
    assert!(summary.starts_with("stopped frames="), "{summary}");
    assert!(summary.contains("exit_status=0"), "{summary}");
    assert!(summary.contains("forced_kill=false"), "{summary}");
    assert!(!summary.starts_with("stopped frames=0 "), "{summary}");
}
