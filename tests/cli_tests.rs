use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const BINARY_NAME: &str = "ctpl-embed";

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--bin", BINARY_NAME, "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn create_temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes()).expect("Failed to write to temp file");
    file
}

#[test]
fn test_no_args_prints_usage() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("USAGE:"));
}

#[test]
fn test_single_file_embeds_as_c_string() {
    let file = create_temp_file("hello\n");
    let path = file.path().to_str().unwrap();
    let output = run_cli(&[path]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("const char "));
    assert!(stdout.contains("hello\\n"));
}

#[test]
fn test_name_override_controls_identifier() {
    let file = create_temp_file("x");
    let path = file.path().to_str().unwrap();
    let arg = format!("{path}=MY_FILE");
    let output = run_cli(&[&arg]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("const char MY_FILE[]"));
}

#[test]
fn test_missing_file_fails_with_diagnostic() {
    let output = run_cli(&["/nonexistent/path/does-not-exist.txt"]);
    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}
