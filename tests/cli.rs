use std::process::Command;

use tempfile::TempDir;

const PHARAOH: &str = env!("CARGO_BIN_EXE_pharaoh");

#[test]
fn run_help_documents_exit_status() {
    let output = Command::new(PHARAOH).args(["run", "--help"]).output().unwrap();
    assert!(output.status.success());

    let help = String::from_utf8(output.stdout).unwrap();
    assert!(help.contains("EXIT STATUS"));
    assert!(help.contains("78 (configuration)"));
    assert!(help.contains("may exit with the same codes"));
}

#[test]
fn missing_app_reports_config_error() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(PHARAOH)
        .arg("--app-dir")
        .arg(dir.path())
        .args(["info", "org.example.Missing"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(78));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.starts_with("pharaoh: "), "unexpected stderr: {stderr}");
}
