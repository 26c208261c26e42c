//! Shared helper for the CLI-level tests (`cli_test.rs`, `property_test.rs`):
//! write a script to a temp file and run the `emberc` binary against it,
//! capturing real stdout/stderr. Needed because `OP_PRINT` and runtime-error
//! reporting write straight to the process's actual streams (§4.G, §6), so
//! observing them from inside the same test process isn't an option — this
//! is the same `assert_cmd` + temp-file approach the wider codebase's
//! compiler-driver crates use for their own CLI tests.

use std::io::Write;

use assert_cmd::Command;
use tempfile::NamedTempFile;

pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

pub fn run_script(source: &str) -> RunResult {
    let mut file = NamedTempFile::new().expect("create temp script file");
    file.write_all(source.as_bytes()).expect("write temp script file");

    let output = Command::cargo_bin("emberc")
        .expect("locate emberc binary")
        .arg(file.path())
        .output()
        .expect("run emberc");

    RunResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    }
}
