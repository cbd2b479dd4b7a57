//! Command-line tests against the built binary.

mod commands_test;
mod worker_test;

use std::process::{Command, Output};

/// Run the binary with `args`, outside any configuration directory.
pub fn run_binary(args: &[&str]) -> Output {
    let workdir = tempfile::tempdir().expect("temp dir");
    Command::new(env!("CARGO_BIN_EXE_frame-supervisor"))
        .args(args)
        .current_dir(workdir.path())
        .env("XDG_CONFIG_HOME", workdir.path())
        .env("HOME", workdir.path())
        .output()
        .expect("Failed to execute binary")
}
