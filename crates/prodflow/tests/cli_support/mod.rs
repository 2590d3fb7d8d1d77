#![allow(dead_code)]

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub fn prodflow_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_prodflow"))
}

/// Run the CLI with `home` as PRODFLOW_HOME.
pub fn run_cli(args: &[String], home: &Path) -> Output {
    Command::new(prodflow_bin())
        .args(args)
        .env("PRODFLOW_HOME", home)
        .env("RUST_LOG", "error")
        .env_remove("PRODFLOW_CONFIG")
        .env_remove("PRODFLOW_CATALOG")
        .output()
        .expect("failed to execute prodflow CLI")
}

pub fn assert_cli_success(output: &Output, args: &[String]) {
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn parse_json_output(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find(['{', '[']).unwrap_or_else(|| {
        panic!(
            "no JSON payload found in output\nstdout:\n{}\nstderr:\n{}",
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    });
    let mut deserializer = serde_json::Deserializer::from_str(&stdout[json_start..]);
    serde_json::Value::deserialize(&mut deserializer).unwrap_or_else(|err| {
        panic!("failed to parse JSON output: {}\nstdout:\n{}", err, stdout)
    })
}

pub fn run_cli_json<T: DeserializeOwned>(args: &[String], home: &Path) -> T {
    let output = run_cli(args, home);
    assert_cli_success(&output, args);
    serde_json::from_value(parse_json_output(&output)).expect("failed to deserialize JSON output")
}

pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
