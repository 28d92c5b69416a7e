#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn debforge(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_debforge"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn exec_passes_the_command_exit_status_through() {
    let tmp = tempfile::tempdir().unwrap();
    let out = debforge(tmp.path(), &["exec", "--", "sh", "-c", "echo passthrough; exit 7"]);
    assert_eq!(out.status.code(), Some(7));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "passthrough\n");

    let out = debforge(tmp.path(), &["exec", "--", "true"]);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn exec_of_a_missing_program_fails_at_setup() {
    let tmp = tempfile::tempdir().unwrap();
    let out = debforge(tmp.path(), &["exec", "--", "debforge-no-such-program"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("stage=setup kind=Io"), "{}", stderr(&out));
}

#[test]
fn missing_capability_exits_with_its_own_code() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("debforge.toml");
    fs::write(
        &config,
        r#"
[environment]
installer = []

[[environment.capabilities]]
name = "dpkg-deb"
probe = ["sh", "-c", "exit 1"]
"#,
    )
    .unwrap();

    let out = debforge(tmp.path(), &["--config", config.to_str().unwrap(), "run"]);
    let err = stderr(&out);
    assert_eq!(out.status.code(), Some(10), "{err}");
    assert!(err.contains("error: stage=provision kind=MissingCapability"), "{err}");
    assert!(err.contains("dpkg-deb"), "{err}");
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn unreadable_build_definition_is_a_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let out = debforge(tmp.path(), &["--config", "missing.toml", "plan"]);
    let err = stderr(&out);
    assert_eq!(out.status.code(), Some(2), "{err}");
    assert!(err.contains("error: stage=setup kind=Config"), "{err}");
}

#[test]
fn plan_lists_the_five_phases_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let out = debforge(tmp.path(), &["plan"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let phases: Vec<&str> = stdout
        .lines()
        .filter_map(|l| l.split_whitespace().nth(1))
        .collect();
    assert_eq!(phases, ["clean", "configure", "build", "install", "package"]);
}
