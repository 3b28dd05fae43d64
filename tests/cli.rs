//! Exit codes and side effects of the `debforge` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn debforge(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_debforge"))
        .args(args)
        .current_dir(cwd)
        .env_remove("SOURCE_DATE_EPOCH")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn staged_root(tmp: &TempDir) -> String {
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("usr/bin")).unwrap();
    fs::write(root.join("usr/bin/demo"), "#!/bin/sh\n").unwrap();
    root.to_string_lossy().into_owned()
}

fn build_args<'a>(root: &'a str, output: &'a str, work: &'a str) -> Vec<&'a str> {
    vec![
        "build", "--root", root, "--name", "demo", "--version", "1.0.0", "--output", output,
        "--work-dir", work,
    ]
}

#[test]
fn help_exits_zero() {
    let tmp = TempDir::new().unwrap();
    let out = debforge(&["--help"], tmp.path());
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("QUICK START"));
}

#[test]
fn missing_arguments_exit_one() {
    let tmp = TempDir::new().unwrap();
    let out = debforge(&["build", "--name", "demo"], tmp.path());
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn build_writes_package_then_refuses_overwrite() {
    let tmp = TempDir::new().unwrap();
    let root = staged_root(&tmp);
    let output = tmp.path().join("demo.deb").to_string_lossy().into_owned();
    let work = tmp.path().join("work").to_string_lossy().into_owned();

    let first = debforge(&build_args(&root, &output, &work), tmp.path());
    assert_eq!(first.status.code(), Some(0), "{}", String::from_utf8_lossy(&first.stderr));
    let bytes = fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"!<arch>\n"));

    let second = debforge(&build_args(&root, &output, &work), tmp.path());
    assert_eq!(second.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));
    assert_eq!(fs::read(&output).unwrap(), bytes);

    let mut forced = build_args(&root, &output, &work);
    forced.push("--force");
    assert_eq!(debforge(&forced, tmp.path()).status.code(), Some(0));
}

#[test]
fn invalid_name_exits_one() {
    let tmp = TempDir::new().unwrap();
    let root = staged_root(&tmp);
    let output = tmp.path().join("bad.deb").to_string_lossy().into_owned();
    let work = tmp.path().join("work").to_string_lossy().into_owned();

    let mut args = build_args(&root, &output, &work);
    args[4] = "Not A Name";
    let out = debforge(&args, tmp.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(!Path::new(&output).exists());
}

#[test]
fn clean_without_project_file_succeeds() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().to_string_lossy().into_owned();
    let out = debforge(&["clean", &dir], tmp.path());
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn package_without_project_file_exits_two() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().to_string_lossy().into_owned();
    let out = debforge(&["package", &dir], tmp.path());
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("debforge init"));
}
