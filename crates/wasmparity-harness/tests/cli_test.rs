//! `wasmtestreport` end to end, with shell scripts as toolchains.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use wasmparity_harness::structured_log::validate_log_file;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn write_executable(path: &Path, body: &str) {
    write(path, &format!("#!/bin/sh\n{body}\n"));
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

struct Checkout {
    _dir: tempfile::TempDir,
    base: PathBuf,
}

impl Checkout {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(dir.path()).unwrap();
        let scripts = base.join("scripts");
        write_executable(&scripts.join("lind_compile"), r#"cp "$1" "${1%.c}.wasm""#);
        write_executable(
            &scripts.join("lind_run"),
            r#"echo "lind_run $1"
exec sh "$1""#,
        );
        write_executable(
            &base.join("bin/cc"),
            r#"{ echo '#!/bin/sh'; cat "$1"; } > "$3"; chmod +x "$3""#,
        );
        fs::create_dir_all(base.join("src/RawPOSIX/tmp")).unwrap();

        let suite = base.join("tests/unit-tests");
        write(&base.join("tests/testfiles/data.txt"), "payload\n");
        write(&suite.join("io/deterministic/ok.c"), "echo ok\n");
        write(&suite.join("io/deterministic/expected/ok.output"), "ok\n");
        write(&suite.join("io/deterministic/off.c"), "echo off\n");
        write(&suite.join("io/deterministic/expected/off.output"), "on\n");
        write(&suite.join("slow/deterministic/skipped.c"), "echo never\n");
        Self { _dir: dir, base }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_wasmtestreport"));
        cmd.current_dir(&self.base)
            .arg("--base")
            .arg(&self.base)
            .arg("--cc")
            .arg(self.base.join("bin/cc"))
            .env_remove("LIND_FS_ROOT")
            .env_remove("LIND_WASM_COMPILE")
            .env_remove("LIND_WASM_RUN");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("wasmtestreport should execute")
    }

    fn fixtures_dest(&self) -> PathBuf {
        self.base.join("src/RawPOSIX/tmp/testfiles")
    }
}

#[test]
fn full_run_writes_results_report_and_index() {
    let checkout = Checkout::new();
    let output = checkout.run(&[
        "--skip",
        "slow",
        "--generate-html",
        "--markdown",
        "summary.md",
        "--log",
        "run.jsonl",
    ]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    assert!(stderr.contains("[1/2] io/deterministic/off.c"), "{stderr}");
    assert!(stderr.contains("FAILURE: GCC and Wasm Output mismatch"));

    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(checkout.base.join("results.json")).unwrap())
            .unwrap();
    assert_eq!(results["deterministic"]["total_test_cases"], 2);
    assert_eq!(results["deterministic"]["number_of_success"], 1);
    assert_eq!(results["deterministic"]["number_of_Output_mismatch"], 1);
    assert_eq!(results["fail"]["total_test_cases"], 0);

    let html = fs::read_to_string(checkout.base.join("report.html")).unwrap();
    assert!(html.contains("Output_mismatch") || html.contains("GCC and Wasm Output mismatch"));
    assert!(checkout.base.join("summary.md").is_file());

    let (lines, errors) = validate_log_file(&checkout.base.join("run.jsonl")).unwrap();
    assert!(lines > 0);
    assert!(errors.is_empty(), "{errors:?}");

    let index: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(checkout.base.join("artifact_index.json")).unwrap(),
    )
    .unwrap();
    let indexed = index.to_string();
    assert!(indexed.contains("results.json"));
    assert!(indexed.contains("report.html"));
    assert!(indexed.contains("run.jsonl"));

    assert!(!checkout.fixtures_dest().exists());
}

#[test]
fn fail_on_failure_sets_exit_status() {
    let checkout = Checkout::new();
    let output = checkout.run(&["--run", "io", "--fail-on-failure"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 test(s) failed"));
}

#[test]
fn explicit_testfiles_bypass_discovery() {
    let checkout = Checkout::new();
    let output = checkout.run(&[
        "--testfiles",
        "tests/unit-tests/slow/deterministic/skipped.c",
        "--output",
        "one",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(checkout.base.join("one.json")).unwrap()).unwrap();
    assert_eq!(results["deterministic"]["total_test_cases"], 1);
    assert_eq!(results["deterministic"]["number_of_Failure_native_compiling"], 0);
}

#[test]
fn skip_list_file_excludes_tests() {
    let checkout = Checkout::new();
    write(
        &checkout.base.join("skip_test_cases.txt"),
        "# flaky\nio/deterministic/off.c\n",
    );
    let output = checkout.run(&["--skip", "slow", "--fail-on-failure"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(checkout.base.join("results.json")).unwrap())
            .unwrap();
    assert_eq!(results["deterministic"]["total_test_cases"], 1);
}

#[test]
fn maintenance_modes_stage_and_clean_fixtures() {
    let checkout = Checkout::new();

    assert!(checkout.run(&["--pre-test-only"]).status.success());
    assert_eq!(
        fs::read_to_string(checkout.fixtures_dest().join("data.txt")).unwrap(),
        "payload\n"
    );
    assert!(checkout.fixtures_dest().join("readlinkfile").exists());
    assert!(!checkout.base.join("results.json").exists());

    assert!(checkout.run(&["--clean-testfiles"]).status.success());
    assert!(!checkout.fixtures_dest().exists());

    write(&checkout.base.join("results.json"), "{}");
    write(&checkout.base.join("report.html"), "<html></html>");
    assert!(checkout.run(&["--clean-results"]).status.success());
    assert!(!checkout.base.join("results.json").exists());
    assert!(!checkout.base.join("report.html").exists());
}

#[test]
fn zero_timeout_is_rejected() {
    let checkout = Checkout::new();
    let output = checkout.run(&["--timeout", "0"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("greater than zero"));
}
