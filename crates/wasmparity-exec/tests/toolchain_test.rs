//! Native and wasm toolchains driven through fake compiler/runtime scripts.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wasmparity_exec::{BuildMirror, ExitIndicator, NativeToolchain, WasmToolchain};

fn write_script(path: &Path, body: &str) -> PathBuf {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
    path.to_path_buf()
}

/// "Compiler" that copies the source to the `-o` target and marks it executable.
fn fake_cc(dir: &Path) -> PathBuf {
    write_script(
        &dir.join("fake-cc"),
        r#"grep -q COMPILE_ERROR "$1" && { echo "error: bad source" >&2; exit 1; }
cp "$1" "$3" && chmod +x "$3""#,
    )
}

/// Wasm front-end writing `<stem>.wasm` beside the source.
fn fake_wasm_compile(dir: &Path) -> PathBuf {
    write_script(
        &dir.join("lind_compile"),
        r#"grep -q COMPILE_ERROR "$1" && { echo "wasm-ld: undefined symbol" >&2; exit 1; }
cp "$1" "${1%.c}.wasm""#,
    )
}

/// Runtime wrapper: echoes its invocation, then runs the artifact.
fn fake_wasm_run(dir: &Path) -> PathBuf {
    write_script(&dir.join("lind_run"), r#"echo "lind_run $1"
exec sh "$1""#)
}

#[test]
fn native_compile_and_run_capture_output_and_exit() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("hello.c"), "echo 42\nexit 3");
    let toolchain = NativeToolchain::new(fake_cc(dir.path()).display().to_string());

    let compiled = toolchain.compile(&source);
    assert!(compiled.ok(), "{}", compiled.output);
    let binary = compiled.artifact.unwrap();
    assert_eq!(binary, dir.path().join("hello.native"));

    let run = toolchain.run(&binary, dir.path(), Duration::from_secs(10));
    assert_eq!(run.exit, ExitIndicator::Code(3));
    assert_eq!(run.output, "42\n");
}

#[test]
fn native_compile_failure_carries_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("broken.c"), "# COMPILE_ERROR");
    let toolchain = NativeToolchain::new(fake_cc(dir.path()).display().to_string());
    let compiled = toolchain.compile(&source);
    assert!(!compiled.ok());
    assert!(compiled.output.contains("error: bad source"));
}

#[test]
fn native_run_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("spin.c"), "sleep 30");
    let toolchain = NativeToolchain::new(fake_cc(dir.path()).display().to_string());
    let binary = toolchain.compile(&source).artifact.unwrap();

    let run = toolchain.run(&binary, dir.path(), Duration::from_secs(1));
    assert_eq!(run.exit, ExitIndicator::Timeout);
    assert_eq!(run.output, "Timed Out (timeout: 1s)");
    assert!(run.elapsed < Duration::from_secs(10));
}

#[test]
fn native_segfault_reports_139() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("crash.c"), "kill -SEGV $$");
    let toolchain = NativeToolchain::new(fake_cc(dir.path()).display().to_string());
    let binary = toolchain.compile(&source).artifact.unwrap();
    let run = toolchain.run(&binary, dir.path(), Duration::from_secs(10));
    assert_eq!(run.exit, ExitIndicator::Code(139));
    assert!(run.exit.is_segfault());
}

#[test]
fn wasm_run_strips_the_wrapper_echo() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("hello.c"), "echo 42");
    let toolchain = WasmToolchain::new(fake_wasm_compile(dir.path()), fake_wasm_run(dir.path()));

    let compiled = toolchain.compile(&source);
    assert!(compiled.ok(), "{}", compiled.output);
    let artifact = compiled.artifact.unwrap();
    assert_eq!(artifact, dir.path().join("hello.wasm"));

    let run = toolchain.run(&artifact, dir.path(), Duration::from_secs(10));
    assert_eq!(run.exit, ExitIndicator::Code(0));
    assert_eq!(run.output, "42");
}

#[test]
fn wasm_compile_error_includes_both_streams() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("broken.c"), "# COMPILE_ERROR");
    let toolchain = WasmToolchain::new(fake_wasm_compile(dir.path()), fake_wasm_run(dir.path()));
    let compiled = toolchain.compile(&source);
    assert!(!compiled.ok());
    assert!(compiled.output.contains("wasm-ld: undefined symbol"));
}

#[test]
fn wasm_compile_without_artifact_names_expected_path() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("ghost.c"), "echo hi");
    let silent = write_script(&dir.path().join("silent_compile"), "exit 0");
    let toolchain = WasmToolchain::new(silent, fake_wasm_run(dir.path()));
    let compiled = toolchain.compile(&source);
    assert!(!compiled.ok());
    assert!(compiled.output.contains("expected wasm output was not found"));
    assert!(compiled.output.contains("ghost.wasm"));
}

#[test]
fn wasm_artifact_found_under_build_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let stage = dir.path().join("stage");
    let build = dir.path().join("build");
    fs::create_dir_all(stage.join("t/deterministic")).unwrap();
    let source = write_script(&stage.join("t/deterministic/m.c"), "echo mirrored");
    let mirror_compile = write_script(
        &dir.path().join("mirror_compile"),
        &format!(
            r#"rel="${{1#{stage}/}}"
mkdir -p "{build}/$(dirname "$rel")"
cp "$1" "{build}/${{rel%.c}}.wasm""#,
            stage = stage.display(),
            build = build.display()
        ),
    );
    let toolchain = WasmToolchain::new(mirror_compile, fake_wasm_run(dir.path())).with_build_mirror(
        BuildMirror {
            source_root: stage.clone(),
            build_root: build.clone(),
        },
    );

    let compiled = toolchain.compile(&source);
    assert!(compiled.ok(), "{}", compiled.output);
    assert_eq!(
        compiled.artifact.as_deref(),
        Some(build.join("t/deterministic/m.wasm").as_path())
    );
    let run = toolchain.run(&compiled.artifact.unwrap(), dir.path(), Duration::from_secs(10));
    assert_eq!(run.output, "mirrored");
}

#[test]
fn wasm_run_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("spin.c"), "sleep 30");
    let toolchain = WasmToolchain::new(fake_wasm_compile(dir.path()), fake_wasm_run(dir.path()));
    let artifact = toolchain.compile(&source).artifact.unwrap();
    let run = toolchain.run(&artifact, dir.path(), Duration::from_secs(1));
    assert_eq!(run.exit, ExitIndicator::Timeout);
}

#[test]
fn runs_use_the_requested_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let fs_root = dir.path().join("fsroot");
    fs::create_dir_all(fs_root.join("testfiles")).unwrap();
    fs::write(fs_root.join("testfiles/data.txt"), "payload\n").unwrap();
    let source = write_script(&dir.path().join("reader.c"), "cat testfiles/data.txt");

    let native = NativeToolchain::new(fake_cc(dir.path()).display().to_string());
    let binary = native.compile(&source).artifact.unwrap();
    assert_eq!(
        native.run(&binary, &fs_root, Duration::from_secs(10)).output,
        "payload\n"
    );

    let wasm = WasmToolchain::new(fake_wasm_compile(dir.path()), fake_wasm_run(dir.path()));
    let artifact = wasm.compile(&source).artifact.unwrap();
    assert_eq!(wasm.run(&artifact, &fs_root, Duration::from_secs(10)).output, "payload");
}

#[test]
fn hung_compilers_are_killed_at_the_compile_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_script(&dir.path().join("hello.c"), "echo 42");
    let stuck = write_script(&dir.path().join("stuck-cc"), "echo starting\nexec sleep 30");

    let native = NativeToolchain::new(stuck.display().to_string())
        .with_compile_timeout(Duration::from_secs(1));
    let compiled = native.compile(&source);
    assert!(!compiled.ok());
    assert!(compiled.artifact.is_none());
    assert!(
        compiled.output.starts_with("Compilation Timed Out (timeout: 1s)"),
        "{}",
        compiled.output
    );
    assert!(compiled.output.contains("starting"));
    assert!(compiled.elapsed < Duration::from_secs(10));

    let wasm = WasmToolchain::new(&stuck, fake_wasm_run(dir.path()))
        .with_compile_timeout(Duration::from_secs(1));
    let compiled = wasm.compile(&source);
    assert!(!compiled.ok());
    assert!(compiled.output.starts_with("Compilation Timed Out"), "{}", compiled.output);
    assert!(compiled.elapsed < Duration::from_secs(10));
}
