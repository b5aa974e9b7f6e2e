//! CLI entrypoint for the native-vs-wasm differential test run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use wasmparity_harness::config::{
    DEFAULT_BASE_DIR, DEFAULT_COMPILE_TIMEOUT_SECS, DEFAULT_COMPILER, DEFAULT_SKIP_LIST,
    DEFAULT_TIMEOUT_SECS, absolutize, parse_timeout,
};
use wasmparity_harness::discovery::{self, TestFilter};
use wasmparity_harness::staging::ArtifactStager;
use wasmparity_harness::structured_log::ArtifactIndex;
use wasmparity_harness::{ExternalToolchain, RunConfig, RunLog, RunReport, TestRunner};

/// Compile each C test natively and to wasm, run both, and report parity.
#[derive(Debug, Parser)]
#[command(name = "wasmtestreport")]
#[command(about = "Differential native-vs-wasm test oracle for C test suites")]
struct Cli {
    /// Repository root holding tests/ and scripts/.
    #[arg(long, env = "LIND_WASM_BASE", default_value = DEFAULT_BASE_DIR)]
    base: PathBuf,
    /// Filesystem root presented to wasm programs (default: <base>/src/RawPOSIX/tmp).
    #[arg(long, env = "LIND_FS_ROOT")]
    fs_root: Option<PathBuf>,
    /// Native C compiler.
    #[arg(long, env = "CC", default_value = DEFAULT_COMPILER)]
    cc: String,
    /// Wasm compile command (default: <base>/scripts/lind_compile).
    #[arg(long, env = "LIND_WASM_COMPILE")]
    wasm_compile: Option<PathBuf>,
    /// Wasm runtime wrapper (default: <base>/scripts/lind_run).
    #[arg(long, env = "LIND_WASM_RUN")]
    wasm_run: Option<PathBuf>,
    /// Only run tests under these folders (relative to the suite root).
    #[arg(long = "run", num_args = 1..)]
    run_folders: Vec<PathBuf>,
    /// Skip tests under these folders (relative to the suite root).
    #[arg(long = "skip", num_args = 1..)]
    skip_folders: Vec<PathBuf>,
    /// File listing individual tests to skip.
    #[arg(long, default_value = DEFAULT_SKIP_LIST)]
    skip_list: PathBuf,
    /// Per-run deadline in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = parse_timeout)]
    timeout: u64,
    /// Per-compile deadline in seconds.
    #[arg(long, default_value_t = DEFAULT_COMPILE_TIMEOUT_SECS, value_parser = parse_timeout)]
    compile_timeout: u64,
    /// Run exactly these test files instead of discovering.
    #[arg(long, num_args = 1..)]
    testfiles: Vec<PathBuf>,
    /// Staging and build directory (default: <base>/target/wasmparity).
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,
    /// Leave staged sources and build outputs in place.
    #[arg(long)]
    keep_artifacts: bool,
    /// Results file name; written as JSON.
    #[arg(long, default_value = "results")]
    output: PathBuf,
    /// HTML report file name.
    #[arg(long, default_value = "report")]
    report: PathBuf,
    /// Also write the HTML report.
    #[arg(long)]
    generate_html: bool,
    /// Also write a markdown summary to this path.
    #[arg(long)]
    markdown: Option<PathBuf>,
    /// Write the structured JSONL run log to this path.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Stage all fixtures into the fs root and exit.
    #[arg(long)]
    pre_test_only: bool,
    /// Remove staged fixtures and exit.
    #[arg(long)]
    clean_testfiles: bool,
    /// Remove result files and staged fixtures, then exit.
    #[arg(long)]
    clean_results: bool,
    /// Exit non-zero when any test fails.
    #[arg(long)]
    fail_on_failure: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    let config = RunConfig::builder(absolutize(&cli.base, &cwd))
        .fs_root(cli.fs_root.as_deref().map(|p| absolutize(p, &cwd)))
        .artifacts_dir(cli.artifacts_dir.as_deref().map(|p| absolutize(p, &cwd)))
        .wasm_compile(cli.wasm_compile.as_deref().map(|p| absolutize(p, &cwd)))
        .wasm_run(cli.wasm_run.as_deref().map(|p| absolutize(p, &cwd)))
        .native_compiler(cli.cc.clone())
        .timeout_secs(cli.timeout)
        .compile_timeout_secs(cli.compile_timeout)
        .keep_artifacts(cli.keep_artifacts)
        .build()?;
    let stager = ArtifactStager::new(&config);

    let results_path = absolutize(&cli.output, &cwd).with_extension("json");
    let html_path = absolutize(&cli.report, &cwd).with_extension("html");

    if cli.clean_results {
        for path in [&results_path, &html_path] {
            if path.exists() {
                std::fs::remove_file(path)?;
                eprintln!("Removed {}", path.display());
            }
        }
        stager.clean_fixtures()?;
        eprintln!("Removed {}", stager.fixtures_dest().display());
        return Ok(());
    }
    if cli.clean_testfiles {
        if stager.clean_fixtures()? {
            eprintln!("Removed {}", stager.fixtures_dest().display());
        } else {
            eprintln!("Nothing to remove at {}", stager.fixtures_dest().display());
        }
        return Ok(());
    }
    if cli.pre_test_only {
        let count = stager.stage_all_fixtures()?;
        eprintln!(
            "Staged {count} fixture(s) from {} into {}",
            config.fixtures_source.display(),
            stager.fixtures_dest().display()
        );
        return Ok(());
    }

    let tests = if cli.testfiles.is_empty() {
        let skip_list = discovery::load_skip_list(&absolutize(&cli.skip_list, &cwd))?;
        let filter = TestFilter::new(
            &config.suite_root,
            &cli.run_folders,
            &cli.skip_folders,
            skip_list,
        );
        filter.apply(discovery::discover(&config.suite_root)?)
    } else {
        discovery::explicit_tests(&cli.testfiles, &cwd)?
    };
    if tests.is_empty() {
        eprintln!("No tests to run.");
        return Ok(());
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&interrupt))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&interrupt))?;

    let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let mut log = match &cli.log {
        Some(path) => RunLog::to_file(&absolutize(path, &cwd), "wasmparity", &run_id)?,
        None => RunLog::disabled(),
    };

    let toolchain = ExternalToolchain::from_config(&config);

    eprintln!(
        "Running {} test(s) with a {}s timeout",
        tests.len(),
        config.timeout.as_secs()
    );
    let runner = TestRunner::new(&config, &toolchain)?;
    let results = runner.run(&tests, &mut log, &interrupt)?.seal();
    log.flush()?;
    if log.dropped() > 0 {
        eprintln!("Warning: {} run log line(s) could not be written", log.dropped());
    }

    let mut index = ArtifactIndex::new(&run_id);
    write_artifact(&results_path, &results.to_json()?)?;
    index.add_file(&results_path, "results_json")?;
    eprintln!("Results written to {}", results_path.display());

    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let report = RunReport::new("Wasm Test Report", timestamp, &results);
    if cli.generate_html {
        write_artifact(&html_path, &report.to_html())?;
        index.add_file(&html_path, "report_html")?;
        eprintln!("HTML report written to {}", html_path.display());
    }
    if let Some(path) = &cli.markdown {
        let path = absolutize(path, &cwd);
        write_artifact(&path, &report.to_markdown())?;
        index.add_file(&path, "report_markdown")?;
    }
    if let Some(path) = &cli.log {
        index.add_file(&absolutize(path, &cwd), "run_log")?;
    }
    let index_path = results_path
        .parent()
        .unwrap_or(Path::new("."))
        .join("artifact_index.json");
    write_artifact(&index_path, &index.to_json()?)?;

    eprintln!(
        "Total: {}  Passed: {}  Failed: {}",
        results.total(),
        results.success_count(),
        results.failure_count()
    );

    if cli.fail_on_failure && results.failure_count() > 0 {
        return Err(format!("{} test(s) failed", results.failure_count()).into());
    }
    Ok(())
}

fn write_artifact(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
