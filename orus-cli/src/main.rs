use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use orus_playground::config::DEFAULT_ARTIFACT_DIR;
use orus_playground::files::DEFAULT_LANGUAGE;
use orus_playground::{Playground, PlaygroundConfig, RunOutcome, Snapshot};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// Headless front end for the playground store: opens files as tabs,
/// runs the active one and prints the transcript.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source files to open as tabs. The last one is run.
    files: Vec<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        default_value = DEFAULT_ARTIFACT_DIR,
        help = "Directory containing orus-runtime.json and orus-runtime.wasm"
    )]
    artifact_dir: PathBuf,

    #[arg(
        long,
        value_name = "DIR",
        help = "Persist open tabs here (in-memory only when omitted)"
    )]
    storage_dir: Option<PathBuf>,

    #[arg(long, value_name = "MS", default_value_t = 1000)]
    save_delay_ms: u64,

    #[arg(long, help = "Print the final playground snapshot as JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    execute(cli).await
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = PlaygroundConfig {
        artifact_dir: cli.artifact_dir,
        storage_dir: cli.storage_dir,
        save_delay: Duration::from_millis(cli.save_delay_ms),
        ..PlaygroundConfig::default()
    };
    let playground = Playground::open(&config);

    for path in &cli.files {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        let (name, language) = tab_name_and_language(path);
        let id = playground.add_file(&name, &language);
        playground.update_content(&id, &source);
    }

    playground.initialize_runtime().await;
    let outcome = playground.run().await;

    if let Err(err) = playground.flush() {
        warn!("could not save open files: {err}");
    }
    if let Err(err) = playground.executor().teardown().await {
        warn!("runtime teardown failed: {err}");
    }

    let snapshot = playground.snapshot();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_transcript(&snapshot);
    }

    Ok(match outcome {
        RunOutcome::Succeeded => ExitCode::SUCCESS,
        RunOutcome::Rejected | RunOutcome::Failed => ExitCode::FAILURE,
    })
}

/// ファイル名をタブ名に、拡張子を言語名に使う。
fn tab_name_and_language(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let language = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    (name, language)
}

fn print_transcript(snapshot: &Snapshot) {
    for line in &snapshot.output {
        println!("[{}] {}", line.severity, line.content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use orus_playground::testing::TestArtifact;
    use predicates::prelude::*;
    use tempfile::{TempDir, tempdir};

    fn workspace() -> (TempDir, PathBuf) {
        let dir = tempdir().expect("tempdir");
        let artifact_dir = dir.path().join("runtime");
        TestArtifact::new()
            .write_to(&artifact_dir)
            .expect("write artifact");
        (dir, artifact_dir)
    }

    fn source_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("write input");
        path
    }

    #[test]
    fn names_tabs_after_files() {
        assert_eq!(
            tab_name_and_language(Path::new("src/demo.orus")),
            ("demo.orus".to_string(), "orus".to_string())
        );
        assert_eq!(
            tab_name_and_language(Path::new("README")),
            ("README".to_string(), DEFAULT_LANGUAGE.to_string())
        );
    }

    #[test]
    fn runs_file_and_prints_each_output_line() {
        let (dir, artifact_dir) = workspace();
        let input = source_file(&dir, "prog.orus", "5\n10\n");

        Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg(&input)
            .arg("--artifact-dir")
            .arg(&artifact_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("[success] Orus runtime ready."))
            .stdout(predicate::str::contains("[success] Program finished in"))
            .stdout(predicate::str::contains("[normal] 5\n[normal] 10"));
    }

    #[test]
    fn reports_runtime_errors_and_fails() {
        let (dir, artifact_dir) = workspace();
        let input = source_file(&dir, "bad.orus", "!Error: divide by zero");

        Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg(&input)
            .arg("--artifact-dir")
            .arg(&artifact_dir)
            .assert()
            .failure()
            .stdout(predicate::str::contains("[error] Error: divide by zero"));
    }

    #[test]
    fn reports_missing_runtime_artifact() {
        let dir = tempdir().expect("tempdir");
        let input = source_file(&dir, "prog.orus", "1");

        Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg(&input)
            .arg("--artifact-dir")
            .arg(dir.path().join("missing"))
            .assert()
            .failure()
            .stdout(predicate::str::contains("[error] Failed to load Orus runtime"))
            .stdout(predicate::str::contains("[warning] Runtime is not ready yet."));
    }

    #[test]
    fn reports_unreadable_input() {
        let (dir, artifact_dir) = workspace();

        Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg(dir.path().join("nope.orus"))
            .arg("--artifact-dir")
            .arg(&artifact_dir)
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to read input file"));
    }

    #[test]
    fn persists_open_tabs_to_storage_dir() {
        let (dir, artifact_dir) = workspace();
        let input = source_file(&dir, "kept.orus", "print(1)");
        let storage_dir = dir.path().join("state");

        Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg(&input)
            .arg("--artifact-dir")
            .arg(&artifact_dir)
            .arg("--storage-dir")
            .arg(&storage_dir)
            .assert()
            .success();

        let saved = fs::read_to_string(storage_dir.join("orus-playground-files.json"))
            .expect("saved tabs");
        assert!(saved.contains("kept.orus"));
        assert!(saved.contains("print(1)"));

        // A second invocation with no files runs the restored active tab.
        Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg("--artifact-dir")
            .arg(&artifact_dir)
            .arg("--storage-dir")
            .arg(&storage_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("[normal] print(1)"));
    }

    #[test]
    fn prints_snapshot_as_json() {
        let (dir, artifact_dir) = workspace();
        let input = source_file(&dir, "prog.orus", "42");

        let output = Command::cargo_bin("orus-cli")
            .expect("binary exists")
            .arg(&input)
            .arg("--artifact-dir")
            .arg(&artifact_dir)
            .arg("--json")
            .output()
            .expect("run");
        assert!(output.status.success());

        let snapshot: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("json snapshot");
        assert_eq!(snapshot["runtime_ready"], true);
        assert_eq!(snapshot["running"], false);
        assert_eq!(snapshot["files"].as_array().map(Vec::len), Some(2));
    }
}
