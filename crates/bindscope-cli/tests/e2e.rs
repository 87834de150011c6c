//! End-to-end tests for bindscope CLI commands.
//!
//! Tests that need a worker look for `bindscope-worker` next to the CLI
//! binary and are skipped when the workspace has not built it.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A temporary project with `src/` as both source root and classpath.
struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join("src")).expect("Failed to create src");
        fs::create_dir_all(temp_dir.path().join(".bindscope")).expect("Failed to create .bindscope");
        fs::write(
            temp_dir.path().join(".bindscope/project.json"),
            r#"{"source_roots": ["src"], "classpath": ["src"]}"#,
        )
        .expect("Failed to write config");
        Self { temp_dir }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn arg(&self) -> &str {
        self.path().to_str().unwrap()
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.path().join("src").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).expect("Failed to write source file");
    }

    /// A project with one working and one broken context.
    fn shop() -> Self {
        let project = Self::new();
        project.write(
            "com/acme/WorkingModule.module.json",
            r#"{"source": "com/acme/WorkingModule.java", "bindings": [
                {"key": "Service", "annotation": "blue", "to": "BlueService", "line": 12}
            ]}"#,
        );
        project.write(
            "com/acme/ThrowingModule.module.json",
            r#"{"constructor_error": "database unavailable"}"#,
        );
        project.write(
            "working.context.json",
            r#"{"name": "Working", "modules": ["com.acme.WorkingModule"]}"#,
        );
        project.write(
            "broken.context.json",
            r#"{"name": "Broken", "modules": ["com.acme.ThrowingModule"]}"#,
        );
        project
    }
}

fn bindscope() -> Command {
    Command::cargo_bin("bindscope").expect("Failed to find bindscope binary")
}

/// The worker built alongside the CLI, if any.
fn worker() -> Option<PathBuf> {
    let cli = assert_cmd::cargo::cargo_bin("bindscope");
    let name = if cfg!(windows) {
        "bindscope-worker.exe"
    } else {
        "bindscope-worker"
    };
    let worker = cli.parent()?.join(name);
    worker.exists().then_some(worker)
}

// =============================================================================
// bindscope init Tests
// =============================================================================

#[test]
fn test_init_writes_config() {
    let temp = TempDir::new().unwrap();

    bindscope()
        .args(["init", temp.path().to_str().unwrap(), "--classpath", "build/classes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"))
        .stdout(predicate::str::contains("does not exist yet"));

    let text = fs::read_to_string(temp.path().join(".bindscope/project.json")).unwrap();
    let config: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(config["classpath"][0], "build/classes");
    assert_eq!(config["source_roots"][0], "src");
}

#[test]
fn test_init_refuses_to_overwrite() {
    let project = TestProject::new();

    bindscope()
        .args(["init", project.arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    bindscope().args(["init", project.arg(), "--force"]).assert().success();
}

#[test]
fn test_init_missing_root() {
    bindscope()
        .args(["init", "/nonexistent/project"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// =============================================================================
// bindscope modules / contexts Tests
// =============================================================================

#[test]
fn test_modules_lists_discovered() {
    let project = TestProject::shop();

    bindscope()
        .args(["modules", project.arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("com.acme.WorkingModule"))
        .stdout(predicate::str::contains("com.acme.ThrowingModule"))
        .stdout(predicate::str::contains("unknown"));
}

#[test]
fn test_modules_empty_project() {
    let project = TestProject::new();

    bindscope()
        .args(["modules", project.arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules found"));
}

#[test]
fn test_contexts_lists_members() {
    let project = TestProject::shop();

    bindscope()
        .args(["contexts", project.arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Working"))
        .stdout(predicate::str::contains("Broken"))
        .stdout(predicate::str::contains("dirty"))
        .stdout(predicate::str::contains("  com.acme.ThrowingModule"));
}

#[test]
fn test_bad_config_shows_hint() {
    let project = TestProject::new();
    fs::write(project.path().join(".bindscope/project.json"), "{ not json").unwrap();

    bindscope()
        .args(["contexts", project.arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hint:"));
}

// =============================================================================
// bindscope resolve / locate Tests
// =============================================================================

#[test]
fn test_resolve_reports_bindings_and_failures() {
    let Some(worker) = worker() else { return };
    let project = TestProject::shop();

    bindscope()
        .args(["resolve", project.arg(), "--worker", worker.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "Service@blue -> BlueService (com/acme/WorkingModule.java:12)",
        ))
        .stdout(predicate::str::contains("database unavailable"))
        .stderr(predicate::str::contains("1 context(s) failed"));
}

#[test]
fn test_resolve_single_context() {
    let Some(worker) = worker() else { return };
    let project = TestProject::shop();

    bindscope()
        .args([
            "resolve",
            project.arg(),
            "--context",
            "Working",
            "--key",
            "Service@blue",
            "--key",
            "Missing",
            "--worker",
            worker.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("BlueService"))
        .stdout(predicate::str::contains("Missing -> <no binding>"))
        .stdout(predicate::str::contains("database unavailable").not());
}

#[test]
fn test_resolve_unknown_context() {
    let Some(worker) = worker() else { return };
    let project = TestProject::new();

    bindscope()
        .args([
            "resolve",
            project.arg(),
            "--context",
            "Nope",
            "--worker",
            worker.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("module context not found: Nope"));
}

#[test]
fn test_locate_key() {
    let Some(worker) = worker() else { return };
    let project = TestProject::shop();

    bindscope()
        .args([
            "locate",
            "Working",
            "Service@blue",
            "--project",
            project.arg(),
            "--worker",
            worker.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Service@blue -> BlueService"));

    bindscope()
        .args([
            "locate",
            "Working",
            "Clock",
            "--project",
            project.arg(),
            "--worker",
            worker.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Clock -> <no binding>"));
}

#[test]
fn test_missing_worker_is_launch_failure() {
    let project = TestProject::shop();

    bindscope()
        .args([
            "resolve",
            project.arg(),
            "--worker",
            "/nonexistent/bindscope-worker",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed to spawn worker process"));
}
