//! CLI smoke tests for hammer.
//!
//! These tests verify that the commands run end to end against temporary
//! spec trees and return appropriate exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the hammer binary.
fn hammer_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("hammer");
  cmd.env_remove("RUST_LOG");
  cmd
}

/// Create a temp search directory with one spec per `(dir, content)`.
fn temp_specs(specs: &[(&str, &str)]) -> TempDir {
  let temp = TempDir::new().unwrap();
  for (dir, content) in specs {
    let dir = temp.path().join("specs").join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("spec.yml"), content).unwrap();
  }
  temp
}

const HELLO: &str = r#"
name: hello
version: "1.0"
iteration: "1"
"#;

const BROKEN: &str = r#"
name: broken
version: "1.0"
iteration: "1"
scripts:
  build: exit 1
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  hammer_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  hammer_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("hammer"));
}

// =============================================================================
// Query
// =============================================================================

#[test]
fn query_renders_each_spec() {
  let temp = temp_specs(&[("hello", HELLO)]);

  hammer_cmd()
    .args(["query", "$${name}-$${version}-$${iteration}", "--search"])
    .arg(temp.path().join("specs"))
    .assert()
    .success()
    .stdout(predicate::str::contains("hello-1.0-1"));
}

#[test]
fn query_with_unknown_field_fails() {
  let temp = temp_specs(&[("hello", HELLO)]);

  hammer_cmd()
    .args(["query", "$${nope}", "--search"])
    .arg(temp.path().join("specs"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn cache_list_on_empty_cache() {
  let temp = TempDir::new().unwrap();

  hammer_cmd()
    .args(["cache", "list", "--cache"])
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("empty"));
}

#[test]
fn cache_list_json_shows_entries() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("http%3A%2F%2Fexample.com%2Fa.tgz"), "abc").unwrap();

  hammer_cmd()
    .args(["cache", "list", "-o", "json", "--cache"])
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"url\": \"http://example.com/a.tgz\""))
    .stdout(predicate::str::contains("\"size\": 3"));
}

#[test]
fn cache_clear_removes_entries() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("a"), "1").unwrap();
  std::fs::write(temp.path().join("b"), "2").unwrap();

  hammer_cmd()
    .args(["cache", "clear", "--cache"])
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed 2"));
  assert!(!temp.path().join("a").exists());
}

// =============================================================================
// Build
// =============================================================================

fn build_cmd(temp: &TempDir) -> Command {
  let mut cmd = hammer_cmd();
  cmd
    .arg("build")
    .arg("--search")
    .arg(temp.path().join("specs"))
    .arg("--output")
    .arg(temp.path().join("out"))
    .arg("--logs")
    .arg(temp.path().join("logs"))
    .arg("--cache")
    .arg(temp.path().join("cache"));
  cmd
}

#[test]
fn build_with_nothing_selected_succeeds() {
  let temp = temp_specs(&[("hello", HELLO)]);

  build_cmd(&temp)
    .arg("does-not-exist")
    .assert()
    .success()
    .stderr(predicate::str::contains("No packages to build"));
}

#[cfg(unix)]
#[test]
fn failing_build_script_exits_with_one() {
  let temp = temp_specs(&[("broken", BROKEN)]);

  build_cmd(&temp)
    .args(["--fpm", "true"])
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("broken"));
}

#[cfg(unix)]
#[test]
fn excluded_packages_are_not_built() {
  let temp = temp_specs(&[("broken", BROKEN), ("hello", HELLO)]);

  build_cmd(&temp)
    .args(["--fpm", "true", "--exclude", "broken"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Build complete!"));
}
