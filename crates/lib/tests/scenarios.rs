//! End-to-end scheduling of real specs through the package builder.
//!
//! Resources come from a local mock server, build scripts run in a real
//! shell, and packaging is replaced by a recorder that drops a marker file
//! into the output directory.

#![cfg(unix)]

use std::sync::{Arc, Mutex};

use hammer_lib::build::PackageBuilder;
use hammer_lib::cache::FsCache;
use hammer_lib::cancel::CancelToken;
use hammer_lib::config::BuildConfig;
use hammer_lib::fetch::{Fetcher, digest};
use hammer_lib::package::{PackageError, PackageOutput, PackageRequest, Packager};
use hammer_lib::schedule::schedule;
use hammer_lib::spec::{Forest, PackageSpec};
use tempfile::TempDir;

#[derive(Debug, Default)]
struct RecordingPackager {
  calls: Mutex<Vec<String>>,
}

impl Packager for RecordingPackager {
  async fn package(&self, request: PackageRequest<'_>) -> Result<PackageOutput, PackageError> {
    let artifact = format!("{}.{}", request.spec.name, request.package_type);
    std::fs::create_dir_all(request.output_dir)?;
    std::fs::write(request.output_dir.join(&artifact), "package")?;
    self.calls.lock().unwrap().push(artifact);
    Ok(PackageOutput {
      package_type: request.package_type.to_string(),
      output: String::new(),
    })
  }
}

fn builder(temp: &TempDir) -> Arc<PackageBuilder<FsCache, RecordingPackager>> {
  let config = BuildConfig {
    output_dir: temp.path().join("out"),
    log_dir: temp.path().join("logs"),
    cache_dir: temp.path().join("cache"),
    package_types: vec!["rpm".to_string()],
    ..Default::default()
  };
  let fetcher = Fetcher::new(FsCache::new(&config.cache_dir).unwrap());
  Arc::new(PackageBuilder::new(config, fetcher, RecordingPackager::default()))
}

fn forest(yamls: &[String]) -> Arc<Forest> {
  let mut forest = Forest::new();
  for yaml in yamls {
    forest.expand(&PackageSpec::from_yaml(yaml).unwrap(), None).unwrap();
  }
  Arc::new(forest)
}

#[tokio::test]
async fn single_spec_with_verified_resource_packages_once() {
  let body = b"#!/bin/sh\necho hello\n";
  let mut server = mockito::Server::new_async().await;
  let mock = server
    .mock("GET", "/hello-1.0.sh")
    .with_status(200)
    .with_body(body)
    .expect(1)
    .create_async()
    .await;

  let temp = TempDir::new().unwrap();
  let builder = builder(&temp);
  let yaml = format!(
    r#"
name: hello
version: "1.0"
iteration: "1"
resources:
  - url: {}/hello-$${{version}}.sh
    hash-type: sha1
    hash: {}
scripts:
  build: test -f "$BUILD_ROOT/hello-1.0.sh"
"#,
    server.url(),
    digest("sha1", body).unwrap()
  );
  let forest = forest(&[yaml]);

  let result = schedule(forest.clone(), forest.roots(), Arc::clone(&builder), 1, CancelToken::never()).await;

  assert!(result.is_success(), "{:?}", result.results);
  mock.assert_async().await;
  assert_eq!(*builder.packager().calls.lock().unwrap(), vec!["hello.rpm"]);
}

#[tokio::test]
async fn failing_root_does_not_stop_its_sibling() {
  let temp = TempDir::new().unwrap();
  let builder = builder(&temp);
  let forest = forest(&[
    "name: good\nversion: \"1\"\niteration: \"1\"\nscripts:\n  build: echo fine".to_string(),
    "name: bad\nversion: \"1\"\niteration: \"1\"\nscripts:\n  build: exit 1".to_string(),
  ]);

  let result = schedule(forest.clone(), forest.roots(), Arc::clone(&builder), 2, CancelToken::never()).await;

  assert!(!result.is_success());
  assert_eq!(result.built(), 1);
  assert_eq!(result.failed(), 1);
  assert!(temp.path().join("out/good.rpm").exists());
  assert!(!temp.path().join("out/bad.rpm").exists());
}

#[tokio::test]
async fn template_script_never_runs_but_children_build() {
  let temp = TempDir::new().unwrap();
  let builder = builder(&temp);
  let yaml = r#"
name: fam
version: "1"
iteration: "1"
scripts:
  build: touch "$OUTPUT_ROOT/template-ran"
multi:
  - name: fam-x86
    scripts:
      build: echo shared > artifact && test -f artifact
  - name: fam-arm
"#;
  let forest = forest(&[yaml.to_string()]);

  let result = schedule(forest.clone(), forest.roots(), Arc::clone(&builder), 1, CancelToken::never()).await;

  assert!(result.is_success(), "{:?}", result.results);
  assert_eq!(result.built(), 3);
  assert!(!temp.path().join("out/template-ran").exists());
  let mut calls = builder.packager().calls.lock().unwrap().clone();
  calls.sort();
  assert_eq!(calls, vec!["fam-arm.rpm", "fam-x86.rpm"]);
}
