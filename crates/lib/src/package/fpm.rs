use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use super::{LIFECYCLE_SCRIPTS, PackageError, PackageOutput, PackageRequest, Packager};
use crate::consts::BUILD_SCRIPT;
use crate::template::{SpecContext, render};

/// Packages through the external `fpm` tool.
#[derive(Debug, Clone)]
pub struct FpmPackager {
  program: String,
  log_level: String,
}

impl FpmPackager {
  pub fn new(program: impl Into<String>, log_level: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      log_level: log_level.into(),
    }
  }

  /// Builds the fpm command line, writing lifecycle scripts and templated
  /// targets to disk along the way.
  pub fn arguments(&self, req: &PackageRequest<'_>) -> Result<Vec<String>, PackageError> {
    let spec = req.spec;
    let ctx = SpecContext::new(spec).with_build_dirs(req.build_root, req.empty_dir);
    let mut args = Vec::new();

    let source = if spec.targets.is_empty() { "empty" } else { "dir" };
    args.extend(["-s".to_string(), source.to_string()]);
    args.extend(["-t".to_string(), req.package_type.to_string()]);
    args.extend(["-p".to_string(), req.output_dir.to_string_lossy().into_owned()]);
    if req.package_type == "rpm" {
      args.push("--rpm-auto-add-directories".to_string());
    }

    let fields: [(&'static str, &str, bool); 9] = [
      ("name", &spec.name, true),
      ("version", &spec.version, true),
      ("iteration", &spec.iteration, true),
      ("epoch", &spec.epoch, false),
      ("license", &spec.license, false),
      ("vendor", &spec.vendor, false),
      ("description", &spec.description, false),
      ("url", &spec.url, false),
      ("architecture", &spec.architecture, false),
    ];
    for (field, value, required) in fields {
      if value.is_empty() {
        if required {
          return Err(PackageError::MissingField { field });
        }
        continue;
      }
      args.push(format!("--{field}"));
      args.push(render(value, &ctx)?);
    }

    for depend in &spec.depends {
      args.push("--depends".to_string());
      args.push(render(depend, &ctx)?);
    }

    for obsolete in &spec.obsoletes {
      args.push("--replaces".to_string());
      args.push(render(obsolete, &ctx)?);
    }

    for (name, body) in &spec.scripts {
      if name == BUILD_SCRIPT {
        continue;
      }
      if !LIFECYCLE_SCRIPTS.contains(&name.as_str()) {
        return Err(PackageError::InvalidScriptName { name: name.clone() });
      }
      let location = req.script_root.join(name);
      write_executable(&location, &render(body, &ctx)?)?;
      debug!(script = %name, "wrote lifecycle script");
      args.push(format!("--{name}"));
      args.push(location.to_string_lossy().into_owned());
    }

    for target in spec.targets.iter().filter(|t| t.config) {
      args.push("--config-files".to_string());
      args.push(render(&target.dest, &ctx)?);
    }

    for attr in &spec.attrs {
      if attr.file.is_empty() {
        debug!("ignoring file attributes without a file");
        continue;
      }
      // "-" keeps fpm's default for that part
      let or_default = |part: &str| if part.is_empty() { "-".to_string() } else { part.to_string() };
      args.push("--rpm-attr".to_string());
      args.push(format!(
        "{},{},{}:{}",
        or_default(&attr.mode),
        or_default(&attr.user),
        or_default(&attr.group),
        attr.file
      ));
    }

    args.push("--log".to_string());
    args.push(self.log_level.clone());

    if !spec.extra_args.trim().is_empty() {
      let extra = shlex::split(&spec.extra_args).ok_or_else(|| PackageError::ExtraArgs {
        args: spec.extra_args.clone(),
      })?;
      args.extend(extra);
    }

    for target in &spec.targets {
      let src = render(&target.src, &ctx)?;
      let dest = render(&target.dest, &ctx)?;

      if target.template {
        let content = std::fs::read_to_string(&src)?;
        let file_name = Path::new(&src).file_name().map(|n| n.to_owned()).unwrap_or_default();
        let rendered = req.target_root.join(file_name);
        std::fs::write(&rendered, render(&content, &ctx)?)?;
        args.push(format!("{}={dest}", rendered.to_string_lossy()));
      } else {
        args.push(format!("{src}={dest}"));
      }
    }

    Ok(args)
  }
}

impl Packager for FpmPackager {
  async fn package(&self, request: PackageRequest<'_>) -> Result<PackageOutput, PackageError> {
    let args = self.arguments(&request)?;
    tokio::fs::create_dir_all(request.output_dir).await?;

    info!(package = %request.spec.name, package_type = %request.package_type, "packaging");
    debug!(program = %self.program, args = ?args, "running packager");

    let output = Command::new(&self.program)
      .args(&args)
      .current_dir(request.build_root)
      .output()
      .await
      .map_err(|source| PackageError::Spawn {
        program: self.program.clone(),
        source,
      })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
      return Err(PackageError::Failed {
        code: output.status.code(),
        output: combined,
      });
    }

    debug!(package = %request.spec.name, "packager exited");
    Ok(PackageOutput {
      package_type: request.package_type.to_string(),
      output: combined,
    })
  }
}

fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
  std::fs::write(path, content)?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::spec::{FileAttr, PackageSpec, Target};
  use tempfile::TempDir;

  struct Dirs {
    _temp: TempDir,
    build: std::path::PathBuf,
    scripts: std::path::PathBuf,
    targets: std::path::PathBuf,
    empty: std::path::PathBuf,
    out: std::path::PathBuf,
  }

  fn dirs() -> Dirs {
    let temp = TempDir::new().unwrap();
    let make = |name: &str| {
      let p = temp.path().join(name);
      std::fs::create_dir_all(&p).unwrap();
      p
    };
    Dirs {
      build: make("build"),
      scripts: make("scripts"),
      targets: make("targets"),
      empty: make("empty"),
      out: make("out"),
      _temp: temp,
    }
  }

  fn request<'a>(spec: &'a PackageSpec, d: &'a Dirs, package_type: &'a str) -> PackageRequest<'a> {
    PackageRequest {
      spec,
      package_type,
      build_root: &d.build,
      script_root: &d.scripts,
      target_root: &d.targets,
      empty_dir: &d.empty,
      output_dir: &d.out,
    }
  }

  fn consul() -> PackageSpec {
    let mut spec = PackageSpec {
      name: "consul".into(),
      version: "0.6.4".into(),
      iteration: "1".into(),
      architecture: "x86_64".into(),
      depends: vec!["glibc".into()],
      extra_args: "--rpm-os linux --description 'service discovery'".into(),
      targets: vec![Target {
        src: "$${build:consul}".into(),
        dest: "/usr/bin/consul".into(),
        ..Default::default()
      }],
      ..Default::default()
    };
    spec.scripts.insert("build".into(), "make".into());
    spec.scripts.insert("after-install".into(), "echo $${name}".into());
    spec
  }

  #[test]
  fn builds_full_argument_list() {
    let d = dirs();
    let spec = consul();
    let args = FpmPackager::new("fpm", "info").arguments(&request(&spec, &d, "rpm")).unwrap();

    let script = d.scripts.join("after-install");
    let out = d.out.to_string_lossy().into_owned();
    let script_path = script.to_string_lossy().into_owned();
    let target = format!("{}=/usr/bin/consul", d.build.join("consul").to_string_lossy());
    let expected = vec![
      "-s",
      "dir",
      "-t",
      "rpm",
      "-p",
      out.as_str(),
      "--rpm-auto-add-directories",
      "--name",
      "consul",
      "--version",
      "0.6.4",
      "--iteration",
      "1",
      "--architecture",
      "x86_64",
      "--depends",
      "glibc",
      "--after-install",
      script_path.as_str(),
      "--log",
      "info",
      "--rpm-os",
      "linux",
      "--description",
      "service discovery",
      target.as_str(),
    ];

    assert_eq!(args, expected);
    assert_eq!(std::fs::read_to_string(script).unwrap(), "echo consul");
  }

  #[test]
  fn obsoletes_and_file_attrs_become_flags() {
    let d = dirs();
    let mut spec = consul();
    spec.obsoletes = vec!["$${name}-legacy".into()];
    spec.attrs = vec![
      FileAttr {
        file: "/etc/consul.json".into(),
        mode: "0640".into(),
        user: "consul".into(),
        ..Default::default()
      },
      FileAttr {
        file: "/usr/bin/consul".into(),
        ..Default::default()
      },
      FileAttr {
        mode: "0755".into(),
        ..Default::default()
      },
    ];

    let args = FpmPackager::new("fpm", "warn").arguments(&request(&spec, &d, "rpm")).unwrap();
    let pairs: Vec<_> = args.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();
    assert!(pairs.contains(&("--replaces", "consul-legacy")));

    let attrs: Vec<_> = pairs.iter().filter(|(flag, _)| *flag == "--rpm-attr").map(|(_, v)| *v).collect();
    assert_eq!(attrs, vec!["0640,consul,-:/etc/consul.json", "-,-,-:/usr/bin/consul"]);

    let depends = args.iter().position(|a| a == "--depends").unwrap();
    let replaces = args.iter().position(|a| a == "--replaces").unwrap();
    let log = args.iter().position(|a| a == "--log").unwrap();
    assert!(depends < replaces);
    assert!(args.iter().rposition(|a| a == "--rpm-attr").unwrap() < log);
  }

  #[test]
  fn no_targets_means_empty_source() {
    let d = dirs();
    let mut spec = consul();
    spec.targets.clear();
    let args = FpmPackager::new("fpm", "warn").arguments(&request(&spec, &d, "deb")).unwrap();
    assert_eq!(&args[..4], &["-s", "empty", "-t", "deb"]);
    assert!(!args.contains(&"--rpm-auto-add-directories".to_string()));
  }

  #[test]
  fn rejects_unknown_script_names() {
    let d = dirs();
    let mut spec = consul();
    spec.scripts.insert("post-install".into(), "true".into());

    let err = FpmPackager::new("fpm", "warn").arguments(&request(&spec, &d, "rpm")).unwrap_err();
    assert!(matches!(err, PackageError::InvalidScriptName { ref name } if name == "post-install"));
  }

  #[test]
  fn requires_identity_fields() {
    let d = dirs();
    let mut spec = consul();
    spec.iteration.clear();

    let err = FpmPackager::new("fpm", "warn").arguments(&request(&spec, &d, "rpm")).unwrap_err();
    assert!(matches!(err, PackageError::MissingField { field: "iteration" }));
  }

  #[test]
  fn templated_targets_are_rendered_into_target_root() {
    let d = dirs();
    std::fs::write(d.build.join("consul.conf"), "version=$${version}\n").unwrap();
    let mut spec = consul();
    spec.targets = vec![Target {
      src: "$${build:consul.conf}".into(),
      dest: "/etc/consul.conf".into(),
      template: true,
      config: true,
    }];

    let args = FpmPackager::new("fpm", "warn").arguments(&request(&spec, &d, "rpm")).unwrap();
    let rendered = d.targets.join("consul.conf");
    assert_eq!(std::fs::read_to_string(&rendered).unwrap(), "version=0.6.4\n");
    assert!(args.contains(&format!("{}=/etc/consul.conf", rendered.to_string_lossy())));
    assert!(args.windows(2).any(|w| w[0] == "--config-files" && w[1] == "/etc/consul.conf"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failing_packager_reports_output() {
    let d = dirs();
    let spec = consul();
    let err = FpmPackager::new("false", "warn")
      .package(request(&spec, &d, "rpm"))
      .await
      .unwrap_err();
    assert!(matches!(err, PackageError::Failed { code: Some(1), .. }));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn successful_packager_returns_output() {
    let d = dirs();
    let spec = consul();
    let out = FpmPackager::new("echo", "warn").package(request(&spec, &d, "deb")).await.unwrap();
    assert_eq!(out.package_type, "deb");
    assert!(out.output.starts_with("-s dir -t deb"));
  }
}
