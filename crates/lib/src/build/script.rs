//! Running a variant's build script as a shell subprocess.
//!
//! The script is written to disk and executed as `SHELL -c <path>` from the
//! build root. Its stdout and stderr are piped into an [`OutputMux`] so the
//! caller can attach consumers before the output starts flowing.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

use crate::logs::{LogError, OutputMux};

#[derive(Debug, Error)]
pub enum ScriptError {
  #[error("failed to start {shell}: {source}")]
  Spawn {
    shell: String,
    #[source]
    source: std::io::Error,
  },

  #[error("child process has no {0} pipe")]
  MissingPipe(&'static str),

  #[error(transparent)]
  Log(#[from] LogError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Where a script runs and what it sees.
#[derive(Debug, Clone)]
pub struct ScriptCommand {
  pub shell: Option<String>,
  pub script: PathBuf,
  pub build_root: PathBuf,
  pub spec_root: PathBuf,
  pub output_root: PathBuf,
}

/// A running script whose output has not been consumed yet.
pub struct ScriptProcess {
  child: Child,
  pub mux: OutputMux<ChildStdout, ChildStderr>,
}

impl ScriptProcess {
  /// Starts the script. Output is buffered by the pipes until `mux.start()`.
  pub fn spawn(cmd: &ScriptCommand) -> Result<Self, ScriptError> {
    let (shell, shell_args) = get_shell(cmd.shell.as_deref());
    debug!(shell = %shell, script = %cmd.script.display(), "spawning build script");

    let mut child = Command::new(&shell)
      .args(&shell_args)
      .arg(&cmd.script)
      .current_dir(&cmd.build_root)
      .env("BUILD_ROOT", &cmd.build_root)
      .env("SPEC_ROOT", &cmd.spec_root)
      .env("OUTPUT_ROOT", &cmd.output_root)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| ScriptError::Spawn {
        shell: shell.clone(),
        source,
      })?;

    let stdout = child.stdout.take().ok_or(ScriptError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(ScriptError::MissingPipe("stderr"))?;

    Ok(Self {
      child,
      mux: OutputMux::new(stdout, stderr),
    })
  }

  /// Waits for the process to exit and its output to drain.
  pub async fn wait(mut self) -> Result<ExitStatus, ScriptError> {
    let status = self.child.wait().await?;
    self.mux.finish().await?;
    debug!(code = ?status.code(), "build script exited");
    Ok(status)
  }
}

/// Writes `content` to `dir/name` as an executable file.
pub fn write_script(dir: &Path, name: &str, content: &str) -> std::io::Result<PathBuf> {
  let path = dir.join(name);
  std::fs::write(&path, content)?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
  }
  Ok(path)
}

/// Get the shell command and argument for the current platform.
///
/// An explicit shell gets the argument style its name suggests; otherwise
/// `/bin/sh -c` (Unix) or `powershell.exe -Command` (Windows).
pub fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
