use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{LogError, OutputMux, Stream, Subscription};

/// Collects everything written to each stream in memory.
#[derive(Debug)]
pub struct RollupConsumer {
  stdout: Arc<Mutex<String>>,
  stderr: Arc<Mutex<String>>,
  tasks: Vec<JoinHandle<()>>,
}

impl RollupConsumer {
  pub fn attach<O, E>(mux: &mut OutputMux<O, E>) -> Result<Self, LogError>
  where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
  {
    let Subscription { stdout, stderr } = mux.subscribe()?;
    let out_buf = Arc::new(Mutex::new(String::new()));
    let err_buf = Arc::new(Mutex::new(String::new()));

    let tasks = vec![
      tokio::spawn(collect(stdout, Arc::clone(&out_buf))),
      tokio::spawn(collect(stderr, Arc::clone(&err_buf))),
    ];

    Ok(Self {
      stdout: out_buf,
      stderr: err_buf,
      tasks,
    })
  }

  /// What has been collected so far.
  pub fn snapshot(&self, stream: Stream) -> String {
    let buf = match stream {
      Stream::Stdout => &self.stdout,
      Stream::Stderr => &self.stderr,
    };
    buf.lock().map(|b| b.clone()).unwrap_or_default()
  }

  /// Waits for both streams to close.
  pub async fn finish(&mut self) {
    for task in self.tasks.drain(..) {
      let _ = task.await;
    }
  }
}

async fn collect(mut rx: mpsc::Receiver<String>, buf: Arc<Mutex<String>>) {
  while let Some(line) = rx.recv().await {
    if let Ok(mut buf) = buf.lock() {
      buf.push_str(&line);
      buf.push('\n');
    }
  }
}

/// Re-emits every line on a pair of writers, normally our own stdout/stderr.
#[derive(Debug)]
pub struct PassthroughConsumer {
  tasks: Vec<JoinHandle<std::io::Result<()>>>,
}

impl PassthroughConsumer {
  pub fn stdio<O, E>(mux: &mut OutputMux<O, E>) -> Result<Self, LogError>
  where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
  {
    Self::attach(mux, tokio::io::stdout(), tokio::io::stderr())
  }

  pub fn attach<O, E, W1, W2>(mux: &mut OutputMux<O, E>, out: W1, err: W2) -> Result<Self, LogError>
  where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
    W1: AsyncWrite + Unpin + Send + 'static,
    W2: AsyncWrite + Unpin + Send + 'static,
  {
    let Subscription { stdout, stderr } = mux.subscribe()?;
    Ok(Self {
      tasks: vec![tokio::spawn(forward(stdout, out)), tokio::spawn(forward(stderr, err))],
    })
  }

  pub async fn finish(&mut self) -> Result<(), LogError> {
    join_writers(&mut self.tasks).await
  }
}

async fn forward<W: AsyncWrite + Unpin>(mut rx: mpsc::Receiver<String>, mut dest: W) -> std::io::Result<()> {
  while let Some(line) = rx.recv().await {
    dest.write_all(line.as_bytes()).await?;
    dest.write_all(b"\n").await?;
  }
  dest.flush().await
}

/// Appends each stream to its own file under a log directory.
///
/// Files are named `{name}-{timestamp}-{sequence}-{stdout|stderr}.log`. The
/// sequence is unique within the process and files are created exclusively,
/// so every build gets a fresh pair even when labels and timestamps collide.
#[derive(Debug)]
pub struct FileConsumer {
  stdout_path: PathBuf,
  stderr_path: PathBuf,
  tasks: Vec<JoinHandle<std::io::Result<()>>>,
}

impl FileConsumer {
  /// Creates `dir` if needed, opens both log files and subscribes.
  pub async fn attach<O, E>(mux: &mut OutputMux<O, E>, dir: &Path, name: &str) -> Result<Self, LogError>
  where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
  {
    tokio::fs::create_dir_all(dir).await?;

    let name = sanitize(name);
    let (stdout_path, out_file) = create_unique(dir, &name, Stream::Stdout).await?;
    let (stderr_path, err_file) = create_unique(dir, &name, Stream::Stderr).await?;
    let Subscription { stdout, stderr } = mux.subscribe()?;
    debug!(stdout = %stdout_path.display(), stderr = %stderr_path.display(), "logging build output");

    Ok(Self {
      stdout_path,
      stderr_path,
      tasks: vec![
        tokio::spawn(forward(stdout, out_file)),
        tokio::spawn(forward(stderr, err_file)),
      ],
    })
  }

  pub fn path(&self, stream: Stream) -> &Path {
    match stream {
      Stream::Stdout => &self.stdout_path,
      Stream::Stderr => &self.stderr_path,
    }
  }

  /// Reads back what was written for `stream`.
  pub async fn replay(&self, stream: Stream) -> Result<String, LogError> {
    Ok(tokio::fs::read_to_string(self.path(stream)).await?)
  }

  /// Waits for both streams to close and surfaces the first write error.
  pub async fn finish(&mut self) -> Result<(), LogError> {
    join_writers(&mut self.tasks).await
  }
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
const CREATE_ATTEMPTS: usize = 16;

/// Creates a log file that did not exist before, moving to the next
/// sequence number if another writer got there first.
async fn create_unique(dir: &Path, name: &str, stream: Stream) -> std::io::Result<(PathBuf, tokio::fs::File)> {
  let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
  let mut last = None;
  for _ in 0..CREATE_ATTEMPTS {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("{name}-{stamp}-{seq}-{stream}.log"));
    match OpenOptions::new().write(true).create_new(true).open(&path).await {
      Ok(file) => return Ok((path, file)),
      Err(e) if e.kind() == ErrorKind::AlreadyExists => last = Some(e),
      Err(e) => return Err(e),
    }
  }
  Err(last.unwrap_or_else(|| std::io::Error::from(ErrorKind::AlreadyExists)))
}

/// Keeps log file names to one path component.
fn sanitize(name: &str) -> String {
  name
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

async fn join_writers(tasks: &mut Vec<JoinHandle<std::io::Result<()>>>) -> Result<(), LogError> {
  let mut first = None;
  for task in tasks.drain(..) {
    let result = task.await.map_err(std::io::Error::other).and_then(|r| r);
    if let Err(e) = result
      && first.is_none()
    {
      first = Some(e);
    }
  }
  match first {
    Some(e) => Err(LogError::Io(e)),
    None => Ok(()),
  }
}
