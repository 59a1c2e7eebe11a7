//! Fan-out of a child process's stdout/stderr to independent consumers.
//!
//! An [`OutputMux`] owns the two output streams of one process. Consumers
//! call [`OutputMux::subscribe`] before [`OutputMux::start`]; afterwards the
//! subscriber list is frozen. Each stream is read line by line on its own
//! task and every line is delivered, in order, to every live subscriber of
//! that stream. A slow subscriber slows its stream down (channels are
//! bounded) but never loses lines.

mod consumers;

use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::consts::LINE_BUFFER;

pub use consumers::{FileConsumer, PassthroughConsumer, RollupConsumer};

#[derive(Debug, Error)]
pub enum LogError {
  /// Subscribing or starting after the multiplexer has started.
  #[error("output multiplexer already started")]
  AlreadyStarted,

  #[error("failed to read {stream}: {source}")]
  Read {
    stream: Stream,
    #[source]
    source: std::io::Error,
  },

  #[error("log io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
  Stdout,
  Stderr,
}

impl fmt::Display for Stream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stream::Stdout => write!(f, "stdout"),
      Stream::Stderr => write!(f, "stderr"),
    }
  }
}

/// Receivers handed to one subscriber.
///
/// Each channel closes once its stream reaches EOF or the multiplexer stops.
#[derive(Debug)]
pub struct Subscription {
  pub stdout: mpsc::Receiver<String>,
  pub stderr: mpsc::Receiver<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Unsubscribed,
  Subscribed,
  Started,
  Stopped,
}

pub struct OutputMux<O, E> {
  stdout: Option<O>,
  stderr: Option<E>,
  stdout_subs: Vec<mpsc::Sender<String>>,
  stderr_subs: Vec<mpsc::Sender<String>>,
  state: State,
  cancel: watch::Sender<bool>,
  readers: Vec<JoinHandle<()>>,
  errors_tx: mpsc::Sender<LogError>,
  errors_rx: mpsc::Receiver<LogError>,
}

impl<O, E> fmt::Debug for OutputMux<O, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OutputMux")
      .field("state", &self.state)
      .field("stdout_subs", &self.stdout_subs.len())
      .field("stderr_subs", &self.stderr_subs.len())
      .finish()
  }
}

impl<O, E> OutputMux<O, E>
where
  O: AsyncRead + Unpin + Send + 'static,
  E: AsyncRead + Unpin + Send + 'static,
{
  pub fn new(stdout: O, stderr: E) -> Self {
    let (cancel, _) = watch::channel(false);
    // One slot per stream; a second error from the same stream is dropped.
    let (errors_tx, errors_rx) = mpsc::channel(2);

    Self {
      stdout: Some(stdout),
      stderr: Some(stderr),
      stdout_subs: Vec::new(),
      stderr_subs: Vec::new(),
      state: State::Unsubscribed,
      cancel,
      readers: Vec::new(),
      errors_tx,
      errors_rx,
    }
  }

  /// Registers a new subscriber for both streams.
  pub fn subscribe(&mut self) -> Result<Subscription, LogError> {
    if matches!(self.state, State::Started | State::Stopped) {
      return Err(LogError::AlreadyStarted);
    }

    let (out_tx, out_rx) = mpsc::channel(LINE_BUFFER);
    let (err_tx, err_rx) = mpsc::channel(LINE_BUFFER);
    self.stdout_subs.push(out_tx);
    self.stderr_subs.push(err_tx);
    self.state = State::Subscribed;

    Ok(Subscription {
      stdout: out_rx,
      stderr: err_rx,
    })
  }

  /// Spawns one reader task per stream.
  pub fn start(&mut self) -> Result<(), LogError> {
    if matches!(self.state, State::Started | State::Stopped) {
      return Err(LogError::AlreadyStarted);
    }
    let (Some(stdout), Some(stderr)) = (self.stdout.take(), self.stderr.take()) else {
      return Err(LogError::AlreadyStarted);
    };

    debug!(subscribers = self.stdout_subs.len(), "starting output readers");
    self.readers.push(tokio::spawn(pump(
      Stream::Stdout,
      stdout,
      std::mem::take(&mut self.stdout_subs),
      self.cancel.subscribe(),
      self.errors_tx.clone(),
    )));
    self.readers.push(tokio::spawn(pump(
      Stream::Stderr,
      stderr,
      std::mem::take(&mut self.stderr_subs),
      self.cancel.subscribe(),
      self.errors_tx.clone(),
    )));
    self.state = State::Started;
    Ok(())
  }

  /// Signals the readers to stop. Idempotent; a no-op before `start`.
  pub fn stop(&mut self) {
    if self.state == State::Started {
      self.cancel.send_replace(true);
      self.state = State::Stopped;
    }
  }

  /// Waits for both readers to reach EOF (or observe `stop`).
  ///
  /// Returns the first read error, if a stream failed.
  pub async fn finish(&mut self) -> Result<(), LogError> {
    for reader in self.readers.drain(..) {
      if let Err(e) = reader.await {
        debug!(error = %e, "output reader task failed");
      }
    }
    if self.state == State::Started {
      self.state = State::Stopped;
    }

    match self.take_error() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// Returns a pending read error without blocking.
  pub fn take_error(&mut self) -> Option<LogError> {
    self.errors_rx.try_recv().ok()
  }

  pub fn is_started(&self) -> bool {
    matches!(self.state, State::Started | State::Stopped)
  }
}

/// Reads `source` line by line and forwards every line to `subs`.
///
/// All senders are dropped on return, which closes the subscriber channels.
async fn pump<R>(
  stream: Stream,
  source: R,
  mut subs: Vec<mpsc::Sender<String>>,
  mut cancel: watch::Receiver<bool>,
  errors: mpsc::Sender<LogError>,
) where
  R: AsyncRead + Unpin,
{
  let mut reader = BufReader::new(source);
  let mut buf = Vec::new();

  loop {
    buf.clear();
    let read = tokio::select! {
      biased;
      _ = cancel.wait_for(|stopped| *stopped) => return,
      read = reader.read_until(b'\n', &mut buf) => read,
    };

    match read {
      Ok(0) => {
        trace!(%stream, "end of stream");
        return;
      }
      Ok(_) => {
        let line = decode_line(&buf);
        for tx in &subs {
          tokio::select! {
            biased;
            _ = cancel.wait_for(|stopped| *stopped) => return,
            // A closed receiver just means that consumer went away.
            _ = tx.send(line.clone()) => {}
          }
        }
        subs.retain(|tx| !tx.is_closed());
      }
      Err(source) => {
        // Never block the reader on error reporting.
        let _ = errors.try_send(LogError::Read { stream, source });
        return;
      }
    }
  }
}

fn decode_line(buf: &[u8]) -> String {
  let mut end = buf.len();
  if end > 0 && buf[end - 1] == b'\n' {
    end -= 1;
  }
  if end > 0 && buf[end - 1] == b'\r' {
    end -= 1;
  }
  String::from_utf8_lossy(&buf[..end]).into_owned()
}
