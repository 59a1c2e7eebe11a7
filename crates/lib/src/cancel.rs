//! Cooperative, forest-wide cancellation.

use tokio::sync::watch;

/// Raises the cancellation signal. Dropping the handle does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

/// Observes the cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

/// Creates a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn token(&self) -> CancelToken {
    CancelToken { rx: self.tx.subscribe() }
  }
}

impl CancelToken {
  /// A token that is never cancelled.
  pub fn never() -> Self {
    let (_, rx) = watch::channel(false);
    Self { rx }
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancellation is raised. Pends forever if the handle is
  /// dropped without cancelling.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}
