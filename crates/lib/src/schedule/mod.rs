//! Build scheduler.
//!
//! Drives a [`Forest`] through a fixed pool of workers pulling from one shared
//! queue. The queue is seeded with the roots; a variant's children are queued
//! only after the variant itself built successfully, and a failure turns every
//! descendant into a skipped result so the number of results always matches
//! the forest size.
//!
//! Cancellation is cooperative: workers stop pulling new work, the collector
//! stops waiting, and builds already in flight run to completion.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::spec::{Forest, Variant, VariantId};

/// Builds a single variant. Implemented by the real package builder and by
/// test doubles.
pub trait VariantBuilder: Send + Sync + 'static {
  type Error: std::fmt::Display + Send + 'static;

  fn build_variant(&self, variant: &Variant) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// What happened to one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Built,
  Failed(String),
  /// Not attempted because the ancestor `cause` failed.
  Skipped { cause: VariantId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantResult {
  pub id: VariantId,
  pub label: String,
  pub outcome: Outcome,
}

/// Aggregate of one scheduling run.
#[derive(Debug, Default)]
pub struct ScheduleResult {
  /// Results in the order they were collected.
  pub results: Vec<VariantResult>,
  /// Number of results expected for the scheduled roots.
  pub total: usize,
  /// Cancellation fired before every result arrived.
  pub cancelled: bool,
}

impl ScheduleResult {
  /// True only if every variant was built and nothing was cancelled.
  pub fn is_success(&self) -> bool {
    !self.cancelled && self.results.len() == self.total && self.failed() == 0 && self.skipped() == 0
  }

  pub fn built(&self) -> usize {
    self.count(|o| matches!(o, Outcome::Built))
  }

  pub fn failed(&self) -> usize {
    self.count(|o| matches!(o, Outcome::Failed(_)))
  }

  pub fn skipped(&self) -> usize {
    self.count(|o| matches!(o, Outcome::Skipped { .. }))
  }

  pub fn outcome(&self, id: VariantId) -> Option<&Outcome> {
    self.results.iter().find(|r| r.id == id).map(|r| &r.outcome)
  }

  fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
    self.results.iter().filter(|r| pred(&r.outcome)).count()
  }
}

struct Worker<B> {
  index: usize,
  forest: Arc<Forest>,
  builder: Arc<B>,
  queue: Arc<Mutex<mpsc::Receiver<VariantId>>>,
  requeue: mpsc::Sender<VariantId>,
  results: mpsc::Sender<VariantResult>,
  cancel: CancelToken,
  stop: watch::Receiver<bool>,
}

/// Builds `roots` and all of their descendants with `concurrency` workers.
pub async fn schedule<B: VariantBuilder>(
  forest: Arc<Forest>,
  roots: &[VariantId],
  builder: Arc<B>,
  concurrency: usize,
  cancel: CancelToken,
) -> ScheduleResult {
  let total = forest.total(roots);
  let mut result = ScheduleResult {
    results: Vec::with_capacity(total),
    total,
    cancelled: false,
  };
  if total == 0 {
    return result;
  }

  // Sized to the whole forest so neither queue ever blocks a worker.
  let (work_tx, work_rx) = mpsc::channel(total);
  let (result_tx, mut result_rx) = mpsc::channel(total);
  let (stop_tx, stop_rx) = watch::channel(false);
  let queue = Arc::new(Mutex::new(work_rx));

  let workers = concurrency.max(1);
  info!(total, workers, "scheduling variants");

  let mut set = JoinSet::new();
  for index in 0..workers {
    set.spawn(work(Worker {
      index,
      forest: Arc::clone(&forest),
      builder: Arc::clone(&builder),
      queue: Arc::clone(&queue),
      requeue: work_tx.clone(),
      results: result_tx.clone(),
      cancel: cancel.clone(),
      stop: stop_rx.clone(),
    }));
  }
  drop(result_tx);

  for root in roots {
    if work_tx.send(*root).await.is_err() {
      error!(variant = %root, "work queue closed before seeding");
    }
  }
  drop(work_tx);

  while result.results.len() < total {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        warn!(received = result.results.len(), total, "build cancelled");
        result.cancelled = true;
        break;
      }
      received = result_rx.recv() => match received {
        Some(r) => result.results.push(r),
        None => {
          error!(received = result.results.len(), total, "all workers exited early");
          break;
        }
      },
    }
  }

  stop_tx.send_replace(true);
  while let Some(joined) = set.join_next().await {
    if let Err(e) = joined {
      error!(error = %e, "worker panicked");
    }
  }

  // Builds that were in flight when cancellation fired still count.
  while let Ok(r) = result_rx.try_recv() {
    result.results.push(r);
  }

  info!(
    built = result.built(),
    failed = result.failed(),
    skipped = result.skipped(),
    cancelled = result.cancelled,
    "scheduling complete"
  );
  result
}

async fn work<B: VariantBuilder>(mut w: Worker<B>) {
  loop {
    let next = {
      let mut queue = w.queue.lock().await;
      tokio::select! {
        biased;
        _ = w.cancel.cancelled() => None,
        _ = w.stop.wait_for(|stop| *stop) => None,
        id = queue.recv() => id,
      }
    };
    let Some(id) = next else {
      debug!(worker = w.index, "worker exiting");
      return;
    };

    let variant = &w.forest[id];
    let label = variant.label();
    info!(worker = w.index, variant = %label, "building");

    match w.builder.build_variant(variant).await {
      Ok(()) => {
        info!(variant = %label, "built");
        send(&w.results, id, label, Outcome::Built).await;
        for child in variant.children() {
          if w.requeue.send(*child).await.is_err() {
            warn!(variant = %child, "work queue closed");
          }
        }
      }
      Err(e) => {
        let message = e.to_string();
        error!(variant = %label, error = %message, "build failed");
        send(&w.results, id, label, Outcome::Failed(message)).await;
        for skipped in w.forest.descendants(id) {
          let label = w.forest[skipped].label();
          warn!(variant = %label, cause = %id, "skipping variant, ancestor failed");
          send(&w.results, skipped, label, Outcome::Skipped { cause: id }).await;
        }
      }
    }
  }
}

async fn send(results: &mpsc::Sender<VariantResult>, id: VariantId, label: String, outcome: Outcome) {
  if results.send(VariantResult { id, label, outcome }).await.is_err() {
    debug!(variant = %id, "result dropped, collector gone");
  }
}
