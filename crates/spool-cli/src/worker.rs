use std::sync::Arc;
use std::time::Duration;

use spool_core::{EntryEvent, EntryLog, Queue, QueueEntry, QueueError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type JsonQueue = Queue<serde_json::Value>;

/// What a worker does with one claimed payload. `Err` fails the entry (back
/// to Waiting) with the message logged on it.
pub type Handler = Arc<dyn Fn(&serde_json::Value) -> Result<(), String> + Send + Sync>;

/// Worker group handle.
/// - `request_shutdown` で現在のエントリを終えたワーカーから止まる
/// - `join()` waits for all workers; with `exit_when_idle` they stop on
///   their own once the queue has nothing Waiting
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<usize>>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub workers: usize,
    pub poll_interval: Duration,
    pub exit_when_idle: bool,
}

impl WorkerGroup {
    pub fn spawn(queue: Arc<JsonQueue>, handler: Handler, options: WorkerOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(options.workers);
        for worker_id in 0..options.workers {
            let q = Arc::clone(&queue);
            let h = Arc::clone(&handler);
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, q, h, options, &mut rx).await
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new entries. In-flight entries are still reported.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for every worker; returns how many entries they handled.
    pub async fn join(self) -> usize {
        let mut handled = 0;
        for join in self.joins {
            match join.await {
                Ok(n) => handled += n,
                Err(e) => warn!(error = %e, "worker task panicked"),
            }
        }
        handled
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<JsonQueue>,
    handler: Handler,
    options: WorkerOptions,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> usize {
    let mut handled = 0;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // claim はディスクに触るので spawn_blocking で async スレッドの外に出す
        let q = Arc::clone(&queue);
        let claimed = match tokio::task::spawn_blocking(move || q.get_entry_for_processing()).await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(worker_id, error = %e, "claim task panicked");
                break;
            }
        };

        let entry = match claimed {
            Ok(Some(entry)) => entry,
            Ok(None) if options.exit_when_idle => break,
            Ok(None) => {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
                continue;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "claim failed");
                tokio::time::sleep(options.poll_interval).await;
                continue;
            }
        };

        debug!(worker_id, entry_id = %entry.id(), "claimed");
        // 結果の反映（finish / fail）もディスク書き込みなので同様
        let outcome = handler(entry.payload());
        let q = Arc::clone(&queue);
        match tokio::task::spawn_blocking(move || report(&q, entry, outcome)).await {
            Ok(Ok(())) => handled += 1,
            Ok(Err(e)) => warn!(worker_id, error = %e, "could not report outcome"),
            Err(e) => warn!(worker_id, error = %e, "report task panicked"),
        }
    }
    info!(worker_id, handled, "worker stopped");
    handled
}

fn report(
    queue: &JsonQueue,
    mut entry: QueueEntry<serde_json::Value>,
    outcome: Result<(), String>,
) -> Result<(), QueueError> {
    match outcome {
        Ok(()) => queue.finish_entry(&mut entry),
        Err(reason) => queue.transition_entry(
            &mut entry,
            EntryEvent::Fail,
            Some(EntryLog::error("handler", reason)),
        ),
    }
}
