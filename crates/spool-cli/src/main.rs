mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use spool_core::config::RECOVERY_VAR;
use spool_core::{
    Config, EntryEvent, EntryId, EntryLog, EntryState, JsonQueueManager, QueueEntry,
    QueueManager, RecoveryPolicy,
};
use tracing_subscriber::EnvFilter;

use crate::worker::{Handler, WorkerGroup, WorkerOptions};

/// Durable work queues on the local filesystem.
///
/// Storage root and behaviour come from SPOOL_ROOT, SPOOL_CLAIM_ORDER and
/// SPOOL_RECOVERY (a `.env` file is read if present). Log filter: SPOOL_LOG.
#[derive(Debug, Parser)]
#[command(name = "spool", version)]
struct Cli {
    /// What to do with entries left Processing when a queue is opened.
    /// Defaults to `keep` here so a claim can be reported by a later call.
    #[arg(long, global = true, value_parser = parse_recovery)]
    recovery: Option<RecoveryPolicy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every queue under the storage root.
    Queues,
    /// Add an entry with a JSON payload.
    Add {
        queue: String,
        payload: String,
        #[arg(long)]
        tag: Option<String>,
        /// Start Suspending instead of Waiting.
        #[arg(long)]
        suspended: bool,
    },
    /// Print entries in FIFO order.
    List {
        queue: String,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        state: Option<String>,
    },
    /// Print per-state counts as JSON.
    Stats {
        queue: String,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Claim the next Waiting entry and print it.
    Claim { queue: String },
    /// Processing -> Finished.
    Finish {
        queue: String,
        entry_id: EntryId,
        #[arg(long)]
        note: Option<String>,
    },
    /// Processing -> Waiting, with the reason logged.
    Fail {
        queue: String,
        entry_id: EntryId,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Processing or Suspending -> Waiting.
    Wait { queue: String, entry_id: EntryId },
    /// Processing -> Suspending.
    Suspend { queue: String, entry_id: EntryId },
    /// Delete one entry (refused while Processing).
    Remove { queue: String, entry_id: EntryId },
    /// Delete every Finished entry.
    Purge { queue: String },
    /// Delete a queue and all its entries, or every queue with `--all`.
    Drop {
        #[arg(required_unless_present = "all")]
        queue: Option<String>,
        #[arg(long, conflicts_with = "queue")]
        all: bool,
    },
    /// Claim entries, print their payloads to stdout and finish them.
    Work {
        queue: String,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
        /// Keep polling after the queue runs dry (until Ctrl-C).
        #[arg(long)]
        follow: bool,
    },
}

fn parse_recovery(raw: &str) -> std::result::Result<RecoveryPolicy, String> {
    raw.parse::<RecoveryPolicy>()
        .map_err(|()| format!("expected one of reset, keep; got {raw:?}"))
}

fn manager(recovery: Option<RecoveryPolicy>) -> Result<JsonQueueManager> {
    let mut config = Config::from_env().context("invalid configuration")?;
    config.queue.recovery = match recovery {
        Some(policy) => policy,
        None if std::env::var_os(RECOVERY_VAR).is_none() => RecoveryPolicy::Keep,
        None => config.queue.recovery,
    };
    tracing::debug!(root = %config.root.display(), queue = ?config.queue, "configuration loaded");
    Ok(QueueManager::from_config(&config))
}

fn find(
    queue: &spool_core::Queue<serde_json::Value>,
    entry_id: &EntryId,
) -> Result<QueueEntry<serde_json::Value>> {
    queue
        .entry_for_id(entry_id)
        .ok_or_else(|| anyhow!("no entry {entry_id} in queue {}", queue.name()))
}

fn print_entry(entry: &QueueEntry<serde_json::Value>) -> Result<()> {
    println!("{}", serde_json::to_string(entry.record())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SPOOL_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manager = manager(cli.recovery)?;

    match cli.command {
        Command::Queues => {
            for (queue_id, name) in manager.queues()? {
                println!("{queue_id}\t{name}");
            }
        }
        Command::Add {
            queue,
            payload,
            tag,
            suspended,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be JSON")?;
            let queue = manager.queue_with_name(&queue)?;
            let entry = queue.add_entry(payload, tag.as_deref(), suspended)?;
            println!("{}", entry.id());
        }
        Command::List { queue, tag, state } => {
            let state = state
                .map(|s| {
                    EntryState::ALL
                        .into_iter()
                        .find(|st| st.as_str() == s)
                        .ok_or_else(|| anyhow!("unknown state {s:?}"))
                })
                .transpose()?;
            let queue = manager.existing_queue(&queue)?;
            let entries = match &tag {
                Some(tag) => queue.entries_for_tag(tag),
                None => queue.entries(),
            };
            for entry in entries
                .iter()
                .filter(|e| state.is_none_or(|s| e.state() == s))
            {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.id(),
                    entry.state(),
                    entry.tag().unwrap_or("-"),
                    entry.created().to_rfc3339(),
                    entry.payload()
                );
            }
        }
        Command::Stats { queue, tag } => {
            let queue = manager.existing_queue(&queue)?;
            let stats = match tag.as_deref() {
                Some(tag) => serde_json::json!({
                    "tag": tag,
                    "total": queue.count_for_tag(tag),
                    "waiting": queue.count_of_state_for_tag(EntryState::Waiting, tag),
                    "processing": queue.count_of_state_for_tag(EntryState::Processing, tag),
                    "suspending": queue.count_of_state_for_tag(EntryState::Suspending, tag),
                    "finished": queue.count_of_state_for_tag(EntryState::Finished, tag),
                }),
                None => serde_json::to_value(queue.counts())?,
            };
            println!("{stats}");
        }
        Command::Claim { queue } => {
            let queue = manager.existing_queue(&queue)?;
            match queue.get_entry_for_processing()? {
                Some(entry) => print_entry(&entry)?,
                None => eprintln!("nothing waiting in {}", queue.name()),
            }
        }
        Command::Finish {
            queue,
            entry_id,
            note,
        } => {
            let queue = manager.existing_queue(&queue)?;
            let mut entry = find(&queue, &entry_id)?;
            let log = note.map(|n| EntryLog::info("finished", n));
            queue.transition_entry(&mut entry, EntryEvent::Finish, log)?;
        }
        Command::Fail {
            queue,
            entry_id,
            reason,
        } => {
            let queue = manager.existing_queue(&queue)?;
            let mut entry = find(&queue, &entry_id)?;
            let log = EntryLog::error("failed", reason.unwrap_or_default());
            queue.transition_entry(&mut entry, EntryEvent::Fail, Some(log))?;
        }
        Command::Wait { queue, entry_id } => {
            let queue = manager.existing_queue(&queue)?;
            let mut entry = find(&queue, &entry_id)?;
            queue.wait_entry(&mut entry)?;
        }
        Command::Suspend { queue, entry_id } => {
            let queue = manager.existing_queue(&queue)?;
            let mut entry = find(&queue, &entry_id)?;
            queue.suspend_entry(&mut entry)?;
        }
        Command::Remove { queue, entry_id } => {
            let queue = manager.existing_queue(&queue)?;
            let entry = find(&queue, &entry_id)?;
            queue.remove_entry(&entry)?;
        }
        Command::Purge { queue } => {
            let queue = manager.existing_queue(&queue)?;
            let report = queue.remove_finished_entries();
            println!("removed {}", report.removed.len());
            if let Some((entry_id, e)) = report.failed.into_iter().next() {
                return Err(anyhow!(e).context(format!("could not remove {entry_id}")));
            }
        }
        Command::Drop { queue, all } => {
            if all {
                manager.remove_all_queues()?;
            } else if let Some(name) = queue {
                let queue = manager.existing_queue(&name)?;
                manager.remove_queue(&queue)?;
            }
        }
        Command::Work {
            queue,
            workers,
            poll_ms,
            follow,
        } => {
            let queue = manager.existing_queue(&queue)?;
            tracing::debug!(queue = queue.name(), config = ?queue.config(), "starting workers");
            let handler: Handler = Arc::new(|payload: &serde_json::Value| {
                println!("{payload}");
                Ok(())
            });
            let group = WorkerGroup::spawn(
                queue,
                handler,
                WorkerOptions {
                    workers: workers.max(1),
                    poll_interval: Duration::from_millis(poll_ms),
                    exit_when_idle: !follow,
                },
            );

            if follow {
                tokio::signal::ctrl_c().await?;
                group.request_shutdown();
            }
            let handled = group.join().await;
            tracing::info!(handled, "work done");
        }
    }
    Ok(())
}
