//! Delayed tasks.
//!
//! Producers call [`TaskQueue::enqueue`]; a single worker holds scheduled
//! tasks in a min-heap ordered by due time and hands each one to a
//! [`TaskHandler`] once it is due. There is no cancellation: handlers must
//! treat stale tasks as no-ops.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    ExpireOrder { order_id: Uuid },
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task, delay: Duration) -> CoreResult<()>;
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> CoreResult<()>;
}

#[async_trait]
impl TaskHandler for Platform {
    async fn handle(&self, task: Task) -> CoreResult<()> {
        match task {
            Task::ExpireOrder { order_id } => {
                self.expire_order(order_id).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// In-process queue feeding a [`TaskWorker`].
#[derive(Clone)]
pub struct DelayedTaskQueue {
    sender: mpsc::UnboundedSender<(Instant, Task)>,
}

/// The consuming half of a [`DelayedTaskQueue`].
pub struct TaskWorker {
    receiver: mpsc::UnboundedReceiver<(Instant, Task)>,
}

impl DelayedTaskQueue {
    pub fn new() -> (Self, TaskWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, TaskWorker { receiver })
    }
}

#[async_trait]
impl TaskQueue for DelayedTaskQueue {
    async fn enqueue(&self, task: Task, delay: Duration) -> CoreResult<()> {
        debug!(?task, ?delay, "task scheduled");
        self.sender
            .send((Instant::now() + delay, task))
            .map_err(|_| CoreError::Infrastructure(anyhow::anyhow!("task worker has stopped")))
    }
}

async fn wait_for(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending().await,
    }
}

impl TaskWorker {
    /// Runs until every queue handle is dropped and all scheduled tasks fired.
    pub async fn run<H: TaskHandler + ?Sized>(mut self, handler: &H) {
        let mut pending: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
        let mut seq = 0u64;
        let mut open = true;

        while open || !pending.is_empty() {
            let next_due = pending.peek().map(|Reverse(s)| s.due);
            tokio::select! {
                received = self.receiver.recv(), if open => match received {
                    Some((due, task)) => {
                        seq += 1;
                        pending.push(Reverse(Scheduled { due, seq, task }));
                    }
                    None => open = false,
                },
                _ = wait_for(next_due) => {
                    let now = Instant::now();
                    while pending.peek().is_some_and(|Reverse(s)| s.due <= now) {
                        let Some(Reverse(scheduled)) = pending.pop() else { break };
                        if let Err(e) = handler.handle(scheduled.task.clone()).await {
                            warn!(task = ?scheduled.task, "task failed: {e}");
                        }
                    }
                }
            }
        }
        debug!("task worker stopped");
    }
}
