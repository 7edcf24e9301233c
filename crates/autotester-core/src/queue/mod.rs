//! Persistent task queue drained by a single worker.
//!
//! Design:
//! - The store bucket is the authoritative FIFO; this type holds only the
//!   in-flight task in memory. A dequeued task is deleted from the bucket
//!   before it runs, so it is either persisted or `current`, never both.
//! - `Notify` is a pure wake signal. The run loop re-scans the bucket after
//!   every wake (and once at startup), so tasks that survived a restart are
//!   picked up without an explicit kick.
//! - The worker is never invoked concurrently with itself: one task is
//!   dequeued under the lock, executed unlocked, then `current` is cleared.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::domain::{Task, TaskKind};
use crate::error::Error;
use crate::ports::clock::Clock;
use crate::ports::store::{Bucket, Store};

/// Executes one dequeued task. Implemented by the controller.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: Task);
}

pub struct TaskQueue {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Task>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            current: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Enqueue a task, unless its param is already queued or running.
    ///
    /// Once this returns Ok the task is visible to `list` and will execute
    /// in FIFO order relative to other successful adds.
    pub async fn add(&self, kind: TaskKind) -> Result<(), Error> {
        let current = self.current.lock().await;
        if current.as_ref().map(|t| t.kind) == Some(kind) {
            return Err(Error::DuplicateInProgress(kind));
        }
        if self.scan()?.iter().any(|(_, t)| t.kind == kind) {
            return Err(Error::DuplicateQueued(kind));
        }

        let task = Task::new(kind, self.clock.now().timestamp());
        self.store
            .create(Bucket::Queue, &serde_json::to_vec(&task)?)?;
        drop(current);

        self.notify.notify_one();
        Ok(())
    }

    /// Cancel the queued task for `kind`'s param.
    ///
    /// The running task cannot be cancelled; a param that is neither queued
    /// nor running reports not-queued.
    pub async fn cancel(&self, kind: TaskKind) -> Result<(), Error> {
        let current = self.current.lock().await;
        if current.as_ref().map(|t| t.kind) == Some(kind) {
            return Err(Error::TaskRunning(kind));
        }
        let entry = self.scan()?.into_iter().find(|(_, t)| t.kind == kind);
        let Some((id, _)) = entry else {
            return Err(Error::NotQueued(kind));
        };
        self.store.delete(Bucket::Queue, &id)?;
        Ok(())
    }

    /// All persisted tasks, oldest first (ties broken by store key).
    pub async fn list(&self) -> Result<Vec<Task>, Error> {
        let mut tasks: Vec<Task> = self.scan()?.into_iter().map(|(_, t)| t).collect();
        tasks.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// The task currently being executed, if any.
    pub async fn current(&self) -> Option<Task> {
        self.current.lock().await.clone()
    }

    /// True when nothing is queued and nothing is running — the gate for
    /// calibration and flush enqueues.
    pub async fn is_idle(&self) -> Result<bool, Error> {
        let current = self.current.lock().await;
        Ok(current.is_none() && self.scan()?.is_empty())
    }

    /// Drain the queue until `cancel` fires, one task in flight at a time.
    pub async fn run(&self, executor: Arc<dyn TaskExecutor>, cancel: CancellationToken) {
        loop {
            let next = self.dequeue().await;
            match next {
                Some(task) => {
                    executor.execute(task).await;
                    *self.current.lock().await = None;
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
    }

    /// Remove the oldest persisted task and promote it to `current`.
    async fn dequeue(&self) -> Option<Task> {
        let mut current = self.current.lock().await;
        let entries = match self.scan() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "queue scan failed; idling until next wake");
                return None;
            }
        };
        let (id, task) = entries
            .into_iter()
            .min_by(|(a_id, a), (b_id, b)| a.ts.cmp(&b.ts).then_with(|| a_id.cmp(b_id)))?;
        if let Err(err) = self.store.delete(Bucket::Queue, &id) {
            tracing::warn!(error = %err, id, "failed to dequeue task");
            return None;
        }
        *current = Some(task.clone());
        Some(task)
    }

    /// Decode every entry in the queue bucket, skipping records that no
    /// longer parse.
    fn scan(&self) -> Result<Vec<(String, Task)>, Error> {
        let mut out = Vec::new();
        for (id, raw) in self.store.list(Bucket::Queue)? {
            match serde_json::from_slice::<Task>(&raw) {
                Ok(mut task) => {
                    task.id = id.clone();
                    out.push((id, task));
                }
                Err(err) => {
                    tracing::warn!(id, error = %err, "skipping undecodable queue record");
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::timeout;

    use super::*;
    use crate::domain::Parameter;
    use crate::ports::clock::SystemClock;
    use crate::store::MemoryStore;

    /// Clock that serves a preset sequence of instants, then repeats the
    /// last one.
    struct SequenceClock {
        times: StdMutex<Vec<DateTime<Utc>>>,
        last: DateTime<Utc>,
    }

    impl SequenceClock {
        fn new(epochs: &[i64]) -> Self {
            Self {
                times: StdMutex::new(
                    epochs
                        .iter()
                        .rev()
                        .map(|s| Utc.timestamp_opt(*s, 0).unwrap())
                        .collect(),
                ),
                last: Utc.timestamp_opt(*epochs.last().unwrap(), 0).unwrap(),
            }
        }
    }

    impl Clock for SequenceClock {
        fn now(&self) -> DateTime<Utc> {
            self.times.lock().unwrap().pop().unwrap_or(self.last)
        }
    }

    fn queue_with_clock(clock: Arc<dyn Clock>) -> Arc<TaskQueue> {
        Arc::new(TaskQueue::new(Arc::new(MemoryStore::new()), clock))
    }

    fn queue() -> Arc<TaskQueue> {
        queue_with_clock(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn list_sorts_by_enqueue_time() {
        // enqueue order ca@10, alk@20, mg@15 — list must come back ca, mg, alk
        let queue = queue_with_clock(Arc::new(SequenceClock::new(&[10, 20, 15])));
        queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap();
        queue.add(TaskKind::Test(Parameter::Alk)).await.unwrap();
        queue.add(TaskKind::Test(Parameter::Mg)).await.unwrap();

        let listed = queue.list().await.unwrap();
        let kinds: Vec<_> = listed.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TaskKind::Test(Parameter::Ca),
                TaskKind::Test(Parameter::Mg),
                TaskKind::Test(Parameter::Alk),
            ]
        );
        assert_eq!(listed[0].ts, 10);
        assert_eq!(listed[2].ts, 20);
    }

    #[tokio::test]
    async fn duplicate_param_is_rejected_while_queued() {
        let queue = queue();
        queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap();
        let err = queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateQueued(_)));

        // a different param for the same analyte family is fine
        queue.add(TaskKind::Flush(Parameter::Ca)).await.unwrap();
        assert_eq!(queue.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancel_semantics() {
        let queue = queue();

        // nothing queued yet
        let err = queue.cancel(TaskKind::Test(Parameter::Ca)).await.unwrap_err();
        assert!(matches!(err, Error::NotQueued(_)));

        queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap();
        queue.cancel(TaskKind::Test(Parameter::Ca)).await.unwrap();
        assert!(queue.list().await.unwrap().is_empty());

        // cancel is not idempotent: the second call reports not-queued
        let err = queue.cancel(TaskKind::Test(Parameter::Ca)).await.unwrap_err();
        assert!(matches!(err, Error::NotQueued(_)));
    }

    /// Executor that records what it ran and can be held open to keep a
    /// task "in progress".
    struct RecordingExecutor {
        ran: StdMutex<Vec<TaskKind>>,
        gate: Notify,
        hold: bool,
    }

    impl RecordingExecutor {
        fn new(hold: bool) -> Arc<Self> {
            Arc::new(Self {
                ran: StdMutex::new(Vec::new()),
                gate: Notify::new(),
                hold,
            })
        }

        fn ran(&self) -> Vec<TaskKind> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute(&self, task: Task) {
            self.ran.lock().unwrap().push(task.kind);
            if self.hold {
                self.gate.notified().await;
            }
        }
    }

    async fn wait_for<F, Fut>(mut pred: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        timeout(Duration::from_secs(2), async {
            loop {
                if pred().await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn worker_drains_fifo() {
        let queue = queue_with_clock(Arc::new(SequenceClock::new(&[10, 20, 15])));
        queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap();
        queue.add(TaskKind::Test(Parameter::Alk)).await.unwrap();
        queue.add(TaskKind::Test(Parameter::Mg)).await.unwrap();

        let executor = RecordingExecutor::new(false);
        let cancel = CancellationToken::new();
        let worker = {
            let queue = Arc::clone(&queue);
            let executor: Arc<dyn TaskExecutor> = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.run(executor, cancel).await })
        };

        wait_for(|| async { executor.ran().len() == 3 }).await;
        assert_eq!(
            executor.ran(),
            vec![
                TaskKind::Test(Parameter::Ca),
                TaskKind::Test(Parameter::Mg),
                TaskKind::Test(Parameter::Alk),
            ]
        );
        assert!(queue.is_idle().await.unwrap());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn running_task_blocks_duplicates_and_cancel() {
        let queue = queue();
        let executor = RecordingExecutor::new(true);
        let cancel = CancellationToken::new();
        let worker = {
            let queue = Arc::clone(&queue);
            let executor: Arc<dyn TaskExecutor> = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.run(executor, cancel).await })
        };

        queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap();
        wait_for(|| async { queue.current().await.is_some() }).await;

        // the in-flight task is not in the persisted queue
        assert!(queue.list().await.unwrap().is_empty());

        let err = queue.add(TaskKind::Test(Parameter::Ca)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateInProgress(_)));

        let err = queue.cancel(TaskKind::Test(Parameter::Ca)).await.unwrap_err();
        assert!(matches!(err, Error::TaskRunning(_)));

        // other params can still be enqueued behind it
        queue.add(TaskKind::Test(Parameter::Alk)).await.unwrap();

        executor.gate.notify_one();
        wait_for(|| async { executor.ran().len() == 2 }).await;
        executor.gate.notify_one();

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn restart_picks_up_persisted_tasks_without_a_wake() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // first process enqueues, then "dies"
        {
            let queue = TaskQueue::new(Arc::clone(&store), Arc::clone(&clock));
            queue.add(TaskKind::Test(Parameter::No3)).await.unwrap();
        }

        // second process starts its worker against the same store
        let queue = Arc::new(TaskQueue::new(store, clock));
        let executor = RecordingExecutor::new(false);
        let cancel = CancellationToken::new();
        let worker = {
            let queue = Arc::clone(&queue);
            let executor: Arc<dyn TaskExecutor> = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.run(executor, cancel).await })
        };

        wait_for(|| async { executor.ran() == vec![TaskKind::Test(Parameter::No3)] }).await;

        cancel.cancel();
        worker.await.unwrap();
    }
}
