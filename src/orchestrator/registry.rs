//! Registry of live container monitor tasks.
//!
//! Invariant: the map holds a task for a container name iff that container is
//! being monitored, and never more than one. Every mutation takes the same
//! mutex, so a `schedule` and a `cancel` for one name never interleave.
//!
//! After `shutdown` the registry is closed and refuses new tasks.
//!
//! A task is spawned disarmed: it does nothing until `schedule` accepts it.
//! That way a task rejected as a duplicate never polls, and a task cannot try
//! to deregister itself before it was registered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RegistryError;

/// What a spawned monitor task receives from its [`MonitorTask`].
pub struct TaskContext {
    id: Uuid,
    token: CancellationToken,
    armed: oneshot::Receiver<()>,
}

impl TaskContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait until the registry accepts the task.
    ///
    /// Returns `false` if the task was rejected, dropped or cancelled first.
    pub async fn armed(&mut self) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            result = &mut self.armed => result.is_ok() && !self.token.is_cancelled(),
        }
    }
}

/// Handle to one spawned monitor task.
///
/// Dropping the handle cancels the task.
pub struct MonitorTask {
    id: Uuid,
    container: String,
    started_at: DateTime<Utc>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    arm: Option<oneshot::Sender<()>>,
}

impl MonitorTask {
    /// Spawn `run` as a disarmed task for `container`.
    pub fn spawn<F, Fut>(container: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (arm, armed) = oneshot::channel();

        let handle = tokio::spawn(run(TaskContext {
            id,
            token: token.clone(),
            armed,
        }));

        Self {
            id,
            container: container.into(),
            started_at: Utc::now(),
            token,
            handle: Some(handle),
            arm: Some(arm),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal cancellation and wait for the task to exit.
    ///
    /// An in-flight tick is not interrupted; it finishes and discards its
    /// result. Once this returns the task will issue no further requests.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            tracing::error!(container = %self.container, "Monitor task panicked: {}", e);
        }
    }

    fn arm(&mut self) {
        if let Some(arm) = self.arm.take() {
            let _ = arm.send(());
        }
    }
}

impl Drop for MonitorTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for MonitorTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorTask")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("started_at", &self.started_at)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSummary {
    pub container: String,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Container name to monitor task mapping.
#[derive(Clone, Default)]
pub struct MonitorRegistry {
    tasks: Arc<Mutex<HashMap<String, MonitorTask>>>,
    /// Only written while `tasks` is locked.
    closed: Arc<AtomicBool>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name` and let it start polling.
    ///
    /// A name that is already monitored is rejected; the existing task keeps
    /// running and the rejected one is cancelled before it ever polls.
    pub async fn schedule(&self, name: &str, mut task: MonitorTask) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            drop(tasks);
            task.token.cancel();
            tracing::warn!(container = %name, "Refusing to schedule a monitor after shutdown");
            return Err(RegistryError::Closed);
        }
        if tasks.contains_key(name) {
            drop(tasks);
            task.token.cancel();
            tracing::warn!(container = %name, "Refusing to replace an existing monitor");
            return Err(RegistryError::AlreadyMonitored {
                name: name.to_string(),
            });
        }

        task.arm();
        tracing::debug!(container = %name, task_id = %task.id, "Monitor scheduled");
        tasks.insert(name.to_string(), task);
        Ok(())
    }

    /// Remove and return the task for `name`. The caller cancels it.
    pub async fn cancel(&self, name: &str) -> Result<MonitorTask, RegistryError> {
        let task = self
            .tasks
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| RegistryError::NotMonitored {
                name: name.to_string(),
            })?;

        tracing::debug!(container = %name, task_id = %task.id, "Monitor removed from registry");
        Ok(task)
    }

    /// Remove `name` only if it is still registered to `task_id`.
    ///
    /// Used by a monitor to drop itself; a newer task for the same name is
    /// left alone.
    pub async fn deregister_if(&self, name: &str, task_id: Uuid) -> bool {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(name).is_some_and(|t| t.id == task_id) {
            // The task is removing itself, so its handle is detached, not awaited.
            tasks.remove(name);
            tracing::debug!(container = %name, task_id = %task_id, "Monitor deregistered itself");
            true
        } else {
            false
        }
    }

    pub async fn is_monitored(&self, name: &str) -> bool {
        self.tasks.lock().await.contains_key(name)
    }

    /// Id of the task registered for `name`.
    pub async fn task_id(&self, name: &str) -> Option<Uuid> {
        self.tasks.lock().await.get(name).map(MonitorTask::id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Monitored container names, sorted.
    pub async fn monitored_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered entries sorted by container name.
    pub async fn snapshot(&self) -> Vec<MonitorSummary> {
        let tasks = self.tasks.lock().await;
        let mut entries: Vec<MonitorSummary> = tasks
            .iter()
            .map(|(name, task)| MonitorSummary {
                container: name.clone(),
                task_id: task.id,
                started_at: task.started_at,
            })
            .collect();
        entries.sort_by(|a, b| a.container.cmp(&b.container));
        entries
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the registry, then cancel and drain every task. Returns how many
    /// were stopped.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<MonitorTask> = {
            let mut tasks = self.tasks.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            tasks.drain().map(|(_, task)| task).collect()
        };

        let count = drained.len();
        futures::future::join_all(drained.into_iter().map(MonitorTask::cancel)).await;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// A task that counts how many times it got armed, then idles until cancelled.
    fn idle_task(name: &str, armed_count: Arc<AtomicU32>) -> MonitorTask {
        MonitorTask::spawn(name, move |mut ctx| async move {
            if ctx.armed().await {
                armed_count.fetch_add(1, Ordering::SeqCst);
                ctx.token().cancelled().await;
            }
        })
    }

    #[tokio::test]
    async fn test_schedule_and_cancel() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));

        registry
            .schedule("c1", idle_task("c1", armed.clone()))
            .await
            .unwrap();
        assert!(registry.is_monitored("c1").await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let task = registry.cancel("c1").await.unwrap();
        assert_eq!(task.container(), "c1");
        task.cancel().await;

        assert!(!registry.is_monitored("c1").await);
        assert_eq!(armed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_schedule_rejected() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));

        registry
            .schedule("c1", idle_task("c1", armed.clone()))
            .await
            .unwrap();
        let original = registry.task_id("c1").await.unwrap();

        let err = registry
            .schedule("c1", idle_task("c1", armed.clone()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyMonitored {
                name: "c1".to_string()
            }
        );

        // Existing task untouched, rejected task never armed.
        assert_eq!(registry.task_id("c1").await, Some(original));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(armed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_monitored_names_sorted() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));

        for name in ["web", "db", "cache"] {
            registry
                .schedule(name, idle_task(name, armed.clone()))
                .await
                .unwrap();
        }

        assert_eq!(registry.monitored_names().await, vec!["cache", "db", "web"]);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].container, "cache");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.shutdown().await, 3);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_monitored() {
        let registry = MonitorRegistry::new();
        let err = registry.cancel("ghost").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotMonitored {
                name: "ghost".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_waits_for_task_exit() {
        let registry = MonitorRegistry::new();
        let task = MonitorTask::spawn("c1", |mut ctx| async move {
            if ctx.armed().await {
                ctx.token().cancelled().await;
            }
        });
        registry.schedule("c1", task).await.unwrap();

        let task = registry.cancel("c1").await.unwrap();
        let token = task.token.clone();
        task.cancel().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_deregister_if_ignores_newer_task() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));

        let first = idle_task("c1", armed.clone());
        let stale_id = first.id();
        registry.schedule("c1", first).await.unwrap();
        registry.cancel("c1").await.unwrap().cancel().await;

        registry
            .schedule("c1", idle_task("c1", armed.clone()))
            .await
            .unwrap();

        assert!(!registry.deregister_if("c1", stale_id).await);
        assert!(registry.is_monitored("c1").await);

        let current = registry.task_id("c1").await.unwrap();
        assert!(registry.deregister_if("c1", current).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_schedules_admit_exactly_one() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));

        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                let armed = armed.clone();
                tokio::spawn(async move { registry.schedule("c1", idle_task("c1", armed)).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(registry.len().await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.shutdown().await, 1);
        assert_eq!(armed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_task_cancels_it() {
        let task = MonitorTask::spawn("c1", |ctx| async move {
            ctx.token().cancelled().await;
        });
        let token = task.token.clone();
        drop(task);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_is_refused() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));
        assert_eq!(registry.shutdown().await, 0);
        assert!(registry.is_closed());

        let err = registry
            .schedule("c1", idle_task("c1", armed.clone()))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::Closed);
        assert!(registry.is_empty().await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(armed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_name() {
        let registry = MonitorRegistry::new();
        let armed = Arc::new(AtomicU32::new(0));
        for name in ["web-2", "db-1", "web-1"] {
            registry
                .schedule(name, idle_task(name, armed.clone()))
                .await
                .unwrap();
        }

        let names: Vec<String> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|s| s.container)
            .collect();
        assert_eq!(names, vec!["db-1", "web-1", "web-2"]);
        assert_eq!(registry.shutdown().await, 3);
        assert!(registry.is_empty().await);
    }
}
