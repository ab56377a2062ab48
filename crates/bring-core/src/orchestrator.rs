//! Bounded task groups.
//!
//! A [`TaskGroup`] owns every task it spawns: joining waits for all of them,
//! whatever their outcome, before returning. Siblings of a failed task keep
//! running; the failure is reported once the group has drained.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{BringError, Result};

pub struct TaskGroup<T> {
    set: JoinSet<(usize, Result<T>)>,
    permits: Arc<Semaphore>,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// A group running at most `width` tasks at once.
    pub fn new(width: usize) -> Self {
        Self {
            set: JoinSet::new(),
            permits: Arc::new(Semaphore::new(width.max(1))),
            spawned: 0,
        }
    }

    /// Queue `task`; it starts as soon as a slot is free.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        let permits = self.permits.clone();
        self.set.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (index, Err(BringError::Task(e.to_string()))),
            };
            (index, task.await)
        });
    }

    /// Wait for every task; results are returned in spawn order.
    ///
    /// A panicked or aborted task yields [`BringError::Task`] in its slot.
    pub async fn join_all(mut self) -> Vec<Result<T>> {
        let mut slots: Vec<Option<Result<T>>> = (0..self.spawned).map(|_| None).collect();
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "task did not complete"),
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(BringError::Task("task panicked or was aborted".to_string()))))
            .collect()
    }

    /// Wait for every task and return their values in spawn order, or the
    /// first error in spawn order.
    ///
    /// # Errors
    ///
    /// Returns the earliest spawned task's error; later errors are logged.
    pub async fn join(self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        let mut first = None;
        for result in self.join_all().await {
            match result {
                Ok(v) => values.push(v),
                Err(e) if first.is_none() => first = Some(e),
                Err(e) => warn!(error = %e, "sibling task also failed"),
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_width_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new(2);
        for i in 0..6 {
            let active = active.clone();
            let peak = peak.clone();
            group.spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            });
        }
        assert_eq!(group.join().await.unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_waits_for_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new(4);
        group.spawn(async { Err(BringError::Config("boom".into())) });
        for _ in 0..3 {
            let finished = finished.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let err = group.join().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panic_becomes_task_error() {
        let mut group: TaskGroup<()> = TaskGroup::new(1);
        let fail = true;
        group.spawn(async move {
            if fail {
                panic!("bad task");
            }
            Ok(())
        });
        group.spawn(async { Ok(()) });
        let results = group.join_all().await;
        assert!(matches!(results[0], Err(BringError::Task(_))));
        assert!(results[1].is_ok());
    }
}
