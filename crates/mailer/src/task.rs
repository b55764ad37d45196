//! Single-slot background task with one exclusive waiter.

use std::{
    future::Future,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;

use crate::{Error, Result};

struct Running<T> {
    generation: u64,
    done: watch::Receiver<Option<T>>,
    waiting: bool,
}

struct Slot<T> {
    generation: u64,
    running: Option<Running<T>>,
}

/// Owns at most one spawned task at a time.
///
/// The slot returns to "no task" as soon as the task finishes, so a handle can
/// be started again afterwards.
pub struct TaskHandle<T> {
    slot: Arc<Mutex<Slot<T>>>,
    idle: Arc<watch::Sender<bool>>,
}

impl<T> Default for TaskHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the slot when the task finishes or unwinds.
struct Release<T> {
    slot: Arc<Mutex<Slot<T>>>,
    idle: Arc<watch::Sender<bool>>,
    generation: u64,
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot
            .running
            .as_ref()
            .is_some_and(|r| r.generation == self.generation)
        {
            slot.running = None;
            self.idle.send_replace(true);
        }
    }
}

/// Clears the waiting flag if the waiter is dropped early.
struct WaitGuard<'a, T> {
    slot: &'a Mutex<Slot<T>>,
    generation: u64,
}

impl<T> Drop for WaitGuard<'_, T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = slot.running.as_mut()
            && running.generation == self.generation
        {
            running.waiting = false;
        }
    }
}

impl<T> TaskHandle<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                running: None,
            })),
            idle: Arc::new(watch::Sender::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
            .is_some()
    }

    /// Resolve once no task is running. Does not count as a waiter.
    pub async fn idle(&self) {
        let mut rx = self.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

impl<T> TaskHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `future` unless a task is already running.
    pub fn start<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.running.is_some() {
            return Err(Error::TaskAlreadyStarted);
        }

        slot.generation += 1;
        let generation = slot.generation;
        let (tx, rx) = watch::channel(None);
        slot.running = Some(Running {
            generation,
            done: rx,
            waiting: false,
        });
        self.idle.send_replace(false);

        let release = Release {
            slot: Arc::clone(&self.slot),
            idle: Arc::clone(&self.idle),
            generation,
        };
        drop(slot);

        tokio::spawn(async move {
            let output = future.await;
            drop(release);
            tx.send_replace(Some(output));
        });
        Ok(())
    }

    /// Wait for the running task and return its output.
    pub async fn wait(&self) -> Result<T> {
        let (mut done, generation) = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            let running = slot.running.as_mut().ok_or(Error::NoTask)?;
            if running.waiting {
                return Err(Error::AlreadyWaiting);
            }
            running.waiting = true;
            (running.done.clone(), running.generation)
        };
        let _guard = WaitGuard {
            slot: &self.slot,
            generation,
        };

        let output = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::TaskAborted)?;
        let value = (*output).clone();
        value.ok_or(Error::TaskAborted)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration, tokio::sync::oneshot};

    #[tokio::test]
    async fn wait_returns_output_and_resets() {
        let handle = TaskHandle::new();
        handle.start(async { 7 }).unwrap();
        assert!(handle.is_running());

        assert_eq!(handle.wait().await.unwrap(), 7);
        assert!(!handle.is_running());
        assert!(matches!(handle.wait().await, Err(Error::NoTask)));

        handle.start(async { 8 }).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let handle = TaskHandle::new();
        let (tx, rx) = oneshot::channel::<()>();
        handle
            .start(async move {
                let _ = rx.await;
            })
            .unwrap();

        assert!(matches!(
            handle.start(async {}),
            Err(Error::TaskAlreadyStarted)
        ));
        tx.send(()).unwrap();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn second_waiter_is_rejected() {
        let handle = Arc::new(TaskHandle::new());
        let (tx, rx) = oneshot::channel::<()>();
        handle
            .start(async move {
                let _ = rx.await;
                "done"
            })
            .unwrap();

        let first = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.wait().await }
        });
        tokio::task::yield_now().await;
        while !handle.slot.lock().unwrap().running.as_ref().unwrap().waiting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(matches!(handle.wait().await, Err(Error::AlreadyWaiting)));
        tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn dropped_waiter_frees_the_slot() {
        let handle = TaskHandle::new();
        let (tx, rx) = oneshot::channel::<()>();
        handle
            .start(async move {
                let _ = rx.await;
                1
            })
            .unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(10), handle.wait()).await;
        assert!(timed_out.is_err());

        tx.send(()).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn idle_resolves_after_completion() {
        let handle = TaskHandle::new();
        handle.idle().await;
        handle
            .start(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
            })
            .unwrap();
        handle.idle().await;
        assert!(!handle.is_running());
    }
}
