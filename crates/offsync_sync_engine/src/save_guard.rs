//! Single-flight guard for "save the current session" operations.

use crate::listeners::{Registry, Subscription};
use parking_lot::Mutex;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// State of a save slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    /// Nothing saved yet, or reset.
    Idle,
    /// A save is running.
    Saving,
    /// The save completed; further saves are skipped until reset.
    Saved,
    /// The last save failed; a new save may be attempted.
    Error,
}

impl SaveState {
    /// Returns true if a new save would be skipped in this state.
    pub fn blocks_save(self) -> bool {
        matches!(self, SaveState::Saving | SaveState::Saved)
    }
}

/// Ensures at most one save runs per slot, and none after a success.
///
/// `Idle -> Saving -> Saved | Error`; [`SaveGuard::reset`] returns to `Idle`
/// from any state. The state is checked once without the lock to skip
/// cheaply, then again under the lock before starting.
pub struct SaveGuard {
    state: Mutex<SaveState>,
    lock: tokio::sync::Mutex<()>,
    listeners: Registry<SaveState>,
}

impl SaveGuard {
    /// Creates an idle guard.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SaveState::Idle),
            lock: tokio::sync::Mutex::new(()),
            listeners: Registry::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SaveState {
        *self.state.lock()
    }

    /// Returns to `Idle` so the slot can be saved again.
    pub fn reset(&self) {
        self.transition(SaveState::Idle);
    }

    /// Calls `callback` with each new state.
    pub fn on_state_change(
        &self,
        callback: impl Fn(SaveState) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(callback)
    }

    /// Runs `operation` unless a save is running or already succeeded.
    ///
    /// Returns `Ok(None)` when skipped, `Ok(Some(value))` on success. An
    /// operation error is returned as-is and leaves the guard in `Error`.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `operation`.
    pub async fn save<T, E, F, Fut>(&self, operation: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.state().blocks_save() {
            tracing::debug!(state = ?self.state(), "save skipped");
            return Ok(None);
        }

        let _held = self.lock.lock().await;
        self.run_locked(operation).await
    }

    /// Like [`SaveGuard::save`], but gives up while waiting for the lock, or
    /// right after acquiring it, if `cancel` has fired. Once started the
    /// operation runs to completion.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `operation`.
    pub async fn save_unless_cancelled<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancel.is_cancelled() || self.state().blocks_save() {
            return Ok(None);
        }

        let _held = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(None),
            held = self.lock.lock() => held,
        };
        if cancel.is_cancelled() {
            tracing::debug!("caller went away before save started");
            return Ok(None);
        }
        self.run_locked(operation).await
    }

    async fn run_locked<T, E, F, Fut>(&self, operation: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.state().blocks_save() {
            return Ok(None);
        }

        self.transition(SaveState::Saving);
        let mut running = Running {
            guard: self,
            settled: false,
        };
        let result = operation().await;
        running.settled = true;

        match result {
            Ok(value) => {
                self.transition(SaveState::Saved);
                Ok(Some(value))
            }
            Err(e) => {
                self.transition(SaveState::Error);
                Err(e)
            }
        }
    }

    fn transition(&self, next: SaveState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        self.listeners.emit(&next);
    }
}

/// Moves an abandoned save to `Error` when the `save` future is dropped
/// before the operation finished.
struct Running<'a> {
    guard: &'a SaveGuard,
    settled: bool,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("save dropped while running");
            self.guard.transition(SaveState::Error);
        }
    }
}

impl Default for SaveGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn saves_once() {
        let guard = SaveGuard::new();
        let runs = AtomicUsize::new(0);
        let counter = &runs;

        let first: Result<_, ()> = guard
            .save(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(first, Ok(Some(7)));
        assert_eq!(guard.state(), SaveState::Saved);

        let second: Result<Option<i32>, ()> = guard
            .save(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(8)
            })
            .await;
        assert_eq!(second, Ok(None));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_saves_run_once() {
        let guard = SaveGuard::new();
        let runs = AtomicUsize::new(0);
        let counter = &runs;
        let op = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ()>(())
        };

        let (a, b) = tokio::join!(guard.save(op), guard.save(op));

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            [a, b].iter().filter(|r| matches!(r, Ok(Some(())))).count(),
            1
        );
        assert_eq!(guard.state(), SaveState::Saved);
    }

    #[tokio::test]
    async fn failure_allows_another_attempt() {
        let guard = SaveGuard::new();

        let failed = guard.save(|| async { Err::<(), _>("offline") }).await;
        assert_eq!(failed, Err("offline"));
        assert_eq!(guard.state(), SaveState::Error);

        let retried = guard.save(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(retried, Ok(Some(())));
        assert_eq!(guard.state(), SaveState::Saved);
    }

    #[tokio::test]
    async fn reset_reopens_the_slot() {
        let guard = SaveGuard::new();
        guard.save(|| async { Ok::<_, ()>(()) }).await.unwrap();

        guard.reset();
        assert_eq!(guard.state(), SaveState::Idle);
        assert_eq!(guard.save(|| async { Ok::<_, ()>(1) }).await, Ok(Some(1)));
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let guard = SaveGuard::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = {
            let seen = Arc::clone(&seen);
            guard.on_state_change(move |s| seen.lock().push(s))
        };

        guard.save(|| async { Ok::<_, ()>(()) }).await.unwrap();
        guard.reset();
        guard.reset();
        assert_eq!(
            *seen.lock(),
            vec![SaveState::Saving, SaveState::Saved, SaveState::Idle]
        );

        sub.unsubscribe();
        let _ = guard.save(|| async { Err::<(), _>(()) }).await;
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_caller_skips() {
        let guard = SaveGuard::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = guard
            .save_unless_cancelled(&cancel, || async { Ok::<_, ()>(()) })
            .await;
        assert_eq!(result, Ok(None));
        assert_eq!(guard.state(), SaveState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_skips_while_save_runs() {
        let guard = Arc::new(SaveGuard::new());
        let cancel = CancellationToken::new();

        let slow = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .save(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Err::<(), _>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(guard.state(), SaveState::Saving);

        let waiter = {
            let guard = Arc::clone(&guard);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                guard
                    .save_unless_cancelled(&cancel, || async { Ok::<_, ()>(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Ok(None));
        assert_eq!(slow.await.unwrap(), Err(()));
        assert_eq!(guard.state(), SaveState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_save_does_not_wedge_the_slot() {
        let guard = SaveGuard::new();
        let runs = AtomicUsize::new(0);
        let counter = &runs;

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            guard.save(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ()>(())
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(guard.state(), SaveState::Error);

        let retried = guard
            .save(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(2)
            })
            .await;
        assert_eq!(retried, Ok(Some(2)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(guard.state(), SaveState::Saved);
    }
}
