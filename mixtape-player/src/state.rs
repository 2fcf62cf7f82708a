//! Waitable pipeline state
//!
//! Single-slot holder of the last engine-confirmed [`State`] plus waiters
//! keyed by the state they want to see. A waiter resolves the first time its
//! state is confirmed *after* it registered; the value current at
//! registration never counts.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use mixtape_common::State;

struct Slot {
    current: State,
    waiters: HashMap<State, Vec<oneshot::Sender<Result<()>>>>,
}

/// Last confirmed state with per-state waiters
pub struct WaitableState {
    slot: Mutex<Slot>,
}

impl WaitableState {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                current: State::Null,
                waiters: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last confirmed state
    pub fn current(&self) -> State {
        self.lock().current
    }

    /// Wait for the next confirmation of `target`
    ///
    /// Registration happens when this is called, not when the future is
    /// first polled.
    pub fn wait_for(&self, target: State) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.lock().waiters.entry(target).or_default().push(tx);

        async move {
            rx.await
                .map_err(|_| Error::Closed(format!("state waiter for {} dropped", target)))?
        }
    }

    /// Record a confirmed state and resolve every waiter for exactly it
    pub fn pick(&self, new_state: State) {
        let resolved = {
            let mut slot = self.lock();
            slot.current = new_state;
            slot.waiters.remove(&new_state).unwrap_or_default()
        };
        for waiter in resolved {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Resolve every pending waiter with `err`
    pub fn fail_all(&self, err: Error) {
        let waiters: Vec<_> = self.lock().waiters.drain().flat_map(|(_, v)| v).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Resolve every waiter not registered for `keep` with the error built
    /// for its state
    pub fn fail_except<F>(&self, keep: State, err: F)
    where
        F: Fn(State) -> Error,
    {
        let failed: HashMap<State, Vec<_>> = {
            let mut slot = self.lock();
            let (kept, failed) = std::mem::take(&mut slot.waiters)
                .into_iter()
                .partition(|(state, _)| *state == keep);
            slot.waiters = kept;
            failed
        };
        for (state, waiters) in failed {
            for waiter in waiters {
                let _ = waiter.send(Err(err(state)));
            }
        }
    }

    /// Number of registered waiters still pending
    pub fn waiter_count(&self) -> usize {
        self.lock()
            .waiters
            .values()
            .flatten()
            .filter(|w| !w.is_closed())
            .count()
    }
}

impl Default for WaitableState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitableState")
            .field("current", &self.current())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_waiter_registered_before_pick_resolves() {
        let state = WaitableState::new();
        let wait = state.wait_for(State::Playing);
        state.pick(State::Playing);

        timeout(Duration::from_millis(100), wait)
            .await
            .expect("waiter should resolve")
            .expect("waiter should succeed");
        assert_eq!(state.current(), State::Playing);
    }

    #[tokio::test]
    async fn test_waiter_registered_after_pick_is_not_retroactive() {
        let state = WaitableState::new();
        state.pick(State::Playing);
        let wait = state.wait_for(State::Playing);

        tokio::pin!(wait);
        assert!(timeout(Duration::from_millis(20), &mut wait).await.is_err());

        state.pick(State::Playing);
        assert!(timeout(Duration::from_millis(100), wait).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_multiple_waiters_and_other_states() {
        let state = WaitableState::new();
        let a = state.wait_for(State::Paused);
        let b = state.wait_for(State::Paused);
        let other = state.wait_for(State::Playing);

        state.pick(State::Paused);
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());
        assert_eq!(state.waiter_count(), 1);

        tokio::pin!(other);
        assert!(timeout(Duration::from_millis(20), &mut other).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_all_delivers_error() {
        let state = WaitableState::new();
        let wait = state.wait_for(State::Playing);
        state.fail_all(Error::TornDown);
        assert_eq!(wait.await, Err(Error::TornDown));
        assert_eq!(state.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_except_keeps_matching_waiters() {
        let state = WaitableState::new();
        let playing = state.wait_for(State::Playing);
        let null = state.wait_for(State::Null);

        state.fail_except(State::Null, |target| Error::Superseded {
            target,
            by: State::Null,
        });
        assert_eq!(
            playing.await,
            Err(Error::Superseded {
                target: State::Playing,
                by: State::Null
            })
        );
        assert_eq!(state.waiter_count(), 1);

        state.pick(State::Null);
        assert!(null.await.is_ok());
    }

    #[test]
    fn test_pick_without_waiters_only_updates_current() {
        let state = WaitableState::new();
        assert_eq!(state.current(), State::Null);
        state.pick(State::Ready);
        assert_eq!(state.current(), State::Ready);
    }
}
