//! Advance guard
//!
//! Non-blocking, in-process reentrancy guard for a room's playback writes.
//! A permit releases the guard on drop. A holder that has kept the guard
//! longer than the timeout is presumed stuck and may be displaced; its permit
//! then releases nothing when it finally drops.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug)]
struct Holder {
    token: u64,
    owner: &'static str,
    acquired_at: Instant,
}

/// Reentrancy guard with timeout-based release
#[derive(Debug)]
pub struct AdvanceGuard {
    holder: Mutex<Option<Holder>>,
    next_token: AtomicU64,
    released: Notify,
    timeout: Duration,
}

/// Proof of holding the guard; dropping it releases
#[derive(Debug)]
pub struct GuardPermit<'a> {
    guard: &'a AdvanceGuard,
    token: u64,
}

impl AdvanceGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            holder: Mutex::new(None),
            next_token: AtomicU64::new(1),
            released: Notify::new(),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Holder>> {
        // The critical sections never panic; recover the data if one somehow did
        self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the guard if it is free (or stale)
    pub fn try_acquire(&self, owner: &'static str) -> Option<GuardPermit<'_>> {
        let mut holder = self.lock();
        if let Some(current) = holder.as_ref() {
            let held_for = current.acquired_at.elapsed();
            if held_for < self.timeout {
                return None;
            }
            warn!(
                "Advance guard held by {} for {:?} (timeout {:?}); taking over for {}",
                current.owner, held_for, self.timeout, owner
            );
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        *holder = Some(Holder {
            token,
            owner,
            acquired_at: Instant::now(),
        });
        Some(GuardPermit { guard: self, token })
    }

    /// Wait up to `wait` for the guard
    pub async fn acquire_timeout(&self, owner: &'static str, wait: Duration) -> Result<GuardPermit<'_>> {
        let deadline = Instant::now() + wait;
        loop {
            let released = self.released.notified();
            if let Some(permit) = self.try_acquire(owner) {
                return Ok(permit);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Conflict(format!(
                    "playback is being changed by {}; try again",
                    self.holder_name().unwrap_or("another writer")
                )));
            }
            // Wake on release, or re-check periodically so a stale holder can be displaced
            let nap = (deadline - now).min(Duration::from_millis(100));
            let _ = tokio::time::timeout(nap, released).await;
        }
    }

    /// Whether a (non-stale) holder currently has the guard
    pub fn is_held(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|h| h.acquired_at.elapsed() < self.timeout)
            .unwrap_or(false)
    }

    fn holder_name(&self) -> Option<&'static str> {
        self.lock().as_ref().map(|h| h.owner)
    }

    fn release(&self, token: u64) {
        let mut holder = self.lock();
        if holder.as_ref().map(|h| h.token) == Some(token) {
            *holder = None;
            drop(holder);
            self.released.notify_waiters();
        }
    }
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let guard = AdvanceGuard::new(Duration::from_secs(10));
        let permit = guard.try_acquire("first").unwrap();
        assert!(guard.is_held());
        assert!(guard.try_acquire("second").is_none());
        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.try_acquire("second").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_holder_is_displaced() {
        let guard = AdvanceGuard::new(Duration::from_secs(10));
        let stuck = guard.try_acquire("stuck").unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = guard.try_acquire("fresh").unwrap();

        // The displaced permit must not release the new holder
        drop(stuck);
        assert!(guard.is_held());
        drop(fresh);
        assert!(!guard.is_held());
    }

    #[tokio::test]
    async fn test_acquire_timeout_waits_for_release() {
        let guard = Arc::new(AdvanceGuard::new(Duration::from_secs(10)));
        let permit = guard.try_acquire("advance").unwrap();

        let waiter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .acquire_timeout("set_track", Duration::from_secs(2))
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(permit);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_gives_up() {
        let guard = AdvanceGuard::new(Duration::from_secs(10));
        let _permit = guard.try_acquire("advance").unwrap();
        let err = guard
            .acquire_timeout("stop", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
