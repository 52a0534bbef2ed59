//! Keep-alive scopes around push work.

use std::fmt;

/// Keeps the host from suspending while push work is in progress.
///
/// Push workers hold a guard while they connect, select and process
/// results, and drop it while blocked in IDLE.
pub trait WakeLock: Send + Sync {
    /// Takes the lock until the returned guard is dropped.
    fn acquire(&self) -> WakeGuard;
}

/// Releases a [`WakeLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WakeGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WakeGuard {
    /// A guard that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard that does nothing.
    pub const fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for WakeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeGuard")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// A [`WakeLock`] for hosts that never suspend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) -> WakeGuard {
        WakeGuard::noop()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_guard_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let guard = {
            let released = Arc::clone(&released);
            WakeGuard::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        drop(NoopWakeLock.acquire());
    }
}
