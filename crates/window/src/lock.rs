//! Named cross-process lock that the kernel releases when its holder dies
//!
//! Backed by a one-semaphore SysV set whose take carries `SEM_UNDO`. A
//! process killed inside a section, even by `SIGKILL`, has its decrement
//! reverted by the kernel, so the next waiter gets in.

use std::time::Duration;

use bulwark_errors::Error;
use bulwark_events::{EventEmitter, ObjectKind, SyncEvent};
use bulwark_hash::{derive_key, IpcKey, KeySpace};
use bulwark_platform::sysv::{SemOp, SemaphoreSet};
use bulwark_platform::PlatformContext;

use crate::backend::{millis, sync_error};

const LOCK: u16 = 0;

/// A mutex shared by every process that opens the same name
#[derive(Debug)]
pub struct CrossProcessLock {
    name: String,
    key: IpcKey,
    semaphores: SemaphoreSet,
    context: PlatformContext,
}

/// Proof that the lock is held; releases it on drop
#[derive(Debug)]
#[must_use = "the lock is released as soon as the section is dropped"]
pub struct ExclusiveSection<'a> {
    lock: &'a CrossProcessLock,
}

impl Drop for ExclusiveSection<'_> {
    fn drop(&mut self) {
        if let Err(err) = self
            .lock
            .semaphores
            .apply(&[SemOp::give(LOCK)], Duration::ZERO)
        {
            // Expected after destroy removed the set under us
            tracing::debug!(lock = %self.lock.name, error = %err, "lock release failed");
        }
    }
}

impl CrossProcessLock {
    /// Open the lock called `name`, creating it unlocked if absent
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or the semaphore set cannot be
    /// created or joined.
    pub fn open(context: &PlatformContext, name: &str, permissions: u32) -> Result<Self, Error> {
        let key = derive_key(KeySpace::Window, name)?;
        let (semaphores, created) = SemaphoreSet::open(key, &[1], permissions)
            .map_err(|err| sync_error(name, "open", Duration::ZERO, &err))?;
        tracing::debug!(lock = name, key = %key, semid = semaphores.id(), created, "opened lock");
        Ok(Self {
            name: name.to_string(),
            key,
            semaphores,
            context: context.clone(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> IpcKey {
        self.key
    }

    /// Id of the backing semaphore set
    #[must_use]
    pub fn semid(&self) -> i32 {
        self.semaphores.id()
    }

    /// Wait up to `timeout` for the lock; zero tries exactly once
    ///
    /// # Errors
    ///
    /// `SyncError::Timeout` if the lock stayed busy, `SyncError::Internal`
    /// if the semaphore set was removed.
    pub fn acquire(&self, timeout: Duration) -> Result<ExclusiveSection<'_>, Error> {
        self.semaphores
            .apply(&[SemOp::take(LOCK)], timeout)
            .map_err(|err| {
                if err.is_would_block() {
                    self.context.emit_sync(SyncEvent::LockTimedOut {
                        kind: ObjectKind::Window,
                        name: self.name.clone(),
                        timeout_ms: millis(timeout),
                    });
                }
                sync_error(&self.name, "acquire", timeout, &err)
            })?;
        Ok(ExclusiveSection { lock: self })
    }

    /// Run `body` while holding the lock
    ///
    /// The lock is released before this returns, including when `body`
    /// panics.
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire).
    pub fn execute_atomically<T>(
        &self,
        timeout: Duration,
        body: impl FnOnce() -> T,
    ) -> Result<T, Error> {
        let _section = self.acquire(timeout)?;
        Ok(body())
    }

    /// Remove the semaphore set; every handle fails afterwards
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the set is already gone.
    pub fn destroy(&self) -> Result<(), Error> {
        self.semaphores
            .remove()
            .map_err(|err| sync_error(&self.name, "destroy", Duration::ZERO, &err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_errors::SyncError;
    use bulwark_platform::Capabilities;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn context() -> Option<PlatformContext> {
        let capabilities = Capabilities::detect();
        capabilities
            .sync_enabled()
            .then(|| PlatformContext::with_capabilities(capabilities, None))
    }

    fn unique(name: &str) -> String {
        format!("lock-{name}-{}", std::process::id())
    }

    #[test]
    fn test_second_acquire_times_out_while_held() {
        let Some(ctx) = context() else { return };
        let name = unique("busy");
        let a = CrossProcessLock::open(&ctx, &name, 0o600).unwrap();
        let b = CrossProcessLock::open(&ctx, &name, 0o600).unwrap();
        assert_eq!(a.semid(), b.semid());

        let section = a.acquire(Duration::ZERO).unwrap();
        let err = b.acquire(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());

        drop(section);
        drop(b.acquire(Duration::ZERO).unwrap());
        a.destroy().unwrap();
    }

    #[test]
    fn test_execute_atomically_releases_after_panic() {
        let Some(ctx) = context() else { return };
        let name = unique("panic");
        let lock = Arc::new(CrossProcessLock::open(&ctx, &name, 0o600).unwrap());

        let worker = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.execute_atomically(Duration::ZERO, || panic!("boom"))
                    .unwrap();
            })
        };
        assert!(worker.join().is_err());

        let ran = AtomicBool::new(false);
        lock.execute_atomically(Duration::ZERO, || ran.store(true, Ordering::SeqCst))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
        lock.destroy().unwrap();
    }

    #[test]
    fn test_destroyed_lock_reports_internal() {
        let Some(ctx) = context() else { return };
        let name = unique("gone");
        let lock = CrossProcessLock::open(&ctx, &name, 0o600).unwrap();
        lock.destroy().unwrap();

        let err = lock.acquire(Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::Internal { .. })));
    }
}
