//! Bulkhead tickets in a SysV semaphore set
//!
//! Each resource owns four semaphores under its key:
//!
//! - `TICKETS`: tickets currently free; taken and given with `SEM_UNDO` so
//!   a killed holder's ticket returns to the pool
//! - `CONFIGURED`: the ticket count the pool is sized to
//! - `LOCK`: internal mutex for resizing, also undo-on-exit
//! - `WORKERS`: one undo-on-exit increment per registered process, so the
//!   kernel unregisters workers that die

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bulwark_config::TicketPolicy;
use bulwark_errors::{Error, SyncError};
use bulwark_events::{EventEmitter, ObjectKind, SyncEvent};
use bulwark_hash::{derive_key, IpcKey, KeySpace};
use bulwark_platform::sysv::{SemOp, SemaphoreSet};
use bulwark_platform::PlatformContext;

use super::{sync_error, TicketPool};
use crate::limits::target_tickets;

const TICKETS: u16 = 0;
const CONFIGURED: u16 = 1;
const LOCK: u16 = 2;
const WORKERS: u16 = 3;

/// Initial values: no tickets until the first sync, lock free
const INITIAL: [u16; 4] = [0, 0, 1, 0];

/// A bulkhead shared by every process opening the same name
#[derive(Debug)]
pub struct SysvTicketPool {
    name: String,
    key: IpcKey,
    policy: TicketPolicy,
    quota_minimum_tickets: u32,
    semaphores: SemaphoreSet,
    /// Set while this handle's last sync could not shrink all the way
    shrink_pending: AtomicBool,
    context: PlatformContext,
}

/// Internal resize lock; released on drop
struct ResizeSection<'a> {
    pool: &'a SysvTicketPool,
}

impl Drop for ResizeSection<'_> {
    fn drop(&mut self) {
        if let Err(err) = self
            .pool
            .semaphores
            .apply(&[SemOp::give(LOCK)], Duration::ZERO)
        {
            tracing::debug!(resource = %self.pool.name, error = %err, "resize lock release failed");
        }
    }
}

impl SysvTicketPool {
    /// Join the bulkhead called `name` and register this process as a worker
    ///
    /// # Errors
    ///
    /// Returns an error if the semaphore set cannot be created or joined.
    pub fn open(
        context: &PlatformContext,
        name: &str,
        policy: TicketPolicy,
        quota_minimum_tickets: u32,
        permissions: u32,
    ) -> Result<Self, Error> {
        let pool = Self::join(context, name, policy, quota_minimum_tickets, permissions)?;
        pool.register_worker()?;
        Ok(pool)
    }

    /// Join the bulkhead called `name` without registering as a worker
    ///
    /// # Errors
    ///
    /// Returns an error if the semaphore set cannot be created or joined.
    pub fn join(
        context: &PlatformContext,
        name: &str,
        policy: TicketPolicy,
        quota_minimum_tickets: u32,
        permissions: u32,
    ) -> Result<Self, Error> {
        let key = derive_key(KeySpace::Resource, name)?;
        let (semaphores, created) = SemaphoreSet::open(key, &INITIAL, permissions)
            .map_err(|err| internal(name, "open", &err))?;
        tracing::debug!(resource = name, key = %key, semid = semaphores.id(), created, "opened bulkhead");

        Ok(Self {
            name: name.to_string(),
            key,
            policy,
            quota_minimum_tickets,
            semaphores,
            shrink_pending: AtomicBool::new(false),
            context: context.clone(),
        })
    }

    #[must_use]
    pub fn key(&self) -> IpcKey {
        self.key
    }

    fn register_worker(&self) -> Result<(), Error> {
        self.semaphores
            .apply(&[SemOp::give(WORKERS)], Duration::ZERO)
            .map_err(|err| internal(&self.name, "register_worker", &err))?;
        let workers = self.registered_workers()?;
        tracing::debug!(resource = %self.name, workers, "registered worker");
        self.context.emit_sync(SyncEvent::WorkerRegistered {
            name: self.name.clone(),
            workers,
        });
        Ok(())
    }

    fn read(&self, index: u16, operation: &str) -> Result<u32, Error> {
        let value = self
            .semaphores
            .value(index)
            .map_err(|err| internal(&self.name, operation, &err))?;
        Ok(u32::try_from(value).unwrap_or(0))
    }

    /// One consistent reading of every semaphore in the set
    fn snapshot(&self, operation: &str) -> Result<[u32; 4], Error> {
        let values = self
            .semaphores
            .values()
            .map_err(|err| internal(&self.name, operation, &err))?;
        let mut counts = [0; 4];
        for (count, value) in counts.iter_mut().zip(values) {
            *count = u32::try_from(value).unwrap_or(0);
        }
        Ok(counts)
    }

    fn target(&self, workers: u32) -> u32 {
        target_tickets(self.policy, workers, self.quota_minimum_tickets)
    }

    /// Take the resize lock, or `None` if another process kept it for `wait`
    fn enter_resize(&self, wait: Duration) -> Result<Option<ResizeSection<'_>>, Error> {
        match self.semaphores.apply(&[SemOp::take(LOCK)], wait) {
            Ok(()) => Ok(Some(ResizeSection { pool: self })),
            Err(err) if err.is_would_block() => Ok(None),
            Err(err) => Err(internal(&self.name, "resize", &err)),
        }
    }

    /// Move the free count towards `delta` without waiting for holders
    ///
    /// Growth is applied in full. A shrink removes only the tickets that are
    /// free right now. Returns how far the count moved.
    fn shift_tickets(&self, delta: i64) -> Result<i64, Error> {
        let mut moved = 0;
        while moved != delta {
            let remaining = delta - moved;
            let step = if remaining > 0 {
                remaining.min(i64::from(i16::MAX))
            } else {
                let free = i64::from(self.read(TICKETS, "resize")?);
                if free == 0 {
                    break;
                }
                remaining.max(-free).max(i64::from(i16::MIN))
            };
            let op = i16::try_from(step).unwrap_or(0);
            match self
                .semaphores
                .apply(&[SemOp::adjust(TICKETS, op)], Duration::ZERO)
            {
                Ok(()) => moved += step,
                // a caller took a ticket between the read and the adjust
                Err(err) if err.is_would_block() => {}
                Err(err) => return Err(internal(&self.name, "resize", &err)),
            }
        }
        Ok(moved)
    }
}

impl TicketPool for SysvTicketPool {
    fn take(&self, timeout: Duration) -> Result<(), Error> {
        self.semaphores
            .apply(&[SemOp::take(TICKETS)], timeout)
            .map_err(|err| sync_error(&self.name, "acquire", timeout, &err))
    }

    fn give(&self) -> Result<(), Error> {
        self.semaphores
            .apply(&[SemOp::give(TICKETS)], Duration::ZERO)
            .map_err(|err| internal(&self.name, "release", &err))
    }

    fn sync_tickets(&self, wait: Duration) -> Result<(), Error> {
        let counts = self.snapshot("sync_tickets")?;
        let workers = counts[usize::from(WORKERS)];
        if self.target(workers) == counts[usize::from(CONFIGURED)] {
            self.shrink_pending.store(false, Ordering::Relaxed);
            return Ok(());
        }

        let Some(_section) = self.enter_resize(wait)? else {
            tracing::debug!(resource = %self.name, "resize lock busy, skipping ticket sync");
            return Ok(());
        };
        let workers = self.read(WORKERS, "sync_tickets")?;
        let target = self.target(workers);
        let current = self.read(CONFIGURED, "sync_tickets")?;
        if target == current {
            self.shrink_pending.store(false, Ordering::Relaxed);
            return Ok(());
        }

        let moved = self.shift_tickets(i64::from(target) - i64::from(current))?;
        let configured = u32::try_from(i64::from(current) + moved).unwrap_or(current);
        self.shrink_pending
            .store(configured != target, Ordering::Relaxed);
        if configured == current {
            tracing::debug!(resource = %self.name, configured, target, "no free tickets to shrink yet");
            return Ok(());
        }

        self.semaphores
            .set_value(CONFIGURED, i32::try_from(configured).unwrap_or(i32::MAX))
            .map_err(|err| internal(&self.name, "sync_tickets", &err))?;
        tracing::info!(resource = %self.name, from = current, to = configured, target, workers, "resized bulkhead tickets");
        self.context.emit_sync(SyncEvent::TicketsResized {
            name: self.name.clone(),
            from: current,
            to: configured,
        });
        Ok(())
    }

    fn resize_pending(&self) -> bool {
        self.shrink_pending.load(Ordering::Relaxed)
    }

    fn tickets(&self) -> Result<u32, Error> {
        self.read(CONFIGURED, "tickets")
    }

    fn available(&self) -> Result<u32, Error> {
        self.read(TICKETS, "available")
    }

    fn held(&self) -> Result<u32, Error> {
        let counts = self.snapshot("held")?;
        Ok(counts[usize::from(CONFIGURED)].saturating_sub(counts[usize::from(TICKETS)]))
    }

    fn registered_workers(&self) -> Result<u32, Error> {
        self.read(WORKERS, "registered_workers")
    }

    fn unregister_worker(&self) -> Result<(), Error> {
        self.semaphores
            .apply(&[SemOp::take(WORKERS)], Duration::ZERO)
            .map_err(|err| internal(&self.name, "unregister_worker", &err))
    }

    fn destroy(&self) -> Result<(), Error> {
        self.semaphores
            .remove()
            .map_err(|err| internal(&self.name, "destroy", &err))?;
        tracing::debug!(resource = %self.name, key = %self.key, "destroyed bulkhead");
        self.context.emit_sync(SyncEvent::ObjectDestroyed {
            kind: ObjectKind::Resource,
            name: self.name.clone(),
        });
        Ok(())
    }

    fn semid(&self) -> Option<i32> {
        Some(self.semaphores.id())
    }

    fn is_shared(&self) -> bool {
        true
    }
}

fn internal(name: &str, operation: &str, err: &bulwark_errors::PlatformError) -> Error {
    SyncError::internal(name, operation, err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_platform::Capabilities;

    fn context() -> Option<PlatformContext> {
        let capabilities = Capabilities::detect();
        capabilities
            .sync_enabled()
            .then(|| PlatformContext::with_capabilities(capabilities, None))
    }

    fn unique(name: &str) -> String {
        format!("sysv-pool-{name}-{}", std::process::id())
    }

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn test_fixed_pool_hands_out_tickets() {
        let Some(ctx) = context() else { return };
        let name = unique("fixed");
        let pool = SysvTicketPool::open(&ctx, &name, TicketPolicy::Fixed(2), 1, 0o600).unwrap();
        pool.sync_tickets(WAIT).unwrap();
        assert_eq!(pool.tickets().unwrap(), 2);
        assert_eq!(pool.available().unwrap(), 2);

        pool.take(Duration::ZERO).unwrap();
        pool.take(Duration::ZERO).unwrap();
        let err = pool.take(Duration::ZERO).unwrap_err();
        assert!(err.is_ticket_unavailable());

        pool.give().unwrap();
        assert_eq!(pool.available().unwrap(), 1);
        pool.give().unwrap();
        pool.destroy().unwrap();
    }

    #[test]
    fn test_reconfigured_count_resizes_free_tickets() {
        let Some(ctx) = context() else { return };
        let name = unique("resize");
        let small = SysvTicketPool::open(&ctx, &name, TicketPolicy::Fixed(1), 1, 0o600).unwrap();
        small.sync_tickets(WAIT).unwrap();
        small.take(Duration::ZERO).unwrap();

        let large = SysvTicketPool::open(&ctx, &name, TicketPolicy::Fixed(3), 1, 0o600).unwrap();
        large.sync_tickets(WAIT).unwrap();
        assert_eq!(large.tickets().unwrap(), 3);
        assert_eq!(large.available().unwrap(), 2);

        small.give().unwrap();
        assert_eq!(small.available().unwrap(), 3);
        small.destroy().unwrap();
    }

    #[test]
    fn test_shrink_waits_for_holders_without_blocking() {
        let Some(ctx) = context() else { return };
        let name = unique("deferred");
        let policy = TicketPolicy::Quota(1.0);
        let first = SysvTicketPool::open(&ctx, &name, policy, 1, 0o600).unwrap();
        let second = SysvTicketPool::open(&ctx, &name, policy, 1, 0o600).unwrap();
        second.sync_tickets(WAIT).unwrap();
        first.take(Duration::ZERO).unwrap();
        second.take(Duration::ZERO).unwrap();
        assert_eq!(first.held().unwrap(), 2);

        second.unregister_worker().unwrap();
        let started = std::time::Instant::now();
        first.sync_tickets(Duration::ZERO).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(first.tickets().unwrap(), 2);
        assert!(first.resize_pending());

        // The returned ticket is the one the shrink was waiting for
        second.give().unwrap();
        first.sync_tickets(Duration::ZERO).unwrap();
        assert_eq!(first.tickets().unwrap(), 1);
        assert_eq!(first.available().unwrap(), 0);
        assert_eq!(first.held().unwrap(), 1);
        assert!(!first.resize_pending());

        first.give().unwrap();
        first.destroy().unwrap();
    }

    #[test]
    fn test_busy_resize_lock_skips_sync() {
        let Some(ctx) = context() else { return };
        let name = unique("busy-lock");
        let pool = SysvTicketPool::open(&ctx, &name, TicketPolicy::Fixed(2), 1, 0o600).unwrap();
        let section = pool.enter_resize(WAIT).unwrap().unwrap();

        let started = std::time::Instant::now();
        pool.sync_tickets(Duration::ZERO).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(pool.tickets().unwrap(), 0);

        drop(section);
        pool.sync_tickets(Duration::ZERO).unwrap();
        assert_eq!(pool.tickets().unwrap(), 2);
        pool.destroy().unwrap();
    }

    #[test]
    fn test_quota_tracks_registered_workers() {
        let Some(ctx) = context() else { return };
        let name = unique("quota");
        let policy = TicketPolicy::Quota(0.5);
        let first = SysvTicketPool::open(&ctx, &name, policy, 1, 0o600).unwrap();
        let second = SysvTicketPool::open(&ctx, &name, policy, 1, 0o600).unwrap();
        let third = SysvTicketPool::open(&ctx, &name, policy, 1, 0o600).unwrap();
        assert_eq!(first.registered_workers().unwrap(), 3);

        third.sync_tickets(WAIT).unwrap();
        assert_eq!(first.tickets().unwrap(), 2);

        third.unregister_worker().unwrap();
        second.unregister_worker().unwrap();
        first.sync_tickets(WAIT).unwrap();
        assert_eq!(first.registered_workers().unwrap(), 1);
        assert_eq!(first.tickets().unwrap(), 1);
        first.destroy().unwrap();
    }
}
