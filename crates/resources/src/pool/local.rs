//! In-process ticket table
//!
//! Pools with the same name share counts within this process. Used by tests
//! and by callers that want bulkhead accounting without kernel objects.
//! There is no undo on process death here: nothing outlives the process.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bulwark_config::TicketPolicy;
use bulwark_errors::{Error, SyncError};

use super::{unavailable, TicketPool};
use crate::limits::target_tickets;

#[derive(Debug, Default)]
struct Counts {
    configured: u32,
    /// Negative after a shrink while tickets were held
    available: i64,
    workers: u32,
}

#[derive(Debug, Default)]
struct Shared {
    counts: Mutex<Option<Counts>>,
    returned: Condvar,
}

static TABLE: LazyLock<Mutex<HashMap<String, Arc<Shared>>>> = LazyLock::new(Mutex::default);

/// A ticket pool shared by handles in this process
#[derive(Debug)]
pub struct LocalTicketPool {
    name: String,
    policy: TicketPolicy,
    quota_minimum_tickets: u32,
    shared: Arc<Shared>,
}

impl LocalTicketPool {
    /// Join the pool called `name` and register as a worker
    #[must_use]
    pub fn open(name: &str, policy: TicketPolicy, quota_minimum_tickets: u32) -> Self {
        let pool = Self::join(name, policy, quota_minimum_tickets);
        if let Some(counts) = pool.counts().as_mut() {
            counts.workers += 1;
        }
        pool
    }

    /// Join the pool called `name` without registering
    #[must_use]
    pub fn join(name: &str, policy: TicketPolicy, quota_minimum_tickets: u32) -> Self {
        let shared = TABLE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Shared {
                    counts: Mutex::new(Some(Counts::default())),
                    returned: Condvar::new(),
                })
            })
            .clone();
        Self {
            name: name.to_string(),
            policy,
            quota_minimum_tickets,
            shared,
        }
    }

    fn counts(&self) -> MutexGuard<'_, Option<Counts>> {
        self.shared
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_counts<T>(
        &self,
        operation: &str,
        body: impl FnOnce(&mut Counts) -> T,
    ) -> Result<T, Error> {
        let mut guard = self.counts();
        let counts = guard.as_mut().ok_or_else(|| {
            Error::from(SyncError::internal(&self.name, operation, "resource was destroyed"))
        })?;
        Ok(body(counts))
    }
}

impl TicketPool for LocalTicketPool {
    fn take(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.counts();
        loop {
            let Some(counts) = guard.as_mut() else {
                return Err(SyncError::internal(&self.name, "acquire", "resource was destroyed").into());
            };
            if counts.available > 0 {
                counts.available -= 1;
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(unavailable(&self.name, timeout));
            }
            guard = self
                .shared
                .returned
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn give(&self) -> Result<(), Error> {
        self.with_counts("release", |counts| counts.available += 1)?;
        self.shared.returned.notify_one();
        Ok(())
    }

    fn sync_tickets(&self, _wait: Duration) -> Result<(), Error> {
        let minimum = self.quota_minimum_tickets;
        let policy = self.policy;
        self.with_counts("sync_tickets", |counts| {
            let target = target_tickets(policy, counts.workers, minimum);
            counts.available += i64::from(target) - i64::from(counts.configured);
            counts.configured = target;
        })?;
        self.shared.returned.notify_all();
        Ok(())
    }

    fn tickets(&self) -> Result<u32, Error> {
        self.with_counts("tickets", |counts| counts.configured)
    }

    fn available(&self) -> Result<u32, Error> {
        self.with_counts("available", |counts| {
            u32::try_from(counts.available.max(0)).unwrap_or(u32::MAX)
        })
    }

    fn held(&self) -> Result<u32, Error> {
        self.with_counts("held", |counts| {
            let held = i64::from(counts.configured) - counts.available;
            u32::try_from(held.max(0)).unwrap_or(u32::MAX)
        })
    }

    fn registered_workers(&self) -> Result<u32, Error> {
        self.with_counts("registered_workers", |counts| counts.workers)
    }

    fn unregister_worker(&self) -> Result<(), Error> {
        self.with_counts("unregister_worker", |counts| {
            counts.workers = counts.workers.saturating_sub(1);
        })
    }

    fn destroy(&self) -> Result<(), Error> {
        let mut table = TABLE.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(&self.name)
            .is_some_and(|shared| Arc::ptr_eq(shared, &self.shared))
        {
            table.remove(&self.name);
        }
        drop(table);
        *self.counts() = None;
        self.shared.returned.notify_all();
        Ok(())
    }

    fn is_shared(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unique(name: &str) -> String {
        format!("local-pool-{name}-{}", std::process::id())
    }

    #[test]
    fn test_waiter_gets_returned_ticket() {
        let name = unique("wait");
        let pool = LocalTicketPool::open(&name, TicketPolicy::Fixed(1), 1);
        pool.sync_tickets(Duration::ZERO).unwrap();
        pool.take(Duration::ZERO).unwrap();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let other = LocalTicketPool::open(&name, TicketPolicy::Fixed(1), 1);
                other.take(Duration::from_secs(5))
            });
            thread::sleep(Duration::from_millis(20));
            pool.give().unwrap();
            waiter.join().unwrap().unwrap();
        });
        assert_eq!(pool.available().unwrap(), 0);
        pool.destroy().unwrap();
    }

    #[test]
    fn test_shrink_keeps_held_tickets_accounted() {
        let name = unique("shrink");
        let pool = LocalTicketPool::open(&name, TicketPolicy::Fixed(3), 1);
        pool.sync_tickets(Duration::ZERO).unwrap();
        pool.take(Duration::ZERO).unwrap();
        pool.take(Duration::ZERO).unwrap();

        let smaller = LocalTicketPool::open(&name, TicketPolicy::Fixed(1), 1);
        smaller.sync_tickets(Duration::ZERO).unwrap();
        assert_eq!(smaller.tickets().unwrap(), 1);
        assert_eq!(smaller.available().unwrap(), 0);
        assert_eq!(smaller.held().unwrap(), 2);
        assert!(smaller.take(Duration::ZERO).unwrap_err().is_ticket_unavailable());

        pool.give().unwrap();
        assert_eq!(pool.available().unwrap(), 0);
        pool.give().unwrap();
        assert_eq!(pool.available().unwrap(), 1);
        pool.destroy().unwrap();
    }
}
