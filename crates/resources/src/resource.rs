//! Bulkhead facade
//!
//! Chooses the shared pool when the platform supports it, otherwise a
//! pass-through pool with a one-time warning.

use std::time::{Duration, Instant};

use bulwark_config::constants::INTERNAL_LOCK_TIMEOUT;
use bulwark_config::{ResourceOptions, TicketPolicy};
use bulwark_errors::Error;
use bulwark_events::{warn_once, EventEmitter, SyncEvent};
use bulwark_platform::{Capabilities, PlatformContext};

use crate::limits::validate;
#[cfg(unix)]
use crate::pool::SysvTicketPool;
use crate::pool::{millis, unavailable, LocalTicketPool, PassThroughPool, TicketPool};

/// A named bulkhead limiting concurrent use of a resource across processes
#[derive(Debug)]
pub struct Resource {
    name: String,
    policy: TicketPolicy,
    timeout: Duration,
    pool: Box<dyn TicketPool>,
    context: PlatformContext,
}

/// A held ticket; returned to the pool on drop
///
/// If the process dies while holding it, the kernel returns it instead.
#[derive(Debug)]
#[must_use = "the ticket is returned as soon as it is dropped"]
pub struct Ticket<'a> {
    resource: &'a Resource,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.resource.pool.give() {
            tracing::warn!(resource = %self.resource.name, error = %err, "failed to return ticket");
        }
    }
}

impl Resource {
    /// Open the bulkhead described by `options`
    ///
    /// Registers this process as a worker and sizes the pool to the policy.
    /// A different fixed count than the one the pool holds resizes it for
    /// every process.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid policy, or if the kernel objects
    /// cannot be opened or resized.
    pub fn open(context: &PlatformContext, options: &ResourceOptions) -> Result<Self, Error> {
        validate(options.policy)?;
        let pool = Self::pool_for(context, options, true)?;
        pool.sync_tickets(INTERNAL_LOCK_TIMEOUT)?;
        Self::assemble(context, options, pool)
    }

    /// Join the bulkhead without registering a worker or resizing it
    ///
    /// For inspecting or removing a bulkhead other processes use.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel objects cannot be opened.
    pub fn attach(context: &PlatformContext, options: &ResourceOptions) -> Result<Self, Error> {
        let pool = Self::pool_for(context, options, false)?;
        Self::assemble(context, options, pool)
    }

    fn pool_for(
        context: &PlatformContext,
        options: &ResourceOptions,
        register: bool,
    ) -> Result<Box<dyn TicketPool>, Error> {
        let pool: Box<dyn TicketPool> = match open_shared(context, options, register)? {
            Some(pool) => pool,
            None => {
                let reason = context
                    .capabilities()
                    .missing()
                    .unwrap_or("disabled by configuration");
                warn_once(
                    "resource.semaphores_disabled",
                    context,
                    SyncEvent::SemaphoresDisabled {
                        reason: format!("bulkheads admit every caller: {reason}"),
                    },
                );
                Box::new(PassThroughPool::new(
                    options.policy,
                    options.quota_minimum_tickets,
                ))
            }
        };
        Ok(pool)
    }

    /// Open a bulkhead in the in-process table regardless of platform support
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid policy.
    pub fn open_local(options: &ResourceOptions) -> Result<Self, Error> {
        validate(options.policy)?;
        let context = PlatformContext::with_capabilities(Capabilities::disabled(), None);
        let pool = LocalTicketPool::open(
            &options.name,
            options.policy,
            options.quota_minimum_tickets,
        );
        pool.sync_tickets(INTERNAL_LOCK_TIMEOUT)?;
        Self::assemble(&context, options, Box::new(pool))
    }

    fn assemble(
        context: &PlatformContext,
        options: &ResourceOptions,
        pool: Box<dyn TicketPool>,
    ) -> Result<Self, Error> {
        let resource = Self {
            name: options.name.clone(),
            policy: options.policy,
            timeout: options.timeout,
            pool,
            context: context.clone(),
        };
        tracing::debug!(resource = %resource.name, shared = resource.is_shared(), policy = ?resource.policy, "opened bulkhead");
        Ok(resource)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn policy(&self) -> TicketPolicy {
        self.policy
    }

    /// Default timeout from the options this handle was opened with
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.pool.is_shared()
    }

    /// Take a ticket, waiting up to `timeout`; zero tries once
    ///
    /// Quota pools, and pools with an unfinished shrink, re-sync their
    /// ticket count first within the same `timeout`.
    ///
    /// # Errors
    ///
    /// `SyncError::TicketUnavailable` if no ticket came free in time,
    /// `SyncError::Internal` if the resource was destroyed.
    pub fn acquire(&self, timeout: Duration) -> Result<Ticket<'_>, Error> {
        let deadline = Instant::now() + timeout;
        if matches!(self.policy, TicketPolicy::Quota(_)) || self.pool.resize_pending() {
            self.pool.sync_tickets(timeout.min(INTERNAL_LOCK_TIMEOUT))?;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.pool.take(remaining) {
            Ok(()) => Ok(Ticket { resource: self }),
            Err(err) if err.is_ticket_unavailable() => {
                let timeout_ms = millis(timeout);
                tracing::debug!(resource = %self.name, timeout_ms, "ticket unavailable");
                self.context.emit_sync(SyncEvent::TicketRejected {
                    name: self.name.clone(),
                    timeout_ms,
                });
                Err(unavailable(&self.name, timeout))
            }
            Err(err) => Err(err),
        }
    }

    /// Run `body` while holding a ticket
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire).
    pub fn acquire_with<T>(
        &self,
        timeout: Duration,
        body: impl FnOnce(&Self) -> T,
    ) -> Result<T, Error> {
        let _ticket = self.acquire(timeout)?;
        Ok(body(self))
    }

    /// Configured ticket count
    ///
    /// While a shrink waits for holders this is the count applied so far,
    /// not the target.
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the resource was destroyed.
    pub fn tickets(&self) -> Result<u32, Error> {
        self.pool.tickets()
    }

    /// Tickets not currently held by any process
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the resource was destroyed.
    pub fn available(&self) -> Result<u32, Error> {
        self.pool.available()
    }

    /// Tickets currently held by any process
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the resource was destroyed.
    pub fn count(&self) -> Result<u32, Error> {
        self.pool.held()
    }

    /// Processes registered against this bulkhead
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the resource was destroyed.
    pub fn registered_workers(&self) -> Result<u32, Error> {
        self.pool.registered_workers()
    }

    /// Withdraw this process's worker registration
    ///
    /// Quota pools shrink on the next acquire.
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the resource was destroyed.
    pub fn unregister_worker(&self) -> Result<(), Error> {
        self.pool.unregister_worker()
    }

    /// Id of the backing semaphore set, if there is one
    #[must_use]
    pub fn semid(&self) -> Option<i32> {
        self.pool.semid()
    }

    /// Remove the bulkhead's kernel objects
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if they were already removed.
    pub fn destroy(&self) -> Result<(), Error> {
        self.pool.destroy()?;
        tracing::info!(resource = %self.name, "destroyed bulkhead");
        Ok(())
    }
}

#[cfg(unix)]
fn open_shared(
    context: &PlatformContext,
    options: &ResourceOptions,
    register: bool,
) -> Result<Option<Box<dyn TicketPool>>, Error> {
    if !context.sync_enabled() {
        return Ok(None);
    }
    let join = if register {
        SysvTicketPool::open
    } else {
        SysvTicketPool::join
    };
    let pool = join(
        context,
        &options.name,
        options.policy,
        options.quota_minimum_tickets,
        options.permissions,
    )?;
    Ok(Some(Box::new(pool)))
}

#[cfg(not(unix))]
fn open_shared(
    _context: &PlatformContext,
    _options: &ResourceOptions,
    _register: bool,
) -> Result<Option<Box<dyn TicketPool>>, Error> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_errors::SyncError;
    use bulwark_events::AppEvent;

    fn options(name: &str) -> ResourceOptions {
        ResourceOptions::new(format!("facade-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_ticket_returns_on_drop() {
        let resource = Resource::open_local(&options("drop").tickets(1)).unwrap();
        {
            let _ticket = resource.acquire(Duration::ZERO).unwrap();
            assert_eq!(resource.count().unwrap(), 1);
            let err = resource.acquire(Duration::ZERO).unwrap_err();
            assert!(err.is_ticket_unavailable());
            assert!(err.is_timeout());
        }
        assert_eq!(resource.count().unwrap(), 0);
        resource.destroy().unwrap();
    }

    #[test]
    fn test_acquire_with_runs_body_holding_ticket() {
        let resource = Resource::open_local(&options("with").tickets(2)).unwrap();
        let held = resource
            .acquire_with(Duration::ZERO, |r| r.count().unwrap())
            .unwrap();
        assert_eq!(held, 1);
        assert_eq!(resource.count().unwrap(), 0);
        resource.destroy().unwrap();
    }

    #[test]
    fn test_invalid_policies_are_rejected() {
        let err = Resource::open_local(&options("zero").tickets(0)).unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::InvalidCapacity { .. })));
        let err = Resource::open_local(&options("quota").quota(2.0)).unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::InvalidQuota { .. })));
    }

    #[test]
    fn test_disabled_context_passes_through() {
        let (tx, mut rx) = bulwark_events::channel();
        let context = PlatformContext::with_capabilities(Capabilities::disabled(), Some(tx));
        let resource = Resource::open(&context, &options("passthrough").tickets(1)).unwrap();
        assert!(!resource.is_shared());
        assert_eq!(resource.semid(), None);

        let _first = resource.acquire(Duration::ZERO).unwrap();
        let _second = resource.acquire(Duration::ZERO).unwrap();
        assert_eq!(resource.count().unwrap(), 0);

        // The warning may already have fired from another test in this process
        while let Ok(message) = rx.try_recv() {
            assert!(matches!(
                message.event,
                AppEvent::Sync(SyncEvent::SemaphoresDisabled { .. })
            ));
        }
    }

    #[test]
    fn test_quota_follows_workers() {
        let opts = options("quota-workers").quota(0.5);
        let first = Resource::open_local(&opts).unwrap();
        let second = Resource::open_local(&opts).unwrap();
        let third = Resource::open_local(&opts).unwrap();
        assert_eq!(third.registered_workers().unwrap(), 3);
        assert_eq!(third.tickets().unwrap(), 2);

        third.unregister_worker().unwrap();
        second.unregister_worker().unwrap();
        drop(first.acquire(Duration::ZERO).unwrap());
        assert_eq!(first.tickets().unwrap(), 1);
        first.destroy().unwrap();
    }

    #[test]
    fn test_zero_timeout_acquire_fails_fast_after_worker_leaves() {
        let opts = options("quota-fail-fast").quota(1.0);
        let first = Resource::open_local(&opts).unwrap();
        let second = Resource::open_local(&opts).unwrap();
        let held_first = first.acquire(Duration::ZERO).unwrap();
        let held_second = second.acquire(Duration::ZERO).unwrap();

        second.unregister_worker().unwrap();
        let started = Instant::now();
        let err = first.acquire(Duration::ZERO).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(err.is_ticket_unavailable());
        assert_eq!(first.count().unwrap(), 2);
        drop(held_second);
        drop(held_first);
        first.destroy().unwrap();
    }
}
