//! Windows in SysV shared memory, guarded by an undo-on-exit semaphore
//!
//! The lock is a one-semaphore set taken with `SEM_UNDO`, so the kernel
//! hands it back if the holder dies. The entries live in a shared segment
//! under the same key. Resizing relocates them: a new segment is created
//! under the key, the old one is flagged retired and removed, and handles
//! still attached to it re-attach by key the next time they lock.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bulwark_config::constants::{DESTROY_LOCK_TIMEOUT, INTERNAL_LOCK_TIMEOUT};
use bulwark_errors::{Error, SyncError};
use bulwark_events::{EventEmitter, SyncEvent};
use bulwark_hash::IpcKey;
use bulwark_platform::sysv::SharedSegment;
use bulwark_platform::PlatformContext;

use super::{sync_error, WindowBackend};
use crate::lock::CrossProcessLock;
use crate::ring::{words_for, Ring, RingRef};

/// A window shared between processes through SysV IPC
#[derive(Debug)]
pub struct SysvWindow {
    name: String,
    permissions: u32,
    lock: CrossProcessLock,
    segment: Mutex<Option<SharedSegment>>,
    context: PlatformContext,
}

impl SysvWindow {
    /// Join the window called `name`, creating it with `max_size` if absent
    ///
    /// Does not resize an existing window; see [`WindowBackend::resize`].
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel objects cannot be created or joined,
    /// or if the lock stays busy for longer than the internal timeout.
    pub fn open(
        context: &PlatformContext,
        name: &str,
        max_size: usize,
        permissions: u32,
    ) -> Result<Self, Error> {
        let window = Self {
            name: name.to_string(),
            permissions,
            lock: CrossProcessLock::open(context, name, permissions)?,
            segment: Mutex::new(None),
            context: context.clone(),
        };
        {
            let _section = window.lock.acquire(INTERNAL_LOCK_TIMEOUT)?;
            let segment = window.attach_or_create(max_size)?;
            *window.segment() = Some(segment);
        }
        Ok(window)
    }

    #[must_use]
    pub fn key(&self) -> IpcKey {
        self.lock.key()
    }

    /// The lock guarding this window
    #[must_use]
    pub fn lock(&self) -> &CrossProcessLock {
        &self.lock
    }

    fn segment(&self) -> MutexGuard<'_, Option<SharedSegment>> {
        self.segment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn internal(&self, operation: &str, message: impl Into<String>) -> Error {
        SyncError::internal(&self.name, operation, message).into()
    }

    /// Attach to the current segment, creating an empty one if none exists
    ///
    /// Must be called with the lock held.
    fn attach_or_create(&self, max_size: usize) -> Result<SharedSegment, Error> {
        let existing = SharedSegment::open(self.key(), self.permissions)
            .map_err(|err| sync_error(&self.name, "attach", Duration::ZERO, &err))?;
        if let Some(mut segment) = existing {
            if segment.len() < words_for(1) {
                return Err(self.internal("attach", "segment too small for a window"));
            }
            if !RingRef::new(segment.words()).is_initialised() {
                // The creator died before formatting it
                let capacity = segment.len() - words_for(0);
                Ring::format(segment.words_mut(), capacity, &[]);
            }
            return Ok(segment);
        }
        self.create_segment(max_size, &[])
    }

    fn create_segment(&self, max_size: usize, entries: &[i64]) -> Result<SharedSegment, Error> {
        let mut segment = SharedSegment::create(self.key(), words_for(max_size), self.permissions)
            .map_err(|err| sync_error(&self.name, "create", Duration::ZERO, &err))?
            .ok_or_else(|| self.internal("create", "segment key is still in use"))?;
        Ring::format(segment.words_mut(), max_size, entries);
        tracing::debug!(window = %self.name, shmid = segment.id(), max_size, "created window segment");
        Ok(segment)
    }

    /// Make sure `slot` holds the live segment, following a relocation
    ///
    /// Must be called with the lock held.
    fn current<'g>(
        &self,
        slot: &'g mut Option<SharedSegment>,
        operation: &str,
    ) -> Result<&'g mut SharedSegment, Error> {
        let Some(attached) = slot.as_ref() else {
            return Err(self.internal(operation, "window was destroyed"));
        };
        let view = RingRef::new(attached.words());
        if view.is_retired() {
            let capacity = view.capacity();
            let replacement = match SharedSegment::open(self.key(), self.permissions)
                .map_err(|err| sync_error(&self.name, operation, Duration::ZERO, &err))?
            {
                // A resize died after retiring the segment but before
                // removing it; the key still points at the retired one.
                Some(stale) if RingRef::new(stale.words()).is_retired() => {
                    stale
                        .remove()
                        .map_err(|err| sync_error(&self.name, operation, Duration::ZERO, &err))?;
                    let stale_view = RingRef::new(stale.words());
                    self.create_segment(stale_view.capacity(), &stale_view.to_vec())?
                }
                Some(segment) => segment,
                // A resize died between removing the old segment and
                // creating the new one; finish it from the old contents.
                None => self.create_segment(capacity, &view.to_vec())?,
            };
            let max_size = RingRef::new(replacement.words()).capacity();
            tracing::debug!(window = %self.name, shmid = replacement.id(), max_size, "re-attached relocated window");
            self.context.emit_sync(SyncEvent::WindowReattached {
                name: self.name.clone(),
                max_size,
            });
            *slot = Some(replacement);
        }
        slot.as_mut()
            .ok_or_else(|| self.internal(operation, "window was destroyed"))
    }
}

impl WindowBackend for SysvWindow {
    fn with_ring(
        &self,
        timeout: Duration,
        body: &mut dyn FnMut(&mut Ring<'_>),
    ) -> Result<(), Error> {
        let _section = self.lock.acquire(timeout)?;
        let mut slot = self.segment();
        let segment = self.current(&mut slot, "access")?;
        body(&mut Ring::new(segment.words_mut()));
        Ok(())
    }

    fn resize(&self, max_size: usize, timeout: Duration) -> Result<usize, Error> {
        let _section = self.lock.acquire(timeout)?;
        let mut slot = self.segment();
        let old = self.current(&mut slot, "resize")?;
        let previous = RingRef::new(old.words()).capacity();
        if previous == max_size {
            return Ok(previous);
        }

        let kept = RingRef::new(old.words()).newest(max_size);
        Ring::new(old.words_mut()).retire();
        old.remove()
            .map_err(|err| sync_error(&self.name, "resize", Duration::ZERO, &err))?;
        let replacement = self.create_segment(max_size, &kept)?;
        // Dropping the old handle detaches it; the kernel frees it once the
        // last attached process follows the retired flag.
        *slot = Some(replacement);
        Ok(previous)
    }

    fn destroy(&self) -> Result<(), Error> {
        // A holder that stays busy only delays removal; one that died has
        // already been released by the kernel.
        let section = match self.lock.acquire(DESTROY_LOCK_TIMEOUT) {
            Ok(section) => Some(section),
            Err(err) if err.is_timeout() => None,
            Err(err) => return Err(err),
        };
        let mut slot = self.segment();
        if let Some(segment) = slot.take() {
            // Retired segments were removed by whoever relocated them
            if !RingRef::new(segment.words()).is_retired() {
                segment
                    .remove()
                    .map_err(|err| sync_error(&self.name, "destroy", Duration::ZERO, &err))?;
            }
        }
        drop(slot);
        // Whatever lives under the key now, including a segment a peer
        // relocated to after this handle last looked
        if let Some(live) = SharedSegment::open(self.key(), self.permissions)
            .map_err(|err| sync_error(&self.name, "destroy", Duration::ZERO, &err))?
        {
            live.remove()
                .map_err(|err| sync_error(&self.name, "destroy", Duration::ZERO, &err))?;
        }
        drop(section);
        self.lock.destroy()?;
        tracing::debug!(window = %self.name, key = %self.key(), "destroyed window");
        Ok(())
    }

    fn is_shared(&self) -> bool {
        true
    }
}
