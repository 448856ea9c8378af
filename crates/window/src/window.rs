//! Sliding window facade
//!
//! Picks the shared backend when the platform supports it and falls back to
//! the in-process table otherwise, warning once per process. Every read and
//! write goes through the backend's critical section.

use std::time::Duration;

use bulwark_config::constants::{INTERNAL_LOCK_TIMEOUT, WINDOW_CAPACITY_CEILING};
use bulwark_config::WindowOptions;
use bulwark_errors::{Error, SyncError};
use bulwark_events::{warn_once, EventEmitter, ObjectKind, SyncEvent};
use bulwark_hash::IpcKey;
use bulwark_platform::{Capabilities, PlatformContext};

#[cfg(unix)]
use crate::backend::SysvWindow;
use crate::backend::{LocalWindow, WindowBackend};
use crate::ring::Ring;

/// A bounded FIFO of integers shared by every process using the same name
#[derive(Debug)]
pub struct SlidingWindow {
    name: String,
    timeout: Duration,
    key: Option<IpcKey>,
    backend: Box<dyn WindowBackend>,
    context: PlatformContext,
}

impl SlidingWindow {
    /// Open the window described by `options`
    ///
    /// If the window already exists with a different capacity it is resized
    /// to `options.size`, and every other handle observes the new capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or above the platform ceiling,
    /// or if the backing objects cannot be opened.
    pub fn open(context: &PlatformContext, options: &WindowOptions) -> Result<Self, Error> {
        Self::join(context, options, true)
    }

    /// Join the window described by `options` without changing its capacity
    ///
    /// `options.size` is only used if the window does not exist yet.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open).
    pub fn attach(context: &PlatformContext, options: &WindowOptions) -> Result<Self, Error> {
        Self::join(context, options, false)
    }

    fn join(context: &PlatformContext, options: &WindowOptions, adopt_size: bool) -> Result<Self, Error> {
        validate_size(options.size)?;

        if let Some((shared, key)) = open_shared(context, options)? {
            return Self::assemble(context, options, shared, Some(key), adopt_size);
        }

        let reason = context
            .capabilities()
            .missing()
            .unwrap_or("disabled by configuration");
        warn_once(
            "window.semaphores_disabled",
            context,
            SyncEvent::SemaphoresDisabled {
                reason: format!("sliding windows are process-local: {reason}"),
            },
        );
        let local = LocalWindow::open(&options.name, options.size);
        Self::assemble(context, options, Box::new(local), None, adopt_size)
    }

    /// Open a window in the in-process table regardless of platform support
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or above the platform ceiling.
    pub fn open_local(options: &WindowOptions) -> Result<Self, Error> {
        validate_size(options.size)?;
        let context = PlatformContext::with_capabilities(Capabilities::disabled(), None);
        let local = LocalWindow::open(&options.name, options.size);
        Self::assemble(&context, options, Box::new(local), None, true)
    }

    fn assemble(
        context: &PlatformContext,
        options: &WindowOptions,
        backend: Box<dyn WindowBackend>,
        key: Option<IpcKey>,
        adopt_size: bool,
    ) -> Result<Self, Error> {
        let window = Self {
            name: options.name.clone(),
            timeout: options.timeout,
            key,
            backend,
            context: context.clone(),
        };
        if adopt_size {
            window.apply_resize(options.size, INTERNAL_LOCK_TIMEOUT)?;
        }
        tracing::debug!(window = %window.name, shared = window.is_shared(), max_size = options.size, "opened sliding window");
        Ok(window)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel key of the shared objects, `None` for process-local windows
    #[must_use]
    pub fn key(&self) -> Option<IpcKey> {
        self.key
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.backend.is_shared()
    }

    /// Timeout applied to every operation on this handle
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `body` with exclusive access to the window, waiting up to `timeout`
    ///
    /// # Errors
    ///
    /// `SyncError::Timeout` if the lock stayed busy, `SyncError::Internal`
    /// if the window was destroyed.
    pub fn execute_atomically<T>(
        &self,
        timeout: Duration,
        body: impl FnOnce(&mut Ring<'_>) -> T,
    ) -> Result<T, Error> {
        let mut body = Some(body);
        let mut output = None;
        self.backend.with_ring(timeout, &mut |ring| {
            if let Some(body) = body.take() {
                output = Some(body(ring));
            }
        })?;
        output.ok_or_else(|| {
            SyncError::internal(&self.name, "execute_atomically", "section body did not run").into()
        })
    }

    fn locked<T>(&self, body: impl FnOnce(&mut Ring<'_>) -> T) -> Result<T, Error> {
        self.execute_atomically(self.timeout, body)
    }

    /// Append `value`, evicting the oldest entry when full
    ///
    /// # Errors
    ///
    /// Lock failures only; see [`execute_atomically`](Self::execute_atomically).
    pub fn push(&self, value: i64) -> Result<(), Error> {
        self.locked(|ring| ring.push(value))
    }

    /// Remove the oldest entry; `None` on an empty window
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn pop(&self) -> Result<Option<i64>, Error> {
        self.locked(|ring| ring.pop())
    }

    /// Oldest entry
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn first(&self) -> Result<Option<i64>, Error> {
        self.locked(|ring| ring.first())
    }

    /// Newest entry
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn last(&self) -> Result<Option<i64>, Error> {
        self.locked(|ring| ring.last())
    }

    /// Number of entries held
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn size(&self) -> Result<usize, Error> {
        self.locked(|ring| ring.len())
    }

    /// Current capacity, including resizes made by other processes
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn max_size(&self) -> Result<usize, Error> {
        self.locked(|ring| ring.max_size())
    }

    /// Snapshot of the entries, oldest first
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn entries(&self) -> Result<Vec<i64>, Error> {
        self.locked(|ring| ring.to_vec())
    }

    /// Drop every entry, keeping the capacity
    ///
    /// # Errors
    ///
    /// Lock failures only.
    pub fn clear(&self) -> Result<(), Error> {
        self.locked(|ring| ring.clear())
    }

    /// Change the capacity, keeping the `max_size` most recent entries
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` / `CapacityExceeded` for a size outside
    /// `1..=WINDOW_CAPACITY_CEILING`, otherwise lock failures.
    pub fn resize_to(&self, max_size: usize) -> Result<(), Error> {
        validate_size(max_size)?;
        self.apply_resize(max_size, self.timeout)
    }

    fn apply_resize(&self, max_size: usize, timeout: Duration) -> Result<(), Error> {
        let previous = self.backend.resize(max_size, timeout)?;
        if previous != max_size {
            tracing::info!(window = %self.name, from = previous, to = max_size, "resized sliding window");
            self.context.emit_sync(SyncEvent::WindowResized {
                name: self.name.clone(),
                from: previous,
                to: max_size,
            });
        }
        Ok(())
    }

    /// Remove the window's backing objects
    ///
    /// Every handle, in this process or another, fails with
    /// `SyncError::Internal` afterwards; open a new handle to start over.
    ///
    /// # Errors
    ///
    /// `SyncError::Internal` if the objects were already removed.
    pub fn destroy(&self) -> Result<(), Error> {
        self.backend.destroy()?;
        tracing::info!(window = %self.name, "destroyed sliding window");
        self.context.emit_sync(SyncEvent::ObjectDestroyed {
            kind: ObjectKind::Window,
            name: self.name.clone(),
        });
        Ok(())
    }
}

#[cfg(unix)]
fn open_shared(
    context: &PlatformContext,
    options: &WindowOptions,
) -> Result<Option<(Box<dyn WindowBackend>, IpcKey)>, Error> {
    if !context.sync_enabled() {
        return Ok(None);
    }
    let shared = SysvWindow::open(context, &options.name, options.size, options.permissions)?;
    let key = shared.key();
    Ok(Some((Box::new(shared), key)))
}

#[cfg(not(unix))]
fn open_shared(
    _context: &PlatformContext,
    _options: &WindowOptions,
) -> Result<Option<(Box<dyn WindowBackend>, IpcKey)>, Error> {
    Ok(None)
}

fn validate_size(size: usize) -> Result<(), Error> {
    if size == 0 {
        return Err(SyncError::InvalidCapacity { requested: size }.into());
    }
    if size > WINDOW_CAPACITY_CEILING {
        return Err(SyncError::CapacityExceeded {
            requested: size,
            ceiling: WINDOW_CAPACITY_CEILING,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(name: &str, size: usize) -> WindowOptions {
        WindowOptions::new(format!("facade-{name}-{}", std::process::id())).size(size)
    }

    #[test]
    fn test_size_limits() {
        let err = SlidingWindow::open_local(&options("zero", 0)).unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::InvalidCapacity { .. })));

        let err = SlidingWindow::open_local(&options("huge", WINDOW_CAPACITY_CEILING + 1))
            .unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::CapacityExceeded { .. })));

        let window = SlidingWindow::open_local(&options("ceiling", WINDOW_CAPACITY_CEILING)).unwrap();
        assert_eq!(window.max_size().unwrap(), WINDOW_CAPACITY_CEILING);
        assert!(window.resize_to(0).is_err());
        window.destroy().unwrap();
    }

    #[test]
    fn test_execute_atomically_returns_body_value() {
        let window = SlidingWindow::open_local(&options("atomic", 4)).unwrap();
        let len = window
            .execute_atomically(Duration::ZERO, |ring| {
                ring.push(1);
                ring.push(2);
                ring.len()
            })
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(window.pop().unwrap(), Some(1));
        window.destroy().unwrap();
    }

    #[test]
    fn test_disabled_context_falls_back_with_event() {
        let (tx, mut rx) = bulwark_events::channel();
        let context = PlatformContext::with_capabilities(Capabilities::disabled(), Some(tx));
        let window = SlidingWindow::open(&context, &options("fallback", 3)).unwrap();
        assert!(!window.is_shared());
        assert!(window.key().is_none());

        window.push(5).unwrap();
        assert_eq!(window.entries().unwrap(), vec![5]);
        window.destroy().unwrap();

        let mut destroyed = false;
        while let Ok(message) = rx.try_recv() {
            if let bulwark_events::AppEvent::Sync(SyncEvent::ObjectDestroyed { .. }) = message.event {
                destroyed = true;
            }
        }
        assert!(destroyed);
    }

    #[test]
    fn test_reopen_with_other_size_resizes_shared_window() {
        let first = SlidingWindow::open_local(&options("reopen", 4)).unwrap();
        for v in [1, 2, 3, 4] {
            first.push(v).unwrap();
        }
        let name = first.name().to_string();
        let second = SlidingWindow::open_local(&WindowOptions::new(name).size(2)).unwrap();

        assert_eq!(first.max_size().unwrap(), 2);
        assert_eq!(first.entries().unwrap(), vec![3, 4]);
        assert_eq!(second.entries().unwrap(), vec![3, 4]);
        second.destroy().unwrap();
    }

    #[test]
    fn test_attach_keeps_capacity() {
        let first = SlidingWindow::open_local(&options("attach", 4)).unwrap();
        first.push(1).unwrap();
        let context = PlatformContext::with_capabilities(Capabilities::disabled(), None);
        let attached =
            SlidingWindow::attach(&context, &WindowOptions::new(first.name()).size(9)).unwrap();
        assert_eq!(attached.max_size().unwrap(), 4);
        assert_eq!(attached.entries().unwrap(), vec![1]);
        first.destroy().unwrap();
    }
}
