//! In-process window table
//!
//! Used when the platform lacks SysV IPC or synchronisation is disabled,
//! and by tests that want window semantics without kernel objects. Windows
//! with the same name share storage within this process only.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use bulwark_errors::{Error, SyncError};

use super::{millis, WindowBackend};
use crate::ring::{words_for, Ring, RingRef};

type Slot = Arc<Mutex<Option<Vec<i64>>>>;

static TABLE: LazyLock<Mutex<HashMap<String, Slot>>> = LazyLock::new(Mutex::default);

const POLL_INTERVAL: Duration = Duration::from_millis(1);

fn table() -> MutexGuard<'static, HashMap<String, Slot>> {
    TABLE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A window stored in a process-wide table keyed by name
#[derive(Debug)]
pub struct LocalWindow {
    name: String,
    slot: Slot,
}

impl LocalWindow {
    /// Join the window called `name`, creating it with `max_size` if absent
    #[must_use]
    pub fn open(name: &str, max_size: usize) -> Self {
        let slot = table()
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut words = vec![0; words_for(max_size)];
                Ring::format(&mut words, max_size, &[]);
                Arc::new(Mutex::new(Some(words)))
            })
            .clone();
        Self {
            name: name.to_string(),
            slot,
        }
    }

    /// Lock the slot, polling until `timeout` elapses
    ///
    /// A poisoned lock means a holder panicked mid-section. Like a killed
    /// process, that releases the lock and leaves whatever it wrote.
    fn lock(&self, timeout: Duration) -> Result<MutexGuard<'_, Option<Vec<i64>>>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return Err(SyncError::Timeout {
                    name: self.name.clone(),
                    timeout_ms: millis(timeout),
                }
                .into());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn destroyed(&self, operation: &str) -> Error {
        SyncError::internal(&self.name, operation, "window was destroyed").into()
    }
}

impl WindowBackend for LocalWindow {
    fn with_ring(
        &self,
        timeout: Duration,
        body: &mut dyn FnMut(&mut Ring<'_>),
    ) -> Result<(), Error> {
        let mut guard = self.lock(timeout)?;
        let words = guard.as_mut().ok_or_else(|| self.destroyed("access"))?;
        body(&mut Ring::new(words));
        Ok(())
    }

    fn resize(&self, max_size: usize, timeout: Duration) -> Result<usize, Error> {
        let mut guard = self.lock(timeout)?;
        let words = guard.as_mut().ok_or_else(|| self.destroyed("resize"))?;
        let view = RingRef::new(words);
        let previous = view.capacity();
        if previous != max_size {
            let kept = view.newest(max_size);
            let mut resized = vec![0; words_for(max_size)];
            Ring::format(&mut resized, max_size, &kept);
            *words = resized;
        }
        Ok(previous)
    }

    fn destroy(&self) -> Result<(), Error> {
        let mut table = table();
        if table
            .get(&self.name)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
        {
            table.remove(&self.name);
        }
        drop(table);
        *self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn is_shared(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("local-{name}-{}", std::process::id())
    }

    #[test]
    fn test_same_name_shares_storage() {
        let name = unique("share");
        let a = LocalWindow::open(&name, 3);
        let b = LocalWindow::open(&name, 3);
        a.with_ring(Duration::ZERO, &mut |ring| ring.push(7)).unwrap();

        let mut seen = Vec::new();
        b.with_ring(Duration::ZERO, &mut |ring| seen = ring.to_vec())
            .unwrap();
        assert_eq!(seen, vec![7]);
        a.destroy().unwrap();
    }

    #[test]
    fn test_busy_lock_times_out() {
        let name = unique("busy");
        let a = Arc::new(LocalWindow::open(&name, 2));
        let b = LocalWindow::open(&name, 2);
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let holder = {
            let a = Arc::clone(&a);
            thread::spawn(move || {
                a.with_ring(Duration::ZERO, &mut |_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                })
                .unwrap();
            })
        };
        entered_rx.recv().unwrap();

        let err = b
            .with_ring(Duration::from_millis(20), &mut |_| {})
            .unwrap_err();
        assert!(err.is_timeout());
        holder.join().unwrap();
        a.destroy().unwrap();
    }

    #[test]
    fn test_destroy_invalidates_other_handles() {
        let name = unique("destroy");
        let a = LocalWindow::open(&name, 2);
        let b = LocalWindow::open(&name, 2);
        a.destroy().unwrap();

        let err = b.with_ring(Duration::ZERO, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::Internal { .. })));

        // A fresh open after destroy starts a new, empty window
        let c = LocalWindow::open(&name, 2);
        let mut len = usize::MAX;
        c.with_ring(Duration::ZERO, &mut |ring| len = ring.len())
            .unwrap();
        assert_eq!(len, 0);
        c.destroy().unwrap();
    }
}
