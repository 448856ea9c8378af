//! SysV semaphore sets

use std::time::{Duration, Instant};

use bulwark_config::constants::INIT_WAIT_TIMEOUT;
use bulwark_errors::PlatformError;
use bulwark_hash::IpcKey;

use super::{errno, last_error, permission_bits};

#[cfg(target_os = "linux")]
extern "C" {
    // glibc and musl both export this; the libc crate does not bind it everywhere.
    fn semtimedop(
        semid: libc::c_int,
        sops: *mut libc::sembuf,
        nsops: libc::size_t,
        timeout: *const libc::timespec,
    ) -> libc::c_int;
}

/// One operation in an atomic `semop` batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemOp {
    pub index: u16,
    pub delta: i16,
    /// Record the operation so the kernel reverses it when this process exits
    pub undo: bool,
}

impl SemOp {
    /// Decrement by one, reversed by the kernel on process exit
    #[must_use]
    pub fn take(index: u16) -> Self {
        Self {
            index,
            delta: -1,
            undo: true,
        }
    }

    /// Increment by one, cancelling the adjustment a prior `take` recorded
    #[must_use]
    pub fn give(index: u16) -> Self {
        Self {
            index,
            delta: 1,
            undo: true,
        }
    }

    /// Adjust by `delta` permanently
    #[must_use]
    pub fn adjust(index: u16, delta: i16) -> Self {
        Self {
            index,
            delta,
            undo: false,
        }
    }

    fn to_sembuf(self, nowait: bool) -> libc::sembuf {
        let mut flags = 0;
        if self.undo {
            flags |= libc::SEM_UNDO;
        }
        if nowait {
            flags |= libc::IPC_NOWAIT;
        }
        libc::sembuf {
            sem_num: self.index,
            sem_op: self.delta,
            #[allow(clippy::cast_possible_truncation)]
            sem_flg: flags as libc::c_short,
        }
    }
}

/// A named set of semaphores shared by every process using the same key
///
/// The set carries one hidden trailing semaphore that the creator raises to
/// 1 once the visible semaphores hold their initial values; joiners wait on
/// it before touching anything else.
#[derive(Debug)]
pub struct SemaphoreSet {
    id: libc::c_int,
    key: IpcKey,
    len: u16,
}

impl SemaphoreSet {
    /// Open the set for `key`, creating it with `initial` values if absent
    ///
    /// Returns the set and whether this call created it.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be created or joined, or if an
    /// existing set under `key` has a different shape.
    pub fn open(
        key: IpcKey,
        initial: &[u16],
        permissions: u32,
    ) -> Result<(Self, bool), PlatformError> {
        let len = u16::try_from(initial.len()).map_err(|_| PlatformError::SyscallFailed {
            call: "semget".to_string(),
            errno: libc::EINVAL,
            message: format!("{} semaphores requested", initial.len()),
        })?;
        let nsems = libc::c_int::from(len) + 1;
        let mode = permission_bits(permissions);

        // SAFETY: semget only reads its integer arguments.
        let id = unsafe {
            libc::semget(
                key.as_raw(),
                nsems,
                libc::IPC_CREAT | libc::IPC_EXCL | mode,
            )
        };
        if id >= 0 {
            let set = Self { id, key, len };
            set.initialise(initial)?;
            tracing::debug!(key = %key, semid = id, "created semaphore set");
            return Ok((set, true));
        }
        if errno() != libc::EEXIST {
            return Err(last_error("semget"));
        }

        // SAFETY: as above.
        let id = unsafe { libc::semget(key.as_raw(), nsems, mode) };
        if id < 0 {
            return Err(last_error("semget"));
        }
        let set = Self { id, key, len };
        set.await_initialised(initial)?;
        Ok((set, false))
    }

    /// Whether the kernel lets this process create semaphores at all
    #[must_use]
    pub fn probe() -> bool {
        // SAFETY: creates a private set we remove straight away.
        let id = unsafe { libc::semget(libc::IPC_PRIVATE, 1, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return false;
        }
        // SAFETY: id was just returned by semget.
        unsafe { libc::semctl(id, 0, libc::IPC_RMID) };
        true
    }

    fn init_index(&self) -> u16 {
        self.len
    }

    fn initialise(&self, initial: &[u16]) -> Result<(), PlatformError> {
        let mut values: Vec<libc::c_ushort> = initial.to_vec();
        values.push(1);
        // SAFETY: SETALL reads exactly nsems values from the array, which
        // holds initial.len() + 1 entries.
        let rc = unsafe { libc::semctl(self.id, 0, libc::SETALL, values.as_mut_ptr()) };
        if rc < 0 {
            return Err(last_error("semctl(SETALL)"));
        }
        Ok(())
    }

    fn await_initialised(&self, initial: &[u16]) -> Result<(), PlatformError> {
        let index = self.init_index();
        let probe = [
            SemOp {
                index,
                delta: -1,
                undo: false,
            },
            SemOp {
                index,
                delta: 1,
                undo: false,
            },
        ];
        match self.apply(&probe, INIT_WAIT_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(err) if err.is_would_block() => {
                // The creator died between semget and SETALL.
                tracing::warn!(key = %self.key, semid = self.id, "semaphore set never initialised, initialising it");
                self.initialise(initial)
            }
            Err(err) => Err(err),
        }
    }

    /// Apply `ops` atomically, waiting at most `timeout`
    ///
    /// A zero timeout tries once without blocking.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the operations could not complete in time,
    /// `ObjectRemoved` when the set was destroyed, `SyscallFailed` otherwise.
    pub fn apply(&self, ops: &[SemOp], timeout: Duration) -> Result<(), PlatformError> {
        let deadline = Instant::now() + timeout;
        self.apply_until(ops, timeout.is_zero(), deadline)
    }

    #[cfg(target_os = "linux")]
    fn apply_until(
        &self,
        ops: &[SemOp],
        nowait: bool,
        deadline: Instant,
    ) -> Result<(), PlatformError> {
        let mut bufs: Vec<libc::sembuf> = ops.iter().map(|op| op.to_sembuf(nowait)).collect();
        loop {
            let rc = if nowait {
                // SAFETY: bufs holds bufs.len() initialised sembuf values.
                unsafe { libc::semop(self.id, bufs.as_mut_ptr(), bufs.len()) }
            } else {
                let remaining = deadline.saturating_duration_since(Instant::now());
                #[allow(clippy::cast_possible_wrap)]
                let ts = libc::timespec {
                    tv_sec: remaining.as_secs() as libc::time_t,
                    tv_nsec: remaining.subsec_nanos() as libc::c_long,
                };
                // SAFETY: as above; ts outlives the call.
                unsafe { semtimedop(self.id, bufs.as_mut_ptr(), bufs.len(), &ts) }
            };
            if rc == 0 {
                return Ok(());
            }
            if errno() == libc::EINTR && !nowait {
                continue;
            }
            return Err(last_error("semop"));
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply_until(
        &self,
        ops: &[SemOp],
        _nowait: bool,
        deadline: Instant,
    ) -> Result<(), PlatformError> {
        // No semtimedop: poll without blocking until the deadline passes.
        let mut bufs: Vec<libc::sembuf> = ops.iter().map(|op| op.to_sembuf(true)).collect();
        loop {
            // SAFETY: bufs holds bufs.len() initialised sembuf values.
            let rc = unsafe { libc::semop(self.id, bufs.as_mut_ptr(), bufs.len() as _) };
            if rc == 0 {
                return Ok(());
            }
            let err = last_error("semop");
            let now = Instant::now();
            if !(err.is_would_block() || errno() == libc::EINTR) || now >= deadline {
                return Err(err);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }

    /// Current value of semaphore `index`
    ///
    /// # Errors
    ///
    /// Returns an error if the set was removed.
    pub fn value(&self, index: u16) -> Result<i32, PlatformError> {
        // SAFETY: GETVAL takes no fourth argument.
        let rc = unsafe { libc::semctl(self.id, libc::c_int::from(index), libc::GETVAL) };
        if rc < 0 {
            return Err(last_error("semctl(GETVAL)"));
        }
        Ok(rc)
    }

    /// Every visible semaphore, read in a single call
    ///
    /// Unlike repeated [`value`](Self::value) calls, the values are
    /// consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns an error if the set was removed.
    pub fn values(&self) -> Result<Vec<i32>, PlatformError> {
        let mut raw: Vec<libc::c_ushort> = vec![0; usize::from(self.len) + 1];
        // SAFETY: GETALL writes exactly nsems values into the array, which
        // holds len + 1 entries.
        let rc = unsafe { libc::semctl(self.id, 0, libc::GETALL, raw.as_mut_ptr()) };
        if rc < 0 {
            return Err(last_error("semctl(GETALL)"));
        }
        raw.truncate(usize::from(self.len));
        Ok(raw.into_iter().map(i32::from).collect())
    }

    /// Overwrite semaphore `index`
    ///
    /// Clears every process's undo adjustment for that semaphore, so only
    /// use it on semaphores never taken with `undo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the set was removed.
    pub fn set_value(&self, index: u16, value: i32) -> Result<(), PlatformError> {
        // SAFETY: SETVAL reads an int from the semun argument.
        let rc = unsafe {
            libc::semctl(
                self.id,
                libc::c_int::from(index),
                libc::SETVAL,
                value,
            )
        };
        if rc < 0 {
            return Err(last_error("semctl(SETVAL)"));
        }
        Ok(())
    }

    /// Remove the set from the kernel
    ///
    /// Processes blocked on it wake with `EIDRM`.
    ///
    /// # Errors
    ///
    /// `ObjectRemoved` if it was already gone.
    pub fn remove(&self) -> Result<(), PlatformError> {
        // SAFETY: IPC_RMID takes no fourth argument.
        let rc = unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) };
        if rc < 0 {
            return Err(last_error("semctl(IPC_RMID)"));
        }
        tracing::debug!(key = %self.key, semid = self.id, "removed semaphore set");
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> IpcKey {
        self.key
    }

    /// Number of semaphores visible to callers
    #[must_use]
    pub fn len(&self) -> u16 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
