//! SysV shared memory segments, viewed as arrays of `i64` words

use std::ptr::NonNull;

use bulwark_errors::PlatformError;
use bulwark_hash::IpcKey;

use super::{errno, last_error, permission_bits};

const WORD: usize = std::mem::size_of::<i64>();

/// An attached shared memory segment
///
/// Detached on drop. Removing the segment only marks it for destruction:
/// the memory stays valid for every process still attached, and the key
/// becomes free for a new segment immediately.
#[derive(Debug)]
pub struct SharedSegment {
    id: libc::c_int,
    key: IpcKey,
    addr: NonNull<i64>,
    words: usize,
}

// SAFETY: the mapping is process-wide and stays valid until drop; access
// goes through &self / &mut self like any owned buffer.
unsafe impl Send for SharedSegment {}

impl SharedSegment {
    /// Create a fresh, zeroed segment of `words` words under `key`
    ///
    /// Returns `None` if a segment already exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if creating or attaching fails for any other reason.
    pub fn create(
        key: IpcKey,
        words: usize,
        permissions: u32,
    ) -> Result<Option<Self>, PlatformError> {
        let mode = permission_bits(permissions);
        // SAFETY: shmget only reads its integer arguments.
        let id = unsafe {
            libc::shmget(
                key.as_raw(),
                words * WORD,
                libc::IPC_CREAT | libc::IPC_EXCL | mode,
            )
        };
        if id < 0 {
            if errno() == libc::EEXIST {
                return Ok(None);
            }
            return Err(last_error("shmget"));
        }
        tracing::debug!(key = %key, shmid = id, words, "created shared segment");
        Self::attach(id, key).map(Some)
    }

    /// Attach to the existing segment under `key`
    ///
    /// Returns `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment exists but cannot be attached.
    pub fn open(key: IpcKey, permissions: u32) -> Result<Option<Self>, PlatformError> {
        // SAFETY: size 0 looks up an existing segment without resizing it.
        let id = unsafe { libc::shmget(key.as_raw(), 0, permission_bits(permissions)) };
        if id < 0 {
            if errno() == libc::ENOENT {
                return Ok(None);
            }
            return Err(last_error("shmget"));
        }
        Self::attach(id, key).map(Some)
    }

    fn attach(id: libc::c_int, key: IpcKey) -> Result<Self, PlatformError> {
        // SAFETY: shmid_ds is plain data; IPC_STAT fills it in.
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: stat is a valid, writable shmid_ds.
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) } < 0 {
            return Err(last_error("shmctl(IPC_STAT)"));
        }
        #[allow(clippy::unnecessary_cast)]
        let words = stat.shm_segsz as usize / WORD;

        // SAFETY: a null address lets the kernel pick a page-aligned mapping.
        let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(last_error("shmat"));
        }
        let addr = NonNull::new(addr.cast::<i64>()).ok_or_else(|| PlatformError::SyscallFailed {
            call: "shmat".to_string(),
            errno: 0,
            message: "null mapping".to_string(),
        })?;
        Ok(Self {
            id,
            key,
            addr,
            words,
        })
    }

    /// Whether the kernel lets this process create shared memory at all
    #[must_use]
    pub fn probe() -> bool {
        // SAFETY: creates a private segment we remove straight away.
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, 4096, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return false;
        }
        // SAFETY: id was just returned by shmget.
        unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
        true
    }

    /// The segment's contents
    #[must_use]
    pub fn words(&self) -> &[i64] {
        // SAFETY: addr maps `words` words for as long as self is attached,
        // and shmat returns page-aligned memory.
        unsafe { std::slice::from_raw_parts(self.addr.as_ptr(), self.words) }
    }

    /// The segment's contents, mutably
    ///
    /// Other processes may write the same memory; callers must hold the
    /// lock that guards the segment.
    pub fn words_mut(&mut self) -> &mut [i64] {
        // SAFETY: as for `words`; &mut self rules out aliasing in-process.
        unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr(), self.words) }
    }

    /// Mark the segment for destruction once every process has detached
    ///
    /// # Errors
    ///
    /// `ObjectRemoved` if it was already marked.
    pub fn remove(&self) -> Result<(), PlatformError> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        if unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) } < 0 {
            return Err(last_error("shmctl(IPC_RMID)"));
        }
        tracing::debug!(key = %self.key, shmid = self.id, "removed shared segment");
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words == 0
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: addr came from shmat and has not been detached yet.
        if unsafe { libc::shmdt(self.addr.as_ptr().cast()) } < 0 {
            tracing::warn!(shmid = self.id, error = %std::io::Error::last_os_error(), "shmdt failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_hash::{derive_key, KeySpace};

    fn key(test: &str) -> IpcKey {
        derive_key(
            KeySpace::Window,
            &format!("segment-test-{test}-{}", std::process::id()),
        )
        .unwrap()
    }

    #[test]
    fn test_create_open_and_share() {
        if !SharedSegment::probe() {
            return;
        }
        let key = key("share");
        let mut first = SharedSegment::create(key, 16, 0o600).unwrap().unwrap();
        assert!(first.words().iter().all(|w| *w == 0));
        assert!(SharedSegment::create(key, 16, 0o600).unwrap().is_none());

        let second = SharedSegment::open(key, 0o600).unwrap().unwrap();
        assert_eq!(second.len(), 16);

        first.words_mut()[3] = 42;
        assert_eq!(second.words()[3], 42);
        first.remove().unwrap();
    }

    #[test]
    fn test_removed_key_is_free_but_memory_survives() {
        if !SharedSegment::probe() {
            return;
        }
        let key = key("relocate");
        let mut old = SharedSegment::create(key, 8, 0o600).unwrap().unwrap();
        old.words_mut()[0] = 7;
        old.remove().unwrap();

        let fresh = SharedSegment::create(key, 4, 0o600).unwrap().unwrap();
        assert_eq!(fresh.len(), 4);
        assert_eq!(old.words()[0], 7);
        fresh.remove().unwrap();
    }

    #[test]
    fn test_open_missing_is_none() {
        if !SharedSegment::probe() {
            return;
        }
        assert!(SharedSegment::open(key("missing"), 0o600).unwrap().is_none());
    }
}
