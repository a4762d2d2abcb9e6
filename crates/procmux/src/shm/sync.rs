//! Named cross-process synchronization primitives.
//!
//! POSIX named semaphores back both shapes the channel needs: a binary
//! semaphore (initial count 1) acts as the cross-process mutex, and
//! zero-initialized semaphores act as the request/ack events. A crashed
//! holder leaves the mutex taken; recovery is `unlink` plus re-open by the
//! channel owner.

use crate::error::{ProcmuxError, Result};
use std::ffi::CString;
use std::time::Duration;

#[cfg(not(target_os = "linux"))]
use std::time::Instant;

/// Poll interval for platforms without `sem_timedwait`.
#[cfg(not(target_os = "linux"))]
const SEM_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Map a channel object name onto a semaphore name: leading slash, no
/// other slashes.
fn sem_name(name: &str) -> String {
    format!("/{}", name.replace('/', "_"))
}

#[derive(Debug)]
struct NamedSemaphore {
    sem: *mut libc::sem_t,
}

// A sem_t handle may be used concurrently from any thread.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    fn open(name: &str, initial: u32) -> Result<Self> {
        let c_name = CString::new(sem_name(name))
            .map_err(|_| ProcmuxError::InvalidArg(format!("object name contains NUL: {name}")))?;
        // SAFETY: c_name is a valid NUL-terminated string; sem_open copies
        // it. O_CREAT with an existing name opens the existing semaphore
        // and ignores mode/value.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o600 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(ProcmuxError::System(format!(
                "sem_open('{name}') failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(NamedSemaphore { sem })
    }

    fn post(&self) {
        // SAFETY: self.sem is a live semaphore handle until drop.
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    fn try_wait(&self) -> bool {
        // SAFETY: self.sem is a live semaphore handle until drop.
        unsafe { libc::sem_trywait(self.sem) == 0 }
    }

    /// Wait up to `timeout` for the count to become positive. Returns
    /// `Ok(true)` on acquisition, `Ok(false)` on expiry.
    #[cfg(target_os = "linux")]
    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: now is a valid out-pointer for one timespec.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(ProcmuxError::System(format!(
                "clock_gettime failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let secs = timeout.as_secs().min(i64::MAX as u64 / 2) as libc::time_t;
        let mut abs = libc::timespec {
            tv_sec: now.tv_sec.saturating_add(secs),
            tv_nsec: now.tv_nsec + timeout.subsec_nanos() as libc::c_long,
        };
        if abs.tv_nsec >= 1_000_000_000 {
            abs.tv_sec = abs.tv_sec.saturating_add(1);
            abs.tv_nsec -= 1_000_000_000;
        }

        loop {
            // SAFETY: self.sem is live; abs is a valid absolute timespec.
            if unsafe { libc::sem_timedwait(self.sem, &abs) } == 0 {
                return Ok(true);
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => {
                    return Err(ProcmuxError::System(format!(
                        "sem_timedwait failed: {}",
                        std::io::Error::last_os_error()
                    )))
                }
            }
        }
    }

    /// Poll-based fallback where `sem_timedwait` is unavailable.
    #[cfg(not(target_os = "linux"))]
    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(SEM_POLL_INTERVAL);
        }
    }

    fn unlink(name: &str) {
        if let Ok(c_name) = CString::new(sem_name(name)) {
            // SAFETY: c_name is a valid NUL-terminated string. Failure
            // (already unlinked) is irrelevant.
            unsafe {
                libc::sem_unlink(c_name.as_ptr());
            }
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: self.sem came from sem_open and is closed exactly once.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Named cross-process mutex.
#[derive(Debug)]
pub(crate) struct NamedMutex {
    sem: NamedSemaphore,
}

/// Lock token; releases on drop.
pub(crate) struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl NamedMutex {
    pub fn open(name: &str) -> Result<Self> {
        Ok(NamedMutex {
            sem: NamedSemaphore::open(name, 1)?,
        })
    }

    /// Acquire within `timeout` or fail with `TimedOut`.
    pub fn lock(&self, timeout: Duration) -> Result<NamedMutexGuard<'_>> {
        if self.sem.wait_timeout(timeout)? {
            Ok(NamedMutexGuard { mutex: self })
        } else {
            Err(ProcmuxError::TimedOut)
        }
    }

    pub fn unlink(name: &str) {
        NamedSemaphore::unlink(name);
    }
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.sem.post();
    }
}

/// Named cross-process event. Signals accumulate like a counting
/// semaphore; waiters treat every wake as advisory.
#[derive(Debug)]
pub(crate) struct NamedEvent {
    sem: NamedSemaphore,
}

impl NamedEvent {
    pub fn open(name: &str) -> Result<Self> {
        Ok(NamedEvent {
            sem: NamedSemaphore::open(name, 0)?,
        })
    }

    pub fn signal(&self) {
        self.sem.post();
    }

    /// Consume a possibly stale signal without blocking.
    pub fn try_consume(&self) -> bool {
        self.sem.try_wait()
    }

    /// Wait up to `timeout` for a signal. `Ok(false)` on expiry.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.sem.wait_timeout(timeout)
    }

    pub fn unlink(name: &str) {
        NamedSemaphore::unlink(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(label: &str) -> String {
        format!(
            "procmux-sync-{label}-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        )
    }

    #[test]
    fn test_mutex_lock_and_release() {
        let name = unique("mtx");
        let mutex = NamedMutex::open(&name).expect("open mutex");

        {
            let _guard = mutex.lock(Duration::from_millis(100)).expect("first lock");
            // Held: a second acquisition must time out.
            assert!(matches!(
                mutex.lock(Duration::from_millis(50)),
                Err(ProcmuxError::TimedOut)
            ));
        }
        // Released on drop: lockable again.
        let _guard = mutex.lock(Duration::from_millis(100)).expect("relock");
        drop(_guard);
        NamedMutex::unlink(&name);
    }

    #[test]
    fn test_event_signal_and_consume() {
        let name = unique("ev");
        let event = NamedEvent::open(&name).expect("open event");

        assert!(!event.try_consume());
        event.signal();
        assert!(event.try_consume());
        assert!(!event.try_consume());
        NamedEvent::unlink(&name);
    }

    #[test]
    fn test_event_wait_times_out_without_signal() {
        let name = unique("evto");
        let event = NamedEvent::open(&name).expect("open event");
        assert_eq!(
            event.wait_timeout(Duration::from_millis(30)).expect("wait"),
            false
        );
        NamedEvent::unlink(&name);
    }

    #[test]
    fn test_event_wakes_cross_thread_waiter() {
        let name = unique("evx");
        let event = std::sync::Arc::new(NamedEvent::open(&name).expect("open event"));

        let waiter = {
            let event = std::sync::Arc::clone(&event);
            std::thread::spawn(move || event.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        event.signal();
        assert!(waiter.join().expect("waiter thread").expect("wait result"));
        NamedEvent::unlink(&name);
    }

    #[test]
    fn test_same_name_opens_same_semaphore() {
        let name = unique("shared");
        let a = NamedEvent::open(&name).expect("open a");
        let b = NamedEvent::open(&name).expect("open b");
        a.signal();
        assert!(b.try_consume());
        NamedEvent::unlink(&name);
    }
}
