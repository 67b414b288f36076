use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Serializes calls into an object that calls out to external collaborators.
///
/// Callers on different threads take turns: [`ReentrancyGuard::enter`] blocks
/// until the call in flight finishes. A collaborator that calls back into the
/// guarded object on the thread that is already inside finds the guard held by
/// its own thread and is refused.
///
/// A collaborator that hands the call back to another thread and waits for it
/// deadlocks.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    serial: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, waiting for other threads to leave it.
    ///
    /// Returns `None` if the calling thread already holds it.
    pub fn enter(&self) -> Option<EntryGuard<'_>> {
        let current = thread::current().id();
        if *lock(&self.owner) == Some(current) {
            return None;
        }

        let serial = lock(&self.serial);
        *lock(&self.owner) = Some(current);
        Some(EntryGuard {
            guard: self,
            _serial: serial,
        })
    }

    pub fn is_entered(&self) -> bool {
        lock(&self.owner).is_some()
    }
}

/// Held for the duration of a guarded call; releases the guard when dropped,
/// on success and error paths alike
#[derive(Debug)]
pub struct EntryGuard<'a> {
    guard: &'a ReentrancyGuard,
    _serial: MutexGuard<'a, ()>,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_serial` is dropped, so the next caller sets its own id
        *lock(&self.guard.owner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_nested_entry_refused() {
        let guard = ReentrancyGuard::new();
        let outer = guard.enter();
        assert!(outer.is_some());
        assert!(guard.is_entered());
        assert!(guard.enter().is_none());

        drop(outer);
        assert!(!guard.is_entered());
        assert!(guard.enter().is_some());
    }

    #[test]
    fn test_released_on_early_return() {
        fn guarded(guard: &ReentrancyGuard, fail: bool) -> Result<(), &'static str> {
            let _entered = guard.enter().ok_or("reentrant")?;
            if fail {
                return Err("failed");
            }
            Ok(())
        }

        let guard = ReentrancyGuard::new();
        assert_eq!(guarded(&guard, true), Err("failed"));
        assert!(!guard.is_entered());
        assert_eq!(guarded(&guard, false), Ok(()));
    }

    #[test]
    fn test_other_threads_wait_their_turn() {
        let guard = Arc::new(ReentrancyGuard::new());
        let held = guard.enter();
        assert!(held.is_some());

        let (entered_tx, entered_rx) = mpsc::channel();
        let handle = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let entered = guard.enter().is_some();
                entered_tx.send(()).unwrap();
                entered
            })
        };

        // Still blocked behind the holder
        assert!(entered_rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(held);
        assert!(handle.join().unwrap());
        assert!(!guard.is_entered());
    }
}
