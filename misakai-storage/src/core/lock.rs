//! Reader/writer lock with scoped upgrade and downgrade
//!
//! [`UpgradableLock`] wraps a single `parking_lot::RwLock` and hands out
//! [`LockScope`] guards. A scope moves between three states (unlocked, read,
//! write) and remembers how it reached the write state, so releasing a write
//! that was obtained by upgrading a read hands the read back instead of
//! unlocking. Dropping the scope releases whatever it still holds, on every
//! exit path.
//!
//! Two read flavours exist:
//! - `acquire_read`: an upgradable read. Upgrading it to write is atomic, no
//!   other writer can slip in between. Only one upgradable read is granted at
//!   a time, plain readers are not blocked by it.
//! - `acquire_shared`: a plain read. Any number can be held concurrently, and
//!   it can never be upgraded.

use super::error::{CacheError, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Logical state of a [`LockScope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Read,
    Write,
}

/// What a write scope returns to when released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restore {
    Unlocked,
    Upgradable,
}

enum Held<'a, T> {
    Unlocked,
    Shared(RwLockReadGuard<'a, T>),
    Upgradable(RwLockUpgradableReadGuard<'a, T>),
    Write {
        guard: RwLockWriteGuard<'a, T>,
        restore: Restore,
    },
}

/// A reader/writer lock with a bounded acquisition wait
pub struct UpgradableLock<T> {
    inner: RwLock<T>,
    timeout: Duration,
}

impl<T> UpgradableLock<T> {
    /// Acquisition bound used by [`UpgradableLock::new`]
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(value: T) -> Self {
        Self::with_timeout(value, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(value: T, timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(value),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open an unlocked scope
    pub fn scope(&self) -> LockScope<'_, T> {
        LockScope {
            lock: self,
            held: Held::Unlocked,
        }
    }

    /// Open a scope holding an upgradable read
    pub fn read(&self) -> Result<LockScope<'_, T>> {
        let mut scope = self.scope();
        scope.acquire_read()?;
        Ok(scope)
    }

    /// Open a scope holding a plain shared read
    pub fn shared(&self) -> Result<LockScope<'_, T>> {
        let mut scope = self.scope();
        scope.acquire_shared()?;
        Ok(scope)
    }

    /// Open a scope holding the write lock
    pub fn write(&self) -> Result<LockScope<'_, T>> {
        let mut scope = self.scope();
        scope.acquire_write()?;
        Ok(scope)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn timed_out(&self) -> CacheError {
        CacheError::LockTimeout(self.timeout)
    }
}

/// Scoped view of an [`UpgradableLock`]
pub struct LockScope<'a, T> {
    lock: &'a UpgradableLock<T>,
    held: Held<'a, T>,
}

impl<'a, T> LockScope<'a, T> {
    pub fn status(&self) -> LockStatus {
        match self.held {
            Held::Unlocked => LockStatus::Unlocked,
            Held::Shared(_) | Held::Upgradable(_) => LockStatus::Read,
            Held::Write { .. } => LockStatus::Write,
        }
    }

    /// Whether the current write was reached from a read held by this scope
    pub fn is_upgraded(&self) -> bool {
        matches!(
            self.held,
            Held::Write {
                restore: Restore::Upgradable,
                ..
            }
        )
    }

    /// Take an upgradable read. No-op if a read or write is already held.
    pub fn acquire_read(&mut self) -> Result<()> {
        if !matches!(self.held, Held::Unlocked) {
            return Ok(());
        }

        let lock = self.lock;
        let guard = lock
            .inner
            .try_upgradable_read_for(lock.timeout)
            .ok_or_else(|| lock.timed_out())?;
        self.held = Held::Upgradable(guard);
        Ok(())
    }

    /// Take a plain shared read. No-op if a read or write is already held.
    pub fn acquire_shared(&mut self) -> Result<()> {
        if !matches!(self.held, Held::Unlocked) {
            return Ok(());
        }

        let lock = self.lock;
        let guard = lock
            .inner
            .try_read_for(lock.timeout)
            .ok_or_else(|| lock.timed_out())?;
        self.held = Held::Shared(guard);
        Ok(())
    }

    /// Take the write lock.
    ///
    /// From an upgradable read this is an atomic upgrade; on timeout the read
    /// is kept. A shared read cannot be upgraded: the call fails and the read
    /// stays held.
    pub fn acquire_write(&mut self) -> Result<()> {
        let lock = self.lock;
        let timeout = lock.timeout;

        match std::mem::replace(&mut self.held, Held::Unlocked) {
            Held::Unlocked => {
                let guard = lock
                    .inner
                    .try_write_for(timeout)
                    .ok_or_else(|| lock.timed_out())?;
                self.held = Held::Write {
                    guard,
                    restore: Restore::Unlocked,
                };
            }
            Held::Upgradable(read) => match RwLockUpgradableReadGuard::try_upgrade_for(read, timeout)
            {
                Ok(guard) => {
                    self.held = Held::Write {
                        guard,
                        restore: Restore::Upgradable,
                    };
                }
                Err(read) => {
                    self.held = Held::Upgradable(read);
                    return Err(lock.timed_out());
                }
            },
            held @ Held::Shared(_) => {
                self.held = held;
                return Err(CacheError::InternalError(
                    "shared lock scope cannot upgrade to write".to_string(),
                ));
            }
            held @ Held::Write { .. } => self.held = held,
        }

        Ok(())
    }

    /// Step down one level: an upgraded write goes back to the read it came
    /// from, anything else becomes unlocked.
    pub fn release(&mut self) {
        self.held = match std::mem::replace(&mut self.held, Held::Unlocked) {
            Held::Write {
                guard,
                restore: Restore::Upgradable,
            } => Held::Upgradable(RwLockWriteGuard::downgrade_to_upgradable(guard)),
            _ => Held::Unlocked,
        };
    }

    /// Borrow the protected value. Requires a read or write.
    pub fn get(&self) -> Result<&T> {
        match &self.held {
            Held::Shared(guard) => Ok(&**guard),
            Held::Upgradable(guard) => Ok(&**guard),
            Held::Write { guard, .. } => Ok(&**guard),
            Held::Unlocked => Err(CacheError::InternalError(
                "lock scope holds no lock".to_string(),
            )),
        }
    }

    /// Mutably borrow the protected value. Requires a write.
    pub fn get_mut(&mut self) -> Result<&mut T> {
        match &mut self.held {
            Held::Write { guard, .. } => Ok(&mut **guard),
            _ => Err(CacheError::InternalError(
                "lock scope does not hold the write lock".to_string(),
            )),
        }
    }

    /// Run `work` under the write lock, then return to the state held before
    pub fn with_write<R>(&mut self, work: impl FnOnce(&mut T) -> R) -> Result<R> {
        let was_writing = self.status() == LockStatus::Write;
        self.acquire_write()?;

        let out = work(self.get_mut()?);
        if !was_writing {
            self.release();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn short_lock() -> UpgradableLock<Vec<u32>> {
        UpgradableLock::with_timeout(Vec::new(), Duration::from_millis(50))
    }

    #[test]
    fn test_scope_states() {
        let lock = short_lock();
        let mut scope = lock.scope();
        assert_eq!(scope.status(), LockStatus::Unlocked);
        assert!(scope.get().is_err());

        scope.acquire_read().unwrap();
        assert_eq!(scope.status(), LockStatus::Read);
        assert!(scope.get_mut().is_err());

        scope.acquire_write().unwrap();
        assert_eq!(scope.status(), LockStatus::Write);
        assert!(scope.is_upgraded());
        scope.get_mut().unwrap().push(1);

        scope.release();
        assert_eq!(scope.status(), LockStatus::Read);
        assert_eq!(scope.get().unwrap(), &vec![1]);

        scope.release();
        assert_eq!(scope.status(), LockStatus::Unlocked);
    }

    #[test]
    fn test_acquire_is_reentrant() {
        let lock = short_lock();
        let mut scope = lock.write().unwrap();

        // Already stronger than read, nothing changes
        scope.acquire_read().unwrap();
        scope.acquire_shared().unwrap();
        assert_eq!(scope.status(), LockStatus::Write);
        assert!(!scope.is_upgraded());

        scope.acquire_write().unwrap();
        assert_eq!(scope.status(), LockStatus::Write);

        scope.release();
        assert_eq!(scope.status(), LockStatus::Unlocked);
    }

    #[test]
    fn test_shared_scope_cannot_upgrade() {
        let lock = short_lock();
        let mut scope = lock.shared().unwrap();

        assert!(matches!(
            scope.acquire_write(),
            Err(CacheError::InternalError(_))
        ));
        assert_eq!(scope.status(), LockStatus::Read);
        assert!(!scope.is_upgraded());
        assert!(scope.get().unwrap().is_empty());
        assert!(scope.with_write(|items| items.push(7)).is_err());

        // The read is still held, so a writer cannot get in
        assert!(lock.inner.try_write().is_none());
        drop(scope);
        assert!(lock.write().is_ok());
    }

    #[test]
    fn test_no_writer_slips_in_while_shared_scope_tries_to_write() {
        let lock = Arc::new(UpgradableLock::with_timeout(
            vec![0u32],
            Duration::from_millis(200),
        ));
        let mut scope = lock.shared().unwrap();
        let before = scope.get().unwrap()[0];

        let writer_lock = Arc::clone(&lock);
        let writer = thread::spawn(move || {
            let mut write = writer_lock.write().unwrap();
            write.get_mut().unwrap()[0] = 99;
        });
        thread::sleep(Duration::from_millis(20));

        assert!(scope.acquire_write().is_err());
        assert_eq!(scope.get().unwrap()[0], before);
        drop(scope);

        writer.join().unwrap();
        assert_eq!(lock.shared().unwrap().get().unwrap()[0], 99);
    }

    #[test]
    fn test_default_timeout() {
        let lock = UpgradableLock::new(0u8);
        assert_eq!(lock.timeout(), UpgradableLock::<u8>::DEFAULT_TIMEOUT);
        assert_eq!(lock.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_read_times_out_while_writer_holds() {
        let lock = Arc::new(short_lock());
        let writer = lock.write().unwrap();

        let contender = Arc::clone(&lock);
        let result = thread::spawn(move || {
            let outcome = contender.read().map(|_| ());
            outcome
        })
        .join()
        .unwrap();

        assert_eq!(
            result.unwrap_err(),
            CacheError::LockTimeout(Duration::from_millis(50))
        );
        drop(writer);

        assert!(lock.read().is_ok());
    }

    #[test]
    fn test_failed_upgrade_keeps_read() {
        let lock = Arc::new(short_lock());
        let mut scope = lock.read().unwrap();

        // Another reader blocks the upgrade until it goes away
        let reader = Arc::clone(&lock);
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _guard = reader.shared().unwrap();
            held_tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });
        held_rx.recv().unwrap();

        assert!(matches!(
            scope.acquire_write(),
            Err(CacheError::LockTimeout(_))
        ));
        assert_eq!(scope.status(), LockStatus::Read);

        done_tx.send(()).unwrap();
        handle.join().unwrap();

        scope.acquire_write().unwrap();
        assert_eq!(scope.status(), LockStatus::Write);
    }

    #[test]
    fn test_upgradable_read_admits_plain_readers() {
        let lock = Arc::new(short_lock());
        let _upgradable = lock.read().unwrap();

        let reader = Arc::clone(&lock);
        let ok = thread::spawn(move || {
            let acquired = reader.shared().is_ok();
            acquired
        })
        .join()
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_with_write_restores_prior_state() {
        let lock = short_lock();
        let mut scope = lock.read().unwrap();

        let len = scope
            .with_write(|items| {
                items.push(1);
                items.len()
            })
            .unwrap();
        assert_eq!(len, 1);
        assert_eq!(scope.status(), LockStatus::Read);

        let mut unlocked = lock.scope();
        drop(scope);
        unlocked.with_write(|items| items.push(2)).unwrap();
        assert_eq!(unlocked.status(), LockStatus::Unlocked);
        drop(unlocked);

        assert_eq!(lock.into_inner(), vec![1, 2]);
    }

    #[test]
    fn test_drop_releases() {
        let lock = short_lock();
        {
            let mut scope = lock.read().unwrap();
            scope.acquire_write().unwrap();
        }
        assert!(lock.write().is_ok());
    }
}
