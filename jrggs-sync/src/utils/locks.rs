//! Named mutexes and catch-and-log wrappers
//!
//! `with_lock` waits for the key; `try_with_lock` returns `None` at once when
//! the key is held, which callers treat as a silent skip. The guard is
//! released on every exit path, including errors and panics. A key's entry
//! is dropped from the table once nobody holds or awaits it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Process-wide table of async mutexes keyed by name
#[derive(Debug, Clone, Default)]
pub struct NamedLocks {
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        // Poisoning only happens if a thread panicked while inserting; the
        // map itself is still usable
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the table entry for `key` once nobody else holds or awaits it
    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the table, one in `lock`
        if Arc::strong_count(&lock) == 2
            && locks.get(key).is_some_and(|current| Arc::ptr_eq(current, &lock))
        {
            locks.remove(key);
        }
        // Our reference must go while the table is still locked, or two
        // releasers could each see the other's reference and both keep it
        drop(lock);
    }

    /// Run `body` holding the lock for `key`, waiting if it is busy
    pub async fn with_lock<F, Fut, T>(&self, key: &str, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.handle(key);
        let guard = lock.lock().await;
        let result = body().await;
        drop(guard);
        self.release(key, lock);
        result
    }

    /// Run `body` holding the lock for `key`, or return `None` if it is busy
    pub async fn try_with_lock<F, Fut, T>(&self, key: &str, body: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.handle(key);
        let result = match lock.try_lock() {
            Ok(guard) => {
                let result = body().await;
                drop(guard);
                Some(result)
            }
            Err(_) => None,
        };
        self.release(key, lock);
        result
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let lock = self.handle(key);
        let locked = lock.try_lock().is_err();
        self.release(key, lock);
        locked
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Await `body`, hand any error to `on_error` and swallow it
pub async fn with_catch<Fut, T, E, H>(on_error: H, body: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T, E>>,
    H: FnOnce(E),
{
    match body.await {
        Ok(value) => Some(value),
        Err(err) => {
            on_error(err);
            None
        }
    }
}
