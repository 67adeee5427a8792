//! Process-wide table lock registry.
//!
//! The engine allows one writer per database file, and every table is one
//! file; this registry keeps at-most-one writer per
//! `(project, bucket, table)` inside the process. Locks are created
//! lazily on first acquire and removed explicitly when the table, bucket,
//! or project is deleted. Readers never acquire them.
//!
//! A handler acquires at most one table lock at a time, so no lock-order
//! deadlock is possible.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use tracing::debug;

type LockMap = Mutex<HashMap<LockKey, Arc<Mutex<()>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockKey {
    project_id: String,
    bucket_name: String,
    table_name: String,
}

/// Scoped acquisition of a table's exclusive mutex. The lock is released
/// when the guard drops, on every exit path.
pub struct TableLockGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
    key: LockKey,
}

impl std::fmt::Debug for TableLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLockGuard").field("key", &self.key).finish()
    }
}

impl Drop for TableLockGuard {
    fn drop(&mut self) {
        debug!(
            project_id = %self.key.project_id,
            bucket = %self.key.bucket_name,
            table = %self.key.table_name,
            "released table lock"
        );
    }
}

/// Keyed mutex registry: `(project, bucket, table)` -> exclusive mutex.
#[derive(Default)]
pub struct TableLockRegistry {
    locks: LockMap,
}

impl TableLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for a table, blocking until available.
    pub fn acquire(&self, project_id: &str, bucket_name: &str, table_name: &str) -> TableLockGuard {
        let key = LockKey {
            project_id: project_id.to_string(),
            bucket_name: bucket_name.to_string(),
            table_name: table_name.to_string(),
        };
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        debug!(
            project_id, bucket = bucket_name, table = table_name,
            "acquiring table lock"
        );
        let guard = mutex.lock_arc();
        TableLockGuard { _guard: guard, key }
    }

    /// Number of table mutexes currently held by a writer.
    pub fn active_locks_count(&self) -> usize {
        let locks = self.locks.lock();
        locks.values().filter(|mutex| mutex.is_locked()).count()
    }

    /// Forget a table's lock entry (table deleted). A guard already held
    /// stays valid until it drops.
    pub fn remove_table(&self, project_id: &str, bucket_name: &str, table_name: &str) {
        let key = LockKey {
            project_id: project_id.to_string(),
            bucket_name: bucket_name.to_string(),
            table_name: table_name.to_string(),
        };
        self.locks.lock().remove(&key);
    }

    /// Forget every lock entry under a bucket (bucket deleted).
    pub fn remove_bucket(&self, project_id: &str, bucket_name: &str) {
        self.locks
            .lock()
            .retain(|key, _| !(key.project_id == project_id && key.bucket_name == bucket_name));
    }

    /// Forget every lock entry under a project (project dropped).
    pub fn remove_project(&self, project_id: &str) {
        self.locks.lock().retain(|key, _| key.project_id != project_id);
    }

    /// Total number of registered lock entries (held or not).
    pub fn registered_count(&self) -> usize {
        self.locks.lock().len()
    }
}

impl std::fmt::Debug for TableLockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLockRegistry")
            .field("registered", &self.registered_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_exclusive_per_key() {
        let registry = Arc::new(TableLockRegistry::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = Arc::clone(&registry);
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(std::thread::spawn(move || {
                let _guard = registry.acquire("p1", "in", "users");
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unrelated_keys_run_in_parallel() {
        let registry = Arc::new(TableLockRegistry::new());
        let _a = registry.acquire("p1", "in", "users");

        let registry2 = Arc::clone(&registry);
        let other = std::thread::spawn(move || {
            // Different table: must not block.
            let _b = registry2.acquire("p1", "in", "orders");
        });
        other.join().unwrap();
        assert_eq!(registry.active_locks_count(), 1);
    }

    #[test]
    fn test_release_on_drop() {
        let registry = TableLockRegistry::new();
        {
            let _guard = registry.acquire("p1", "in", "users");
            assert_eq!(registry.active_locks_count(), 1);
        }
        assert_eq!(registry.active_locks_count(), 0);
        // Lazily created entry persists until removed.
        assert_eq!(registry.registered_count(), 1);
    }

    #[test]
    fn test_removal_scopes() {
        let registry = TableLockRegistry::new();
        drop(registry.acquire("p1", "in", "users"));
        drop(registry.acquire("p1", "in", "orders"));
        drop(registry.acquire("p1", "out", "events"));
        drop(registry.acquire("p2", "in", "users"));
        assert_eq!(registry.registered_count(), 4);

        registry.remove_table("p1", "in", "users");
        assert_eq!(registry.registered_count(), 3);

        registry.remove_bucket("p1", "in");
        assert_eq!(registry.registered_count(), 2);

        registry.remove_project("p1");
        assert_eq!(registry.registered_count(), 1);
    }
}
