//! Per-key critical sections.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per id. Scheduled evaluations, payment toggles, resets
/// and deletions for the same client all serialise on it; different ids
/// never contend.
///
/// An entry lives only while someone holds or waits for it, so ids that
/// never existed or were deleted do not accumulate.
#[derive(Debug, Default)]
pub struct ClientLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Held for the duration of a critical section. Releasing the last holder
/// drops the table entry.
#[must_use]
pub struct ClientLockGuard<'a> {
    table: &'a ClientLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ClientLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: nobody holds or waits.
        self.table
            .locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl ClientLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: Uuid) -> ClientLockGuard<'_> {
        // The clone is taken under the shard lock, so a concurrent release
        // sees it in the strong count and keeps the entry.
        let mutex = self.locks.entry(id).or_default().clone();
        let guard = mutex.lock_owned().await;
        ClientLockGuard {
            table: self,
            id,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_client_is_serialised() {
        let locks = Arc::new(ClientLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.lock(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_clients_do_not_contend() {
        let locks = ClientLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock(Uuid::new_v4()))
            .await
            .expect("independent client lock should be free");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_entries_are_dropped() {
        let locks = ClientLocks::new();
        for _ in 0..100 {
            let _guard = locks.lock(Uuid::new_v4()).await;
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_a_waiter_is_queued() {
        let locks = Arc::new(ClientLocks::new());
        let id = Uuid::new_v4();

        let first = locks.lock(id).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        tokio::time::sleep(Duration::from_millis(5)).await;
        // the waiter now holds the same mutex, so the entry is still there
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
