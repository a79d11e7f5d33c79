//! In-process keyed async locks.
//!
//! Turns for the same phone and bookings on the same track are serialized by
//! holding the guard for the key. Entries are never evicted; the key space is
//! one per client phone plus one per track.

use dashmap::DashMap;
use di::{inject, injectable};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

#[injectable]
impl KeyedLocks {
    #[inject]
    pub fn create() -> KeyedLocks {
        KeyedLocks::default()
    }
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        // the map shard guard must be released before awaiting
        let lock = self
            .locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub async fn lock_phone(&self, phone: &str) -> OwnedMutexGuard<()> {
        self.lock(&format!("phone:{phone}")).await
    }

    pub async fn lock_track(&self, track: &str) -> OwnedMutexGuard<()> {
        self.lock(&format!("track:{track}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::default());
        let guard = locks.lock_phone("123").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_phone("123").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _phone = locks.lock_phone("123").await;
        let _other = tokio::time::timeout(Duration::from_millis(100), locks.lock_phone("456"))
            .await
            .unwrap();
        let _track = tokio::time::timeout(Duration::from_millis(100), locks.lock_track("123"))
            .await
            .unwrap();
    }
}
