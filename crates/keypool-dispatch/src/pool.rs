//! The fixed pool of credentials.

use keypool_core::Credential;
use keypool_resilience::{HealthPolicy, KeyRecord};
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Ordered, fixed-size set of key records
///
/// Records are created once and never removed. Each lives behind its own
/// lock so that updates to one key never wait on another.
#[derive(Debug, Default)]
pub struct KeyPool {
    slots: Vec<Mutex<KeyRecord>>,
}

impl KeyPool {
    /// Create a pool from credentials in configuration order
    #[must_use]
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            slots: credentials
                .into_iter()
                .enumerate()
                .map(|(index, credential)| Mutex::new(KeyRecord::new(index, credential)))
                .collect(),
        }
    }

    /// Number of configured keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no key is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lock the record at `index`
    #[must_use]
    pub fn lock(&self, index: usize) -> Option<MutexGuard<'_, KeyRecord>> {
        self.slots.get(index).map(Mutex::lock)
    }

    /// Whether the key at `index` is healthy at `now`
    #[must_use]
    pub fn is_healthy(&self, index: usize, now: Instant, policy: &HealthPolicy) -> bool {
        self.lock(index)
            .is_some_and(|record| record.is_healthy(now, policy))
    }

    /// Indices of keys healthy at `now`
    #[must_use]
    pub fn healthy_indices(&self, now: Instant, policy: &HealthPolicy) -> Vec<usize> {
        (0..self.len())
            .filter(|&index| self.is_healthy(index, now, policy))
            .collect()
    }

    /// Copy of every record, in pool order
    #[must_use]
    pub fn snapshot(&self) -> Vec<KeyRecord> {
        self.slots.iter().map(|slot| slot.lock().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(n: usize) -> KeyPool {
        KeyPool::new((0..n).map(|i| Credential::new(format!("sk-{i}")).unwrap()))
    }

    #[test]
    fn test_pool_indices_follow_configuration() {
        let pool = pool(3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.lock(2).unwrap().index(), 2);
        assert_eq!(pool.lock(0).unwrap().credential().expose_secret(), "sk-0");
        assert!(pool.lock(3).is_none());
    }

    #[test]
    fn test_healthy_indices() {
        let pool = pool(3);
        let now = Instant::now();
        let policy = HealthPolicy::default();
        pool.lock(1).unwrap().circuit_open_until = Some(now + Duration::from_secs(300));

        assert_eq!(pool.healthy_indices(now, &policy), vec![0, 2]);
        assert_eq!(
            pool.healthy_indices(now + Duration::from_secs(300), &policy),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_empty_pool() {
        let pool = KeyPool::default();
        assert!(pool.is_empty());
        assert!(pool.snapshot().is_empty());
    }
}
