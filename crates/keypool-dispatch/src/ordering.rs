//! Key ordering strategies.
//!
//! Each outer attempt walks the pool in an order produced by a
//! [`KeyOrdering`]. The default shuffles so that load spreads across keys;
//! the sequential strategy gives a primary/backup layout.

use rand::seq::SliceRandom;

/// Ordering strategy trait
pub trait KeyOrdering: Send + Sync {
    /// Produce a permutation of `0..len`
    fn order(&self, len: usize) -> Vec<usize>;

    /// Get the strategy name
    fn name(&self) -> &'static str;
}

/// Uniformly random ordering, reshuffled on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOrdering;

impl RandomOrdering {
    /// Create a new random ordering
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyOrdering for RandomOrdering {
    fn order(&self, len: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut rand::thread_rng());
        indices
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Pool order, first key first
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialOrdering;

impl SequentialOrdering {
    /// Create a new sequential ordering
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyOrdering for SequentialOrdering {
    fn order(&self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Create an ordering strategy from its name
#[must_use]
pub fn create_ordering(name: &str) -> Option<Box<dyn KeyOrdering>> {
    match name {
        "random" | "shuffle" => Some(Box::new(RandomOrdering::new())),
        "sequential" | "primary_backup" => Some(Box::new(SequentialOrdering::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_is_permutation() {
        let ordering = RandomOrdering::new();
        for _ in 0..20 {
            let mut order = ordering.order(7);
            order.sort_unstable();
            assert_eq!(order, (0..7).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_random_varies() {
        let ordering = RandomOrdering::new();
        let first = ordering.order(8);
        let differs = (0..50).any(|_| ordering.order(8) != first);
        assert!(differs);
    }

    #[test]
    fn test_sequential() {
        assert_eq!(SequentialOrdering::new().order(3), vec![0, 1, 2]);
        assert!(SequentialOrdering::new().order(0).is_empty());
    }

    #[test]
    fn test_create_ordering() {
        assert_eq!(create_ordering("random").unwrap().name(), "random");
        assert_eq!(create_ordering("sequential").unwrap().name(), "sequential");
        assert!(create_ordering("weighted").is_none());
    }
}
