//! Job-to-resource assignment policies
//!
//! Assignment is computed once per batch over a fixed snapshot of ids, before
//! any job runs, so it never depends on execution timing.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// How targets are spread across a snapshot of resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Target `i` goes to `ids[i % R]`.
    #[default]
    RoundRobin,
    /// Uniform pseudo-random choice, reproducible for a given seed.
    SeededRandom { seed: u64 },
}

impl SelectionPolicy {
    /// Snapshot index for each of `targets` jobs over `resources` ids.
    ///
    /// Returns an empty assignment when `resources` is zero.
    pub fn assign(&self, targets: usize, resources: usize) -> Vec<usize> {
        if resources == 0 {
            return Vec::new();
        }
        match self {
            SelectionPolicy::RoundRobin => (0..targets).map(|i| i % resources).collect(),
            SelectionPolicy::SeededRandom { seed } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                (0..targets)
                    .map(|_| rng.random_range(0..resources))
                    .collect()
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SelectionPolicy::RoundRobin => "round_robin",
            SelectionPolicy::SeededRandom { .. } => "seeded_random",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_is_index_mod_resources() {
        let assignment = SelectionPolicy::RoundRobin.assign(5, 3);
        assert_eq!(assignment, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn round_robin_holds_for_many_shapes() {
        for resources in 1..8 {
            for targets in 0..40 {
                let assignment = SelectionPolicy::RoundRobin.assign(targets, resources);
                assert_eq!(assignment.len(), targets);
                for (i, idx) in assignment.iter().enumerate() {
                    assert_eq!(*idx, i % resources);
                }
            }
        }
    }

    #[test]
    fn no_resources_yields_empty_assignment() {
        assert!(SelectionPolicy::RoundRobin.assign(4, 0).is_empty());
        assert!(
            SelectionPolicy::SeededRandom { seed: 1 }
                .assign(4, 0)
                .is_empty()
        );
    }

    #[test]
    fn seeded_random_is_reproducible_and_in_range() {
        let policy = SelectionPolicy::SeededRandom { seed: 42 };
        let first = policy.assign(200, 5);
        let second = policy.assign(200, 5);
        assert_eq!(first, second);
        assert!(first.iter().all(|idx| *idx < 5));
        // 200 draws over 5 slots should touch every slot
        for slot in 0..5 {
            assert!(first.contains(&slot), "slot {slot} never chosen");
        }
    }

    #[test]
    fn labels() {
        assert_eq!(SelectionPolicy::default().label(), "round_robin");
        assert_eq!(
            SelectionPolicy::SeededRandom { seed: 0 }.label(),
            "seeded_random"
        );
    }
}
