//! Keyed order in which channel slots receive payload bits
//!
//! Slot `i` maps to `(a * i + b) mod n` with `gcd(a, n) == 1`, which is a
//! permutation of `0..n`. `a` and `b` come from the traversal seed.

/// Bijective slot order over `n` channel slots
#[derive(Debug, Clone, Copy)]
pub struct Traversal {
    n: u64,
    a: u64,
    b: u64,
}

impl Traversal {
    pub fn new(seed: u64, n: u64) -> Self {
        if n <= 1 {
            return Self { n, a: 1, b: 0 };
        }

        let mut rng = fastrand::Rng::with_seed(seed ^ n);
        let mut a = rng.u64(1..n);
        while gcd(a, n) != 1 {
            a = if a + 1 >= n { 1 } else { a + 1 };
        }
        let b = rng.u64(0..n);

        Self { n, a, b }
    }

    /// Number of slots
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Slot that holds bit `i` of the embedded stream
    #[inline]
    pub fn slot(&self, i: u64) -> u64 {
        ((self.a as u128 * i as u128 + self.b as u128) % self.n as u128) as u64
    }
}

fn gcd(mut x: u64, mut y: u64) -> u64 {
    while y != 0 {
        let t = x % y;
        x = y;
        y = t;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_is_permutation() {
        for n in [2u64, 3, 12, 97, 3072] {
            let t = Traversal::new(0xC0FFEE, n);
            let seen: HashSet<u64> = (0..n).map(|i| t.slot(i)).collect();
            assert_eq!(seen.len() as u64, n);
            assert!(seen.iter().all(|&s| s < n));
        }
    }

    #[test]
    fn test_seed_changes_order() {
        let a = Traversal::new(1, 3072);
        let b = Traversal::new(2, 3072);
        let first_a: Vec<u64> = (0..64).map(|i| a.slot(i)).collect();
        let first_b: Vec<u64> = (0..64).map(|i| b.slot(i)).collect();
        assert_ne!(first_a, first_b);
    }

    #[test]
    fn test_degenerate_sizes() {
        assert!(Traversal::new(5, 0).is_empty());
        assert_eq!(Traversal::new(5, 1).slot(0), 0);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 3072), 1);
    }
}
