//! Random number generator abstraction for determinism.
//!
//! Retry jitter draws from this trait. In production it wraps the thread
//! RNG; tests inject a fixed or scripted implementation.

use rand::Rng;

/// Abstraction over random number generation.
pub trait DeterministicRng: Send + Sync {
    /// Generate a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;
}

/// Production RNG backed by the thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRng;

impl DeterministicRng for ThreadRng {
    fn next_f64(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_rng_stays_in_unit_interval() {
        let mut rng = ThreadRng;
        for _ in 0..1_000 {
            let value = rng.next_f64();
            assert!((0.0..1.0).contains(&value));
        }
    }
}
