use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use rand_chacha::{rand_core::SeedableRng, ChaChaRng};
use rand_distr::{Bernoulli, Distribution};

/// Shared source of random draws for all stochastic components of a line.
///
/// Cloning a sampler produces a handle to the same generator, so that the sequence of draws,
/// and thus the whole run, is determined by the seed and the order of events alone.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: Rc<RefCell<ChaChaRng>>,
}

impl Sampler {
    /// Constructs a sampler with a deterministic seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Rc::new(RefCell::new(ChaChaRng::seed_from_u64(seed))),
        }
    }

    /// Constructs a sampler seeded from system entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: Rc::new(RefCell::new(ChaChaRng::from_entropy())),
        }
    }

    /// Draws a value from `dist`.
    pub fn sample<D: Distribution<f64>>(&self, dist: &D) -> f64 {
        dist.sample(&mut *self.rng.borrow_mut())
    }

    /// Draws a value from `dist`, replacing negative values and NaN with zero.
    /// Used for durations and quantities.
    pub fn non_negative<D: Distribution<f64>>(&self, dist: &D) -> f64 {
        let value = self.sample(dist);
        match value.partial_cmp(&0_f64) {
            None | Some(Ordering::Less) => 0_f64,
            _ => value,
        }
    }

    /// Draws a Bernoulli trial.
    pub fn chance(&self, dist: &Bernoulli) -> bool {
        dist.sample(&mut *self.rng.borrow_mut())
    }
}
