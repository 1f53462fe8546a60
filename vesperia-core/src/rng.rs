//! Seeded random source shared by every randomizer.
//!
//! All draws come from one `StdRng`, so output for a seed depends on the
//! order in which the randomizers call these methods.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{Result, VesperiaError};

pub struct RandomSource {
    rng: StdRng,
    gauss_next: Option<f64>,
}

impl RandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            gauss_next: None,
        }
    }

    /// Uniform float in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform integer in `[low, high]`.
    pub fn randint(&mut self, low: i64, high: i64) -> i64 {
        self.rng.gen_range(low..=high)
    }

    /// Uniform integer in `[start, stop)`.
    pub fn randrange(&mut self, start: i64, stop: i64) -> i64 {
        self.rng.gen_range(start..stop)
    }

    /// Uniform pick from `start, start + step, ...` below `stop`.
    pub fn randrange_step(&mut self, start: i64, stop: i64, step: i64) -> i64 {
        let steps = (stop - start + step - 1) / step;
        start + step * self.rng.gen_range(0..steps)
    }

    /// Uniform pick from `pool`. `what` names the pool in the error.
    pub fn choice<T: Copy>(&mut self, what: &str, pool: &[T]) -> Result<T> {
        if pool.is_empty() {
            return Err(VesperiaError::InsufficientCandidates(what.to_string()));
        }
        let index = self.rng.gen_range(0..pool.len());
        Ok(pool[index])
    }

    /// Weighted pick; weights need not sum to one.
    pub fn weighted<T: Copy>(&mut self, population: &[T], weights: &[f64]) -> T {
        assert!(
            !population.is_empty() && population.len() == weights.len(),
            "weighted pick needs one weight per member"
        );
        let cumulative: Vec<f64> = weights
            .iter()
            .scan(0.0, |total, weight| {
                *total += weight;
                Some(*total)
            })
            .collect();
        let total = cumulative[cumulative.len() - 1];
        let point = self.random() * total;
        let index = cumulative.partition_point(|&edge| edge <= point);
        population[index.min(population.len() - 1)]
    }

    /// Normal sample. Draws come in pairs; the second is cached for the
    /// next call.
    pub fn gauss(&mut self, mu: f64, sigma: f64) -> f64 {
        let z = match self.gauss_next.take() {
            Some(z) => z,
            None => {
                let angle = self.random() * std::f64::consts::TAU;
                let radius = (-2.0 * (1.0 - self.random()).ln()).sqrt();
                self.gauss_next = Some(angle.sin() * radius);
                angle.cos() * radius
            }
        };
        mu + z * sigma
    }

    /// Normal sample clamped to `[min, max]` and rounded up.
    pub fn distribution(&mut self, mu: f64, sigma: f64, min: f64, max: f64) -> i64 {
        self.gauss(mu, sigma).clamp(min, max).ceil() as i64
    }

    /// Smaller of two uniform draws in `[min, max]`, biased low.
    pub fn triangular_low(&mut self, min: i64, max: i64) -> i64 {
        let first = self.randint(min, max);
        let second = self.randint(min, max);
        first.min(second)
    }

    /// Larger of two uniform draws in `[min, max]`, biased high.
    pub fn triangular_high(&mut self, min: i64, max: i64) -> i64 {
        let first = self.randint(min, max);
        let second = self.randint(min, max);
        first.max(second)
    }
}
