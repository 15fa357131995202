//! Parameter tensors: initialization, gradient accumulation, optimizer steps.
//!
//! A [`Weights`] record owns four parallel buffers of equal length: the
//! parameter values, the gradient accumulator, the optimizer first-moment
//! buffer and the second-moment/velocity cache. They are created together so
//! the equal-length invariant cannot be broken from outside. Backward passes
//! sum per-sample gradients into the accumulator; [`Weights::update`] consumes
//! it and zeroes it.

use crate::optimizer::{Optimizer, OptimizerKind};
use crate::rng::{self, Prng};
use crate::{Error, Result, EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Weight initialization policy.
pub enum Initializer {
    /// Every element is `center`.
    Constant,
    /// `U[center - deviation, center + deviation]`.
    Uniform,
    /// `N(center, deviation²)` via Marsaglia's polar method.
    Gaussian,
    /// Uniform base draw scaled by `sqrt(6 / N)` with `N = length`.
    XavierUniform,
    /// Gaussian base draw scaled by `sqrt(2 / N)`.
    XavierGaussian,
    /// Uniform base draw scaled by `sqrt(2 / N)`.
    KaimingUniform,
    /// Gaussian base draw scaled by `sqrt(2 / N)`.
    KaimingGaussian,
}

/// A parameter tensor with its gradient accumulator and optimizer state.
#[derive(Debug, Clone)]
pub struct Weights {
    trainable: bool,
    initializer: Initializer,
    center: f32,
    deviation: f32,
    values: Vec<f32>,
    /// Gradient accumulator; empty when not trainable.
    gradients: Vec<f32>,
    /// Adam first moment; empty when not trainable.
    moments: Vec<f32>,
    /// SGD velocity, RMSProp/AdaGrad running square, or Adam second moment.
    cache: Vec<f32>,
    learning_step: u64,
}

impl Weights {
    /// Creates and initializes a tensor of `length` parameters, drawing from
    /// the process-wide generator.
    pub fn new(
        trainable: bool,
        initializer: Initializer,
        length: usize,
        center: f32,
        deviation: f32,
    ) -> Result<Self> {
        rng::with_global(|rng| {
            Self::new_with_rng(trainable, initializer, length, center, deviation, rng)
        })
    }

    /// Same as [`Weights::new`] but draws from a caller-owned generator.
    pub fn new_with_rng(
        trainable: bool,
        initializer: Initializer,
        length: usize,
        center: f32,
        deviation: f32,
        rng: &mut Prng,
    ) -> Result<Self> {
        if length == 0 {
            log::error!("weights tensor length must be > 0");
            return Err(Error::ShapeZero);
        }
        log::debug!("initializing {length} weights using {initializer:?} initializer");

        let mut weights = Self {
            trainable,
            initializer,
            center,
            deviation,
            values: vec![0.0; length],
            gradients: if trainable { vec![0.0; length] } else { Vec::new() },
            moments: if trainable { vec![0.0; length] } else { Vec::new() },
            cache: if trainable { vec![0.0; length] } else { Vec::new() },
            learning_step: 0,
        };
        weights.initialize(rng);
        Ok(weights)
    }

    /// Wraps already-initialized parameter values.
    ///
    /// Useful for loading known weights (identity matrices in tests, external
    /// checkpoints). The values must not be empty.
    pub fn from_values(trainable: bool, values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::ShapeZero);
        }
        let length = values.len();
        Ok(Self {
            trainable,
            initializer: Initializer::Constant,
            center: 0.0,
            deviation: 0.0,
            values,
            gradients: if trainable { vec![0.0; length] } else { Vec::new() },
            moments: if trainable { vec![0.0; length] } else { Vec::new() },
            cache: if trainable { vec![0.0; length] } else { Vec::new() },
            learning_step: 0,
        })
    }

    /// Verifies the tensor length against the owning petal's expectation.
    pub fn init_or_check(&self, expected_length: usize) -> Result<()> {
        if self.values.len() != expected_length {
            log::error!(
                "weights length {} does not match expected length {expected_length}",
                self.values.len()
            );
            return Err(Error::ShapesNotEqual);
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    /// Parameter values, row-major for dense petals (`(out_len, in_len)`).
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Gradient accumulator; empty for non-trainable weights.
    #[inline]
    pub fn gradients(&self) -> &[f32] {
        &self.gradients
    }

    #[inline]
    pub(crate) fn gradients_mut(&mut self) -> &mut [f32] {
        &mut self.gradients
    }

    /// Simultaneous read access to the values and write access to the
    /// gradient accumulator (empty when not trainable).
    #[inline]
    pub(crate) fn split_values_gradients(&mut self) -> (&[f32], &mut [f32]) {
        (&self.values, &mut self.gradients)
    }

    /// Number of Adam bias-correction steps taken so far.
    #[inline]
    pub fn learning_step(&self) -> u64 {
        self.learning_step
    }

    fn initialize(&mut self, rng: &mut Prng) {
        match self.initializer {
            Initializer::Constant => self.values.fill(self.center),
            Initializer::Uniform => self.fill_uniform(rng),
            Initializer::Gaussian => self.fill_gaussian(rng),
            Initializer::XavierUniform => {
                let limit = (6.0 / self.values.len() as f32).sqrt();
                self.fill_uniform(rng);
                for v in &mut self.values {
                    *v *= limit;
                }
            }
            Initializer::KaimingUniform => {
                let limit = (2.0 / self.values.len() as f32).sqrt();
                self.fill_uniform(rng);
                for v in &mut self.values {
                    *v *= limit;
                }
            }
            Initializer::XavierGaussian | Initializer::KaimingGaussian => {
                let limit = (2.0 / self.values.len() as f32).sqrt();
                self.fill_gaussian(rng);
                for v in &mut self.values {
                    *v *= limit;
                }
            }
        }
    }

    fn fill_uniform(&mut self, rng: &mut Prng) {
        for v in &mut self.values {
            *v = rng.next_f32() * 2.0 * self.deviation + self.center - self.deviation;
        }
    }

    /// Marsaglia polar sampling, two outputs per accepted point.
    fn fill_gaussian(&mut self, rng: &mut Prng) {
        let len = self.values.len();
        let mut i = 0;
        while i < len {
            let (x, y, rsq) = loop {
                let x = rng.next_f32() * 2.0 - 1.0;
                let y = rng.next_f32() * 2.0 - 1.0;
                let rsq = x * x + y * y;
                if rsq < 1.0 && rsq != 0.0 {
                    break (x, y, rsq);
                }
            };
            let f = (-2.0 * rsq.ln() / rsq).sqrt();
            self.values[i] = x * f * self.deviation + self.center;
            if i + 1 < len {
                self.values[i + 1] = y * f * self.deviation + self.center;
            }
            i += 2;
        }
    }

    /// Applies one optimizer step from the accumulated gradients, then zeroes
    /// the accumulator.
    ///
    /// Non-trainable weights are left untouched.
    pub fn update(&mut self, optimizer: &Optimizer) -> Result<()> {
        if !self.trainable {
            return Ok(());
        }

        let lr = optimizer.learning_rate();
        match optimizer.kind() {
            OptimizerKind::SgdMomentum => {
                let momentum = optimizer.momentum();
                if momentum > 0.0 {
                    for i in 0..self.values.len() {
                        self.cache[i] = momentum * self.cache[i] - lr * self.gradients[i];
                        self.values[i] += self.cache[i];
                    }
                } else {
                    for i in 0..self.values.len() {
                        self.values[i] -= lr * self.gradients[i];
                    }
                }
            }
            OptimizerKind::RmsProp => {
                let beta_1 = optimizer.beta_1();
                for i in 0..self.values.len() {
                    let g = self.gradients[i];
                    self.cache[i] = beta_1 * self.cache[i] + (1.0 - beta_1) * g * g;
                    self.values[i] -= lr / (self.cache[i].sqrt() + EPSILON) * g;
                }
            }
            OptimizerKind::AdaGrad => {
                for i in 0..self.values.len() {
                    let g = self.gradients[i];
                    self.cache[i] += g * g;
                    self.values[i] -= lr * g / (self.cache[i].sqrt() + EPSILON);
                }
            }
            OptimizerKind::Adam => {
                let beta_1 = optimizer.beta_1();
                let beta_2 = optimizer.beta_2();
                for i in 0..self.values.len() {
                    let g = self.gradients[i];
                    self.moments[i] = beta_1 * self.moments[i] + (1.0 - beta_1) * g;
                    self.cache[i] = beta_2 * self.cache[i] + (1.0 - beta_2) * g * g;

                    let step = self.learning_step as f32 + 1.0;
                    let moment_hat = self.moments[i] / (1.0 - beta_1.powf(step));
                    let velocity_hat = self.cache[i] / (1.0 - beta_2.powf(step));

                    self.values[i] -= lr * moment_hat / (velocity_hat.sqrt() + EPSILON);

                    // The step counter advances per element, not per call.
                    self.learning_step += 1;
                }
            }
        }

        self.gradients.fill(0.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Optimizer;

    #[test]
    fn constant_init_fills_center() {
        let mut rng = Prng::new(0);
        let w = Weights::new_with_rng(false, Initializer::Constant, 8, 0.5, 1.0, &mut rng).unwrap();
        assert!(w.values().iter().all(|&v| v == 0.5));
        assert!(w.gradients().is_empty());
    }

    #[test]
    fn uniform_init_respects_bounds() {
        let mut rng = Prng::new(1);
        let w =
            Weights::new_with_rng(true, Initializer::Uniform, 1000, 2.0, 0.5, &mut rng).unwrap();
        for &v in w.values() {
            assert!((1.5..=2.5).contains(&v), "{v} outside [1.5, 2.5]");
        }
    }

    #[test]
    fn gaussian_init_matches_requested_moments() {
        let mut rng = Prng::new(2);
        let w =
            Weights::new_with_rng(true, Initializer::Gaussian, 10000, 1.0, 2.0, &mut rng).unwrap();
        let n = w.len() as f32;
        let mean = w.values().iter().sum::<f32>() / n;
        let var = w.values().iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        assert!((mean - 1.0).abs() < 0.1, "mean {mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.1, "std {}", var.sqrt());
    }

    #[test]
    fn xavier_uniform_is_bounded_by_its_limit() {
        let mut rng = Prng::new(3);
        let len = 64;
        let w =
            Weights::new_with_rng(true, Initializer::XavierUniform, len, 0.0, 1.0, &mut rng)
                .unwrap();
        let limit = (6.0 / len as f32).sqrt();
        for &v in w.values() {
            assert!(v.abs() <= limit, "{v} beyond {limit}");
        }
    }

    #[test]
    fn kaiming_uniform_is_bounded_by_its_limit() {
        let mut rng = Prng::new(3);
        let len = 64;
        let w =
            Weights::new_with_rng(true, Initializer::KaimingUniform, len, 0.0, 1.0, &mut rng)
                .unwrap();
        let limit = (2.0 / len as f32).sqrt();
        for &v in w.values() {
            assert!(v.abs() <= limit, "{v} beyond {limit}");
        }
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let mut rng_a = Prng::new(123);
        let mut rng_b = Prng::new(123);
        let a = Weights::new_with_rng(true, Initializer::XavierGaussian, 16, 0.0, 1.0, &mut rng_a)
            .unwrap();
        let b = Weights::new_with_rng(true, Initializer::XavierGaussian, 16, 0.0, 1.0, &mut rng_b)
            .unwrap();
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn zero_length_is_rejected() {
        let mut rng = Prng::new(0);
        let err = Weights::new_with_rng(true, Initializer::Constant, 0, 0.0, 1.0, &mut rng);
        assert_eq!(err.err(), Some(Error::ShapeZero));
    }

    #[test]
    fn init_or_check_validates_length() {
        let mut rng = Prng::new(0);
        let w = Weights::new_with_rng(true, Initializer::Constant, 6, 0.0, 1.0, &mut rng).unwrap();
        assert!(w.init_or_check(6).is_ok());
        assert_eq!(w.init_or_check(7), Err(Error::ShapesNotEqual));
    }

    fn with_gradients(values: &[f32], gradients: &[f32]) -> Weights {
        let mut w = Weights::from_values(true, values.to_vec()).unwrap();
        w.gradients_mut().copy_from_slice(gradients);
        w
    }

    #[test]
    fn plain_sgd_step() {
        let mut w = with_gradients(&[1.0, -1.0], &[0.5, -0.25]);
        let opt = Optimizer::sgd(0.1, 0.0).unwrap();
        w.update(&opt).unwrap();
        assert!((w.values()[0] - 0.95).abs() < 1e-6);
        assert!((w.values()[1] - (-0.975)).abs() < 1e-6);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut w = with_gradients(&[0.0], &[1.0]);
        let opt = Optimizer::sgd(0.1, 0.9).unwrap();
        w.update(&opt).unwrap();
        // v = -0.1, w = -0.1
        assert!((w.values()[0] - (-0.1)).abs() < 1e-6);

        w.gradients_mut()[0] = 1.0;
        w.update(&opt).unwrap();
        // v = 0.9 * -0.1 - 0.1 = -0.19, w = -0.29
        assert!((w.values()[0] - (-0.29)).abs() < 1e-6);
    }

    #[test]
    fn rms_prop_step_matches_closed_form() {
        let mut w = with_gradients(&[1.0], &[2.0]);
        let opt = Optimizer::rms_prop(0.01, 0.9).unwrap();
        w.update(&opt).unwrap();
        // v = 0.1 * 4 = 0.4, w = 1 - 0.01 / sqrt(0.4) * 2
        let expected = 1.0 - 0.01 / 0.4_f32.sqrt() * 2.0;
        assert!((w.values()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn ada_grad_step_matches_closed_form() {
        let mut w = with_gradients(&[1.0], &[2.0]);
        let opt = Optimizer::ada_grad(0.01).unwrap();
        w.update(&opt).unwrap();
        // cache = 4, w = 1 - 0.01 * 2 / 2
        assert!((w.values()[0] - 0.99).abs() < 1e-6);
    }

    #[test]
    fn adam_first_step_matches_closed_form() {
        let mut w = with_gradients(&[1.0], &[2.0]);
        let opt = Optimizer::adam(0.01, 0.9, 0.999).unwrap();
        w.update(&opt).unwrap();
        // m = 0.2, v = 0.004; bias correction at t = 0 rescales both back to
        // g and g^2, so the first step is lr * g / (|g| + eps) = lr.
        assert!((w.values()[0] - 0.99).abs() < 1e-5);
        assert_eq!(w.learning_step(), 1);
    }

    #[test]
    fn update_zeroes_the_gradient_accumulator() {
        for opt in [
            Optimizer::sgd(0.01, 0.9).unwrap(),
            Optimizer::rms_prop(0.01, 0.9).unwrap(),
            Optimizer::ada_grad(0.01).unwrap(),
            Optimizer::adam(0.01, 0.9, 0.999).unwrap(),
        ] {
            let mut w = with_gradients(&[1.0, 2.0, 3.0], &[0.1, -0.2, 0.3]);
            w.update(&opt).unwrap();
            assert!(w.gradients().iter().all(|&g| g == 0.0), "{opt:?}");
        }
    }

    #[test]
    fn non_trainable_weights_ignore_updates() {
        let mut w = Weights::from_values(false, vec![1.0, 2.0]).unwrap();
        let opt = Optimizer::sgd(0.1, 0.0).unwrap();
        w.update(&opt).unwrap();
        assert_eq!(w.values(), &[1.0, 2.0]);
    }
}
