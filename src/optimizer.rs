//! Optimizer configuration.
//!
//! An [`Optimizer`] is pure configuration: all per-parameter state (velocity,
//! running squares, Adam moments and the learning-step counter) lives in the
//! [`Weights`](crate::Weights) record it is applied to.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported update rules.
pub enum OptimizerKind {
    /// Gradient descent, optionally with momentum.
    SgdMomentum,
    /// RMSProp with decay rate `beta_1`.
    RmsProp,
    /// AdaGrad (accumulated squared gradients).
    AdaGrad,
    /// Adam with decay rates `beta_1`, `beta_2` and bias correction.
    Adam,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Optimizer kind plus hyperparameters.
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f32,
    momentum: f32,
    beta_1: f32,
    beta_2: f32,
}

impl Optimizer {
    /// SGD with momentum `momentum` (0 disables the velocity term).
    pub fn sgd(learning_rate: f32, momentum: f32) -> Result<Self> {
        Self::validated(OptimizerKind::SgdMomentum, learning_rate, momentum, 0.9, 0.999)
    }

    /// RMSProp with decay rate `beta_1`.
    pub fn rms_prop(learning_rate: f32, beta_1: f32) -> Result<Self> {
        Self::validated(OptimizerKind::RmsProp, learning_rate, 0.0, beta_1, 0.999)
    }

    /// AdaGrad.
    pub fn ada_grad(learning_rate: f32) -> Result<Self> {
        Self::validated(OptimizerKind::AdaGrad, learning_rate, 0.0, 0.9, 0.999)
    }

    /// Adam with decay rates `beta_1` and `beta_2`.
    pub fn adam(learning_rate: f32, beta_1: f32, beta_2: f32) -> Result<Self> {
        Self::validated(OptimizerKind::Adam, learning_rate, 0.0, beta_1, beta_2)
    }

    fn validated(
        kind: OptimizerKind,
        learning_rate: f32,
        momentum: f32,
        beta_1: f32,
        beta_2: f32,
    ) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            log::error!("learning rate must be finite and > 0, got {learning_rate}");
            return Err(Error::WrongOptimizer);
        }
        if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
            log::error!("momentum must be in [0, 1), got {momentum}");
            return Err(Error::WrongOptimizer);
        }
        for beta in [beta_1, beta_2] {
            if !(beta.is_finite() && (0.0..1.0).contains(&beta)) {
                log::error!("decay rate must be in [0, 1), got {beta}");
                return Err(Error::WrongOptimizer);
            }
        }
        Ok(Self {
            kind,
            learning_rate,
            momentum,
            beta_1,
            beta_2,
        })
    }

    #[inline]
    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    #[inline]
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    #[inline]
    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    #[inline]
    pub fn beta_1(&self) -> f32 {
        self.beta_1
    }

    #[inline]
    pub fn beta_2(&self) -> f32 {
        self.beta_2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_rate_must_be_positive_and_finite() {
        assert_eq!(Optimizer::sgd(0.0, 0.0).err(), Some(Error::WrongOptimizer));
        assert_eq!(Optimizer::sgd(-1.0, 0.0).err(), Some(Error::WrongOptimizer));
        assert_eq!(
            Optimizer::sgd(f32::NAN, 0.0).err(),
            Some(Error::WrongOptimizer)
        );
        assert!(Optimizer::sgd(0.01, 0.0).is_ok());
    }

    #[test]
    fn decay_rates_must_stay_below_one() {
        assert_eq!(
            Optimizer::adam(0.01, 1.0, 0.999).err(),
            Some(Error::WrongOptimizer)
        );
        assert_eq!(
            Optimizer::rms_prop(0.01, -0.1).err(),
            Some(Error::WrongOptimizer)
        );
        assert!(Optimizer::adam(0.01, 0.89, 0.99).is_ok());
    }

    #[test]
    fn momentum_is_validated() {
        assert_eq!(
            Optimizer::sgd(0.01, 1.0).err(),
            Some(Error::WrongOptimizer)
        );
        assert!(Optimizer::sgd(0.01, 0.9).is_ok());
    }
}
