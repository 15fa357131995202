//! Loss functions and their analytic derivatives.
//!
//! `forward` computes the scalar loss over a predicted/expected pair, stores
//! it in slot 0 of the loss buffer and stashes the intermediates that the
//! paired derivative needs into two scratch buffers. `backward` then
//! overwrites the whole loss buffer with `dL/d(predicted)` without touching
//! the original vectors again.
//!
//! Every division and logarithm carries an ε guard in a fixed position inside
//! its formula, so results are reproducible bit-for-bit.

use crate::{Error, Result, EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported loss functions.
pub enum LossKind {
    /// `mean((y - ŷ)²)`
    MeanSquaredError,
    /// `mean((ln(y+1) - ln(ŷ+1))²)`
    MeanSquaredLogError,
    /// `sqrt(mean((ln(y+1) - ln(ŷ+1))²))`
    RootMeanSquaredLogError,
    /// `mean(|y - ŷ|)`
    MeanAbsoluteError,
    /// `-mean(y·ln(ŷ) + (1-y)·ln(1-ŷ))`
    BinaryCrossEntropy,
    /// `-sum(y·ln(ŷ))`
    CategoricalCrossEntropy,
}

/// A loss function with its loss buffer and derivative scratch.
#[derive(Debug, Clone)]
pub struct Loss {
    kind: LossKind,
    /// Holds the scalar loss in slot 0 after `forward`, the full gradient
    /// after `backward`.
    loss: Vec<f32>,
    temp_1: Vec<f32>,
    temp_2: Vec<f32>,
}

impl Loss {
    pub fn new(kind: LossKind) -> Self {
        Self {
            kind,
            loss: Vec::new(),
            temp_1: Vec::new(),
            temp_2: Vec::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> LossKind {
        self.kind
    }

    /// The scalar loss computed by the most recent `forward`.
    ///
    /// Unspecified after `backward`, which reuses the buffer for gradients.
    #[inline]
    pub fn value(&self) -> f32 {
        self.loss.first().copied().unwrap_or(0.0)
    }

    /// The loss buffer: scalar loss in slot 0 after `forward`, the full
    /// `dL/d(predicted)` vector after `backward`.
    #[inline]
    pub fn buffer(&self) -> &[f32] {
        &self.loss
    }

    /// Computes the loss over `predicted` vs `expected`.
    ///
    /// Shape contract: `predicted.len() == expected.len()`.
    pub fn forward(&mut self, predicted: &[f32], expected: &[f32]) -> Result<f32> {
        assert_eq!(
            predicted.len(),
            expected.len(),
            "predicted len {} does not match expected len {}",
            predicted.len(),
            expected.len()
        );

        let length = predicted.len();
        self.loss.resize(length, 0.0);
        self.loss.fill(0.0);
        self.temp_1.resize(length, 0.0);
        self.temp_2.resize(length, 0.0);

        let inv_n = 1.0 / length as f32;
        let mut sum = 0.0_f32;

        match self.kind {
            LossKind::MeanSquaredError => {
                for i in 0..length {
                    self.temp_1[i] = expected[i] - predicted[i];
                    sum += self.temp_1[i] * self.temp_1[i];
                }
                sum *= inv_n;
            }
            LossKind::MeanSquaredLogError | LossKind::RootMeanSquaredLogError => {
                for i in 0..length {
                    self.temp_1[i] = predicted[i] + 1.0;
                    self.temp_2[i] = (expected[i] + 1.0).ln() - self.temp_1[i].ln();
                    sum += self.temp_2[i] * self.temp_2[i];
                }
                sum *= inv_n;
                if self.kind == LossKind::RootMeanSquaredLogError {
                    sum = sum.sqrt();
                }
            }
            LossKind::MeanAbsoluteError => {
                for i in 0..length {
                    self.temp_1[i] = expected[i] - predicted[i];
                    self.temp_2[i] = self.temp_1[i].abs();
                    sum += self.temp_2[i];
                }
                sum *= inv_n;
            }
            LossKind::BinaryCrossEntropy => {
                for i in 0..length {
                    self.temp_1[i] = predicted[i];
                    self.temp_2[i] = expected[i];
                    sum -= expected[i] * (predicted[i] + EPSILON).ln()
                        + (1.0 - expected[i]) * (1.0 - predicted[i] + EPSILON).ln();
                }
                sum *= inv_n;
            }
            LossKind::CategoricalCrossEntropy => {
                for i in 0..length {
                    self.temp_1[i] = predicted[i];
                    self.temp_2[i] = expected[i];
                    sum -= expected[i] * (predicted[i] + EPSILON).ln();
                }
            }
        }

        self.loss[0] = sum;
        Ok(sum)
    }

    /// Overwrites the loss buffer with `dL/d(predicted)` and returns it.
    ///
    /// Requires a previous `forward` with the same length; otherwise reports
    /// [`Error::LossNoTemp`].
    pub fn backward(&mut self) -> Result<&[f32]> {
        if self.temp_1.is_empty() || self.temp_2.is_empty() {
            log::error!("loss backward called before forward populated its scratch");
            return Err(Error::LossNoTemp);
        }

        let length = self.loss.len();
        let inv_n = 1.0 / length as f32;

        match self.kind {
            LossKind::MeanSquaredError => {
                for i in 0..length {
                    self.loss[i] = -2.0 * self.temp_1[i] * inv_n;
                }
            }
            LossKind::MeanSquaredLogError => {
                for i in 0..length {
                    self.loss[i] = -2.0 * inv_n * self.temp_2[i] / self.temp_1[i];
                }
            }
            LossKind::RootMeanSquaredLogError => {
                // The derivative divides by the forward value, which slot 0 is
                // about to be overwritten with; snapshot it first.
                let rmsle = self.loss[0];
                for i in 0..length {
                    self.loss[i] =
                        -2.0 * inv_n * self.temp_2[i] / self.temp_1[i] / (2.0 * rmsle + EPSILON);
                }
            }
            LossKind::MeanAbsoluteError => {
                for i in 0..length {
                    self.loss[i] = -inv_n * self.temp_1[i] / (self.temp_2[i] + EPSILON);
                }
            }
            LossKind::BinaryCrossEntropy => {
                for i in 0..length {
                    let p = self.temp_1[i];
                    self.loss[i] = inv_n * (p - self.temp_2[i]) / (p - p * p + EPSILON);
                }
            }
            LossKind::CategoricalCrossEntropy => {
                for i in 0..length {
                    self.loss[i] = -self.temp_2[i] / (self.temp_1[i] + EPSILON);
                }
            }
        }

        Ok(&self.loss)
    }
}
