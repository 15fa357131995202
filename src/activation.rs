//! Activation functions and their analytic derivatives.
//!
//! `forward` activates a buffer in place and stashes whatever the paired
//! derivative needs into a scratch buffer, so `backward` never recomputes the
//! nonlinearity: it overwrites the buffer with `df/dz` (or, for softmax, the
//! full L×L Jacobian). Indices with a set dropout bit are skipped by both
//! passes.
//!
//! The scratch buffer is sized on the first forward call and lives as long as
//! the activation; calling `backward` first reports
//! [`Error::ActivationNoTemp`].

use crate::bitmask::BitMask;
use crate::{Error, Result, EPSILON};

#[derive(Debug, Clone, Copy, PartialEq)]
/// Activation function, with its per-kind parameters.
pub enum ActivationKind {
    /// `f(x) = alpha * x + constant`
    Linear { alpha: f32, constant: f32 },
    /// `f(x) = x` for `x >= 0`, `leak * x` otherwise.
    LeakyRelu { leak: f32 },
    /// `f(x) = x` for `x >= 0`, `alpha * (e^x - 1)` otherwise.
    Elu { alpha: f32 },
    /// `f(x) = x / (|x| + 1)`
    Softsign,
    /// `f(x) = 1 / (1 + e^-x)`
    Sigmoid,
    /// 0 below -2.5, 1 above 2.5, `0.2 * x + 0.5` between.
    HardSigmoid,
    /// `f(x) = beta * x * sigmoid(x)`; `beta = 1` is plain Swish, other
    /// values give E-Swish.
    Swish { beta: f32 },
    /// `f(x)[i] = e^x_i / sum(e^x_j)`, max-subtracted for stability. The
    /// derivative is the full Jacobian, so the owning petal's output buffer
    /// must hold `len * len` values.
    Softmax,
    /// `f(x) = tanh(x)`
    Tanh,
}

impl ActivationKind {
    /// Validates per-kind parameters.
    pub fn validate(self) -> Result<()> {
        let ok = match self {
            ActivationKind::Linear { alpha, constant } => alpha.is_finite() && constant.is_finite(),
            ActivationKind::LeakyRelu { leak } => leak.is_finite() && leak >= 0.0,
            ActivationKind::Elu { alpha } => alpha.is_finite() && alpha >= 0.0,
            ActivationKind::Swish { beta } => beta.is_finite(),
            ActivationKind::Softsign
            | ActivationKind::Sigmoid
            | ActivationKind::HardSigmoid
            | ActivationKind::Softmax
            | ActivationKind::Tanh => true,
        };
        if ok {
            Ok(())
        } else {
            log::error!("invalid activation parameters: {self:?}");
            Err(Error::WrongActivation)
        }
    }
}

/// An activation function plus its derivative scratch buffer.
#[derive(Debug, Clone)]
pub struct Activation {
    kind: ActivationKind,
    scratch: Vec<f32>,
}

impl Activation {
    /// Creates an activation after validating its parameters.
    pub fn new(kind: ActivationKind) -> Result<Self> {
        kind.validate()?;
        Ok(Self {
            kind,
            scratch: Vec::new(),
        })
    }

    #[inline]
    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    /// Activates `values[..len]` in place.
    ///
    /// Indices with a set bit in `mask` are skipped entirely (no activation,
    /// no scratch update). For softmax, `values` may be longer than `len`;
    /// only the first `len` entries are read and written.
    pub fn forward(&mut self, values: &mut [f32], len: usize, mask: Option<&BitMask>) -> Result<()> {
        debug_assert!(values.len() >= len, "activation buffer shorter than len");
        if self.scratch.len() < len {
            self.scratch.resize(len, 0.0);
        }

        let live = |i: usize| mask.map_or(true, |m| !m.is_set(i));

        match self.kind {
            ActivationKind::Linear { alpha, constant } => {
                for i in 0..len {
                    if live(i) {
                        values[i] = alpha * values[i] + constant;
                    }
                }
            }
            ActivationKind::LeakyRelu { leak } => {
                self.scratch[..len].copy_from_slice(&values[..len]);
                for i in 0..len {
                    if live(i) && values[i] < 0.0 {
                        values[i] *= leak;
                    }
                }
            }
            ActivationKind::Elu { alpha } => {
                self.scratch[..len].copy_from_slice(&values[..len]);
                for i in 0..len {
                    if live(i) && values[i] < 0.0 {
                        values[i] = alpha * (values[i].exp() - 1.0);
                    }
                }
            }
            ActivationKind::Softsign => {
                for i in 0..len {
                    if live(i) {
                        self.scratch[i] = values[i].abs() + 1.0;
                        values[i] /= self.scratch[i] + EPSILON;
                    }
                }
            }
            ActivationKind::Sigmoid => {
                for i in 0..len {
                    if live(i) {
                        values[i] = 1.0 / (1.0 + (-values[i]).exp());
                    }
                }
            }
            ActivationKind::HardSigmoid => {
                self.scratch[..len].copy_from_slice(&values[..len]);
                for i in 0..len {
                    if live(i) {
                        values[i] = if values[i] < -2.5 {
                            0.0
                        } else if values[i] > 2.5 {
                            1.0
                        } else {
                            0.2 * values[i] + 0.5
                        };
                    }
                }
            }
            ActivationKind::Swish { beta } => {
                for i in 0..len {
                    if live(i) {
                        self.scratch[i] = 1.0 + (-values[i]).exp();
                        values[i] *= beta / (self.scratch[i] + EPSILON);
                    }
                }
            }
            ActivationKind::Softmax => {
                // Max over the whole buffer keeps exp() in range.
                let mut max = values[0];
                for &v in values[1..len].iter() {
                    if v > max {
                        max = v;
                    }
                }

                let mut sum = 0.0;
                for i in 0..len {
                    if live(i) {
                        values[i] = (values[i] - max).exp();
                        sum += values[i];
                    }
                }
                for i in 0..len {
                    if live(i) {
                        values[i] /= sum;
                    }
                }
            }
            ActivationKind::Tanh => {
                for i in 0..len {
                    if live(i) {
                        values[i] = values[i].tanh();
                    }
                }
            }
        }

        Ok(())
    }

    /// Replaces the activated values with `df/dz`, using only the state saved
    /// by the previous `forward`.
    ///
    /// For softmax, writes the `len * len` Jacobian `J[i][j] = f_i (δ_ij -
    /// f_j)` into `values` (row-major).
    pub fn backward(
        &mut self,
        values: &mut [f32],
        len: usize,
        mask: Option<&BitMask>,
    ) -> Result<()> {
        if self.scratch.len() < len {
            log::error!("activation backward called before forward populated its scratch");
            return Err(Error::ActivationNoTemp);
        }

        let live = |i: usize| mask.map_or(true, |m| !m.is_set(i));

        match self.kind {
            ActivationKind::Linear { alpha, .. } => {
                for i in 0..len {
                    if live(i) {
                        values[i] = alpha;
                    }
                }
            }
            ActivationKind::LeakyRelu { leak } => {
                for i in 0..len {
                    if live(i) {
                        values[i] = if self.scratch[i] < 0.0 { leak } else { 1.0 };
                    }
                }
            }
            ActivationKind::Elu { alpha } => {
                // f'(x) = f(x) + alpha below zero; the buffer still holds f.
                for i in 0..len {
                    if live(i) {
                        if self.scratch[i] < 0.0 {
                            values[i] += alpha;
                        } else {
                            values[i] = 1.0;
                        }
                    }
                }
            }
            ActivationKind::Softsign => {
                for i in 0..len {
                    if live(i) {
                        values[i] = 1.0 / (self.scratch[i] * self.scratch[i] + EPSILON);
                    }
                }
            }
            ActivationKind::Sigmoid => {
                for i in 0..len {
                    if live(i) {
                        values[i] *= 1.0 - values[i];
                    }
                }
            }
            ActivationKind::HardSigmoid => {
                for i in 0..len {
                    if live(i) {
                        let x = self.scratch[i];
                        values[i] = if (-2.5..=2.5).contains(&x) { 0.2 } else { 0.0 };
                    }
                }
            }
            ActivationKind::Swish { beta } => {
                for i in 0..len {
                    if live(i) {
                        values[i] += 1.0 / (self.scratch[i] + EPSILON) * (beta - values[i]);
                    }
                }
            }
            ActivationKind::Softmax => {
                debug_assert!(
                    values.len() >= len * len,
                    "softmax jacobian needs a len * len buffer"
                );
                self.scratch[..len].copy_from_slice(&values[..len]);
                for row in 0..len {
                    for col in 0..len {
                        let delta = if row == col { 1.0 } else { 0.0 };
                        values[row * len + col] = self.scratch[row] * (delta - self.scratch[col]);
                    }
                }
            }
            ActivationKind::Tanh => {
                for i in 0..len {
                    if live(i) {
                        values[i] = 1.0 - values[i] * values[i];
                    }
                }
            }
        }

        Ok(())
    }
}
