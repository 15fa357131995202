//! Petals: the layers of a flower.
//!
//! A petal owns everything its forward and backward kernels touch: shapes, an
//! output buffer, an upstream-error buffer (absent for the first petal in a
//! chain, which has nothing to propagate to), optional weights and bias
//! weights, an optional activation and an optional dropout mask. Buffers are
//! allocated at construction and live for the petal's lifetime.
//!
//! Five kinds are supported: a pass-through, three min/max normalizers and a
//! fully-connected 1D dense petal. The behaviors are closed and numerics-heavy,
//! so they are a tagged enum with per-kind kernels rather than a trait with
//! five implementers.

use crate::activation::{Activation, ActivationKind};
use crate::bitmask::BitMask;
use crate::dropout;
use crate::rng::{self, Prng};
use crate::weights::Weights;
use crate::{Error, Result, EPSILON};

/// Three-dimensional extent of a petal's input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    rows: usize,
    cols: usize,
    depth: usize,
    length: usize,
}

impl Shape {
    /// Creates a shape; every extent must be positive.
    pub fn new(rows: usize, cols: usize, depth: usize) -> Result<Self> {
        if rows == 0 || cols == 0 || depth == 0 {
            log::error!("zero shape extent: {rows}x{cols}x{depth}");
            return Err(Error::ShapeZero);
        }
        let length = rows
            .checked_mul(cols)
            .and_then(|v| v.checked_mul(depth))
            .ok_or(Error::ShapeTooBig)?;
        Ok(Self {
            rows,
            cols,
            depth,
            length,
        })
    }

    /// Flat 1D shape: `1 x len x 1`.
    pub fn vector(len: usize) -> Result<Self> {
        Self::new(1, len, 1)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Derived total length `rows * cols * depth`.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Petal kind.
pub enum PetalKind {
    /// Copies input to output.
    Direct,
    /// Rescales the whole tensor to `[center - deviation, center + deviation]`
    /// by its global min/max.
    NormalizeAll,
    /// Same rescaling, independently per row.
    NormalizeInRows,
    /// Same rescaling, independently per channel.
    NormalizeInChannels,
    /// Fully-connected: `out[j] = sum_i W[j,i] * in[i] + b[j]`. Without
    /// weights the petal sums its inputs.
    Dense1d,
}

/// One layer of a flower.
#[derive(Debug, Clone)]
pub struct Petal {
    kind: PetalKind,
    first: bool,
    input_shape: Shape,
    output_shape: Shape,
    weights: Option<Weights>,
    bias_weights: Option<Weights>,
    activation: Option<Activation>,
    dropout: f32,
    center: f32,
    deviation: f32,
    mask: Option<BitMask>,
    /// `length * length` floats when the activation is softmax (the backward
    /// pass parks the Jacobian here), `length` otherwise.
    output: Vec<f32>,
    /// Error w.r.t. this petal's input; empty for the first petal.
    error_on_input: Vec<f32>,
}

impl Petal {
    /// Pass-through petal.
    pub fn direct(first: bool, shape: Shape) -> Result<Self> {
        Self::build(first, PetalKind::Direct, shape, shape, None, None, None, 0.0, 1.0)
    }

    /// Whole-tensor min/max normalizer.
    pub fn normalize_all(first: bool, shape: Shape, center: f32, deviation: f32) -> Result<Self> {
        Self::build(
            first,
            PetalKind::NormalizeAll,
            shape,
            shape,
            None,
            None,
            None,
            center,
            deviation,
        )
    }

    /// Per-row min/max normalizer.
    pub fn normalize_in_rows(
        first: bool,
        shape: Shape,
        center: f32,
        deviation: f32,
    ) -> Result<Self> {
        Self::build(
            first,
            PetalKind::NormalizeInRows,
            shape,
            shape,
            None,
            None,
            None,
            center,
            deviation,
        )
    }

    /// Per-channel min/max normalizer.
    pub fn normalize_in_channels(
        first: bool,
        shape: Shape,
        center: f32,
        deviation: f32,
    ) -> Result<Self> {
        Self::build(
            first,
            PetalKind::NormalizeInChannels,
            shape,
            shape,
            None,
            None,
            None,
            center,
            deviation,
        )
    }

    /// Fully-connected petal.
    ///
    /// `weights` must hold `input.length() * output.length()` values
    /// (row-major `(out, in)`), `bias_weights` must hold `output.length()`.
    /// Without `weights` the petal degrades to summing its inputs.
    pub fn dense_1d(
        first: bool,
        input_shape: Shape,
        output_shape: Shape,
        weights: Option<Weights>,
        bias_weights: Option<Weights>,
        activation: Option<Activation>,
    ) -> Result<Self> {
        Self::build(
            first,
            PetalKind::Dense1d,
            input_shape,
            output_shape,
            weights,
            bias_weights,
            activation,
            0.0,
            1.0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        first: bool,
        kind: PetalKind,
        input_shape: Shape,
        output_shape: Shape,
        weights: Option<Weights>,
        bias_weights: Option<Weights>,
        activation: Option<Activation>,
        center: f32,
        deviation: f32,
    ) -> Result<Self> {
        log::debug!("initializing {kind:?} petal ({} -> {})", input_shape.length(), output_shape.length());

        match kind {
            PetalKind::Direct
            | PetalKind::NormalizeAll
            | PetalKind::NormalizeInRows
            | PetalKind::NormalizeInChannels => {
                if input_shape != output_shape {
                    log::error!("input and output shapes are not equal for {kind:?} petal");
                    return Err(Error::ShapesNotEqual);
                }
            }
            PetalKind::Dense1d => {
                if let Some(w) = &weights {
                    w.init_or_check(input_shape.length() * output_shape.length())?;
                }
                if let Some(b) = &bias_weights {
                    b.init_or_check(output_shape.length())?;
                }
            }
        }

        let mut petal = Self {
            kind,
            first,
            input_shape,
            output_shape,
            weights,
            bias_weights,
            activation: None,
            dropout: 0.0,
            center,
            deviation,
            mask: None,
            output: Vec::new(),
            error_on_input: if first {
                Vec::new()
            } else {
                vec![0.0; input_shape.length()]
            },
        };
        petal.activation = activation;
        petal.allocate_output();
        Ok(petal)
    }

    fn allocate_output(&mut self) {
        let len = self.output_shape.length();
        let size = if matches!(
            self.activation.as_ref().map(Activation::kind),
            Some(ActivationKind::Softmax)
        ) {
            len * len
        } else {
            len
        };
        self.output = vec![0.0; size];
    }

    /// Replaces the activation, resizing the output buffer if needed.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self.allocate_output();
        self
    }

    /// Enables dropout with the given ratio of suppressed outputs.
    pub fn with_dropout(mut self, ratio: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            log::error!("dropout ratio {ratio} is outside [0, 1]");
            return Err(Error::MaskOutOfBounds);
        }
        self.dropout = ratio;
        self.mask = if ratio > 0.0 {
            Some(BitMask::new(self.output_shape.length()))
        } else {
            None
        };
        Ok(self)
    }

    #[inline]
    pub fn kind(&self) -> PetalKind {
        self.kind
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.first
    }

    #[inline]
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    #[inline]
    pub fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    #[inline]
    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    #[inline]
    pub fn weights(&self) -> Option<&Weights> {
        self.weights.as_ref()
    }

    #[inline]
    pub fn weights_mut(&mut self) -> Option<&mut Weights> {
        self.weights.as_mut()
    }

    #[inline]
    pub fn bias_weights(&self) -> Option<&Weights> {
        self.bias_weights.as_ref()
    }

    #[inline]
    pub fn bias_weights_mut(&mut self) -> Option<&mut Weights> {
        self.bias_weights.as_mut()
    }

    /// Output of the most recent forward pass.
    #[inline]
    pub fn output(&self) -> &[f32] {
        &self.output[..self.output_shape.length()]
    }

    /// Error w.r.t. this petal's input, filled by `backward`.
    ///
    /// Empty for the first petal.
    #[inline]
    pub fn error_on_input(&self) -> &[f32] {
        &self.error_on_input
    }

    /// Forward propagation; dropout (if configured) is resampled from the
    /// process-wide generator when `training` is set.
    pub fn forward(&mut self, input: &[f32], training: bool) -> Result<&[f32]> {
        if training && self.dropout > 0.0 && self.mask.is_some() {
            rng::with_global(|prng| {
                dropout::generate_mask(self.mask.as_mut().expect("mask present"), self.dropout, prng)
            })?;
            self.run_forward(input, true)
        } else {
            self.run_forward(input, false)
        }
    }

    /// Forward propagation drawing dropout indices from a caller-owned
    /// generator.
    pub fn forward_with_rng(
        &mut self,
        input: &[f32],
        training: bool,
        prng: &mut Prng,
    ) -> Result<&[f32]> {
        if training && self.dropout > 0.0 && self.mask.is_some() {
            dropout::generate_mask(self.mask.as_mut().expect("mask present"), self.dropout, prng)?;
            self.run_forward(input, true)
        } else {
            self.run_forward(input, false)
        }
    }

    fn run_forward(&mut self, input: &[f32], dropout_active: bool) -> Result<&[f32]> {
        assert_eq!(
            input.len(),
            self.input_shape.length(),
            "input len {} does not match petal input length {}",
            input.len(),
            self.input_shape.length()
        );

        let out_len = self.output_shape.length();
        let mask = if dropout_active { self.mask.as_ref() } else { None };
        let dropped = |i: usize| mask.is_some_and(|m| m.is_set(i));

        match self.kind {
            PetalKind::Direct => {
                for i in 0..out_len {
                    self.output[i] = if dropped(i) { 0.0 } else { input[i] };
                }
            }
            PetalKind::NormalizeAll => {
                let (min, max) = min_max(input);
                for i in 0..out_len {
                    self.output[i] = if dropped(i) {
                        0.0
                    } else {
                        rescale(input[i], min, max, self.center, self.deviation)
                    };
                }
            }
            PetalKind::NormalizeInRows => {
                let cols = self.output_shape.cols();
                for row in 0..self.output_shape.rows() {
                    let row_index = row * cols;
                    let (min, max) = min_max(&input[row_index..row_index + cols]);
                    for col in 0..cols {
                        let index = row_index + col;
                        self.output[index] = if dropped(index) {
                            0.0
                        } else {
                            rescale(input[index], min, max, self.center, self.deviation)
                        };
                    }
                }
            }
            PetalKind::NormalizeInChannels => {
                let depth = self.output_shape.depth();
                for channel in 0..depth {
                    let mut min = input[channel];
                    let mut max = input[channel];
                    for i in (0..out_len).step_by(depth) {
                        let v = input[channel + i];
                        if v < min {
                            min = v;
                        } else if v > max {
                            max = v;
                        }
                    }
                    for i in (0..out_len).step_by(depth) {
                        let index = channel + i;
                        self.output[index] = if dropped(index) {
                            0.0
                        } else {
                            rescale(input[index], min, max, self.center, self.deviation)
                        };
                    }
                }
            }
            PetalKind::Dense1d => {
                let in_len = self.input_shape.length();
                let weights = self.weights.as_ref().map(Weights::values);
                let biases = self.bias_weights.as_ref().map(Weights::values);
                for j in 0..out_len {
                    self.output[j] = 0.0;
                    if dropped(j) {
                        continue;
                    }
                    let mut sum = 0.0_f32;
                    match weights {
                        Some(w) => {
                            let row = j * in_len;
                            for (i, &x) in input.iter().enumerate() {
                                sum = w[row + i].mul_add(x, sum);
                            }
                        }
                        None => {
                            for &x in input {
                                sum += x;
                            }
                        }
                    }
                    if let Some(b) = biases {
                        sum += b[j];
                    }
                    self.output[j] = sum;
                }
            }
        }

        if let Some(activation) = self.activation.as_mut() {
            activation.forward(&mut self.output, out_len, mask)?;
        }

        // Keep the expected magnitude of the surviving outputs unchanged.
        if dropout_active {
            let scaling = 1.0 / (1.0 - self.dropout + EPSILON);
            for v in &mut self.output[..out_len] {
                if *v != 0.0 {
                    *v *= scaling;
                }
            }
        }

        Ok(&self.output[..out_len])
    }

    /// Backward propagation.
    ///
    /// `error_right` is the next petal's `error_on_input` (or the loss
    /// gradient for the last petal); `output_left` is the previous petal's
    /// output (or the sample input for the first petal). Gradients are summed
    /// into the weight accumulators; the upstream error for the previous
    /// petal lands in `error_on_input`.
    pub fn backward(&mut self, error_right: &[f32], output_left: &[f32]) -> Result<()> {
        let out_len = self.output_shape.length();
        let in_len = self.input_shape.length();
        assert_eq!(
            error_right.len(),
            out_len,
            "error len {} does not match petal output length {out_len}",
            error_right.len()
        );

        match self.kind {
            // The normalizers are treated as identity for gradient purposes.
            PetalKind::Direct
            | PetalKind::NormalizeAll
            | PetalKind::NormalizeInRows
            | PetalKind::NormalizeInChannels => {
                if !self.first {
                    self.error_on_input.copy_from_slice(error_right);
                }
            }
            PetalKind::Dense1d => {
                assert_eq!(
                    output_left.len(),
                    in_len,
                    "left output len {} does not match petal input length {in_len}",
                    output_left.len()
                );

                let softmax = matches!(
                    self.activation.as_ref().map(Activation::kind),
                    Some(ActivationKind::Softmax)
                );

                // Turn the output buffer into dL/dz.
                match self.activation.as_mut() {
                    Some(activation) => {
                        activation.backward(&mut self.output, out_len, self.mask.as_ref())?;
                        if softmax {
                            // Contract the Jacobian with the incoming error.
                            for col in 0..out_len {
                                let mut acc = self.output[col] * error_right[0];
                                for row in 1..out_len {
                                    acc += self.output[row * out_len + col] * error_right[row];
                                }
                                self.output[col] = acc;
                            }
                        } else {
                            for (v, &e) in self.output[..out_len].iter_mut().zip(error_right) {
                                *v *= e;
                            }
                        }
                    }
                    // No activation: dz = dy.
                    None => self.output[..out_len].copy_from_slice(error_right),
                }

                if !self.first {
                    self.error_on_input.fill(0.0);
                }

                let weight_values = self.weights.as_mut().map(Weights::split_values_gradients);
                for j in 0..out_len {
                    let delta = self.output[j];
                    let row = j * in_len;
                    match &weight_values {
                        Some((values, _)) => {
                            if !self.first {
                                for i in 0..in_len {
                                    self.error_on_input[i] =
                                        values[row + i].mul_add(delta, self.error_on_input[i]);
                                }
                            }
                        }
                        None => {
                            if !self.first {
                                for i in 0..in_len {
                                    self.error_on_input[i] += delta;
                                }
                            }
                        }
                    }
                }
                // Gradients sum across the mini-batch; the optimizer resets them.
                if let Some((_, gradients)) = weight_values {
                    if !gradients.is_empty() {
                        for j in 0..out_len {
                            let delta = self.output[j];
                            let row = j * in_len;
                            for i in 0..in_len {
                                gradients[row + i] = delta.mul_add(output_left[i], gradients[row + i]);
                            }
                        }
                    }
                }
                if let Some(bias) = self.bias_weights.as_mut() {
                    if bias.is_trainable() {
                        let gradients = bias.gradients_mut();
                        for j in 0..out_len {
                            gradients[j] += self.output[j];
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[inline]
fn min_max(values: &[f32]) -> (f32, f32) {
    let mut min = values[0];
    let mut max = values[0];
    for &v in &values[1..] {
        if v < min {
            min = v;
        } else if v > max {
            max = v;
        }
    }
    (min, max)
}

#[inline]
fn rescale(value: f32, min: f32, max: f32, center: f32, deviation: f32) -> f32 {
    let unit = (value - min) / (max - min + EPSILON);
    unit * 2.0 * deviation + center - deviation
}
