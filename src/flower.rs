//! The flower: an ordered petal stack plus training orchestration.
//!
//! Inference chains the petals' forward kernels; training adds the loss
//! forward/backward pair, a reversed sweep over the petals with explicit
//! adjacent-petal wiring, and one optimizer step per mini-batch. Gradients
//! accumulate across the whole batch before the step; the optimizer never
//! runs per sample.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::Dataset;
use crate::loss::{Loss, LossKind};
use crate::metrics::{self, BatchMetrics, MetricsSink};
use crate::optimizer::Optimizer;
use crate::petal::Petal;
use crate::rng::Prng;
use crate::{Error, Result};

/// Classification threshold used for the accuracy metric.
const ACCURACY_THRESHOLD: f32 = 0.5;

/// Training-loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    /// Samples per mini-batch.
    pub batch_size: usize,
    pub epochs: usize,
    /// Seed for the per-epoch dataset shuffle.
    pub shuffle_seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 10,
            shuffle_seed: 0,
        }
    }
}

/// Figures from the last trained batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainReport {
    pub loss_train: f32,
    pub loss_validation: f32,
    pub accuracy_train: f32,
    pub accuracy_validation: f32,
}

/// An ordered stack of petals.
#[derive(Debug, Clone)]
pub struct Flower {
    petals: Vec<Petal>,
    loss: Option<Loss>,
}

impl Flower {
    /// Builds a flower from petals.
    ///
    /// Each petal's output length must equal the next petal's input length.
    pub fn new(petals: Vec<Petal>) -> Result<Self> {
        if petals.is_empty() {
            log::error!("a flower cannot have zero petals");
            return Err(Error::FlowerNoPetals);
        }
        for i in 0..petals.len() - 1 {
            if petals[i].output_shape().length() != petals[i + 1].input_shape().length() {
                log::error!(
                    "petal {i} output length {} does not match petal {} input length {}",
                    petals[i].output_shape().length(),
                    i + 1,
                    petals[i + 1].input_shape().length()
                );
                return Err(Error::ShapesNotEqual);
            }
        }
        log::debug!("initializing flower with {} petals", petals.len());
        Ok(Self { petals, loss: None })
    }

    #[inline]
    pub fn num_petals(&self) -> usize {
        self.petals.len()
    }

    #[inline]
    pub fn petal(&self, idx: usize) -> Option<&Petal> {
        self.petals.get(idx)
    }

    #[inline]
    pub fn petal_mut(&mut self, idx: usize) -> Option<&mut Petal> {
        self.petals.get_mut(idx)
    }

    /// Expected input length.
    #[inline]
    pub fn input_len(&self) -> usize {
        self.petals[0].input_shape().length()
    }

    /// Produced output length.
    #[inline]
    pub fn output_len(&self) -> usize {
        self.petals[self.petals.len() - 1].output_shape().length()
    }

    /// The loss record allocated by `train`, if any.
    #[inline]
    pub fn loss(&self) -> Option<&Loss> {
        self.loss.as_ref()
    }

    /// Runs the forward chain and returns the last petal's output.
    pub fn forward(&mut self, input: &[f32], training: bool) -> Result<&[f32]> {
        for idx in 0..self.petals.len() {
            if idx == 0 {
                self.petals[0].forward(input, training)?;
            } else {
                let (left, right) = self.petals.split_at_mut(idx);
                right[0].forward(left[idx - 1].output(), training)?;
            }
        }
        Ok(self.petals[self.petals.len() - 1].output())
    }

    /// [`Flower::forward`] drawing dropout indices from a caller-owned
    /// generator.
    pub fn forward_with_rng(
        &mut self,
        input: &[f32],
        training: bool,
        prng: &mut Prng,
    ) -> Result<&[f32]> {
        for idx in 0..self.petals.len() {
            if idx == 0 {
                self.petals[0].forward_with_rng(input, training, prng)?;
            } else {
                let (left, right) = self.petals.split_at_mut(idx);
                right[0].forward_with_rng(left[idx - 1].output(), training, prng)?;
            }
        }
        Ok(self.petals[self.petals.len() - 1].output())
    }

    /// Inference: forward with dropout inactive.
    #[inline]
    pub fn predict(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.forward(input, false)
    }

    /// Trains with mini-batch gradient descent.
    ///
    /// Per epoch the training set is shuffled (inputs and targets permuted
    /// jointly); per batch every sample runs forward (training mode), loss
    /// forward/backward and the backward sweep, then the optimizer applies
    /// the accumulated gradients once. If `validation` is non-empty, each
    /// batch ends with a full validation sweep. Batch metrics go to `metrics`.
    pub fn train(
        &mut self,
        loss_kind: LossKind,
        optimizer: &Optimizer,
        train: &Dataset,
        validation: Option<&Dataset>,
        config: TrainConfig,
        mut metrics: Option<&mut dyn MetricsSink>,
    ) -> Result<TrainReport> {
        if train.is_empty() || config.batch_size == 0 || config.epochs == 0 {
            log::error!(
                "invalid training run: {} samples, batch_size {}, epochs {}",
                train.len(),
                config.batch_size,
                config.epochs
            );
            return Err(Error::WrongBatchSize);
        }
        self.check_dataset(train)?;
        if let Some(validation) = validation {
            self.check_dataset(validation)?;
        }

        let out_len = self.output_len();
        if self.loss.as_ref().map(Loss::kind) != Some(loss_kind) {
            self.loss = Some(Loss::new(loss_kind));
        }

        let batches_per_epoch = train.len().div_ceil(config.batch_size);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut shuffle_rng = StdRng::seed_from_u64(config.shuffle_seed);
        let mut target = vec![0.0_f32; out_len];
        let mut report = TrainReport::default();

        for epoch in 0..config.epochs {
            order.shuffle(&mut shuffle_rng);

            for batch in 0..batches_per_epoch {
                let from = batch * config.batch_size;
                let to = (from + config.batch_size).min(train.len());

                let mut loss_train = 0.0_f32;
                let mut accuracy_train = 0.0_f32;
                for &sample in &order[from..to] {
                    let input = train.input(sample);
                    self.forward(input, true)?;
                    train.targets().write_dense(sample, &mut target);

                    let loss = self.loss.as_mut().expect("loss allocated above");
                    let predicted = self.petals[self.petals.len() - 1].output();
                    loss_train += loss.forward(predicted, &target)?;
                    accuracy_train += metrics::accuracy(predicted, &target, ACCURACY_THRESHOLD);

                    loss.backward()?;
                    self.backward_sweep(input)?;
                }

                for petal in &mut self.petals {
                    if let Some(weights) = petal.weights_mut() {
                        weights.update(optimizer)?;
                    }
                    if let Some(bias) = petal.bias_weights_mut() {
                        bias.update(optimizer)?;
                    }
                }

                let samples = (to - from) as f32;
                loss_train /= samples;
                accuracy_train /= samples;

                let mut loss_validation = 0.0_f32;
                let mut accuracy_validation = 0.0_f32;
                if let Some(validation) = validation.filter(|v| !v.is_empty()) {
                    for idx in 0..validation.len() {
                        self.forward(validation.input(idx), false)?;
                        validation.targets().write_dense(idx, &mut target);

                        let loss = self.loss.as_mut().expect("loss allocated above");
                        let predicted = self.petals[self.petals.len() - 1].output();
                        loss_validation += loss.forward(predicted, &target)?;
                        accuracy_validation +=
                            metrics::accuracy(predicted, &target, ACCURACY_THRESHOLD);
                    }
                    loss_validation /= validation.len() as f32;
                    accuracy_validation /= validation.len() as f32;
                }

                report = TrainReport {
                    loss_train,
                    loss_validation,
                    accuracy_train,
                    accuracy_validation,
                };
                if let Some(sink) = metrics.as_deref_mut() {
                    sink.record_batch(&BatchMetrics {
                        epoch,
                        epochs_total: config.epochs,
                        batch,
                        batches_per_epoch,
                        loss_train,
                        loss_validation,
                        accuracy_train,
                        accuracy_validation,
                    });
                }
            }
        }

        Ok(report)
    }

    fn check_dataset(&self, dataset: &Dataset) -> Result<()> {
        if dataset.input_dim() != self.input_len() {
            log::error!(
                "dataset input_dim {} does not match flower input length {}",
                dataset.input_dim(),
                self.input_len()
            );
            return Err(Error::ShapesNotEqual);
        }
        if dataset.target_dim() != self.output_len() {
            log::error!(
                "dataset target_dim {} does not match flower output length {}",
                dataset.target_dim(),
                self.output_len()
            );
            return Err(Error::ShapesNotEqual);
        }
        Ok(())
    }

    /// Backward pass from the last petal to the first.
    ///
    /// The loss buffer (already holding `dL/dŷ`) feeds the last petal; each
    /// petal's `error_on_input` feeds the one to its left; the first petal
    /// takes the sample input as its left output.
    fn backward_sweep(&mut self, input: &[f32]) -> Result<()> {
        let count = self.petals.len();
        for idx in (0..count).rev() {
            let from_loss = idx == count - 1;
            if idx == 0 {
                if from_loss {
                    let error = self.loss.as_ref().expect("loss allocated").buffer();
                    self.petals[0].backward(error, input)?;
                } else {
                    let (first, rest) = self.petals.split_at_mut(1);
                    first[0].backward(rest[0].error_on_input(), input)?;
                }
            } else if from_loss {
                let (left, last) = self.petals.split_at_mut(idx);
                let error = self.loss.as_ref().expect("loss allocated").buffer();
                last[0].backward(error, left[idx - 1].output())?;
            } else {
                let (left, rest) = self.petals.split_at_mut(idx);
                let (current, right) = rest.split_at_mut(1);
                current[0].backward(right[0].error_on_input(), left[idx - 1].output())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{Activation, ActivationKind};
    use crate::data::{Inputs, Targets};
    use crate::petal::Shape;
    use crate::weights::{Initializer, Weights};

    fn shape(len: usize) -> Shape {
        Shape::vector(len).unwrap()
    }

    fn identity_dense(first: bool, len: usize) -> Petal {
        let mut values = vec![0.0; len * len];
        for i in 0..len {
            values[i * len + i] = 1.0;
        }
        let weights = Weights::from_values(true, values).unwrap();
        Petal::dense_1d(first, shape(len), shape(len), Some(weights), None, None).unwrap()
    }

    #[test]
    fn empty_flower_is_rejected() {
        assert_eq!(Flower::new(Vec::new()).err(), Some(Error::FlowerNoPetals));
    }

    #[test]
    fn mismatched_chain_is_rejected() {
        let a = Petal::direct(true, shape(3)).unwrap();
        let b = Petal::direct(false, shape(4)).unwrap();
        assert_eq!(Flower::new(vec![a, b]).err(), Some(Error::ShapesNotEqual));
    }

    #[test]
    fn predict_chains_petal_outputs() {
        let mut flower = Flower::new(vec![
            Petal::direct(true, shape(3)).unwrap(),
            identity_dense(false, 3),
        ])
        .unwrap();
        let out = flower.predict(&[0.5, -1.0, 2.0]).unwrap();
        assert_eq!(out, &[0.5, -1.0, 2.0]);
    }

    fn assert_close(analytic: f32, numeric: f32) {
        let diff = (analytic - numeric).abs();
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        assert!(
            diff <= 1e-3 || diff / scale <= 1e-2,
            "analytic={analytic} numeric={numeric}"
        );
    }

    #[test]
    fn backward_sweep_matches_numeric_gradients() {
        let mut prng = Prng::new(0);
        let make = |first: bool, inputs: usize, outputs: usize, prng: &mut Prng| {
            let weights = Weights::new_with_rng(
                true,
                Initializer::XavierGaussian,
                inputs * outputs,
                0.0,
                1.0,
                prng,
            )
            .unwrap();
            let bias =
                Weights::new_with_rng(true, Initializer::Constant, outputs, 0.0, 1.0, prng)
                    .unwrap();
            let activation = Activation::new(ActivationKind::Tanh).unwrap();
            Petal::dense_1d(
                first,
                shape(inputs),
                shape(outputs),
                Some(weights),
                Some(bias),
                Some(activation),
            )
            .unwrap()
        };
        let mut flower = Flower::new(vec![
            make(true, 2, 3, &mut prng),
            make(false, 3, 1, &mut prng),
        ])
        .unwrap();

        let input = [0.3_f32, -0.7];
        let target = [0.2_f32];

        let predicted = flower.forward(&input, false).unwrap().to_vec();
        let mut loss = Loss::new(LossKind::MeanSquaredError);
        loss.forward(&predicted, &target).unwrap();
        loss.backward().unwrap();
        flower.loss = Some(loss);
        flower.backward_sweep(&input).unwrap();

        let eps = 1e-3_f32;
        for petal_idx in 0..flower.num_petals() {
            let analytic = flower
                .petal(petal_idx)
                .unwrap()
                .weights()
                .unwrap()
                .gradients()
                .to_vec();
            for p in 0..analytic.len() {
                let orig = flower.petal(petal_idx).unwrap().weights().unwrap().values()[p];

                let mut probe = Loss::new(LossKind::MeanSquaredError);
                flower.petal_mut(petal_idx).unwrap().weights_mut().unwrap().values_mut()[p] =
                    orig + eps;
                let out = flower.forward(&input, false).unwrap().to_vec();
                let plus = probe.forward(&out, &target).unwrap();

                flower.petal_mut(petal_idx).unwrap().weights_mut().unwrap().values_mut()[p] =
                    orig - eps;
                let out = flower.forward(&input, false).unwrap().to_vec();
                let minus = probe.forward(&out, &target).unwrap();

                flower.petal_mut(petal_idx).unwrap().weights_mut().unwrap().values_mut()[p] = orig;

                assert_close(analytic[p], (plus - minus) / (2.0 * eps));
            }
        }
    }

    fn linear_dataset(samples: usize) -> Dataset {
        // y = 2x - 1 on a fixed grid.
        let xs: Vec<f32> = (0..samples).map(|i| i as f32 / samples as f32).collect();
        let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        Dataset::new(
            Inputs::from_flat(xs, 1).unwrap(),
            Targets::dense(ys, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn training_reduces_regression_loss() {
        let mut prng = Prng::new(3);
        let weights =
            Weights::new_with_rng(true, Initializer::Uniform, 1, 0.0, 0.1, &mut prng).unwrap();
        let bias =
            Weights::new_with_rng(true, Initializer::Constant, 1, 0.0, 0.0, &mut prng).unwrap();
        let mut flower = Flower::new(vec![Petal::dense_1d(
            true,
            shape(1),
            shape(1),
            Some(weights),
            Some(bias),
            None,
        )
        .unwrap()])
        .unwrap();

        let data = linear_dataset(64);
        // Gradients are summed over the batch, so the step scales with
        // batch_size; keep lr * batch_size well under the stability bound.
        let optimizer = Optimizer::sgd(0.02, 0.0).unwrap();

        let first = flower
            .train(
                LossKind::MeanSquaredError,
                &optimizer,
                &data,
                None,
                TrainConfig {
                    batch_size: 8,
                    epochs: 1,
                    shuffle_seed: 0,
                },
                None,
            )
            .unwrap();
        let last = flower
            .train(
                LossKind::MeanSquaredError,
                &optimizer,
                &data,
                None,
                TrainConfig {
                    batch_size: 8,
                    epochs: 200,
                    shuffle_seed: 1,
                },
                None,
            )
            .unwrap();

        assert!(
            last.loss_train < first.loss_train / 10.0,
            "first {} last {}",
            first.loss_train,
            last.loss_train
        );
        let w = flower.petal(0).unwrap().weights().unwrap().values()[0];
        let b = flower.petal(0).unwrap().bias_weights().unwrap().values()[0];
        assert!((w - 2.0).abs() < 0.2, "w = {w}");
        assert!((b + 1.0).abs() < 0.2, "b = {b}");
    }

    #[test]
    fn sparse_and_dense_targets_agree() {
        let inputs = Inputs::from_flat(vec![0.0, 1.0, 1.0, 0.0], 2).unwrap();
        let dense = Targets::dense(vec![1.0, 0.0, 0.0, 1.0], 2).unwrap();
        let sparse = Targets::sparse(vec![vec![0], vec![1]], 2).unwrap();

        let build = || {
            let mut prng = Prng::new(11);
            let weights =
                Weights::new_with_rng(true, Initializer::XavierGaussian, 4, 0.0, 1.0, &mut prng)
                    .unwrap();
            Flower::new(vec![Petal::dense_1d(
                true,
                shape(2),
                shape(2),
                Some(weights),
                None,
                Some(Activation::new(ActivationKind::Sigmoid).unwrap()),
            )
            .unwrap()])
            .unwrap()
        };
        let optimizer = Optimizer::sgd(0.1, 0.0).unwrap();
        let config = TrainConfig {
            batch_size: 2,
            epochs: 3,
            shuffle_seed: 9,
        };

        let mut dense_flower = build();
        let dense_report = dense_flower
            .train(
                LossKind::BinaryCrossEntropy,
                &optimizer,
                &Dataset::new(inputs.clone(), dense).unwrap(),
                None,
                config,
                None,
            )
            .unwrap();

        let mut sparse_flower = build();
        let sparse_report = sparse_flower
            .train(
                LossKind::BinaryCrossEntropy,
                &optimizer,
                &Dataset::new(inputs, sparse).unwrap(),
                None,
                config,
                None,
            )
            .unwrap();

        assert_eq!(dense_report, sparse_report);
    }

    struct CountingSink {
        batches: usize,
        last: Option<BatchMetrics>,
    }

    impl MetricsSink for CountingSink {
        fn record_batch(&mut self, metrics: &BatchMetrics) {
            self.batches += 1;
            self.last = Some(*metrics);
        }
    }

    #[test]
    fn metrics_sink_sees_every_batch() {
        let mut flower = Flower::new(vec![identity_dense(true, 1)]).unwrap();
        let data = linear_dataset(10);
        let optimizer = Optimizer::sgd(0.01, 0.0).unwrap();
        let mut sink = CountingSink {
            batches: 0,
            last: None,
        };

        flower
            .train(
                LossKind::MeanSquaredError,
                &optimizer,
                &data,
                Some(&data),
                TrainConfig {
                    batch_size: 4,
                    epochs: 2,
                    shuffle_seed: 0,
                },
                Some(&mut sink),
            )
            .unwrap();

        // ceil(10 / 4) = 3 batches per epoch.
        assert_eq!(sink.batches, 6);
        let last = sink.last.unwrap();
        assert_eq!(last.epoch, 1);
        assert_eq!(last.batches_per_epoch, 3);
        assert!(last.loss_validation > 0.0);
    }

    #[test]
    fn invalid_batch_configs_are_rejected() {
        let mut flower = Flower::new(vec![identity_dense(true, 1)]).unwrap();
        let data = linear_dataset(4);
        let optimizer = Optimizer::sgd(0.01, 0.0).unwrap();

        for config in [
            TrainConfig {
                batch_size: 0,
                epochs: 1,
                shuffle_seed: 0,
            },
            TrainConfig {
                batch_size: 4,
                epochs: 0,
                shuffle_seed: 0,
            },
        ] {
            assert_eq!(
                flower
                    .train(
                        LossKind::MeanSquaredError,
                        &optimizer,
                        &data,
                        None,
                        config,
                        None
                    )
                    .err(),
                Some(Error::WrongBatchSize)
            );
        }
    }

    #[test]
    fn mismatched_dataset_is_rejected() {
        let mut flower = Flower::new(vec![identity_dense(true, 2)]).unwrap();
        let data = linear_dataset(4);
        let optimizer = Optimizer::sgd(0.01, 0.0).unwrap();
        assert_eq!(
            flower
                .train(
                    LossKind::MeanSquaredError,
                    &optimizer,
                    &data,
                    None,
                    TrainConfig::default(),
                    None
                )
                .err(),
            Some(Error::ShapesNotEqual)
        );
    }
}
