//! PetalFlow: a lightweight neural-network engine.
//!
//! A model (a [`Flower`]) is a linear stack of layers ([`Petal`]s). Forward
//! evaluation runs the stack for inference; training runs backpropagation
//! with mini-batch gradient descent. Derivatives are analytic and hand-paired
//! with each activation and loss; there is no autodiff.
//!
//! Conventions:
//! - Scalars are `f32`.
//! - Per-sample data moves through slices; every buffer is allocated when its
//!   owner is constructed and reused across the training loop.
//! - Fallible constructors and high-level operations return [`Result`];
//!   kernel shape contracts are asserted.
//! - Randomness (weight init, dropout) comes from the crate's seedable
//!   [`Prng`], so seeded runs reproduce bit-for-bit across platforms.
//!
//! Execution is single-threaded and blocking: no kernel suspends, every
//! operation runs to completion.

pub mod activation;
pub mod bitmask;
pub mod data;
pub mod dropout;
pub mod error;
pub mod flower;
pub mod labeling;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod petal;
pub mod rng;
pub mod weights;

pub use activation::{Activation, ActivationKind};
pub use bitmask::BitMask;
pub use data::{Dataset, Inputs, Targets};
pub use error::{Error, Result};
pub use flower::{Flower, TrainConfig, TrainReport};
pub use loss::{Loss, LossKind};
pub use metrics::{BatchMetrics, LogSink, MetricsSink};
pub use optimizer::{Optimizer, OptimizerKind};
pub use petal::{Petal, PetalKind, Shape};
pub use rng::Prng;
pub use weights::{Initializer, Weights};

/// Guard added inside divisions and logarithms to bound them.
pub(crate) const EPSILON: f32 = 1e-15;
