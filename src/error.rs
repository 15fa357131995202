//! Error and `Result` types.
//!
//! This crate uses a split error-handling policy:
//! - Configuration/shape validation at the API boundary returns `Result`.
//! - Low-level hot-path kernels (per-sample forward/backward) `debug_assert!`
//!   contracts that the constructors already validated.
//!
//! The variant set is a stable external contract: each variant maps to a fixed
//! human-readable string and a fixed numeric code, so callers can match on
//! either across versions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Errors returned by fallible constructors and high-level operations.
pub enum Error {
    /// Memory allocation failed.
    Alloc,
    /// A petal kernel was asked to run with an unsupported petal kind.
    WrongPetalKind,
    /// Unknown or inconsistent weights initializer.
    WrongWeightsInit,
    /// Unknown or inconsistent activation function.
    WrongActivation,
    /// A shape has a zero extent.
    ShapeZero,
    /// A shape's total length overflows.
    ShapeTooBig,
    /// Two shapes that must match do not.
    ShapesNotEqual,
    /// Activation backward was called before forward populated its scratch.
    ActivationNoTemp,
    /// Loss backward was called before forward populated its scratch.
    LossNoTemp,
    /// Bit index out of bounds for a mask.
    MaskOutOfBounds,
    /// Unknown optimizer kind.
    WrongOptimizer,
    /// A flower was built with zero petals.
    FlowerNoPetals,
    /// Unknown loss kind.
    WrongLossKind,
    /// Batch size is zero or inconsistent with the training set length.
    WrongBatchSize,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable numeric code for this error.
    ///
    /// Code 0 is reserved for "no error" and is never produced (a successful
    /// operation returns `Ok` instead).
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Error::Alloc => 1,
            Error::WrongPetalKind => 2,
            Error::WrongWeightsInit => 3,
            Error::WrongActivation => 4,
            Error::ShapeZero => 5,
            Error::ShapeTooBig => 6,
            Error::ShapesNotEqual => 7,
            Error::ActivationNoTemp => 8,
            Error::LossNoTemp => 9,
            Error::MaskOutOfBounds => 10,
            Error::WrongOptimizer => 11,
            Error::FlowerNoPetals => 12,
            Error::WrongLossKind => 13,
            Error::WrongBatchSize => 14,
        }
    }

    /// Fixed human-readable description for this error.
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Error::Alloc => "Memory allocation error",
            Error::WrongPetalKind => "Wrong petal type",
            Error::WrongWeightsInit => "Wrong weights initializer",
            Error::WrongActivation => "Wrong activation function",
            Error::ShapeZero => "Zero input or output shape",
            Error::ShapeTooBig => "Petal shape in some dimension is too big",
            Error::ShapesNotEqual => "Input and output shapes are not equal",
            Error::ActivationNoTemp => "Activation derivatives scratch is not initialized",
            Error::LossNoTemp => "Loss derivatives scratch is not initialized",
            Error::MaskOutOfBounds => "Index is out of bounds for bit array",
            Error::WrongOptimizer => "Wrong optimizer type",
            Error::FlowerNoPetals => "No petals in flower",
            Error::WrongLossKind => "Wrong loss type",
            Error::WrongBatchSize => "Wrong number of batches / length of train dataset",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_unique() {
        let all = [
            Error::Alloc,
            Error::WrongPetalKind,
            Error::WrongWeightsInit,
            Error::WrongActivation,
            Error::ShapeZero,
            Error::ShapeTooBig,
            Error::ShapesNotEqual,
            Error::ActivationNoTemp,
            Error::LossNoTemp,
            Error::MaskOutOfBounds,
            Error::WrongOptimizer,
            Error::FlowerNoPetals,
            Error::WrongLossKind,
            Error::WrongBatchSize,
        ];
        for (i, e) in all.iter().enumerate() {
            assert_eq!(e.code() as usize, i + 1);
        }
    }

    #[test]
    fn display_matches_fixed_strings() {
        assert_eq!(format!("{}", Error::FlowerNoPetals), "No petals in flower");
        assert_eq!(
            format!("{}", Error::MaskOutOfBounds),
            "Index is out of bounds for bit array"
        );
    }
}
