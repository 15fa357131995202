//! Contiguous dataset storage for the training loop.
//!
//! Inputs are stored flat and row-major so per-sample access is a slice, not
//! an allocation. Targets come in two flavors: dense rows (one/multi-hot or
//! regression values) and sparse label lists that are densified on the fly
//! during training.

use crate::labeling;
use crate::{Error, Result};

/// A collection of input samples, flat row-major `(len, input_dim)`.
#[derive(Debug, Clone)]
pub struct Inputs {
    values: Vec<f32>,
    len: usize,
    input_dim: usize,
}

impl Inputs {
    /// Builds inputs from a flat buffer with shape `(len, input_dim)`.
    pub fn from_flat(values: Vec<f32>, input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            log::error!("input_dim must be > 0");
            return Err(Error::ShapeZero);
        }
        if values.len() % input_dim != 0 {
            log::error!(
                "inputs length {} is not divisible by input_dim {input_dim}",
                values.len()
            );
            return Err(Error::ShapesNotEqual);
        }
        let len = values.len() / input_dim;
        Ok(Self {
            values,
            len,
            input_dim,
        })
    }

    /// Builds inputs from per-sample rows (copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let input_dim = rows.first().map(Vec::len).unwrap_or(0);
        if input_dim == 0 {
            log::error!("input rows must be non-empty");
            return Err(Error::ShapeZero);
        }
        let mut values = Vec::with_capacity(rows.len() * input_dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != input_dim {
                log::error!("input row {i} has len {}, expected {input_dim}", row.len());
                return Err(Error::ShapesNotEqual);
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            values,
            len: rows.len(),
            input_dim,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// The `idx`-th input row.
    #[inline]
    pub fn input(&self, idx: usize) -> &[f32] {
        let start = idx * self.input_dim;
        &self.values[start..start + self.input_dim]
    }
}

/// Training targets: dense rows or sparse label lists.
#[derive(Debug, Clone)]
pub enum Targets {
    /// Flat row-major `(len, dim)` values.
    Dense { values: Vec<f32>, dim: usize },
    /// Per-sample class-index lists over `dim` classes.
    Sparse { labels: Vec<Vec<u32>>, dim: usize },
}

impl Targets {
    /// Dense targets from a flat buffer with shape `(len, dim)`.
    pub fn dense(values: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            log::error!("target dim must be > 0");
            return Err(Error::ShapeZero);
        }
        if values.len() % dim != 0 {
            log::error!(
                "targets length {} is not divisible by dim {dim}",
                values.len()
            );
            return Err(Error::ShapesNotEqual);
        }
        Ok(Targets::Dense { values, dim })
    }

    /// Dense targets from per-sample rows.
    pub fn dense_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if dim == 0 {
            log::error!("target rows must be non-empty");
            return Err(Error::ShapeZero);
        }
        let mut values = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                log::error!("target row {i} has len {}, expected {dim}", row.len());
                return Err(Error::ShapesNotEqual);
            }
            values.extend_from_slice(row);
        }
        Ok(Targets::Dense { values, dim })
    }

    /// Sparse label lists over `dim` classes.
    pub fn sparse(labels: Vec<Vec<u32>>, dim: usize) -> Result<Self> {
        if dim == 0 {
            log::error!("target dim must be > 0");
            return Err(Error::ShapeZero);
        }
        for (i, row) in labels.iter().enumerate() {
            if let Some(&bad) = row.iter().find(|&&l| l as usize >= dim) {
                log::error!("sample {i} has label {bad} out of bounds for {dim} classes");
                return Err(Error::ShapesNotEqual);
            }
        }
        Ok(Targets::Sparse { labels, dim })
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Targets::Dense { values, dim } => values.len() / dim,
            Targets::Sparse { labels, .. } => labels.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn dim(&self) -> usize {
        match self {
            Targets::Dense { dim, .. } | Targets::Sparse { dim, .. } => *dim,
        }
    }

    /// Writes the `idx`-th target as a dense row into `out`.
    pub fn write_dense(&self, idx: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dim());
        match self {
            Targets::Dense { values, dim } => {
                let start = idx * dim;
                out.copy_from_slice(&values[start..start + dim]);
            }
            Targets::Sparse { labels, .. } => {
                labeling::labels_to_output(&labels[idx], out, 0.0, 1.0);
            }
        }
    }
}

/// A supervised dataset: inputs plus targets of matching length.
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Inputs,
    targets: Targets,
}

impl Dataset {
    pub fn new(inputs: Inputs, targets: Targets) -> Result<Self> {
        if inputs.len() != targets.len() {
            log::error!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            );
            return Err(Error::ShapesNotEqual);
        }
        Ok(Self { inputs, targets })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.inputs.input_dim()
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.targets.dim()
    }

    #[inline]
    pub fn input(&self, idx: usize) -> &[f32] {
        self.inputs.input(idx)
    }

    #[inline]
    pub fn targets(&self) -> &Targets {
        &self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_flat_validates_divisibility() {
        assert!(Inputs::from_flat(vec![0.0; 6], 2).is_ok());
        assert_eq!(
            Inputs::from_flat(vec![0.0; 5], 2).err(),
            Some(Error::ShapesNotEqual)
        );
        assert_eq!(Inputs::from_flat(vec![], 0).err(), Some(Error::ShapeZero));
    }

    #[test]
    fn rows_round_trip() {
        let inputs = Inputs::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.input(1), &[3.0, 4.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Inputs::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert_eq!(err.err(), Some(Error::ShapesNotEqual));
    }

    #[test]
    fn dense_targets_write_rows() {
        let targets = Targets::dense(vec![1.0, 0.0, 0.0, 1.0], 2).unwrap();
        let mut buf = [0.0_f32; 2];
        targets.write_dense(1, &mut buf);
        assert_eq!(buf, [0.0, 1.0]);
    }

    #[test]
    fn sparse_targets_densify_on_demand() {
        let targets = Targets::sparse(vec![vec![2], vec![0, 3]], 4).unwrap();
        let mut buf = [9.0_f32; 4];
        targets.write_dense(0, &mut buf);
        assert_eq!(buf, [0.0, 0.0, 1.0, 0.0]);
        targets.write_dense(1, &mut buf);
        assert_eq!(buf, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn sparse_labels_must_fit_the_class_count() {
        assert_eq!(
            Targets::sparse(vec![vec![4]], 4).err(),
            Some(Error::ShapesNotEqual)
        );
    }

    #[test]
    fn dataset_lengths_must_match() {
        let inputs = Inputs::from_flat(vec![0.0; 4], 2).unwrap();
        let targets = Targets::dense(vec![0.0; 3], 1).unwrap();
        assert_eq!(
            Dataset::new(inputs, targets).err(),
            Some(Error::ShapesNotEqual)
        );
    }
}
