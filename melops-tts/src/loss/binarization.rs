//! Attention binarization loss.

use crate::error::Result;
use ndarray::{Array4, ErrorKind, ShapeError, Zip};

/// Attention binarization loss.
///
/// Pulls the soft alignment toward the hard one:
/// `-Σ log(max(soft[hard == 1], 1e-12)) / Σ hard`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinarizationLoss;

impl BinarizationLoss {
    const MIN_PROB: f32 = 1e-12;

    /// Both inputs are `(B, 1, T_mel, T_text)`; differing shapes are an error.
    pub fn compute(&self, hard: &Array4<f32>, soft: &Array4<f32>) -> Result<f32> {
        if hard.shape() != soft.shape() {
            return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
        }

        let mut log_sum = 0.0_f32;
        Zip::from(hard).and(soft).for_each(|&h, &s| {
            if h == 1.0 {
                log_sum += s.max(Self::MIN_PROB).ln();
            }
        });

        let hard_sum = hard.sum();
        if hard_sum == 0.0 {
            return Ok(0.0);
        }
        Ok(-log_sum / hard_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_soft_alignment_has_zero_loss() {
        let mut hard = Array4::<f32>::zeros((1, 1, 3, 2));
        hard[[0, 0, 0, 0]] = 1.0;
        hard[[0, 0, 1, 0]] = 1.0;
        hard[[0, 0, 2, 1]] = 1.0;

        let loss = BinarizationLoss.compute(&hard, &hard.clone()).unwrap();

        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn clamps_zero_probabilities() {
        let mut hard = Array4::<f32>::zeros((1, 1, 1, 2));
        hard[[0, 0, 0, 1]] = 1.0;
        let soft = Array4::<f32>::zeros((1, 1, 1, 2));

        let loss = BinarizationLoss.compute(&hard, &soft).unwrap();

        assert!(loss.is_finite());
        assert!((loss - -(1e-12_f32).ln()).abs() < 1e-3);
    }

    #[test]
    fn empty_hard_alignment_is_zero() {
        let hard = Array4::<f32>::zeros((1, 1, 2, 2));
        let soft = Array4::<f32>::from_elem((1, 1, 2, 2), 0.25);

        assert_eq!(BinarizationLoss.compute(&hard, &soft).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_shapes_are_an_error() {
        let hard = Array4::<f32>::zeros((1, 1, 2, 2));
        let soft = Array4::<f32>::zeros((1, 1, 3, 2));

        assert!(BinarizationLoss.compute(&hard, &soft).is_err());
    }
}
