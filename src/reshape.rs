//! Stage 9: flat feature vectors as single-step sequences.

use ndarray::{Array3, ArrayView2, Axis};

use crate::error::{PipelineError, Result, Stage};

/// `(samples, 1 step, features)` tensor consumed by sequence classifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceBatch {
    data: Array3<f64>,
}

impl SequenceBatch {
    /// Every row must have `width` features.
    pub fn from_rows(rows: &[Vec<f64>], width: usize) -> Result<Self> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(PipelineError::schema(
                Stage::Reshaping,
                format!("row {}", i),
                format!("expected {} feature(s), found {}", width, row.len()),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = Array3::from_shape_vec((rows.len(), 1, width), flat)?;
        Ok(Self { data })
    }

    pub fn from_array(data: Array3<f64>) -> Result<Self> {
        if data.shape()[1] != 1 {
            return Err(PipelineError::schema(
                Stage::Reshaping,
                "steps",
                format!("expected a single step, found {}", data.shape()[1]),
            ));
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn as_array(&self) -> &Array3<f64> {
        &self.data
    }

    /// The single time step of every sample, as a `(samples, features)` view.
    pub fn steps(&self) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(1), 0)
    }

    /// Inverse of [`SequenceBatch::from_rows`].
    pub fn flatten(&self) -> Vec<Vec<f64>> {
        self.steps().outer_iter().map(|row| row.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_then_flatten_is_identity() {
        let rows = vec![vec![0.1, 0.2, 0.3], vec![-4.0, 5.5, 1e-9]];
        let batch = SequenceBatch::from_rows(&rows, 3).unwrap();
        assert_eq!(batch.shape(), (2, 1, 3));
        assert_eq!(batch.as_array()[[1, 0, 1]], 5.5);
        assert_eq!(batch.flatten(), rows);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        let err = SequenceBatch::from_rows(&rows, 2).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Reshaping));
    }

    #[test]
    fn multi_step_arrays_are_rejected() {
        assert!(SequenceBatch::from_array(Array3::zeros((2, 3, 4))).is_err());
        assert!(SequenceBatch::from_array(Array3::zeros((2, 1, 4))).is_ok());
    }
}
