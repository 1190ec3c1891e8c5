//! Stage 7: row-wise L2 scaling.

use log::info;

use crate::records::LabeledMatrix;

/// Scale `row` to unit Euclidean length. An all-zero row is left as is.
pub fn l2_normalize(row: &mut [f64]) {
    let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        row.iter_mut().for_each(|v| *v /= norm);
    }
}

pub fn normalize_rows(mut matrix: LabeledMatrix) -> LabeledMatrix {
    let mut zero_rows = 0;
    for row in matrix.rows.iter_mut() {
        if row.iter().all(|v| *v == 0.0) {
            zero_rows += 1;
        }
        l2_normalize(row);
    }
    info!(
        "normalization: {} row(s) scaled, {} all-zero row(s) passed through",
        matrix.len() - zero_rows,
        zero_rows
    );
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ClassLabel;

    #[test]
    fn rows_have_unit_norm() {
        let matrix = LabeledMatrix {
            feature_names: vec!["a".into(), "b".into(), "c".into()],
            rows: vec![vec![3.0, 4.0, 0.0], vec![1e-3, 250.0, -7.5], vec![0.0, 0.0, 0.0]],
            labels: vec![ClassLabel::Negative, ClassLabel::Positive, ClassLabel::Negative],
        };
        let normalized = normalize_rows(matrix);
        assert_eq!(normalized.rows[0], vec![0.6, 0.8, 0.0]);
        for row in &normalized.rows[..2] {
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
        assert_eq!(normalized.rows[2], vec![0.0, 0.0, 0.0]);
        assert_eq!(normalized.labels[1], ClassLabel::Positive);
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let mut row = vec![2.0, -1.0, 0.5];
        l2_normalize(&mut row);
        let once = row.clone();
        l2_normalize(&mut row);
        for (a, b) in once.iter().zip(&row) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
