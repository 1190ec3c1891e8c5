//! Stage 6: synthetic minority oversampling.

use std::collections::HashSet;

use log::{debug, info};
use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use smartcore::algorithm::neighbour::linear_search::LinearKNNSearch;
use smartcore::metrics::distance::Distances;

use crate::error::{PipelineError, Result, Stage};
use crate::records::{ClassLabel, LabeledMatrix};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReport {
    pub majority_label: ClassLabel,
    pub minority_label: ClassLabel,
    pub majority_count: usize,
    pub minority_count: usize,
    pub synthesized: usize,
}

/// Oversample the minority class until both classes have the majority's
/// count. Each synthetic row lies on the segment between a minority row and
/// one of its `k` nearest minority neighbours, never on either end. Originals
/// keep their order and come first.
pub fn balance(matrix: LabeledMatrix, k: usize, seed: u64) -> Result<(LabeledMatrix, BalanceReport)> {
    matrix.check_shape(Stage::Balancing)?;
    let negatives = matrix.class_count(ClassLabel::Negative);
    let positives = matrix.class_count(ClassLabel::Positive);
    let (majority_label, majority_count, minority_label, minority_count) = if positives > negatives {
        (ClassLabel::Positive, positives, ClassLabel::Negative, negatives)
    } else {
        (ClassLabel::Negative, negatives, ClassLabel::Positive, positives)
    };
    let mut report = BalanceReport {
        majority_label,
        minority_label,
        majority_count,
        minority_count,
        synthesized: 0,
    };

    if majority_count == minority_count {
        info!("balancing: classes already balanced at {} each", majority_count);
        return Ok((matrix, report));
    }
    if minority_count < 2 {
        return Err(PipelineError::insufficient(
            Stage::Balancing,
            format!("class {}", minority_label),
            2,
            minority_count,
        ));
    }
    if k == 0 || k >= minority_count {
        return Err(PipelineError::configuration(
            "balancing.k_neighbors",
            format!("{} must lie in 1..={} for {} minority sample(s)", k, minority_count - 1, minority_count),
        ));
    }

    let minority: Vec<&Vec<f64>> = matrix
        .rows
        .iter()
        .zip(&matrix.labels)
        .filter(|(_, label)| **label == minority_label)
        .map(|(row, _)| row)
        .collect();
    let (points, neighbours) = neighbour_lists(&minority, k)?;

    let deficit = majority_count - minority_count;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut synthetic = Vec::with_capacity(deficit);
    for _ in 0..deficit {
        let p = rng.gen_range(0..minority.len());
        let candidates = &neighbours[p];
        let q = candidates[rng.gen_range(0..candidates.len())];
        let lambda: f64 = rng.sample(Open01);
        synthetic.push(interpolate(minority[p], &points[q], lambda));
    }
    debug!(
        "balancing: {} synthetic {} sample(s) from {} neighbour(s) each",
        deficit, minority_label, k
    );

    let LabeledMatrix {
        feature_names,
        mut rows,
        mut labels,
    } = matrix;
    rows.extend(synthetic);
    labels.extend(std::iter::repeat(minority_label).take(deficit));
    report.synthesized = deficit;

    info!(
        "balancing: {} -> {} rows, {} per class",
        majority_count + minority_count,
        rows.len(),
        majority_count
    );
    Ok((
        LabeledMatrix {
            feature_names,
            rows,
            labels,
        },
        report,
    ))
}

/// Distinct minority points, and for every minority row the indices of the
/// closest points at a non-zero distance from it, at most `k` of them. Equal
/// distances are ordered by index.
fn neighbour_lists(minority: &[&Vec<f64>], k: usize) -> Result<(Vec<Vec<f64>>, Vec<Vec<usize>>)> {
    let mut seen = HashSet::new();
    let mut points: Vec<Vec<f64>> = Vec::new();
    for row in minority {
        // -0.0 and 0.0 share a key
        let key: Vec<u64> = row.iter().map(|v| (v + 0.0).to_bits()).collect();
        if seen.insert(key) {
            points.push(row.to_vec());
        }
    }
    if points.len() < 2 {
        return Err(PipelineError::insufficient(
            Stage::Balancing,
            "distinct minority samples",
            2,
            points.len(),
        ));
    }

    let search = LinearKNNSearch::new(points.clone(), Distances::euclidian()).map_err(numerical)?;
    // One extra hit for the row's own point.
    let query = (k + 1).min(points.len());
    let mut lists = Vec::with_capacity(minority.len());
    for (i, row) in minority.iter().enumerate() {
        let mut found: Vec<(f64, usize)> = search
            .find(*row, query)
            .map_err(numerical)?
            .into_iter()
            .filter(|(_, distance, _)| *distance > 0.0)
            .map(|(index, distance, _)| (distance, index))
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.truncate(k);
        if found.is_empty() {
            return Err(PipelineError::Numerical {
                stage: Stage::Balancing,
                reason: format!("minority row {} has no neighbour at a non-zero distance", i),
            });
        }
        lists.push(found.into_iter().map(|(_, index)| index).collect());
    }
    Ok((points, lists))
}

fn numerical(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Numerical {
        stage: Stage::Balancing,
        reason: e.to_string(),
    }
}

fn interpolate(p: &[f64], q: &[f64], lambda: f64) -> Vec<f64> {
    p.iter().zip(q).map(|(a, b)| a + lambda * (b - a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imbalanced(majority: usize, minority: usize) -> LabeledMatrix {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..majority {
            rows.push(vec![i as f64, 100.0 + i as f64]);
            labels.push(ClassLabel::Negative);
        }
        for i in 0..minority {
            rows.push(vec![-(i as f64) * 3.0, (i * i) as f64]);
            labels.push(ClassLabel::Positive);
        }
        LabeledMatrix {
            feature_names: vec!["a".into(), "b".into()],
            rows,
            labels,
        }
    }

    #[test]
    fn ninety_ten_becomes_ninety_ninety() {
        let input = imbalanced(90, 10);
        let (balanced, report) = balance(input.clone(), 5, 2).unwrap();
        assert_eq!(balanced.len(), 180);
        assert_eq!(balanced.class_count(ClassLabel::Negative), 90);
        assert_eq!(balanced.class_count(ClassLabel::Positive), 90);
        assert_eq!(report.synthesized, 80);
        assert_eq!(report.minority_label, ClassLabel::Positive);

        assert_eq!(&balanced.rows[..100], &input.rows[..]);
        assert_eq!(&balanced.labels[..100], &input.labels[..]);

        let originals = &input.rows[90..];
        for row in &balanced.rows[100..] {
            assert!(!originals.contains(row));
        }
    }

    #[test]
    fn synthetic_rows_stay_inside_the_minority_hull() {
        let (balanced, _) = balance(imbalanced(30, 4), 3, 11).unwrap();
        for row in &balanced.rows[34..] {
            assert!(row[0] <= 0.0 && row[0] >= -9.0);
            assert!(row[1] >= 0.0 && row[1] <= 9.0);
        }
    }

    #[test]
    fn same_seed_same_samples() {
        let (a, _) = balance(imbalanced(40, 6), 5, 7).unwrap();
        let (b, _) = balance(imbalanced(40, 6), 5, 7).unwrap();
        let (c, _) = balance(imbalanced(40, 6), 5, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.rows, c.rows);
    }

    #[test]
    fn balanced_input_is_returned_unchanged() {
        let input = imbalanced(5, 5);
        let (output, report) = balance(input.clone(), 3, 1).unwrap();
        assert_eq!(output, input);
        assert_eq!(report.synthesized, 0);
    }

    #[test]
    fn lone_minority_sample_is_insufficient() {
        let err = balance(imbalanced(10, 1), 1, 1).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientSamples { found: 1, .. }));
    }

    #[test]
    fn k_must_be_below_minority_count() {
        let err = balance(imbalanced(10, 3), 3, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn single_class_input_is_insufficient() {
        let err = balance(imbalanced(10, 0), 1, 1).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientSamples { found: 0, .. }));
    }

    #[test]
    fn duplicated_minority_rows_never_yield_copies() {
        let mut input = imbalanced(10, 0);
        for row in [[-1.0, -1.0], [-1.0, -1.0], [-1.0, -1.0], [-5.0, -5.0]] {
            input.rows.push(row.to_vec());
            input.labels.push(ClassLabel::Positive);
        }
        let (balanced, report) = balance(input, 2, 3).unwrap();
        assert_eq!(report.synthesized, 6);
        for row in &balanced.rows[14..] {
            assert!(row[0] > -5.0 && row[0] < -1.0, "{:?} is not strictly inside", row);
            assert_eq!(row[0], row[1]);
        }
    }

    #[test]
    fn identical_minority_rows_are_insufficient() {
        let mut input = imbalanced(10, 0);
        for _ in 0..3 {
            input.rows.push(vec![2.0, 2.0]);
            input.labels.push(ClassLabel::Positive);
        }
        let err = balance(input, 1, 1).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientSamples { found: 1, .. }));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut input = imbalanced(10, 4);
        input.rows[12].push(0.0);
        let err = balance(input, 2, 1).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Balancing));
    }

    #[test]
    fn neighbour_ties_break_by_index() {
        let a = vec![0.0];
        let b = vec![1.0];
        let c = vec![-1.0];
        let rows = vec![&a, &b, &c];
        let (_, lists) = neighbour_lists(&rows, 2).unwrap();
        assert_eq!(lists[0], vec![1, 2]);
        let (_, lists) = neighbour_lists(&rows, 1).unwrap();
        assert_eq!(lists[0], vec![1]);
        assert_eq!(lists[1], vec![0]);
    }
}
