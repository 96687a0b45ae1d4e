//! Agreement statistics: Cohen's and Fleiss' kappa, confusion matrices and
//! bootstrap accuracy intervals.

use std::collections::HashMap;
use std::hash::Hash;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{DebateGptError, Result};
use crate::normalize::Label;

/// A kappa value with its confidence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KappaEstimate {
    pub kappa: f64,
    pub lower: f64,
    pub upper: f64,
}

fn check_alpha(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(DebateGptError::InvalidInputShape(format!(
            "alpha must lie in (0, 1), got {alpha}"
        )))
    }
}

/// Fleiss' kappa over `ratings`, one row per item and one column per rater.
///
/// Every row must hold the same number of ratings, at least three. The
/// interval uses the large-sample normal approximation at level `1 - alpha`.
pub fn fleiss_kappa<L: Eq + Hash>(ratings: &[Vec<L>], alpha: f64) -> Result<KappaEstimate> {
    check_alpha(alpha)?;
    let Some(first) = ratings.first() else {
        return Err(DebateGptError::InvalidInputShape(
            "Fleiss' kappa needs at least one item".to_string(),
        ));
    };
    let raters = first.len();
    if raters < 3 {
        return Err(DebateGptError::InvalidInputShape(format!(
            "Fleiss' kappa needs at least 3 raters, got {raters}"
        )));
    }
    if let Some(row) = ratings.iter().position(|r| r.len() != raters) {
        return Err(DebateGptError::InvalidInputShape(format!(
            "item {row} has {} ratings, expected {raters}",
            ratings[row].len()
        )));
    }

    let mut label_index: HashMap<&L, usize> = HashMap::new();
    for label in ratings.iter().flatten() {
        let next = label_index.len();
        label_index.entry(label).or_insert(next);
    }

    let n = raters as f64;
    let items = ratings.len() as f64;
    let mut totals = vec![0.0; label_index.len()];
    let mut agreement_sum = 0.0;
    for row in ratings {
        let mut counts = vec![0.0; label_index.len()];
        for label in row {
            counts[label_index[label]] += 1.0;
        }
        let squares: f64 = counts.iter().map(|c| c * c).sum();
        agreement_sum += (squares - n) / (n * (n - 1.0));
        for (total, count) in totals.iter_mut().zip(&counts) {
            *total += count;
        }
    }

    let mean_agreement = agreement_sum / items;
    let proportions: Vec<f64> = totals.iter().map(|t| t / (n * items)).collect();
    let chance: f64 = proportions.iter().map(|q| q * q).sum();
    if chance >= 1.0 {
        return Err(DebateGptError::InvalidInputShape(
            "all ratings use one label, kappa is undefined".to_string(),
        ));
    }
    let cubes: f64 = proportions.iter().map(|q| q * q * q).sum();

    let kappa = (mean_agreement - chance) / (1.0 - chance);
    let variance = 2.0 * (chance - (2.0 * n - 3.0) * chance * chance + 2.0 * (n - 2.0) * cubes)
        / (n * items * (n - 1.0) * (1.0 - chance).powi(2));
    let margin = inverse_normal_cdf(1.0 - alpha / 2.0) * variance.sqrt();

    Ok(KappaEstimate {
        kappa,
        lower: kappa - margin,
        upper: kappa + margin,
    })
}

/// Cohen's kappa between two raters given as `(first, second)` label pairs.
pub fn cohens_kappa<L: Eq + Hash>(pairs: &[(L, L)], alpha: f64) -> Result<KappaEstimate> {
    check_alpha(alpha)?;
    if pairs.is_empty() {
        return Err(DebateGptError::InvalidInputShape(
            "Cohen's kappa needs at least one item".to_string(),
        ));
    }

    let samples = pairs.len() as f64;
    let mut first_counts: HashMap<&L, f64> = HashMap::new();
    let mut second_counts: HashMap<&L, f64> = HashMap::new();
    let mut agreements = 0.0;
    for (a, b) in pairs {
        *first_counts.entry(a).or_default() += 1.0;
        *second_counts.entry(b).or_default() += 1.0;
        if a == b {
            agreements += 1.0;
        }
    }

    let observed = agreements / samples;
    let expected: f64 = first_counts
        .iter()
        .map(|(label, count)| {
            let other = second_counts.get(label).copied().unwrap_or(0.0);
            (count / samples) * (other / samples)
        })
        .sum();
    if expected >= 1.0 {
        return Err(DebateGptError::InvalidInputShape(
            "both raters use one and the same label, kappa is undefined".to_string(),
        ));
    }

    let kappa = (observed - expected) / (1.0 - expected);
    let standard_error =
        ((observed * (1.0 - observed)) / ((1.0 - expected).powi(2) * samples)).sqrt();
    let margin = inverse_normal_cdf(1.0 - alpha / 2.0) * standard_error;

    Ok(KappaEstimate {
        kappa,
        lower: kappa - margin,
        upper: kappa + margin,
    })
}

/// Quantile function of the standard normal distribution.
///
/// Rational approximation by P. J. Acklam, relative error below 1.2e-9.
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239e0,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155833350e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838e0,
        -2.549732539343734e0,
        4.374664141464968e0,
        2.938163982698783e0,
    ];
    const D: [f64; 4] = [
        7.784695709601340e-3,
        3.224671290700398e-1,
        2.445134137142996e0,
        3.754408661907416e0,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// Counts of (truth, prediction) pairs over every [`Label`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: [[usize; 4]; 4],
}

fn label_index(label: Label) -> usize {
    match label {
        Label::Pro => 0,
        Label::Con => 1,
        Label::Tie => 2,
        Label::Other => 3,
    }
}

impl ConfusionMatrix {
    pub fn from_pairs<'p>(pairs: impl IntoIterator<Item = &'p (Label, Label)>) -> Self {
        let mut matrix = Self::default();
        for (truth, predicted) in pairs {
            matrix.counts[label_index(*truth)][label_index(*predicted)] += 1;
        }
        matrix
    }

    pub fn count(&self, truth: Label, predicted: Label) -> usize {
        self.counts[label_index(truth)][label_index(predicted)]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn correct(&self) -> usize {
        (0..4).map(|i| self.counts[i][i]).sum()
    }

    /// Share of pairs whose prediction equals the truth; `None` when empty.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.correct() as f64 / total as f64)
    }

    /// Share of `label` predictions that were right; `None` if never predicted.
    pub fn precision(&self, label: Label) -> Option<f64> {
        let i = label_index(label);
        let predicted: usize = (0..4).map(|t| self.counts[t][i]).sum();
        (predicted > 0).then(|| self.counts[i][i] as f64 / predicted as f64)
    }

    /// Share of true `label` pairs that were predicted; `None` if it never occurs.
    pub fn recall(&self, label: Label) -> Option<f64> {
        let i = label_index(label);
        let actual: usize = self.counts[i].iter().sum();
        (actual > 0).then(|| self.counts[i][i] as f64 / actual as f64)
    }
}

/// Percentile interval of bootstrapped accuracies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapInterval {
    pub lower: f64,
    pub upper: f64,
}

/// 2.5th and 97.5th percentiles of accuracy over `repetitions` resamples of
/// `sample_size` pairs drawn with replacement. Seeded for reproducibility.
pub fn bootstrap_accuracy(
    pairs: &[(Label, Label)],
    repetitions: usize,
    sample_size: usize,
    seed: u64,
) -> Result<BootstrapInterval> {
    if pairs.is_empty() || repetitions == 0 || sample_size == 0 {
        return Err(DebateGptError::InvalidInputShape(format!(
            "bootstrap needs pairs, repetitions and a sample size (got {}, {}, {})",
            pairs.len(),
            repetitions,
            sample_size
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut statistics: Vec<f64> = (0..repetitions)
        .map(|_| {
            let correct = (0..sample_size)
                .filter(|_| {
                    let (truth, predicted) = pairs[rng.gen_range(0..pairs.len())];
                    truth == predicted
                })
                .count();
            correct as f64 / sample_size as f64
        })
        .collect();
    statistics.sort_by(f64::total_cmp);

    let at = |q: f64| statistics[((repetitions as f64 * q) as usize).min(repetitions - 1)];
    Ok(BootstrapInterval {
        lower: at(0.025),
        upper: at(0.975),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.005,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_cohens_kappa() {
        let first: Vec<&str> = std::iter::repeat_n("normal", 64)
            .chain(std::iter::repeat_n("abnormal", 172))
            .collect();
        let second: Vec<&str> = std::iter::repeat_n("normal", 48)
            .chain(std::iter::repeat_n("abnormal", 16))
            .chain(std::iter::repeat_n("normal", 12))
            .chain(std::iter::repeat_n("abnormal", 160))
            .collect();
        let pairs: Vec<(&str, &str)> = first.into_iter().zip(second).collect();
        let estimate = cohens_kappa(&pairs, 0.05).unwrap();
        assert_close(estimate.kappa, 0.69);
        assert_close(estimate.lower, 0.59);
        assert_close(estimate.upper, 0.80);
    }

    #[test]
    fn test_fleiss_kappa() {
        let raters = [
            [1, 2, 2, 1, 2, 2, 1, 1, 3, 1, 2, 2],
            [1, 2, 1, 2, 1, 2, 3, 2, 3, 2, 3, 1],
            [1, 2, 2, 1, 3, 3, 3, 2, 1, 2, 3, 1],
        ];
        let items: Vec<Vec<i32>> = (0..12).map(|i| raters.iter().map(|r| r[i]).collect()).collect();
        let estimate = fleiss_kappa(&items, 0.05).unwrap();
        assert_close(estimate.kappa, 0.10);
        assert_close(estimate.lower, -0.15);
        assert_close(estimate.upper, 0.35);
    }

    #[test]
    fn test_shape_violations() {
        let two_raters = vec![vec!["a", "b"], vec!["a", "a"]];
        assert!(matches!(
            fleiss_kappa(&two_raters, 0.05),
            Err(DebateGptError::InvalidInputShape(_))
        ));
        let ragged = vec![vec!["a", "b", "c"], vec!["a", "a"]];
        assert!(matches!(
            fleiss_kappa(&ragged, 0.05),
            Err(DebateGptError::InvalidInputShape(_))
        ));
        let empty: Vec<(&str, &str)> = Vec::new();
        assert!(matches!(
            cohens_kappa(&empty, 0.05),
            Err(DebateGptError::InvalidInputShape(_))
        ));
    }

    #[test]
    fn test_inverse_normal_cdf() {
        assert!((inverse_normal_cdf(0.975) - 1.959964).abs() < 1e-6);
        assert!(inverse_normal_cdf(0.5).abs() < 1e-9);
        assert!((inverse_normal_cdf(0.01) + 2.326348).abs() < 1e-6);
    }

    #[test]
    fn test_confusion_matrix() {
        let pairs = vec![
            (Label::Pro, Label::Pro),
            (Label::Pro, Label::Con),
            (Label::Con, Label::Con),
            (Label::Tie, Label::Other),
        ];
        let cm = ConfusionMatrix::from_pairs(&pairs);
        assert_eq!(cm.total(), 4);
        assert_eq!(cm.accuracy(), Some(0.5));
        assert_eq!(cm.precision(Label::Con), Some(0.5));
        assert_eq!(cm.recall(Label::Pro), Some(0.5));
        assert_eq!(cm.recall(Label::Tie), Some(0.0));
        assert_eq!(cm.precision(Label::Tie), None);
        assert_eq!(cm.count(Label::Tie, Label::Other), 1);
    }

    #[test]
    fn test_bootstrap_is_seeded() {
        let pairs: Vec<(Label, Label)> = (0..50)
            .map(|i| {
                if i % 4 == 0 {
                    (Label::Pro, Label::Con)
                } else {
                    (Label::Pro, Label::Pro)
                }
            })
            .collect();
        let a = bootstrap_accuracy(&pairs, 1000, 100, 7).unwrap();
        let b = bootstrap_accuracy(&pairs, 1000, 100, 7).unwrap();
        assert_eq!(a, b);
        assert!(a.lower <= 0.75 && 0.75 <= a.upper);
        assert!(a.lower < a.upper);
        assert!(bootstrap_accuracy(&[], 10, 10, 0).is_err());
    }
}
