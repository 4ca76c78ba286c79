// ========================================================================================
//
//                       Nearest-neighbour relevance: ReliefF and RReliefF
//
// ========================================================================================
//
// Both estimators walk every instance, find its nearest neighbours under a Manhattan
// distance built from per-attribute differences, and credit an attribute when it
// separates instances whose phenotypes differ. Because neighbours are found in the
// full attribute space, attributes that only matter jointly still earn weight;
// that is what makes these scores the "interaction" half of the free energy.
//
// Per-instance work is independent and is spread over a dedicated rayon pool. The
// partial sums are combined with a reduction, so results can differ from a serial
// run only in the last bits of floating-point rounding.

use crate::dataset::AttributeKind;
use ahash::AHashMap;
use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

const MINIMUM_INSTANCES: usize = 2;

#[derive(Error, Debug)]
pub enum ReliefError {
    #[error("ReliefF needs at least 2 instances to find neighbours; found {0}.")]
    TooFewInstances(usize),
    #[error("The number of nearest neighbours must be at least 1.")]
    ZeroNeighbors,
    #[error(
        "Dimension mismatch: {attributes} attribute kinds for {columns} columns and {phenotypes} phenotypes for {rows} instances."
    )]
    DimensionMismatch {
        attributes: usize,
        columns: usize,
        phenotypes: usize,
        rows: usize,
    },
    #[error("Failed to build the ReliefF worker pool: {0}")]
    ThreadPool(String),
}

/// Which estimator to run; fixed by the phenotype type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliefVariant {
    /// ReliefF, for case/control or multi-class phenotypes.
    Classification,
    /// RReliefF, for continuous phenotypes.
    Regression,
}

impl ReliefVariant {
    pub fn for_phenotype(continuous: bool) -> Self {
        if continuous {
            Self::Regression
        } else {
            Self::Classification
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Classification => "ReliefF",
            Self::Regression => "RReliefF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliefSettings {
    /// Neighbours per instance (per class for ReliefF misses).
    pub k: usize,
    /// Worker threads; callers resolve hints before building the settings.
    pub threads: usize,
}

/// Per-attribute difference function for a fixed attribute set.
struct AttributeDiff {
    kinds: Vec<AttributeKind>,
    /// Value range per attribute; zero for constant columns.
    ranges: Vec<f64>,
}

impl AttributeDiff {
    fn new(matrix: ArrayView2<'_, f64>, kinds: &[AttributeKind]) -> Self {
        let ranges = matrix
            .axis_iter(Axis(1))
            .map(|column| {
                let (lo, hi) = column
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                if hi > lo { hi - lo } else { 0.0 }
            })
            .collect();
        Self {
            kinds: kinds.to_vec(),
            ranges,
        }
    }

    #[inline]
    fn diff(&self, attribute: usize, a: f64, b: f64) -> f64 {
        match self.kinds[attribute] {
            AttributeKind::Genotype => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
            AttributeKind::Numeric => {
                let range = self.ranges[attribute];
                if range > 0.0 { (a - b).abs() / range } else { 0.0 }
            }
        }
    }

    fn distance(&self, x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
        x.iter()
            .zip(y.iter())
            .enumerate()
            .map(|(j, (&a, &b))| self.diff(j, a, b))
            .sum()
    }
}

/// Indices of every other instance, nearest first. Equal distances keep index order.
fn neighbours_by_distance(
    matrix: ArrayView2<'_, f64>,
    metric: &AttributeDiff,
    instance: usize,
) -> Vec<usize> {
    let row = matrix.row(instance);
    let mut others: Vec<(usize, f64)> = (0..matrix.nrows())
        .filter(|&j| j != instance)
        .map(|j| (j, metric.distance(row, matrix.row(j))))
        .collect();
    others.sort_by(|a, b| a.1.total_cmp(&b.1));
    others.into_iter().map(|(j, _)| j).collect()
}

/// Estimates one relevance weight per column of `matrix` (instances as rows).
///
/// Higher is more relevant. Weights are on the estimator's natural scale; callers
/// normalise them alongside the other phase's scores.
pub fn relief_weights(
    matrix: ArrayView2<'_, f64>,
    phenotype: ArrayView1<'_, f64>,
    kinds: &[AttributeKind],
    variant: ReliefVariant,
    settings: ReliefSettings,
) -> Result<Array1<f64>, ReliefError> {
    let (rows, cols) = matrix.dim();
    if kinds.len() != cols || phenotype.len() != rows {
        return Err(ReliefError::DimensionMismatch {
            attributes: kinds.len(),
            columns: cols,
            phenotypes: phenotype.len(),
            rows,
        });
    }
    if rows < MINIMUM_INSTANCES {
        return Err(ReliefError::TooFewInstances(rows));
    }
    if settings.k == 0 {
        return Err(ReliefError::ZeroNeighbors);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.threads)
        .build()
        .map_err(|e| ReliefError::ThreadPool(e.to_string()))?;
    let metric = AttributeDiff::new(matrix, kinds);
    debug!(
        "{} over {} instances x {} attributes, k = {}, {} threads",
        variant.name(),
        rows,
        cols,
        settings.k,
        settings.threads
    );

    Ok(pool.install(|| match variant {
        ReliefVariant::Classification => relieff(matrix, phenotype, &metric, settings.k),
        ReliefVariant::Regression => rrelieff(matrix, phenotype, &metric, settings.k),
    }))
}

fn relieff(
    matrix: ArrayView2<'_, f64>,
    phenotype: ArrayView1<'_, f64>,
    metric: &AttributeDiff,
    k: usize,
) -> Array1<f64> {
    let (rows, cols) = matrix.dim();
    let labels: Vec<i64> = phenotype.iter().map(|&v| v.round() as i64).collect();
    let mut class_counts: AHashMap<i64, usize> = AHashMap::new();
    for &label in &labels {
        *class_counts.entry(label).or_insert(0) += 1;
    }
    let prior = |label: i64| class_counts.get(&label).copied().unwrap_or(0) as f64 / rows as f64;

    (0..rows)
        .into_par_iter()
        .map(|i| {
            let mut contribution = Array1::<f64>::zeros(cols);
            let own = labels[i];
            let own_prior = prior(own);
            let ordered = neighbours_by_distance(matrix, metric, i);

            let hits: Vec<usize> = ordered
                .iter()
                .copied()
                .filter(|&j| labels[j] == own)
                .take(k)
                .collect();
            if !hits.is_empty() {
                let scale = 1.0 / (rows as f64 * hits.len() as f64);
                for &j in &hits {
                    for a in 0..cols {
                        contribution[a] -= scale * metric.diff(a, matrix[[i, a]], matrix[[j, a]]);
                    }
                }
            }

            if own_prior < 1.0 {
                let mut other_classes: Vec<i64> =
                    class_counts.keys().copied().filter(|&c| c != own).collect();
                other_classes.sort_unstable();
                for class in other_classes {
                    let misses: Vec<usize> = ordered
                        .iter()
                        .copied()
                        .filter(|&j| labels[j] == class)
                        .take(k)
                        .collect();
                    if misses.is_empty() {
                        continue;
                    }
                    let weight = prior(class) / (1.0 - own_prior);
                    let scale = weight / (rows as f64 * misses.len() as f64);
                    for &j in &misses {
                        for a in 0..cols {
                            contribution[a] +=
                                scale * metric.diff(a, matrix[[i, a]], matrix[[j, a]]);
                        }
                    }
                }
            }
            contribution
        })
        .reduce(|| Array1::zeros(cols), |a, b| a + b)
}

/// Weighted sums accumulated by RReliefF: probability of a different phenotype,
/// of a different attribute value, and of both at once.
struct RegressionSums {
    diff_class: f64,
    diff_attribute: Array1<f64>,
    diff_both: Array1<f64>,
}

impl RegressionSums {
    fn zeros(cols: usize) -> Self {
        Self {
            diff_class: 0.0,
            diff_attribute: Array1::zeros(cols),
            diff_both: Array1::zeros(cols),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.diff_class += other.diff_class;
        self.diff_attribute += &other.diff_attribute;
        self.diff_both += &other.diff_both;
        self
    }
}

fn rrelieff(
    matrix: ArrayView2<'_, f64>,
    phenotype: ArrayView1<'_, f64>,
    metric: &AttributeDiff,
    k: usize,
) -> Array1<f64> {
    let (rows, cols) = matrix.dim();
    let (lo, hi) = phenotype
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let phenotype_range = hi - lo;

    let sums = (0..rows)
        .into_par_iter()
        .map(|i| {
            let mut sums = RegressionSums::zeros(cols);
            let neighbours: Vec<usize> = neighbours_by_distance(matrix, metric, i)
                .into_iter()
                .take(k)
                .collect();
            let weight = 1.0 / neighbours.len() as f64;
            for &j in &neighbours {
                let class_diff = if phenotype_range > 0.0 {
                    (phenotype[i] - phenotype[j]).abs() / phenotype_range
                } else {
                    0.0
                };
                sums.diff_class += weight * class_diff;
                for a in 0..cols {
                    let attribute_diff = metric.diff(a, matrix[[i, a]], matrix[[j, a]]);
                    sums.diff_attribute[a] += weight * attribute_diff;
                    sums.diff_both[a] += weight * class_diff * attribute_diff;
                }
            }
            sums
        })
        .reduce(|| RegressionSums::zeros(cols), RegressionSums::merge);

    let m = rows as f64;
    let n_dc = sums.diff_class;
    Array1::from_shape_fn(cols, |a| {
        let n_da = sums.diff_attribute[a];
        let n_dcda = sums.diff_both[a];
        let same_class_term = if n_dc > 0.0 { n_dcda / n_dc } else { 0.0 };
        let other_term = if m - n_dc > 0.0 {
            (n_da - n_dcda) / (m - n_dc)
        } else {
            0.0
        };
        same_class_term - other_term
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    const INSTANCES: usize = 20;

    fn settings() -> ReliefSettings {
        ReliefSettings { k: 3, threads: 2 }
    }

    #[test]
    fn relieff_ranks_class_signal_above_noise() {
        // Column 0 encodes the class exactly, column 1 cycles independently of it.
        let matrix = Array2::from_shape_fn((INSTANCES, 2), |(i, a)| match a {
            0 => 2.0 * (i % 2) as f64,
            _ => (i % 3) as f64,
        });
        let phenotype = Array1::from_shape_fn(INSTANCES, |i| (i % 2) as f64);
        let kinds = [AttributeKind::Genotype, AttributeKind::Genotype];

        let weights = relief_weights(
            matrix.view(),
            phenotype.view(),
            &kinds,
            ReliefVariant::Classification,
            settings(),
        )
        .unwrap();

        assert_abs_diff_eq!(weights[0], 1.0, epsilon = 1e-12);
        assert!(weights[0] > weights[1], "weights: {weights}");
    }

    #[test]
    fn rrelieff_ranks_trait_signal_above_noise() {
        // The trait is a linear function of column 0; column 1 only shapes the
        // neighbourhoods and never changes between an instance and its neighbours.
        let matrix = Array2::from_shape_fn((INSTANCES, 2), |(i, a)| match a {
            0 => i as f64 * 0.5,
            _ => (i % 3) as f64,
        });
        let phenotype = Array1::from_shape_fn(INSTANCES, |i| 10.0 + i as f64);
        let kinds = [AttributeKind::Numeric, AttributeKind::Genotype];

        let weights = relief_weights(
            matrix.view(),
            phenotype.view(),
            &kinds,
            ReliefVariant::Regression,
            settings(),
        )
        .unwrap();

        assert_abs_diff_eq!(weights[1], 0.0, epsilon = 1e-12);
        assert!(weights[0] > weights[1], "weights: {weights}");
    }

    #[test]
    fn constant_phenotype_gives_zero_regression_weights() {
        let matrix = array![[0.0, 1.5], [1.0, 2.5], [2.0, 0.5]];
        let phenotype = array![4.0, 4.0, 4.0];
        let kinds = [AttributeKind::Genotype, AttributeKind::Numeric];
        let weights = relief_weights(
            matrix.view(),
            phenotype.view(),
            &kinds,
            ReliefVariant::Regression,
            settings(),
        )
        .unwrap();
        // No phenotype differences: only the second term remains, and it is a
        // plain average of attribute differences.
        assert!(weights.iter().all(|&w| w <= 0.0));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let matrix = array![[0.0, 1.0]];
        let phenotype = array![1.0];
        let kinds = [AttributeKind::Genotype, AttributeKind::Genotype];
        assert!(matches!(
            relief_weights(
                matrix.view(),
                phenotype.view(),
                &kinds,
                ReliefVariant::Classification,
                settings()
            ),
            Err(ReliefError::TooFewInstances(1))
        ));

        let matrix = array![[0.0, 1.0], [1.0, 0.0]];
        let phenotype = array![1.0, 0.0];
        assert!(matches!(
            relief_weights(
                matrix.view(),
                phenotype.view(),
                &kinds[..1],
                ReliefVariant::Classification,
                settings()
            ),
            Err(ReliefError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            relief_weights(
                matrix.view(),
                phenotype.view(),
                &kinds,
                ReliefVariant::Classification,
                ReliefSettings { k: 0, threads: 1 }
            ),
            Err(ReliefError::ZeroNeighbors)
        ));
    }

    #[test]
    fn variant_follows_phenotype_type() {
        assert_eq!(ReliefVariant::for_phenotype(true), ReliefVariant::Regression);
        assert_eq!(ReliefVariant::for_phenotype(false).name(), "ReliefF");
    }
}
