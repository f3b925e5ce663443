//! Scoring strategies.
//!
//! Every strategy maps a value and the model's training values to a score in
//! `[0, 1]`; higher means more anomalous. Strategies read the training values
//! directly, there is no compiled model representation.

use rand::{Rng, RngCore};

use crate::config::AnomalyConfig;
use crate::stats::{clamp01, mean, safe_div, std_dev};
use super::types::DetectionType;

const DENSITY_EPSILON: f64 = 1e-6;

/// Pluggable scoring algorithm.
pub trait ScoringStrategy: Send + Sync {
    /// Name of this strategy (for logs).
    fn name(&self) -> &str;

    /// Score `value` against `training`. Randomized strategies draw from `rng`.
    fn score(&self, value: f64, training: &[f64], rng: &mut dyn RngCore) -> f64;
}

/// Build the strategy for a detection type
pub fn strategy_for(kind: DetectionType, config: &AnomalyConfig) -> Box<dyn ScoringStrategy> {
    match kind {
        DetectionType::Statistical => Box::new(Statistical),
        DetectionType::IsolationForest => Box::new(IsolationForest {
            trees: config.isolation_trees,
            max_depth: config.isolation_max_depth,
        }),
        DetectionType::OneClassSvm => Box::new(OneClassSvm),
        DetectionType::DensityBased => Box::new(DensityBased { k: config.density_neighbors }),
    }
}

// ── Statistical (z-score) ───────────────────────────────────────────────

/// `min(1, |x - mean| / stddev / 3)`
pub struct Statistical;

impl ScoringStrategy for Statistical {
    fn name(&self) -> &str { "statistical" }

    fn score(&self, value: f64, training: &[f64], _rng: &mut dyn RngCore) -> f64 {
        let sd = std_dev(training);
        if sd < f64::EPSILON {
            return 0.0;
        }
        clamp01((value - mean(training)).abs() / sd / 3.0)
    }
}

// ── Isolation forest approximation ──────────────────────────────────────

/// Fraction of random recursive partitions that isolate the value in a
/// singleton region within `max_depth` splits.
pub struct IsolationForest {
    pub trees: usize,
    pub max_depth: usize,
}

impl IsolationForest {
    fn isolates(&self, value: f64, training: &[f64], rng: &mut dyn RngCore) -> bool {
        let mut region: Vec<f64> = training.to_vec();
        region.push(value);

        for _ in 0..self.max_depth {
            if region.len() <= 1 {
                return true;
            }
            let lo = region.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = region.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if !lo.is_finite() || !hi.is_finite() || hi - lo < f64::EPSILON {
                // identical or unbounded values cannot be separated
                return false;
            }
            // interpolate instead of sampling `lo..hi`, whose width may overflow
            let t: f64 = rng.gen();
            let split = lo * (1.0 - t) + hi * t;
            let left = value < split;
            region.retain(|v| (*v < split) == left);
        }
        region.len() <= 1
    }
}

impl ScoringStrategy for IsolationForest {
    fn name(&self) -> &str { "isolation_forest" }

    fn score(&self, value: f64, training: &[f64], rng: &mut dyn RngCore) -> f64 {
        if self.trees == 0 || training.is_empty() {
            return 0.0;
        }
        let isolated = (0..self.trees)
            .filter(|_| self.isolates(value, training, rng))
            .count();
        clamp01(isolated as f64 / self.trees as f64)
    }
}

// ── One-class SVM approximation ─────────────────────────────────────────

/// Distance from the training mean relative to the farthest training value
pub struct OneClassSvm;

impl ScoringStrategy for OneClassSvm {
    fn name(&self) -> &str { "one_class_svm" }

    fn score(&self, value: f64, training: &[f64], _rng: &mut dyn RngCore) -> f64 {
        if training.is_empty() {
            return 0.0;
        }
        let m = mean(training);
        let max_dev = training.iter().map(|x| (x - m).abs()).fold(0.0, f64::max);
        clamp01(safe_div((value - m).abs(), max_dev))
    }
}

// ── Density based (k-nearest neighbour) ─────────────────────────────────

/// `1 - density(x) / max training density`, with density the inverse of the
/// k-th nearest neighbour distance
pub struct DensityBased {
    pub k: usize,
}

impl DensityBased {
    /// Distance to the k-th nearest of `others` (or the farthest if fewer)
    fn kth_distance(&self, value: f64, others: impl Iterator<Item = f64>) -> Option<f64> {
        let mut dists: Vec<f64> = others.map(|o| (o - value).abs()).collect();
        if dists.is_empty() {
            return None;
        }
        dists.sort_by(|a, b| a.total_cmp(b));
        let k = self.k.clamp(1, dists.len());
        Some(dists[k - 1])
    }

    fn density(distance: f64) -> f64 {
        1.0 / (distance + DENSITY_EPSILON)
    }
}

impl ScoringStrategy for DensityBased {
    fn name(&self) -> &str { "density_based" }

    fn score(&self, value: f64, training: &[f64], _rng: &mut dyn RngCore) -> f64 {
        if training.len() < 2 {
            return 0.0;
        }
        let density = match self.kth_distance(value, training.iter().copied()) {
            Some(d) => Self::density(d),
            None => return 0.0,
        };

        let max_density = training
            .iter()
            .enumerate()
            .filter_map(|(i, x)| {
                let others = training.iter().enumerate().filter(move |(j, _)| *j != i).map(|(_, o)| *o);
                self.kth_distance(*x, others)
            })
            .map(Self::density)
            .fold(0.0, f64::max);

        clamp01(1.0 - safe_div(density, max_density))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const NORMAL: [f64; 10] = [10.0, 11.0, 9.0, 10.5, 9.5, 10.2, 9.8, 10.1, 9.9, 10.3];

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn statistical_scores_far_values_high() {
        let s = Statistical;
        assert!(s.score(30.0, &NORMAL, &mut rng()) >= 0.99);
        assert!(s.score(10.0, &NORMAL, &mut rng()) < 0.1);
    }

    #[test]
    fn statistical_is_deterministic_and_guards_zero_variance() {
        let s = Statistical;
        let a = s.score(12.0, &NORMAL, &mut rng());
        let b = s.score(12.0, &NORMAL, &mut StdRng::seed_from_u64(999));
        assert_eq!(a, b);
        assert_eq!(s.score(50.0, &[5.0, 5.0, 5.0], &mut rng()), 0.0);
        assert_eq!(s.score(50.0, &[], &mut rng()), 0.0);
    }

    #[test]
    fn isolation_forest_separates_outlier_from_inlier() {
        let forest = IsolationForest { trees: 10, max_depth: 10 };
        let outlier = forest.score(500.0, &NORMAL, &mut rng());
        // 10.0 already sits in the training set, so no split can isolate it
        let inlier = forest.score(10.0, &NORMAL, &mut rng());
        assert!(outlier >= 0.9, "outlier scored {}", outlier);
        assert_eq!(inlier, 0.0);
    }

    #[test]
    fn isolation_forest_is_reproducible_with_fixed_seed() {
        let forest = IsolationForest { trees: 10, max_depth: 10 };
        let a = forest.score(10.4, &NORMAL, &mut StdRng::seed_from_u64(42));
        let b = forest.score(10.4, &NORMAL, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn isolation_forest_cannot_isolate_duplicates() {
        let forest = IsolationForest { trees: 10, max_depth: 10 };
        assert_eq!(forest.score(4.0, &[4.0, 4.0, 4.0], &mut rng()), 0.0);
    }

    #[test]
    fn isolation_forest_handles_extreme_finite_ranges() {
        let forest = IsolationForest { trees: 10, max_depth: 10 };
        let score = forest.score(0.0, &[-1e308, 1e308], &mut rng());
        assert!((0.0..=1.0).contains(&score));
        let score = forest.score(1.0, &[-1e308, 1e308, 5.0], &mut rng());
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(forest.score(1.0, &[f64::NEG_INFINITY, f64::INFINITY], &mut rng()), 0.0);
    }

    #[test]
    fn one_class_svm_relative_to_farthest_training_point() {
        let svm = OneClassSvm;
        // mean 10, farthest deviation 2
        let training = [8.0, 10.0, 12.0];
        assert!((svm.score(11.0, &training, &mut rng()) - 0.5).abs() < 1e-12);
        assert_eq!(svm.score(40.0, &training, &mut rng()), 1.0);
        assert_eq!(svm.score(40.0, &[3.0, 3.0], &mut rng()), 0.0);
    }

    #[test]
    fn density_based_prefers_dense_regions() {
        let knn = DensityBased { k: 5 };
        let far = knn.score(100.0, &NORMAL, &mut rng());
        let near = knn.score(10.0, &NORMAL, &mut rng());
        assert!(far > 0.9, "far scored {}", far);
        assert!(near < far);
        assert!((0.0..=1.0).contains(&near));
        assert_eq!(knn.score(1.0, &[2.0], &mut rng()), 0.0);
    }

    #[test]
    fn strategy_for_matches_type() {
        let config = AnomalyConfig::default();
        assert_eq!(strategy_for(DetectionType::Statistical, &config).name(), "statistical");
        assert_eq!(strategy_for(DetectionType::IsolationForest, &config).name(), "isolation_forest");
        assert_eq!(strategy_for(DetectionType::OneClassSvm, &config).name(), "one_class_svm");
        assert_eq!(strategy_for(DetectionType::DensityBased, &config).name(), "density_based");
    }
}
