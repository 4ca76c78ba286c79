// ========================================================================================
//                         Interaction effects: the ReliefF adapter
// ========================================================================================
//
// Which estimator runs is decided by two independent questions: is the phenotype
// continuous, and has the caller asked for iterative removal? The four answers map
// onto ReliefF / RReliefF in standard or iterative mode. Either way the adapter
// returns exactly one score per attribute that is active in the data set.

use crate::config::{InteractionConfig, RemovalPolicy, resolve_thread_count};
use crate::dataset::{AttributeDataset, AttributeKind, DataError};
use crate::relief::{ReliefSettings, ReliefVariant, relief_weights};
use crate::scorer::{AttributeScorer, ScorerError};
use crate::scores::{Score, ScoreSet};
use ahash::AHashMap;
use log::{debug, info};

/// Whether the estimator sees the active attributes once, or repeatedly prunes its
/// own copy of the attribute list between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    Standard,
    Iterative(RemovalPolicy),
}

pub struct InteractionScorer {
    variant: ReliefVariant,
    mode: InteractionMode,
    settings: ReliefSettings,
    label: &'static str,
}

impl InteractionScorer {
    /// Picks the estimator for a phenotype type and configuration.
    pub fn select(continuous: bool, config: &InteractionConfig) -> Self {
        let variant = ReliefVariant::for_phenotype(continuous);
        let (mode, label) = match (variant, config.iterative_removal.filter(|_| config.is_iterative())) {
            (ReliefVariant::Regression, Some(policy)) => {
                (InteractionMode::Iterative(policy), "Iterative RReliefF")
            }
            (ReliefVariant::Classification, Some(policy)) => {
                (InteractionMode::Iterative(policy), "Iterative ReliefF")
            }
            (_, None) => (InteractionMode::Standard, variant.name()),
        };
        let settings = ReliefSettings {
            k: config.k_nearest_neighbors,
            threads: resolve_thread_count(config.threads),
        };
        info!("{label} selected with k = {}, {} threads", settings.k, settings.threads);
        Self {
            variant,
            mode,
            settings,
            label,
        }
    }

    pub fn variant(&self) -> ReliefVariant {
        self.variant
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    fn weigh(
        &self,
        dataset: &dyn AttributeDataset,
        names: &[String],
    ) -> Result<Vec<Score>, ScorerError> {
        let matrix = dataset.columns(names)?;
        let kinds = names
            .iter()
            .map(|n| {
                dataset
                    .attribute_kind(n)
                    .ok_or_else(|| DataError::AttributeNotActive(n.clone()))
            })
            .collect::<Result<Vec<AttributeKind>, _>>()?;
        let weights = relief_weights(
            matrix.view(),
            dataset.phenotypes(),
            &kinds,
            self.variant,
            self.settings,
        )?;
        Ok(names
            .iter()
            .zip(weights.iter())
            .map(|(name, &w)| Score::new(w, name.as_str()))
            .collect())
    }

    /// Scores a private working list, retiring the lowest-weighted attributes between
    /// passes. Each retired attribute keeps the weight it had when it was retired.
    fn weigh_iteratively(
        &self,
        dataset: &dyn AttributeDataset,
        policy: RemovalPolicy,
    ) -> Result<ScoreSet, ScorerError> {
        let names = dataset.attribute_names();
        let mut working = names.clone();
        let mut settled: AHashMap<String, f64> = AHashMap::with_capacity(names.len());
        let mut pass = 0usize;

        loop {
            pass += 1;
            let mut scores = ScoreSet::from_scores(self.weigh(dataset, &working)?);
            let n = policy.resolve(working.len()).max(1);
            if working.len() <= n {
                settled.extend(scores.into_iter().map(|s| (s.attribute, s.value)));
                break;
            }
            scores.sort_ascending();
            let retired: Vec<Score> = scores.into_vec().into_iter().take(n).collect();
            debug!(
                "{} pass {pass}: {} attributes, retiring {}",
                self.label,
                working.len(),
                retired.len()
            );
            working.retain(|name| !retired.iter().any(|s| &s.attribute == name));
            settled.extend(retired.into_iter().map(|s| (s.attribute, s.value)));
        }

        Ok(names
            .into_iter()
            .filter_map(|name| settled.get(&name).copied().map(|v| Score::new(v, name)))
            .collect())
    }
}

impl AttributeScorer for InteractionScorer {
    fn name(&self) -> &str {
        self.label
    }

    fn score(&mut self, dataset: &dyn AttributeDataset) -> Result<ScoreSet, ScorerError> {
        info!("Running {}", self.label);
        match self.mode {
            InteractionMode::Standard => {
                let names = dataset.attribute_names();
                Ok(ScoreSet::from_scores(self.weigh(dataset, &names)?))
            }
            InteractionMode::Iterative(policy) => self.weigh_iteratively(dataset, policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AttributeMatrix;
    use ndarray::{Array1, Array2};

    fn config(iterative_removal: Option<RemovalPolicy>) -> InteractionConfig {
        InteractionConfig {
            k_nearest_neighbors: 3,
            threads: 1,
            iterative_removal,
        }
    }

    #[test]
    fn selection_branches_on_phenotype_and_iteration() {
        let standard = config(None);
        let iterative = config(Some(RemovalPolicy::Count(2)));
        let disabled = config(Some(RemovalPolicy::Percent(0)));

        let s = InteractionScorer::select(false, &standard);
        assert_eq!((s.variant(), s.mode()), (ReliefVariant::Classification, InteractionMode::Standard));
        assert_eq!(s.name(), "ReliefF");

        let s = InteractionScorer::select(true, &standard);
        assert_eq!((s.variant(), s.mode()), (ReliefVariant::Regression, InteractionMode::Standard));

        let s = InteractionScorer::select(false, &iterative);
        assert_eq!(
            (s.variant(), s.mode()),
            (ReliefVariant::Classification, InteractionMode::Iterative(RemovalPolicy::Count(2)))
        );

        let s = InteractionScorer::select(true, &iterative);
        assert_eq!(s.name(), "Iterative RReliefF");

        let s = InteractionScorer::select(true, &disabled);
        assert_eq!(s.mode(), InteractionMode::Standard);
    }

    fn case_control(attributes: usize) -> AttributeMatrix {
        let rows = 16;
        let names = (0..attributes).map(|a| format!("rs{a}")).collect();
        let values = Array2::from_shape_fn((rows, attributes), |(i, a)| {
            if a == 0 { 2.0 * (i % 2) as f64 } else { ((i * (a + 1)) % 3) as f64 }
        });
        let phenotype = Array1::from_shape_fn(rows, |i| (i % 2) as f64);
        AttributeMatrix::from_values(names, values, phenotype).unwrap()
    }

    #[test]
    fn standard_mode_scores_every_active_attribute() {
        let mut data = case_control(5);
        data.remove_attribute("rs3").unwrap();
        let mut scorer = InteractionScorer::select(false, &config(None));
        let scores = scorer.score(&data).unwrap();

        assert_eq!(scores.names(), vec!["rs0", "rs1", "rs2", "rs4"]);
        let top = scores
            .iter()
            .max_by(|a, b| a.value.total_cmp(&b.value))
            .unwrap();
        assert_eq!(top.attribute, "rs0");
    }

    #[test]
    fn iterative_mode_keeps_dataset_untouched_and_covers_all_attributes() {
        let data = case_control(7);
        let mut scorer = InteractionScorer::select(false, &config(Some(RemovalPolicy::Count(2))));
        let scores = scorer.score(&data).unwrap();

        assert_eq!(data.attribute_count(), 7);
        assert!(scores.covers_exactly(&data.attribute_names()));
        assert_eq!(scores.names()[0], "rs0");
    }
}
