// ========================================================================================
//
//                               The Evaporative Cooling loop
//
// ========================================================================================
//
// Each iteration scores the attributes still in play, rescales both phases to
// [0, 1], fuses them into a free energy and evaporates the attributes with the
// least of it. The loop stops when the target is reached, or earlier when the
// removal policy asks for nothing more to be removed.

use crate::config::{ConfigError, EcConfig};
use crate::dataset::AttributeDataset;
use crate::diagnostics::{IterationStats, kendall_tau, log_score_table};
use crate::evaporate::{EliminationError, eliminate};
use crate::free_energy::combine;
use crate::interaction::InteractionScorer;
use crate::main_effects::RandomJungleScorer;
use crate::progress::{CoolingPhase, CoolingProgressObserver, NoopCoolingProgress};
use crate::scorer::{AttributeScorer, ScorerError};
use crate::scores::{Score, ScoreSet};
use ahash::AHashSet;
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EcError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(
        "The data set has {working} active attributes, which does not exceed the target of {target}. There is nothing to evaporate."
    )]
    InsufficientAttributes { working: usize, target: usize },
    #[error("The {phase} scorer failed in iteration {iteration}: {source}")]
    ScorerFailure {
        phase: CoolingPhase,
        iteration: usize,
        #[source]
        source: ScorerError,
    },
    #[error("Internal consistency check failed during {phase} in iteration {iteration}: {reason}")]
    InternalConsistency {
        phase: CoolingPhase,
        iteration: usize,
        reason: String,
    },
    #[error("Could not evaporate attributes in iteration {iteration}: {source}")]
    InvalidRemovalCount {
        iteration: usize,
        #[source]
        source: EliminationError,
    },
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct EcOutcome {
    config: EcConfig,
    main_effects: Option<ScoreSet>,
    interaction: Option<ScoreSet>,
    ec_scores: ScoreSet,
    evaporated: Vec<Score>,
    iterations: Vec<IterationStats>,
    converged: bool,
}

impl EcOutcome {
    /// Normalised main-effects scores from the last iteration, if that phase ran.
    pub fn main_effects_scores(&self) -> Option<&ScoreSet> {
        self.main_effects.as_ref()
    }

    /// Normalised interaction scores from the last iteration, if that phase ran.
    pub fn interaction_scores(&self) -> Option<&ScoreSet> {
        self.interaction.as_ref()
    }

    /// The surviving attributes, highest free energy first.
    pub fn ec_scores(&self) -> &ScoreSet {
        &self.ec_scores
    }

    /// Evaporated attributes with the free energy they had when removed, in
    /// removal order.
    pub fn evaporated(&self) -> &[Score] {
        &self.evaporated
    }

    pub fn iterations(&self) -> &[IterationStats] {
        &self.iterations
    }

    /// True when the loop stopped because the removal policy yielded nothing to
    /// remove, rather than because the target was reached.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// `<prefix><suffix>`, the suffix depending on the algorithm mode.
    pub fn result_path(&self, prefix: &Path) -> PathBuf {
        let mut path = prefix.as_os_str().to_os_string();
        path.push(self.config.algorithm.output_suffix());
        PathBuf::from(path)
    }

    /// Writes the surviving scores next to `prefix` and returns the file written.
    pub fn write_results(&self, prefix: &Path) -> io::Result<PathBuf> {
        let path = self.result_path(prefix);
        self.ec_scores.save(&path)?;
        Ok(path)
    }
}

/// A single-use Evaporative Cooling run over a borrowed data set.
pub struct EvaporativeCooling<'a> {
    dataset: &'a mut dyn AttributeDataset,
    config: EcConfig,
    main_effects: Option<Box<dyn AttributeScorer + 'a>>,
    interaction: Option<Box<dyn AttributeScorer + 'a>>,
    progress: Box<dyn CoolingProgressObserver + 'a>,
}

impl<'a> EvaporativeCooling<'a> {
    /// Validates `config` against `dataset` and builds the scorers its mode needs:
    /// the Random Jungle adapter for main effects and the ReliefF family for
    /// interactions.
    pub fn new(dataset: &'a mut dyn AttributeDataset, config: EcConfig) -> Result<Self, EcError> {
        config.validate(dataset.attribute_count())?;
        let main_effects: Option<Box<dyn AttributeScorer + 'a>> =
            if config.algorithm.uses_main_effects() {
                Some(Box::new(RandomJungleScorer::new(
                    config.main_effects.clone(),
                    config.output_prefix.clone(),
                )))
            } else {
                None
            };
        let interaction: Option<Box<dyn AttributeScorer + 'a>> =
            if config.algorithm.uses_interaction() {
                Some(Box::new(InteractionScorer::select(
                    dataset.has_continuous_phenotype(),
                    &config.interaction,
                )))
            } else {
                None
            };
        Ok(Self::assemble(dataset, config, main_effects, interaction))
    }

    /// Like [`EvaporativeCooling::new`], with caller-supplied scorers. A scorer the
    /// mode does not use is dropped unused; a scorer the mode needs must be present.
    pub fn with_scorers(
        dataset: &'a mut dyn AttributeDataset,
        config: EcConfig,
        main_effects: Option<Box<dyn AttributeScorer + 'a>>,
        interaction: Option<Box<dyn AttributeScorer + 'a>>,
    ) -> Result<Self, EcError> {
        config.validate(dataset.attribute_count())?;
        let mode = config.algorithm;
        if mode.uses_main_effects() && main_effects.is_none() {
            return Err(ConfigError::MissingScorer {
                mode,
                phase: "main effects",
            }
            .into());
        }
        if mode.uses_interaction() && interaction.is_none() {
            return Err(ConfigError::MissingScorer {
                mode,
                phase: "interaction",
            }
            .into());
        }
        let main_effects = main_effects.filter(|_| mode.uses_main_effects());
        let interaction = interaction.filter(|_| mode.uses_interaction());
        Ok(Self::assemble(dataset, config, main_effects, interaction))
    }

    fn assemble(
        dataset: &'a mut dyn AttributeDataset,
        config: EcConfig,
        main_effects: Option<Box<dyn AttributeScorer + 'a>>,
        interaction: Option<Box<dyn AttributeScorer + 'a>>,
    ) -> Self {
        Self {
            dataset,
            config,
            main_effects,
            interaction,
            progress: Box::new(NoopCoolingProgress),
        }
    }

    pub fn with_progress(mut self, observer: impl CoolingProgressObserver + 'a) -> Self {
        self.progress = Box::new(observer);
        self
    }

    /// Runs the loop to completion. The data set's active mask reflects every
    /// evaporation performed, including those before an error.
    pub fn run(self) -> Result<EcOutcome, EcError> {
        let Self {
            dataset,
            config,
            mut main_effects,
            mut interaction,
            mut progress,
        } = self;

        let target = config.target_attributes;
        let mut working = dataset.attribute_count();
        if working <= target {
            return Err(EcError::InsufficientAttributes { working, target });
        }

        info!(
            "Evaporative Cooling ({}) from {working} to {target} attributes, removing {}",
            config.algorithm, config.removal
        );
        progress.on_run_start(working, target);

        let mut main_scores: Option<ScoreSet> = None;
        let mut interaction_scores: Option<ScoreSet> = None;
        let mut free_energy = ScoreSet::new();
        let mut evaporated = Vec::new();
        let mut iterations = Vec::new();
        let mut converged = false;
        let mut iteration = 0usize;

        while working > target {
            iteration += 1;
            let active = dataset.attribute_names();
            info!("Iteration {iteration}: {working} working attributes");

            let mut main_effects_time = Duration::ZERO;
            if let Some(scorer) = main_effects.as_mut() {
                progress.on_phase_start(iteration, CoolingPhase::MainEffects);
                let started = Instant::now();
                let scores = run_scorer(
                    scorer.as_mut(),
                    &*dataset,
                    &active,
                    CoolingPhase::MainEffects,
                    iteration,
                )?;
                main_effects_time = started.elapsed();
                log_score_table("Main effects (normalized)", &scores);
                main_scores = Some(scores);
            }

            let mut interaction_time = Duration::ZERO;
            if let Some(scorer) = interaction.as_mut() {
                progress.on_phase_start(iteration, CoolingPhase::Interaction);
                let started = Instant::now();
                let scores = run_scorer(
                    scorer.as_mut(),
                    &*dataset,
                    &active,
                    CoolingPhase::Interaction,
                    iteration,
                )?;
                interaction_time = started.elapsed();
                log_score_table("Interaction (normalized)", &scores);
                interaction_scores = Some(scores);
            }

            let requested = config.removal.resolve(working);
            let num_to_remove = requested.min(working - target);
            if num_to_remove < requested {
                warn!(
                    "Iteration {iteration}: removing {num_to_remove} instead of {requested} attributes so that {target} remain"
                );
            }

            progress.on_phase_start(iteration, CoolingPhase::Fusion);
            free_energy = combine(
                main_scores.as_ref(),
                interaction_scores.as_ref(),
                config.algorithm,
                config.temperature,
            )
            .map_err(|e| EcError::InternalConsistency {
                phase: CoolingPhase::Fusion,
                iteration,
                reason: e.to_string(),
            })?;
            log_score_table("Free energy", &free_energy);

            let rank_agreement = match (&main_scores, &interaction_scores) {
                (Some(m), Some(i)) => kendall_tau(m, i),
                _ => None,
            };
            if let Some(tau) = rank_agreement {
                debug!("Iteration {iteration}: Kendall tau between phases = {tau:.4}");
            }

            let mut stats = IterationStats {
                iteration,
                working,
                removed: 0,
                main_effects_time,
                interaction_time,
                rank_agreement,
            };

            if num_to_remove == 0 {
                info!("Iteration {iteration}: nothing left to remove, cooling has converged");
                converged = true;
                progress.on_iteration_finish(&stats, working);
                iterations.push(stats);
                break;
            }

            progress.on_phase_start(iteration, CoolingPhase::Elimination);
            let removed = eliminate(&free_energy, num_to_remove, &mut *dataset)
                .map_err(|source| EcError::InvalidRemovalCount { iteration, source })?;
            working -= removed.len();
            stats.removed = removed.len();
            debug!(
                "Iteration {iteration}: evaporated {}",
                removed.iter().map(|s| s.attribute.as_str()).collect::<Vec<_>>().join(", ")
            );
            evaporated.extend(removed);

            progress.on_iteration_finish(&stats, working);
            iterations.push(stats);
        }

        let survivors: AHashSet<String> = dataset.attribute_names().into_iter().collect();
        let mut ec_scores = free_energy;
        ec_scores.retain(|s| survivors.contains(&s.attribute));
        ec_scores.sort_descending();
        ec_scores.truncate(target);

        info!(
            "Evaporative Cooling finished after {} iterations with {} attributes",
            iterations.len(),
            ec_scores.len()
        );
        progress.on_run_finish(working);

        Ok(EcOutcome {
            config,
            main_effects: main_scores,
            interaction: interaction_scores,
            ec_scores,
            evaporated,
            iterations,
            converged,
        })
    }
}

/// Runs one scorer, checks it scored exactly the active attributes, and rescales
/// its output into [0, 1].
fn run_scorer(
    scorer: &mut dyn AttributeScorer,
    dataset: &dyn AttributeDataset,
    active: &[String],
    phase: CoolingPhase,
    iteration: usize,
) -> Result<ScoreSet, EcError> {
    let raw = scorer
        .score(dataset)
        .map_err(|source| EcError::ScorerFailure {
            phase,
            iteration,
            source,
        })?;
    if !raw.covers_exactly(active) {
        let reason = match raw.duplicate_attribute() {
            Some(name) => format!("{} scored attribute '{name}' more than once", scorer.name()),
            None => format!(
                "{} returned {} scores, but the data set has {} active attributes (or a scored name is not active)",
                scorer.name(),
                raw.len(),
                active.len()
            ),
        };
        return Err(EcError::InternalConsistency {
            phase,
            iteration,
            reason,
        });
    }
    Ok(raw.normalize(scorer.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlgorithmMode, RemovalPolicy};
    use crate::dataset::AttributeMatrix;
    use ndarray::{Array1, Array2};

    struct Fixed(Vec<(&'static str, f64)>);

    impl AttributeScorer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(&mut self, dataset: &dyn AttributeDataset) -> Result<ScoreSet, ScorerError> {
            let active = dataset.attribute_names();
            Ok(self
                .0
                .iter()
                .filter(|(n, _)| active.iter().any(|a| a == n))
                .map(|&(n, v)| Score::new(v, n))
                .collect())
        }
    }

    fn data() -> AttributeMatrix {
        let names = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let values = Array2::from_shape_fn((4, 4), |(r, c)| ((r * c) % 3) as f64);
        AttributeMatrix::from_values(names, values, Array1::from(vec![0.0, 1.0, 1.0, 0.0]))
            .unwrap()
    }

    #[test]
    fn missing_required_scorer_is_a_config_error() {
        let mut d = data();
        let result = EvaporativeCooling::with_scorers(&mut d, EcConfig::new(2), None, None);
        assert!(matches!(
            result,
            Err(EcError::Config(ConfigError::MissingScorer {
                mode: AlgorithmMode::Combined,
                ..
            }))
        ));
    }

    #[test]
    fn percent_removal_that_rounds_to_zero_converges_with_scores() {
        let mut d = data();
        let mut config = EcConfig::new(1);
        config.algorithm = AlgorithmMode::MainEffectsOnly;
        config.removal = RemovalPolicy::Percent(10);
        let scorer = Fixed(vec![("a", 0.4), ("b", 0.1), ("c", 0.9), ("d", 0.3)]);

        let outcome = EvaporativeCooling::with_scorers(&mut d, config, Some(Box::new(scorer)), None)
            .unwrap()
            .run()
            .unwrap();

        assert!(outcome.converged());
        assert_eq!(outcome.iterations().len(), 1);
        assert_eq!(outcome.iterations()[0].removed, 0);
        assert!(outcome.evaporated().is_empty());
        assert_eq!(outcome.ec_scores().names(), vec!["c"]);
        assert_eq!(d.attribute_count(), 4);
    }
}
