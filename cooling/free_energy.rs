// ========================================================================================
//                                 Free-energy fusion
// ========================================================================================
//
// F = E + T * S, with the interaction scores playing E and the main-effects scores
// playing S. Both sets are sorted by attribute name before they are paired so the
// sum is taken attribute by attribute regardless of producer order.

use crate::config::AlgorithmMode;
use crate::scores::{Score, ScoreSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error(
        "Main effects ({main}) and interaction ({interaction}) produced different numbers of scores."
    )]
    SizeMismatch { main: usize, interaction: usize },
    #[error(
        "Main effects scored '{main}' where interaction scored '{interaction}'; the two phases saw different attributes."
    )]
    NameMismatch { main: String, interaction: String },
    #[error("Algorithm mode '{0}' needs a {1} score set, but none was produced.")]
    MissingScores(AlgorithmMode, &'static str),
}

/// Combines the phase scores for `mode`.
///
/// In combined mode the result is ordered by attribute name; in single-phase modes
/// the relevant set is passed through in its own order. Scores from a phase the
/// mode does not use are ignored.
pub fn combine(
    main_effects: Option<&ScoreSet>,
    interaction: Option<&ScoreSet>,
    mode: AlgorithmMode,
    temperature: f64,
) -> Result<ScoreSet, FusionError> {
    match mode {
        AlgorithmMode::MainEffectsOnly => main_effects
            .cloned()
            .ok_or(FusionError::MissingScores(mode, "main effects")),
        AlgorithmMode::InteractionOnly => interaction
            .cloned()
            .ok_or(FusionError::MissingScores(mode, "interaction")),
        AlgorithmMode::Combined => {
            let main = main_effects.ok_or(FusionError::MissingScores(mode, "main effects"))?;
            let inter = interaction.ok_or(FusionError::MissingScores(mode, "interaction"))?;
            fuse(main, inter, temperature)
        }
    }
}

fn fuse(main: &ScoreSet, interaction: &ScoreSet, temperature: f64) -> Result<ScoreSet, FusionError> {
    if main.len() != interaction.len() {
        return Err(FusionError::SizeMismatch {
            main: main.len(),
            interaction: interaction.len(),
        });
    }
    let mut main = main.clone();
    let mut interaction = interaction.clone();
    main.sort_by_name();
    interaction.sort_by_name();

    main.iter()
        .zip(interaction.iter())
        .map(|(m, i)| {
            if m.attribute == i.attribute {
                Ok(Score::new(i.value + temperature * m.value, m.attribute.as_str()))
            } else {
                Err(FusionError::NameMismatch {
                    main: m.attribute.clone(),
                    interaction: i.attribute.clone(),
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(ScoreSet::from_scores)
}
