// ========================================================================================
//                                Per-iteration diagnostics
// ========================================================================================
//
// Nothing here influences which attributes evaporate. These helpers exist so a run
// at debug level shows how each phase ranked the attributes and how far the two
// phases agreed.

use crate::scores::ScoreSet;
use ahash::AHashMap;
use itertools::Itertools;
use log::{debug, log_enabled, Level};
use std::time::Duration;

/// Bookkeeping for one pass of the cooling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStats {
    pub iteration: usize,
    /// Attributes in play when the iteration started.
    pub working: usize,
    /// Attributes evaporated at the end of the iteration.
    pub removed: usize,
    pub main_effects_time: Duration,
    pub interaction_time: Duration,
    /// Main-effects/interaction rank agreement, when both phases ran.
    pub rank_agreement: Option<f64>,
}

/// Kendall's tau-a between two score sets over the attributes they share.
///
/// Returns `None` when fewer than two attributes are shared. Pairs tied in either
/// set count as neither concordant nor discordant.
pub fn kendall_tau(a: &ScoreSet, b: &ScoreSet) -> Option<f64> {
    let lookup: AHashMap<&str, f64> = b.iter().map(|s| (s.attribute.as_str(), s.value)).collect();
    let paired: Vec<(f64, f64)> = a
        .iter()
        .filter_map(|s| lookup.get(s.attribute.as_str()).map(|&v| (s.value, v)))
        .collect();
    if paired.len() < 2 {
        return None;
    }

    let (concordant, discordant) = paired
        .iter()
        .tuple_combinations()
        .fold((0usize, 0usize), |(c, d), (x, y)| {
            let sign = (x.0 - y.0).signum() * (x.1 - y.1).signum();
            if x.0 == y.0 || x.1 == y.1 {
                (c, d)
            } else if sign > 0.0 {
                (c + 1, d)
            } else {
                (c, d + 1)
            }
        });
    let pairs = paired.len() * (paired.len() - 1) / 2;
    Some((concordant as f64 - discordant as f64) / pairs as f64)
}

/// Dumps `scores` as an aligned table at debug level.
pub fn log_score_table(title: &str, scores: &ScoreSet) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    let width = scores
        .iter()
        .map(|s| s.attribute.len())
        .max()
        .unwrap_or(0)
        .max("attribute".len());
    debug!("{title} ({} attributes)", scores.len());
    debug!("  {:<width$}  {:>12}", "attribute", "score");
    for score in scores {
        debug!("  {:<width$}  {:>12.8}", score.attribute, score.value);
    }
}
