// ========================================================================================
//
//                          Attribute Scores and Their Record Format
//
// ========================================================================================
//
// Every phase of the cooling loop speaks in `ScoreSet`s: the main-effects learner
// produces one, the relevance learner produces one, fusion produces one, and the
// survivors are reported as one. This module owns the ordering and rescaling rules
// those phases share, and the tab-separated record layout consumed by downstream
// tooling (`<score>\t<attribute>` with exactly eight decimals).

use log::warn;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// A single attribute's score from one phase of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub value: f64,
    pub attribute: String,
}

impl Score {
    pub fn new(value: f64, attribute: impl Into<String>) -> Self {
        Self {
            value,
            attribute: attribute.into(),
        }
    }
}

/// Errors raised while reading score records back from text.
#[derive(Error, Debug)]
pub enum ScoreParseError {
    #[error("I/O error while reading score records: {0}")]
    Io(#[from] io::Error),
    #[error("Score record on line {line} has {found} fields, expected 2 (score and attribute name).")]
    MalformedRecord { line: usize, found: usize },
    #[error("Score record on line {line} has a non-numeric score '{value}'.")]
    InvalidValue { line: usize, value: String },
}

/// An ordered collection of scores, one per attribute.
///
/// The order is meaningful only after one of the explicit sort methods has been
/// called; producers are free to emit scores in whatever order they compute them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSet {
    scores: Vec<Score>,
}

impl ScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scores(scores: Vec<Score>) -> Self {
        Self { scores }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Score> {
        self.scores.iter()
    }

    pub fn into_vec(self) -> Vec<Score> {
        self.scores
    }

    pub fn names(&self) -> Vec<&str> {
        self.scores.iter().map(|s| s.attribute.as_str()).collect()
    }

    /// Looks up the score held by `attribute`, if present.
    pub fn value_of(&self, attribute: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.attribute == attribute)
            .map(|s| s.value)
    }

    /// Returns the first attribute name that appears more than once, if any.
    pub fn duplicate_attribute(&self) -> Option<&str> {
        let mut seen = ahash::AHashSet::with_capacity(self.scores.len());
        self.scores
            .iter()
            .map(|s| s.attribute.as_str())
            .find(|name| !seen.insert(*name))
    }

    /// True when this set holds exactly one score for every name in `names` and
    /// nothing else. Order is irrelevant.
    pub fn covers_exactly(&self, names: &[String]) -> bool {
        if self.scores.len() != names.len() || self.duplicate_attribute().is_some() {
            return false;
        }
        let expected: ahash::AHashSet<&str> = names.iter().map(String::as_str).collect();
        expected.len() == names.len()
            && self
                .scores
                .iter()
                .all(|s| expected.contains(s.attribute.as_str()))
    }

    /// The smallest and largest score values, or `None` for an empty set.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let first = self.scores.first()?.value;
        Some(self.scores.iter().fold((first, first), |(lo, hi), s| {
            (lo.min(s.value), hi.max(s.value))
        }))
    }

    /// Linearly rescales every value into `[0, 1]` with `(v - min) / (max - min)`.
    ///
    /// A degenerate set (all values equal, or no values at all) cannot be rescaled;
    /// it is returned untouched and a warning is logged under `label`.
    pub fn normalize(self, label: &str) -> ScoreSet {
        let Some((min, max)) = self.value_range() else {
            warn!("{label} produced no scores; nothing to normalize.");
            return self;
        };
        if min == max {
            warn!("{label} min and max scores are the same ({min}); skipping normalization.");
            return self;
        }
        let range = max - min;
        ScoreSet {
            scores: self
                .scores
                .into_iter()
                .map(|s| Score::new((s.value - min) / range, s.attribute))
                .collect(),
        }
    }

    /// Stable sort by attribute name, ascending.
    pub fn sort_by_name(&mut self) {
        self.scores.sort_by(|a, b| a.attribute.cmp(&b.attribute));
    }

    /// Stable sort by score value, lowest first. Ties keep their encounter order.
    pub fn sort_ascending(&mut self) {
        self.scores.sort_by(|a, b| a.value.total_cmp(&b.value));
    }

    /// Stable sort by score value, highest first. Ties keep their encounter order.
    pub fn sort_descending(&mut self) {
        self.scores.sort_by(|a, b| b.value.total_cmp(&a.value));
    }

    /// Keeps only the first `len` scores.
    pub fn truncate(&mut self, len: usize) {
        self.scores.truncate(len);
    }

    /// Keeps only the scores whose attribute satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Score) -> bool) {
        self.scores.retain(|s| keep(s));
    }

    /// Writes this set in record form to `path`, creating or truncating the file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_score_records(&mut writer, &self.scores)?;
        writer.flush()
    }

    /// Reads a record file written by [`ScoreSet::save`].
    pub fn load(path: &Path) -> Result<Self, ScoreParseError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(Self::from_scores(read_score_records(reader)?))
    }
}

impl FromIterator<Score> for ScoreSet {
    fn from_iter<I: IntoIterator<Item = Score>>(iter: I) -> Self {
        Self {
            scores: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ScoreSet {
    type Item = Score;
    type IntoIter = std::vec::IntoIter<Score>;

    fn into_iter(self) -> Self::IntoIter {
        self.scores.into_iter()
    }
}

impl<'a> IntoIterator for &'a ScoreSet {
    type Item = &'a Score;
    type IntoIter = std::slice::Iter<'a, Score>;

    fn into_iter(self) -> Self::IntoIter {
        self.scores.iter()
    }
}

// ========================================================================================
//                                  Record serialization
// ========================================================================================

/// Writes one `<score>\t<attribute>` line per score, score fixed at 8 decimals.
pub fn write_score_records<W: Write>(mut writer: W, scores: &[Score]) -> io::Result<()> {
    for score in scores {
        writeln!(writer, "{:.8}\t{}", score.value, score.attribute)?;
    }
    Ok(())
}

/// Parses lines produced by [`write_score_records`]. Blank lines are ignored.
pub fn read_score_records<R: BufRead>(reader: R) -> Result<Vec<Score>, ScoreParseError> {
    let mut scores = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 2 {
            return Err(ScoreParseError::MalformedRecord {
                line: index + 1,
                found: fields.len(),
            });
        }
        let value = fields[0]
            .trim()
            .parse::<f64>()
            .map_err(|_| ScoreParseError::InvalidValue {
                line: index + 1,
                value: fields[0].to_string(),
            })?;
        scores.push(Score::new(value, fields[1]));
    }
    Ok(scores)
}
