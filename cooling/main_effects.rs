// ========================================================================================
//
//                      Main effects: the Random Jungle adapter
//
// ========================================================================================
//
// The tree ensemble is an external program. This adapter does three things per
// cooling iteration:
//
// 1.  Picks the tree-growing mode from the phenotype type and the codings of the
//     attributes still in play. This only decides how the learner is invoked.
// 2.  Writes the active columns plus a `Class` dependent column to a scratch file
//     and runs the learner on it.
// 3.  Reads back the learner's variable-importance file: one header line, then
//     records of exactly four whitespace-separated fields
//     `rank attributeIndex attributeName importance`.

use crate::config::{MainEffectsConfig, resolve_thread_count};
use crate::dataset::AttributeDataset;
use crate::scorer::{AttributeScorer, ScorerError};
use crate::scores::{Score, ScoreSet};
use log::{debug, info};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Name of the dependent column in the data frame handed to the learner.
pub const DEPENDENT_VARIABLE: &str = "Class";

const IMPORTANCE_FIELDS: usize = 4;

/// The learner's tree-growing modes, numbered as the learner numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeType {
    /// Classification trees over numeric (or mixed) predictors.
    ClassificationIntegrated = 1,
    /// Classification trees over genotype predictors only.
    ClassificationDiscrete = 2,
    /// Regression trees over numeric (or mixed) predictors.
    RegressionIntegrated = 3,
    /// Regression trees over genotype predictors only.
    RegressionDiscrete = 4,
}

impl TreeType {
    /// Chooses the mode from the phenotype type and the attribute codings present,
    /// along with a description of the predictor/response combination. Returns
    /// `None` when there are no active attributes at all.
    pub fn select(
        continuous: bool,
        has_genotypes: bool,
        has_numerics: bool,
    ) -> Option<(Self, &'static str)> {
        match (continuous, has_genotypes, has_numerics) {
            (true, true, true) => Some((
                Self::RegressionIntegrated,
                "Regression trees: integrated/continuous",
            )),
            (true, true, false) => Some((
                Self::RegressionDiscrete,
                "Regression trees: discrete/continuous",
            )),
            (true, false, true) => Some((
                Self::RegressionIntegrated,
                "Regression trees: integrated/continuous",
            )),
            (false, true, true) => Some((
                Self::ClassificationIntegrated,
                "Classification trees: integrated/discrete",
            )),
            (false, true, false) => Some((
                Self::ClassificationDiscrete,
                "Classification trees: discrete/discrete",
            )),
            (false, false, true) => Some((
                Self::ClassificationIntegrated,
                "Classification trees: continuous/discrete",
            )),
            (_, false, false) => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Genotype-only classification runs on the compact byte frame with Gini
    /// importance; every other mode uses the numeric frame and permutation importance.
    pub fn importance_measure(self) -> u8 {
        match self {
            Self::ClassificationDiscrete => 1,
            _ => 2,
        }
    }

    pub fn memory_mode(self) -> u8 {
        match self {
            Self::ClassificationDiscrete => 2,
            _ => 0,
        }
    }
}

// ========================================================================================
//                                Importance file parsing
// ========================================================================================

#[derive(Error, Debug)]
pub enum ImportanceParseError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Error parsing line {line}. Read {found} columns. Should be 4.")]
    FieldCount { line: usize, found: usize },
    #[error("Error parsing line {line}: {field} '{value}' is not a valid number.")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

/// One record of the learner's variable-importance output.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceRecord {
    pub rank: usize,
    pub attribute_index: usize,
    pub attribute: String,
    pub importance: f64,
}

/// Parses an importance stream, skipping its header line. Line numbers in errors
/// count data records from 1. Blank lines are ignored.
pub fn parse_importance<R: BufRead>(reader: R) -> Result<Vec<ImportanceRecord>, ImportanceParseError> {
    let mut records = Vec::new();
    for (line_number, line) in reader.lines().skip(1).enumerate() {
        let line = line?;
        let line_number = line_number + 1;
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != IMPORTANCE_FIELDS {
            return Err(ImportanceParseError::FieldCount {
                line: line_number,
                found: tokens.len(),
            });
        }
        let field = |idx: usize, name: &'static str| ImportanceParseError::InvalidField {
            line: line_number,
            field: name,
            value: tokens[idx].to_string(),
        };
        records.push(ImportanceRecord {
            rank: tokens[0].parse().map_err(|_| field(0, "rank"))?,
            attribute_index: tokens[1].parse().map_err(|_| field(1, "attribute index"))?,
            attribute: tokens[2].to_string(),
            importance: tokens[3].parse().map_err(|_| field(3, "importance"))?,
        });
    }
    Ok(records)
}

/// Reads an importance file into a score set, in file order.
pub fn read_importance_file(path: &Path) -> Result<ScoreSet, ImportanceParseError> {
    let records = parse_importance(BufReader::new(File::open(path)?))?;
    Ok(records
        .into_iter()
        .map(|r| Score::new(r.importance, r.attribute))
        .collect())
}

// ========================================================================================
//                                   The adapter itself
// ========================================================================================

/// Drives an external Random Jungle executable once per cooling iteration.
pub struct RandomJungleScorer {
    config: MainEffectsConfig,
    threads: usize,
    /// Scratch files `<prefix>.rj.dat` and `<prefix>.importance` are
    /// overwritten by each iteration and not removed when the run ends, so after
    /// a run they describe only the last iteration.
    output_prefix: PathBuf,
}

impl RandomJungleScorer {
    pub fn new(config: MainEffectsConfig, output_prefix: PathBuf) -> Self {
        let threads = resolve_thread_count(config.threads);
        info!(
            "Random Jungle will grow {} trees using {} threads.",
            config.num_trees, threads
        );
        Self {
            config,
            threads,
            output_prefix,
        }
    }

    pub fn data_path(&self) -> PathBuf {
        with_suffix(&self.output_prefix, ".rj.dat")
    }

    pub fn importance_path(&self) -> PathBuf {
        with_suffix(&self.output_prefix, ".importance")
    }

    /// Writes the active attributes and the dependent variable as a
    /// space-separated frame with a header row.
    pub fn write_data_frame(
        &self,
        dataset: &dyn AttributeDataset,
        tree_type: TreeType,
    ) -> Result<PathBuf, ScorerError> {
        let names = dataset.attribute_names();
        let matrix = dataset.columns(&names)?;
        let phenotype = dataset.phenotypes();
        let path = self.data_path();
        let mut writer = BufWriter::new(File::create(&path)?);

        writeln!(writer, "{} {}", names.join(" "), DEPENDENT_VARIABLE)?;
        let integral = tree_type == TreeType::ClassificationDiscrete;
        for (row, target) in matrix.rows().into_iter().zip(phenotype.iter()) {
            for value in row.iter() {
                if integral {
                    write!(writer, "{} ", *value as i64)?;
                } else {
                    write!(writer, "{value} ")?;
                }
            }
            if integral {
                writeln!(writer, "{}", *target as i64)?;
            } else {
                writeln!(writer, "{target}")?;
            }
        }
        writer.flush()?;
        Ok(path)
    }

    fn command(&self, tree_type: TreeType, data_path: &Path) -> Command {
        let mut command = Command::new(&self.config.executable);
        command
            .args(&self.config.extra_args)
            .arg("--file")
            .arg(data_path)
            .args(["--depvarname", DEPENDENT_VARIABLE])
            .arg("--ntree")
            .arg(self.config.num_trees.to_string())
            .arg("--nthreads")
            .arg(self.threads.to_string())
            .arg("--treetype")
            .arg(tree_type.code().to_string())
            .arg("--impmeasure")
            .arg(tree_type.importance_measure().to_string())
            .arg("--memmode")
            .arg(tree_type.memory_mode().to_string())
            .arg("--outprefix")
            .arg(&self.output_prefix);
        command
    }
}

impl AttributeScorer for RandomJungleScorer {
    fn name(&self) -> &str {
        "Random Jungle"
    }

    fn score(&mut self, dataset: &dyn AttributeDataset) -> Result<ScoreSet, ScorerError> {
        let (tree_type, description) = TreeType::select(
            dataset.has_continuous_phenotype(),
            dataset.has_genotypes(),
            dataset.has_numerics(),
        )
        .ok_or(ScorerError::NoTreeType)?;
        info!("{description}");

        let data_path = self.write_data_frame(dataset, tree_type)?;
        debug!(
            "Wrote {} instances x {} attributes to {}",
            dataset.num_instances(),
            dataset.attribute_count(),
            data_path.display()
        );

        let output = self
            .command(tree_type, &data_path)
            .output()
            .map_err(|source| ScorerError::LearnerSpawn {
                program: self.config.executable.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ScorerError::LearnerFailed {
                program: self.config.executable.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let importance_path = self.importance_path();
        info!(
            "Loading Random Jungle variable importance scores from {}",
            importance_path.display()
        );
        let scores = read_importance_file(&importance_path)?;
        debug!("Read {} importance scores.", scores.len());
        Ok(scores)
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(suffix);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AttributeMatrix;
    use ndarray::array;
    use std::io::Cursor;

    #[test]
    fn tree_type_follows_phenotype_and_attribute_codings() {
        let tree = |c, g, n| TreeType::select(c, g, n).map(|(tree_type, _)| tree_type);
        assert_eq!(tree(true, true, true), Some(TreeType::RegressionIntegrated));
        assert_eq!(tree(true, true, false), Some(TreeType::RegressionDiscrete));
        assert_eq!(tree(true, false, true), Some(TreeType::RegressionIntegrated));
        assert_eq!(tree(false, true, true), Some(TreeType::ClassificationIntegrated));
        assert_eq!(tree(false, true, false), Some(TreeType::ClassificationDiscrete));
        assert_eq!(tree(false, false, true), Some(TreeType::ClassificationIntegrated));
        assert_eq!(tree(false, false, false), None);

        assert_eq!(TreeType::ClassificationDiscrete.code(), 2);
        assert_eq!(TreeType::ClassificationDiscrete.importance_measure(), 1);
        assert_eq!(TreeType::RegressionDiscrete.importance_measure(), 2);
    }

    #[test]
    fn numeric_only_classification_is_described_as_continuous_predictors() {
        let describe = |c, g, n| TreeType::select(c, g, n).map(|(_, description)| description);
        assert_eq!(
            describe(false, false, true),
            Some("Classification trees: continuous/discrete")
        );
        assert_eq!(
            describe(false, true, true),
            Some("Classification trees: integrated/discrete")
        );
        assert_eq!(
            describe(true, false, true),
            Some("Regression trees: integrated/continuous")
        );
    }

    #[test]
    fn importance_parsing_skips_header_and_keeps_file_order() {
        let text = "rank varID varname importance\n1 3 rs3 0.25\n2 1 rs1 0.125\n\n3 2 rs2 -0.01\n";
        let records = parse_importance(Cursor::new(text)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            ImportanceRecord {
                rank: 1,
                attribute_index: 3,
                attribute: "rs3".to_string(),
                importance: 0.25,
            }
        );
        assert_eq!(records[2].importance, -0.01);
    }

    #[test]
    fn importance_parsing_rejects_wrong_field_counts() {
        let text = "header\n1 1 rs1 0.5\n2 2 rs2\n";
        match parse_importance(Cursor::new(text)).unwrap_err() {
            ImportanceParseError::FieldCount { line, found } => {
                assert_eq!(line, 2);
                assert_eq!(found, 3);
            }
            other => panic!("Expected FieldCount, got {:?}", other),
        }

        let text = "header\n1 1 rs1 high\n";
        match parse_importance(Cursor::new(text)).unwrap_err() {
            ImportanceParseError::InvalidField { line, field, value } => {
                assert_eq!(line, 1);
                assert_eq!(field, "importance");
                assert_eq!(value, "high");
            }
            other => panic!("Expected InvalidField, got {:?}", other),
        }
    }

    fn genotype_dataset() -> AttributeMatrix {
        AttributeMatrix::from_values(
            vec!["rs1".into(), "rs2".into(), "rs3".into()],
            array![[0.0, 1.0, 2.0], [1.0, 1.0, 0.0], [2.0, 0.0, 1.0], [0.0, 2.0, 1.0]],
            array![0.0, 1.0, 1.0, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn data_frame_contains_active_columns_and_class() {
        let dir = tempfile::tempdir().unwrap();
        let scorer = RandomJungleScorer::new(MainEffectsConfig::default(), dir.path().join("run"));
        let mut data = genotype_dataset();
        data.remove_attribute("rs2").unwrap();

        let path = scorer
            .write_data_frame(&data, TreeType::ClassificationDiscrete)
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rs1 rs3 Class");
        assert_eq!(lines[1], "0 2 0");
        assert_eq!(lines[3], "2 1 1");
        assert_eq!(lines.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn scorer_runs_learner_and_reads_its_importance_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_rjungle.sh");
        std::fs::write(
            &script,
            "while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 --file) data=\"$2\"; shift 2 ;;\n\
                 --outprefix) out=\"$2\"; shift 2 ;;\n\
                 *) shift ;;\n\
               esac\n\
             done\n\
             echo \"rank varID varname importance\" > \"$out.importance\"\n\
             i=0\n\
             for name in $(head -n 1 \"$data\"); do\n\
               [ \"$name\" = Class ] && continue\n\
               i=$((i+1))\n\
               echo \"$i $i $name $i.5\" >> \"$out.importance\"\n\
             done\n",
        )
        .unwrap();

        let config = MainEffectsConfig {
            executable: PathBuf::from("sh"),
            extra_args: vec![script.to_string_lossy().to_string()],
            num_trees: 10,
            threads: 1,
        };
        let mut scorer = RandomJungleScorer::new(config, dir.path().join("ec"));
        let mut data = genotype_dataset();
        let scores = scorer.score(&data).unwrap();

        assert_eq!(scores.names(), vec!["rs1", "rs2", "rs3"]);
        assert_eq!(scores.value_of("rs3"), Some(3.5));

        // A second iteration overwrites the scratch files, which stay on disk.
        data.remove_attribute("rs2").unwrap();
        let scores = scorer.score(&data).unwrap();
        assert_eq!(scores.names(), vec!["rs1", "rs3"]);
        let frame = std::fs::read_to_string(scorer.data_path()).unwrap();
        assert_eq!(frame.lines().next(), Some("rs1 rs3 Class"));
        let importance = read_importance_file(&scorer.importance_path()).unwrap();
        assert_eq!(importance.names(), vec!["rs1", "rs3"]);
    }

    #[cfg(unix)]
    #[test]
    fn failing_learner_is_reported_with_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = MainEffectsConfig {
            executable: PathBuf::from("sh"),
            extra_args: vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()],
            num_trees: 10,
            threads: 1,
        };
        let mut scorer = RandomJungleScorer::new(config, dir.path().join("ec"));
        match scorer.score(&genotype_dataset()).unwrap_err() {
            ScorerError::LearnerFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("Expected LearnerFailed, got {:?}", other),
        }
    }
}
