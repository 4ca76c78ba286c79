//! # Attribute Dataset
//!
//! The cooling loop needs very little from a data set: the names of the attributes
//! still in play, whether the phenotype is continuous, and a way to retire an
//! attribute. The scorers additionally need the raw values of the active columns.
//! `AttributeDataset` captures exactly that contract; `AttributeMatrix` is the
//! in-memory implementation used by the command-line tool and the tests.
//!
//! - Strict Schema: a tab-separated file with a header row and a mandatory
//!   `phenotype` column. Every other column is an attribute.
//! - Kind Inference: columns holding only `0`, `1` and `2` are genotype-coded;
//!   everything else is numeric. A phenotype with integral values and at most two
//!   levels is a case/control label, anything else is continuous.
//! - No Imputation: missing or non-numeric cells are rejected with the column name.

use ahash::AHashMap;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::path::Path;
use thiserror::Error;

/// The column name that holds the dependent variable in tabular input.
pub const PHENOTYPE_COLUMN: &str = "phenotype";

const MINIMUM_INSTANCES: usize = 2;

/// How an attribute's values are coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Additive genotype coding: 0, 1 or 2 copies of the minor allele.
    Genotype,
    /// Any other real-valued measurement (clinical covariates, expression, ...).
    Numeric,
}

/// Whether the phenotype is a class label or a continuous trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhenotypeKind {
    Discrete,
    Continuous,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to read tab-separated input: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Matrix dimensions are inconsistent: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("The input contains no attribute columns besides the phenotype.")]
    NoAttributes,
    #[error("Attribute '{0}' appears more than once.")]
    DuplicateAttribute(String),
    #[error(
        "Expected {expected} values for column '{column}', but found {found}. Every column must have one value per instance."
    )]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("Column '{column}' has a missing or non-numeric value '{value}' on data row {row}.")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error(
        "Non-finite values (NaN or Infinity) were found in column '{0}'. All values must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("The data set has {found} instances, but at least {required} are required.")]
    InsufficientInstances { found: usize, required: usize },
    #[error("Attribute '{0}' is not an active attribute of this data set.")]
    AttributeNotActive(String),
}

/// The narrow view of a data set that the cooling loop and its scorers rely on.
///
/// "Active" attributes are those not yet evaporated. Every method that lists or
/// extracts attributes works on the active set only and preserves the data set's
/// own column order.
pub trait AttributeDataset {
    fn num_instances(&self) -> usize;

    fn attribute_count(&self) -> usize;

    fn attribute_names(&self) -> Vec<String>;

    /// The coding of an active attribute, or `None` if the name is not active.
    fn attribute_kind(&self, name: &str) -> Option<AttributeKind>;

    fn has_continuous_phenotype(&self) -> bool;

    fn phenotypes(&self) -> ArrayView1<'_, f64>;

    /// Extracts the listed active columns, instances as rows, in the order given.
    fn columns(&self, names: &[String]) -> Result<Array2<f64>, DataError>;

    /// Marks `name` inactive. Fails if it is unknown or already removed.
    fn remove_attribute(&mut self, name: &str) -> Result<(), DataError>;

    fn has_genotypes(&self) -> bool {
        self.attribute_names()
            .iter()
            .any(|n| self.attribute_kind(n) == Some(AttributeKind::Genotype))
    }

    fn has_numerics(&self) -> bool {
        self.attribute_names()
            .iter()
            .any(|n| self.attribute_kind(n) == Some(AttributeKind::Numeric))
    }

    fn active_matrix(&self) -> Result<Array2<f64>, DataError> {
        self.columns(&self.attribute_names())
    }
}

/// An in-memory data set with an active-attribute mask.
#[derive(Debug, Clone)]
pub struct AttributeMatrix {
    names: Vec<String>,
    kinds: Vec<AttributeKind>,
    index: AHashMap<String, usize>,
    /// Shape: [num_instances, num_attributes], all attributes ever loaded.
    values: Array2<f64>,
    phenotype: Array1<f64>,
    phenotype_kind: PhenotypeKind,
    active: Vec<bool>,
}

impl AttributeMatrix {
    /// Builds a data set from already-parsed columns. All attributes start active.
    pub fn new(
        names: Vec<String>,
        kinds: Vec<AttributeKind>,
        values: Array2<f64>,
        phenotype: Array1<f64>,
        phenotype_kind: PhenotypeKind,
    ) -> Result<Self, DataError> {
        if names.is_empty() {
            return Err(DataError::NoAttributes);
        }
        let (rows, cols) = values.dim();
        if rows < MINIMUM_INSTANCES {
            return Err(DataError::InsufficientInstances {
                found: rows,
                required: MINIMUM_INSTANCES,
            });
        }
        if kinds.len() != names.len() || cols != names.len() {
            return Err(DataError::LengthMismatch {
                column: "attribute header".to_string(),
                expected: names.len(),
                found: if cols != names.len() { cols } else { kinds.len() },
            });
        }
        if phenotype.len() != rows {
            return Err(DataError::LengthMismatch {
                column: PHENOTYPE_COLUMN.to_string(),
                expected: rows,
                found: phenotype.len(),
            });
        }
        if phenotype.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(PHENOTYPE_COLUMN.to_string()));
        }

        let mut index = AHashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(DataError::DuplicateAttribute(name.clone()));
            }
            if values.column(i).iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name.clone()));
            }
        }

        let active = vec![true; names.len()];
        Ok(Self {
            names,
            kinds,
            index,
            values,
            phenotype,
            phenotype_kind,
            active,
        })
    }

    /// Builds a data set inferring attribute and phenotype kinds from the values.
    pub fn from_values(
        names: Vec<String>,
        values: Array2<f64>,
        phenotype: Array1<f64>,
    ) -> Result<Self, DataError> {
        let kinds = values
            .axis_iter(Axis(1))
            .map(infer_attribute_kind)
            .collect();
        let phenotype_kind = infer_phenotype_kind(phenotype.view());
        Self::new(names, kinds, values, phenotype, phenotype_kind)
    }

    /// Loads a tab-separated file with a header row and a `phenotype` column.
    pub fn load_tsv(path: &Path) -> Result<Self, DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let phenotype_idx = headers
            .iter()
            .position(|h| h == PHENOTYPE_COLUMN)
            .ok_or_else(|| DataError::ColumnNotFound(PHENOTYPE_COLUMN.to_string()))?;
        let attribute_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != phenotype_idx).collect();
        if attribute_idx.is_empty() {
            return Err(DataError::NoAttributes);
        }

        let mut flat = Vec::new();
        let mut phenotype = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            phenotype.push(parse_cell(&record, phenotype_idx, &headers, row + 1)?);
            for &col in &attribute_idx {
                flat.push(parse_cell(&record, col, &headers, row + 1)?);
            }
        }

        let num_rows = phenotype.len();
        let values = Array2::from_shape_vec((num_rows, attribute_idx.len()), flat)?;
        let names = attribute_idx.iter().map(|&i| headers[i].clone()).collect();
        Self::from_values(names, values, Array1::from(phenotype))
    }

    /// Number of attributes loaded, active or not.
    pub fn total_attributes(&self) -> usize {
        self.names.len()
    }

    fn active_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied().filter(|&i| self.active[i])
    }
}

impl AttributeDataset for AttributeMatrix {
    fn num_instances(&self) -> usize {
        self.values.nrows()
    }

    fn attribute_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    fn attribute_names(&self) -> Vec<String> {
        self.names
            .iter()
            .zip(&self.active)
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn attribute_kind(&self, name: &str) -> Option<AttributeKind> {
        self.active_index(name).map(|i| self.kinds[i])
    }

    fn has_continuous_phenotype(&self) -> bool {
        self.phenotype_kind == PhenotypeKind::Continuous
    }

    fn phenotypes(&self) -> ArrayView1<'_, f64> {
        self.phenotype.view()
    }

    fn columns(&self, names: &[String]) -> Result<Array2<f64>, DataError> {
        let indices = names
            .iter()
            .map(|n| {
                self.active_index(n)
                    .ok_or_else(|| DataError::AttributeNotActive(n.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.values.select(Axis(1), &indices))
    }

    fn remove_attribute(&mut self, name: &str) -> Result<(), DataError> {
        let idx = self
            .active_index(name)
            .ok_or_else(|| DataError::AttributeNotActive(name.to_string()))?;
        self.active[idx] = false;
        Ok(())
    }
}

fn parse_cell(
    record: &csv::StringRecord,
    col: usize,
    headers: &[String],
    row: usize,
) -> Result<f64, DataError> {
    let raw = record.get(col).unwrap_or("").trim();
    let value = raw.parse::<f64>().map_err(|_| DataError::InvalidValue {
        column: headers[col].clone(),
        row,
        value: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DataError::NonFiniteValuesFound(headers[col].clone()));
    }
    Ok(value)
}

/// Columns made only of 0, 1 and 2 are treated as additive genotype calls.
pub fn infer_attribute_kind(column: ArrayView1<'_, f64>) -> AttributeKind {
    if column.iter().all(|&v| v == 0.0 || v == 1.0 || v == 2.0) {
        AttributeKind::Genotype
    } else {
        AttributeKind::Numeric
    }
}

/// Integral values with at most two levels form a case/control label.
pub fn infer_phenotype_kind(phenotype: ArrayView1<'_, f64>) -> PhenotypeKind {
    if phenotype.iter().any(|v| v.fract() != 0.0) {
        return PhenotypeKind::Continuous;
    }
    let mut levels: Vec<i64> = phenotype.iter().map(|&v| v as i64).collect();
    levels.sort_unstable();
    levels.dedup();
    if levels.len() <= 2 {
        PhenotypeKind::Discrete
    } else {
        PhenotypeKind::Continuous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn small_matrix() -> AttributeMatrix {
        AttributeMatrix::from_values(
            vec!["rs1".into(), "rs2".into(), "age".into()],
            array![[0.0, 1.0, 40.5], [2.0, 1.0, 33.0], [1.0, 0.0, 61.2]],
            array![0.0, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn kinds_are_inferred_from_values() {
        let data = small_matrix();
        assert_eq!(data.attribute_kind("rs1"), Some(AttributeKind::Genotype));
        assert_eq!(data.attribute_kind("age"), Some(AttributeKind::Numeric));
        assert!(!data.has_continuous_phenotype());
        assert!(data.has_genotypes());
        assert!(data.has_numerics());

        assert_eq!(
            infer_phenotype_kind(array![1.0, 2.0, 3.0].view()),
            PhenotypeKind::Continuous
        );
        assert_eq!(
            infer_phenotype_kind(array![0.5, 0.5].view()),
            PhenotypeKind::Continuous
        );
    }

    #[test]
    fn removal_masks_attributes_and_preserves_order() {
        let mut data = small_matrix();
        data.remove_attribute("rs2").unwrap();

        assert_eq!(data.attribute_count(), 2);
        assert_eq!(data.attribute_names(), vec!["rs1".to_string(), "age".to_string()]);
        assert_eq!(data.attribute_kind("rs2"), None);
        assert!(data.has_numerics());
        assert_eq!(data.total_attributes(), 3);

        let matrix = data.active_matrix().unwrap();
        assert_eq!(matrix.dim(), (3, 2));
        assert_eq!(matrix[[1, 0]], 2.0);
        assert_eq!(matrix[[2, 1]], 61.2);

        match data.remove_attribute("rs2").unwrap_err() {
            DataError::AttributeNotActive(name) => assert_eq!(name, "rs2"),
            other => panic!("Expected AttributeNotActive, got {:?}", other),
        }
        assert!(data.columns(&["rs2".to_string()]).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = AttributeMatrix::from_values(
            vec!["rs1".into(), "rs1".into()],
            array![[0.0, 1.0], [1.0, 2.0]],
            array![0.0, 1.0],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::DuplicateAttribute(name) if name == "rs1"));
    }

    #[test]
    fn load_tsv_reads_attributes_and_phenotype() {
        let file = create_test_tsv("rs1\trs2\tbmi\tphenotype\n0\t1\t22.5\t1.5\n2\t2\t30.1\t0.2\n1\t0\t27.0\t3.3").unwrap();
        let data = AttributeMatrix::load_tsv(file.path()).unwrap();

        assert_eq!(data.num_instances(), 3);
        assert_eq!(
            data.attribute_names(),
            vec!["rs1".to_string(), "rs2".to_string(), "bmi".to_string()]
        );
        assert!(data.has_continuous_phenotype());
        assert_eq!(data.phenotypes()[2], 3.3);
        assert_eq!(data.attribute_kind("bmi"), Some(AttributeKind::Numeric));
    }

    #[test]
    fn load_tsv_requires_phenotype_column() {
        let file = create_test_tsv("rs1\trs2\n0\t1\n1\t1").unwrap();
        match AttributeMatrix::load_tsv(file.path()).unwrap_err() {
            DataError::ColumnNotFound(col) => assert_eq!(col, PHENOTYPE_COLUMN),
            other => panic!("Expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn load_tsv_rejects_missing_values() {
        let file = create_test_tsv("rs1\tphenotype\n0\t1\nNA\t0").unwrap();
        match AttributeMatrix::load_tsv(file.path()).unwrap_err() {
            DataError::InvalidValue { column, row, value } => {
                assert_eq!(column, "rs1");
                assert_eq!(row, 2);
                assert_eq!(value, "NA");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }
}
