//! Delimited text datasets: numeric feature columns plus one label column.

use super::{DataSplit, Dataset, DatasetProvider};
use gridtrack_core::error::DatasetError;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvProvider {
    pub path: PathBuf,
    pub label_column: String,
    pub delimiter: char,
    pub test_fraction: f64,
    pub seed: u64,
}

impl CsvProvider {
    pub fn load(&self) -> Result<Dataset, DatasetError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| DatasetError::Read {
            path: self.path.clone(),
            source,
        })?;
        parse(&content, &self.label_column, self.delimiter)
    }
}

impl DatasetProvider for CsvProvider {
    fn describe(&self) -> String {
        format!("csv {} (label column '{}')", self.path.display(), self.label_column)
    }

    fn get_split(&self) -> Result<DataSplit, DatasetError> {
        self.load()?.split(self.test_fraction, self.seed)
    }
}

fn malformed(e: &csv::Error) -> DatasetError {
    DatasetError::Malformed {
        line: e.position().map(|p| p.line() as usize).unwrap_or(0),
        message: e.to_string(),
    }
}

/// Parse CSV text. Class names are the distinct labels in sorted order.
///
/// Fields may be quoted; blank lines are skipped.
pub fn parse(content: &str, label_column: &str, delimiter: char) -> Result<Dataset, DatasetError> {
    if !delimiter.is_ascii() {
        return Err(DatasetError::InvalidParameter {
            message: format!("delimiter '{delimiter}' is not a single ASCII character"),
        });
    }
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| malformed(&e))?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.is_empty() {
        return Err(DatasetError::TooSmall {
            message: "empty CSV file".into(),
        });
    }
    let label_idx = columns
        .iter()
        .position(|c| c == label_column)
        .ok_or_else(|| DatasetError::MissingLabelColumn {
            column: label_column.to_string(),
        })?;
    let feature_names: Vec<String> = columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != label_idx)
        .map(|(_, c)| c.clone())
        .collect();
    if feature_names.is_empty() {
        return Err(DatasetError::TooSmall {
            message: "no feature columns".into(),
        });
    }

    let mut features = Vec::new();
    let mut raw_labels = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(malformed(&e)),
        }
        let line_no = record.position().map(|p| p.line() as usize).unwrap_or(0);
        if record.len() != columns.len() {
            return Err(DatasetError::Malformed {
                line: line_no,
                message: format!("expected {} fields, found {}", columns.len(), record.len()),
            });
        }
        let mut sample = Vec::with_capacity(feature_names.len());
        for (i, cell) in record.iter().enumerate() {
            if i == label_idx {
                continue;
            }
            let value: f64 = cell.parse().map_err(|_| DatasetError::Malformed {
                line: line_no,
                message: format!("column '{}' is not numeric: '{cell}'", columns[i]),
            })?;
            if !value.is_finite() {
                return Err(DatasetError::Malformed {
                    line: line_no,
                    message: format!("column '{}' is not finite", columns[i]),
                });
            }
            sample.push(value);
        }
        features.push(sample);
        raw_labels.push(record[label_idx].to_string());
    }

    let class_names: Vec<String> = raw_labels
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if class_names.len() < 2 {
        return Err(DatasetError::TooSmall {
            message: format!("need at least 2 classes, found {}", class_names.len()),
        });
    }
    let labels = raw_labels
        .iter()
        .map(|l| class_names.iter().position(|c| c == l).unwrap_or_default())
        .collect();

    Ok(Dataset {
        feature_names,
        class_names,
        features,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IRIS_HEAD: &str = "\
sepal_length,sepal_width,petal_length,petal_width,species
5.1,3.5,1.4,0.2,setosa
7.0,3.2,4.7,1.4,versicolor
6.3,3.3,6.0,2.5,virginica

4.9,3.0,1.4,0.2,setosa
";

    #[test]
    fn test_parse_iris_rows() {
        let ds = parse(IRIS_HEAD, "species", ',').unwrap();
        assert_eq!(ds.len(), 4);
        assert_eq!(
            ds.feature_names,
            vec!["sepal_length", "sepal_width", "petal_length", "petal_width"]
        );
        assert_eq!(ds.class_names, vec!["setosa", "versicolor", "virginica"]);
        assert_eq!(ds.labels, vec![0, 1, 2, 0]);
        assert_eq!(ds.features[1], vec![7.0, 3.2, 4.7, 1.4]);
    }

    #[test]
    fn test_label_column_anywhere() {
        let ds = parse("label;x\n1;0.5\n0;1.5\n", "label", ';').unwrap();
        assert_eq!(ds.feature_names, vec!["x"]);
        assert_eq!(ds.class_names, vec!["0", "1"]);
        assert_eq!(ds.labels, vec![1, 0]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse("a,b\n1,2\n", "label", ','),
            Err(DatasetError::MissingLabelColumn { .. })
        ));
        assert!(matches!(
            parse("x,label\n1,a\nfoo,b\n", "label", ','),
            Err(DatasetError::Malformed { line: 3, .. })
        ));
        assert!(matches!(
            parse("x,label\n1,a,extra\n", "label", ','),
            Err(DatasetError::Malformed { line: 2, .. })
        ));
        assert!(matches!(
            parse("x,label\n1,a\n2,a\n", "label", ','),
            Err(DatasetError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_quoted_fields() {
        let ds = parse(
            "a,b,species\n1.0,2.0,\"Iris, setosa\"\n3.0,4.0,\"Iris, virginica\"\n",
            "species",
            ',',
        )
        .unwrap();
        assert_eq!(ds.class_names, vec!["Iris, setosa", "Iris, virginica"]);
        assert_eq!(ds.features, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let ds = parse(
            "x,label\n1.0,\"say \"\"hi\"\"\"\n2.0,plain\n",
            "label",
            ',',
        )
        .unwrap();
        assert_eq!(ds.class_names, vec!["plain", "say \"hi\""]);
        assert_eq!(ds.labels, vec![1, 0]);
    }

    #[test]
    fn test_non_ascii_delimiter_is_rejected() {
        assert!(matches!(
            parse("x\u{b6}label\n1\u{b6}a\n", "label", '\u{b6}'),
            Err(DatasetError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_provider_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("iris.csv");
        std::fs::write(&path, IRIS_HEAD).unwrap();
        let provider = CsvProvider {
            path,
            label_column: "species".into(),
            delimiter: ',',
            test_fraction: 0.25,
            seed: 42,
        };
        let split = provider.get_split().unwrap();
        assert_eq!(split.x_test.len(), 1);
        assert_eq!(split.x_train.len(), 3);

        let missing = CsvProvider {
            path: dir.path().join("nope.csv"),
            ..provider
        };
        assert!(matches!(missing.load(), Err(DatasetError::Read { .. })));
    }
}
