//! Per-order regularization overrides.
//!
//! The file is a JSON object keyed by parameter name; each value is an array
//! indexed by order index:
//!
//! ```json
//! { "L1_template": [0.0, 0.1], "L2_template": [1.0, 1.0] }
//! ```
//!
//! Components without variable bases only read the two template keys. Every
//! required key is read and checked before anything is applied, so a bad file
//! never leaves a component with a mix of file and default values.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::Regularization;

const TEMPLATE_KEYS: [&str; 2] = ["L1_template", "L2_template"];
const BASIS_KEYS: [&str; 3] = ["L1_basis_vectors", "L2_basis_vectors", "L2_basis_weights"];

#[derive(Debug, Error)]
pub enum RegularizationFileError {
    #[error("cannot open '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing key '{0}'")]
    MissingKey(&'static str),

    #[error("key '{key}' has no entry for order index {order_index}")]
    MissingOrder { key: &'static str, order_index: usize },

    #[error("key '{key}' has invalid value {value} (must be finite and >= 0)")]
    InvalidValue { key: &'static str, value: f64 },
}

/// Read the overrides for `order_index` from `path` on top of `base`.
pub fn load_regularization(
    path: &Path,
    order_index: usize,
    with_basis: bool,
    base: Regularization,
) -> Result<Regularization, RegularizationFileError> {
    let file = File::open(path).map_err(|source| RegularizationFileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let table: HashMap<String, Vec<f64>> =
        serde_json::from_reader(file).map_err(|source| RegularizationFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    regularization_from_table(&table, order_index, with_basis, base)
}

fn regularization_from_table(
    table: &HashMap<String, Vec<f64>>,
    order_index: usize,
    with_basis: bool,
    base: Regularization,
) -> Result<Regularization, RegularizationFileError> {
    let lookup = |key: &'static str| -> Result<f64, RegularizationFileError> {
        let values = table
            .get(key)
            .ok_or(RegularizationFileError::MissingKey(key))?;
        let value = *values
            .get(order_index)
            .ok_or(RegularizationFileError::MissingOrder { key, order_index })?;
        if !(value.is_finite() && value >= 0.0) {
            return Err(RegularizationFileError::InvalidValue { key, value });
        }
        Ok(value)
    };

    let [l1_t, l2_t] = TEMPLATE_KEYS;
    let mut out = Regularization {
        l1_template: lookup(l1_t)?,
        l2_template: lookup(l2_t)?,
        ..base
    };
    if with_basis {
        let [l1_v, l2_v, l2_w] = BASIS_KEYS;
        out.l1_basis_vectors = lookup(l1_v)?;
        out.l2_basis_vectors = lookup(l2_v)?;
        out.l2_basis_weights = lookup(l2_w)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, Vec<f64>)]) -> HashMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn reads_template_keys_for_order() {
        let t = table(&[("L1_template", vec![0.0, 3.0]), ("L2_template", vec![1.0, 2.0])]);
        let reg = regularization_from_table(&t, 1, false, Regularization::default()).unwrap();
        assert_eq!(reg.l1_template, 3.0);
        assert_eq!(reg.l2_template, 2.0);
        assert_eq!(reg.l2_basis_weights, 1.0);
    }

    #[test]
    fn basis_keys_are_required_with_bases() {
        let t = table(&[("L1_template", vec![0.0]), ("L2_template", vec![1.0])]);
        let err = regularization_from_table(&t, 0, true, Regularization::default()).unwrap_err();
        assert!(matches!(err, RegularizationFileError::MissingKey("L1_basis_vectors")));
    }

    #[test]
    fn short_arrays_and_negative_values_fail() {
        let t = table(&[("L1_template", vec![0.0]), ("L2_template", vec![1.0])]);
        assert!(matches!(
            regularization_from_table(&t, 4, false, Regularization::default()),
            Err(RegularizationFileError::MissingOrder { order_index: 4, .. })
        ));

        let t = table(&[("L1_template", vec![-1.0]), ("L2_template", vec![1.0])]);
        assert!(regularization_from_table(&t, 0, false, Regularization::default()).is_err());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let path = std::env::temp_dir().join("spectral-rv-no-such-regularization.json");
        let err = load_regularization(&path, 0, false, Regularization::default()).unwrap_err();
        assert!(matches!(err, RegularizationFileError::Open { .. }));
    }
}
