//! Data file ingest.
//!
//! Spectra are exchanged as a single JSON document:
//!
//! ```json
//! {
//!   "orders": [40, 41],
//!   "bervs": [...],            // m/s, one per epoch
//!   "airms": [...],            // one per epoch
//!   "spectra": [               // one per order
//!     { "xs": [[...], ...], "ys": [[...], ...], "ivars": [[...], ...] }
//!   ]
//! }
//! ```
//!
//! Each of `xs`, `ys`, `ivars` is a list of epochs, each a list of pixels.
//! Shape and value checks are done by [`Data::new`]; this module only turns
//! nested arrays into matrices.

use std::fs::File;
use std::path::Path;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::data::{Data, OrderSpectra};
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFile {
    pub xs: Vec<Vec<f64>>,
    pub ys: Vec<Vec<f64>>,
    pub ivars: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFile {
    pub orders: Vec<usize>,
    pub bervs: Vec<f64>,
    pub airms: Vec<f64>,
    pub spectra: Vec<OrderFile>,
}

/// Read and validate a data JSON file.
pub fn read_data_json(path: &Path) -> Result<Data, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open data JSON '{}': {e}", path.display())))?;
    let raw: DataFile =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid data JSON: {e}")))?;
    data_from_file(raw)
}

/// Write `data` in the format read by [`read_data_json`].
pub fn write_data_json(path: &Path, data: &Data) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create data JSON '{}': {e}", path.display())))?;
    serde_json::to_writer(file, &data_to_file(data))
        .map_err(|e| AppError::new(2, format!("Failed to write data JSON: {e}")))?;
    Ok(())
}

pub fn data_from_file(raw: DataFile) -> Result<Data, AppError> {
    let mut spectra = Vec::with_capacity(raw.spectra.len());
    for (r, order) in raw.spectra.into_iter().enumerate() {
        let context = |what: &str| format!("order {r}: {what}");
        spectra.push(OrderSpectra {
            xs: matrix_from_rows(&order.xs).map_err(|e| AppError::new(2, context(&format!("xs {e}"))))?,
            ys: matrix_from_rows(&order.ys).map_err(|e| AppError::new(2, context(&format!("ys {e}"))))?,
            ivars: matrix_from_rows(&order.ivars)
                .map_err(|e| AppError::new(2, context(&format!("ivars {e}"))))?,
        });
    }
    Ok(Data::new(raw.orders, spectra, raw.bervs, raw.airms)?)
}

pub fn data_to_file(data: &Data) -> DataFile {
    let spectra = (0..data.n_orders())
        .filter_map(|r| data.spectra(r))
        .map(|s| OrderFile {
            xs: rows_of(&s.xs),
            ys: rows_of(&s.ys),
            ivars: rows_of(&s.ivars),
        })
        .collect();
    DataFile {
        orders: data.order_numbers().to_vec(),
        bervs: data.bervs().to_vec(),
        airms: data.airms().to_vec(),
        spectra,
    }
}

fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<DMatrix<f64>, String> {
    let n = rows.len();
    let m = rows.first().map(Vec::len).unwrap_or(0);
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != m) {
        return Err(format!("row {i} has {} values, expected {m}", row.len()));
    }
    Ok(DMatrix::from_fn(n, m, |i, j| rows[i][j]))
}

pub(crate) fn rows_of(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> DataFile {
        DataFile {
            orders: vec![7],
            bervs: vec![0.0, 100.0],
            airms: vec![1.0, 1.25],
            spectra: vec![OrderFile {
                xs: vec![vec![8.0, 8.125, 8.25], vec![8.0, 8.125, 8.25]],
                ys: vec![vec![0.0, -0.125, 0.0], vec![0.0, -0.25, 0.0]],
                ivars: vec![vec![1.0; 3], vec![1.0; 3]],
            }],
        }
    }

    #[test]
    fn rows_become_epochs() {
        let data = data_from_file(sample_file()).unwrap();
        let s = data.spectra(0).unwrap();
        assert_eq!(s.ys.shape(), (2, 3));
        assert_eq!(s.ys[(1, 1)], -0.25);
        assert_eq!(data.order_number(0), Some(7));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut raw = sample_file();
        raw.spectra[0].ys[1].pop();
        let err = data_from_file(raw).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("ys row 1"), "{err}");
    }

    #[test]
    fn file_round_trip() {
        let data = data_from_file(sample_file()).unwrap();
        let path = std::env::temp_dir().join(format!("spectral-rv-ingest-{}.json", std::process::id()));
        write_data_json(&path, &data).unwrap();
        let back = read_data_json(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, data);
    }
}
