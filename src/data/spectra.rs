//! The data provider: per-order spectra plus per-epoch metadata.
//!
//! Every order holds three `N × M` matrices (epochs × pixels):
//!
//! - `xs`: natural-log wavelengths in the observatory frame
//! - `ys`: log fluxes
//! - `ivars`: inverse variances of `ys` (0 masks a pixel)
//!
//! The engine only reads from `Data`; it is validated once at construction.

use nalgebra::DMatrix;

use crate::error::EngineError;
use crate::math::is_strictly_increasing;

/// One spectral order across all epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpectra {
    pub xs: DMatrix<f64>,
    pub ys: DMatrix<f64>,
    pub ivars: DMatrix<f64>,
}

impl OrderSpectra {
    pub fn n_pixels(&self) -> usize {
        self.xs.ncols()
    }
}

/// Validated multi-order, multi-epoch spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    orders: Vec<usize>,
    spectra: Vec<OrderSpectra>,
    bervs: Vec<f64>,
    airms: Vec<f64>,
}

impl Data {
    /// Build a data set.
    ///
    /// - `orders`: instrument order numbers, one per entry of `spectra`
    /// - `bervs`: barycentric velocity corrections (m/s), one per epoch
    /// - `airms`: airmass, one per epoch
    pub fn new(
        orders: Vec<usize>,
        spectra: Vec<OrderSpectra>,
        bervs: Vec<f64>,
        airms: Vec<f64>,
    ) -> Result<Self, EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidData(msg));

        if spectra.is_empty() {
            return invalid("no orders".to_string());
        }
        if orders.len() != spectra.len() {
            return invalid(format!(
                "{} order numbers for {} orders",
                orders.len(),
                spectra.len()
            ));
        }
        let n = bervs.len();
        if n == 0 {
            return invalid("no epochs".to_string());
        }
        if airms.len() != n {
            return invalid(format!("{} airmasses for {n} epochs", airms.len()));
        }
        if !bervs.iter().chain(airms.iter()).all(|v| v.is_finite()) {
            return invalid("non-finite barycentric velocity or airmass".to_string());
        }

        for (r, s) in spectra.iter().enumerate() {
            let shape = s.xs.shape();
            if shape.0 != n {
                return invalid(format!("order {r}: {} epochs, expected {n}", shape.0));
            }
            if shape.1 < 2 {
                return invalid(format!("order {r}: needs at least two pixels"));
            }
            if s.ys.shape() != shape || s.ivars.shape() != shape {
                return invalid(format!("order {r}: xs, ys and ivars differ in shape"));
            }
            for i in 0..n {
                let row: Vec<f64> = s.xs.row(i).iter().copied().collect();
                if !is_strictly_increasing(&row) {
                    return invalid(format!(
                        "order {r}, epoch {i}: wavelengths must be finite and strictly increasing"
                    ));
                }
            }
            if !s.ys.iter().all(|v| v.is_finite()) {
                return invalid(format!("order {r}: non-finite flux"));
            }
            if !s.ivars.iter().all(|v| v.is_finite() && *v >= 0.0) {
                return invalid(format!("order {r}: inverse variances must be finite and >= 0"));
            }
        }

        Ok(Self {
            orders,
            spectra,
            bervs,
            airms,
        })
    }

    /// Number of epochs (`N`).
    pub fn n_epochs(&self) -> usize {
        self.bervs.len()
    }

    pub fn n_orders(&self) -> usize {
        self.spectra.len()
    }

    /// Instrument order number for order index `r`.
    pub fn order_number(&self, r: usize) -> Option<usize> {
        self.orders.get(r).copied()
    }

    pub fn order_numbers(&self) -> &[usize] {
        &self.orders
    }

    pub fn spectra(&self, r: usize) -> Option<&OrderSpectra> {
        self.spectra.get(r)
    }

    pub fn bervs(&self) -> &[f64] {
        &self.bervs
    }

    pub fn airms(&self) -> &[f64] {
        &self.airms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(n: usize, m: usize) -> OrderSpectra {
        OrderSpectra {
            xs: DMatrix::from_fn(n, m, |_, j| 8.7 + j as f64 * 1e-5),
            ys: DMatrix::zeros(n, m),
            ivars: DMatrix::from_element(n, m, 1.0),
        }
    }

    #[test]
    fn accepts_consistent_shapes() {
        let data = Data::new(vec![40], vec![order(3, 10)], vec![0.0; 3], vec![1.0; 3]).unwrap();
        assert_eq!(data.n_epochs(), 3);
        assert_eq!(data.n_orders(), 1);
        assert_eq!(data.order_number(0), Some(40));
        assert_eq!(data.spectra(0).unwrap().n_pixels(), 10);
    }

    #[test]
    fn rejects_epoch_mismatch() {
        let err = Data::new(vec![40], vec![order(3, 10)], vec![0.0; 4], vec![1.0; 4]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidData(_)));
    }

    #[test]
    fn rejects_decreasing_wavelengths() {
        let mut o = order(2, 5);
        o.xs[(1, 3)] = o.xs[(1, 1)];
        let err = Data::new(vec![1], vec![o], vec![0.0; 2], vec![1.0; 2]).unwrap_err();
        assert!(err.to_string().contains("epoch 1"));
    }

    #[test]
    fn rejects_negative_ivars() {
        let mut o = order(2, 5);
        o.ivars[(0, 0)] = -1.0;
        assert!(Data::new(vec![1], vec![o], vec![0.0; 2], vec![1.0; 2]).is_err());
    }
}
