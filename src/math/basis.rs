//! Low-rank bases from the singular value decomposition.
//!
//! Given an `N × M` residual matrix `R`, the best rank-`K` approximation (in the
//! Frobenius sense) is `W · V` with
//!
//! - `V` (`K × M`): the top-`K` right singular vectors, one per row
//! - `W` (`N × K`): the matching left singular vectors scaled by their singular values
//!
//! The decomposition is deterministic; the sign of each singular pair is not
//! (flipping a row of `V` together with the matching column of `W` gives the
//! same product).
//!
//! `K` must not exceed the numerical rank of `R`: singular pairs with a
//! vanishing singular value carry arbitrary vectors and zero weights.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Rank-`K` factorization `weights · vectors`.
#[derive(Debug, Clone, PartialEq)]
pub struct LowRankBasis {
    /// `N × K`
    pub weights: DMatrix<f64>,
    /// `K × M`, orthonormal rows
    pub vectors: DMatrix<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BasisError {
    #[error("rank {k} requested from a {n} x {m} matrix")]
    TooLarge { k: usize, n: usize, m: usize },

    #[error("rank {k} requested but the residuals have numerical rank {rank}")]
    RankDeficient { k: usize, rank: usize },

    #[error("singular value decomposition returned no singular vectors")]
    NoVectors,
}

/// Largest supported rank for an `n × m` matrix.
pub fn max_rank(n: usize, m: usize) -> usize {
    n.min(m)
}

/// Number of singular values above `s_max · max(n, m) · ε`.
pub fn numerical_rank(singular_values: &DVector<f64>, n: usize, m: usize) -> usize {
    let s_max = singular_values.iter().copied().fold(0.0, f64::max);
    if s_max <= 0.0 {
        return 0;
    }
    let tol = s_max * n.max(m) as f64 * f64::EPSILON;
    singular_values.iter().filter(|&&s| s > tol).count()
}

/// Compute the leading rank-`k` basis of `residuals`.
///
/// Singular triplets are ordered by decreasing singular value. Fails if `k`
/// exceeds [`max_rank`] or the numerical rank of `residuals`.
pub fn leading_singular_basis(residuals: &DMatrix<f64>, k: usize) -> Result<LowRankBasis, BasisError> {
    let (n, m) = residuals.shape();
    if k > max_rank(n, m) {
        return Err(BasisError::TooLarge { k, n, m });
    }

    let svd = residuals.clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return Err(BasisError::NoVectors);
    };
    let s = &svd.singular_values;
    let rank = numerical_rank(s, n, m);
    if k > rank {
        return Err(BasisError::RankDeficient { k, rank });
    }

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].partial_cmp(&s[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut weights = DMatrix::<f64>::zeros(n, k);
    let mut vectors = DMatrix::<f64>::zeros(k, m);
    for (slot, &idx) in order.iter().take(k).enumerate() {
        weights.set_column(slot, &(u.column(idx) * s[idx]));
        vectors.set_row(slot, &v_t.row(idx));
    }

    Ok(LowRankBasis { weights, vectors })
}
