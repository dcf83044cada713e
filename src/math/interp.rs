//! Piecewise-linear interpolation on strictly increasing grids.
//!
//! The forward model needs two things from interpolation besides the value:
//!
//! - the weights on the two bracketing samples (the value is linear in the
//!   sampled values, so these are also the gradient w.r.t. those values)
//! - the local slope (gradient w.r.t. the evaluation coordinate)
//!
//! [`Bracket`] carries both, so callers can evaluate once and reuse the
//! bracket for the backward pass.

/// Behaviour outside the sampled range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Hold the end value (NumPy `interp` semantics); zero slope outside.
    Clamp,
    /// Continue the first/last segment linearly.
    Extrapolate,
}

/// Location of a coordinate relative to a grid.
///
/// `value = ys[lo] * (1 - frac) + ys[hi] * frac`. With [`Edge::Extrapolate`]
/// `frac` may fall outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub lo: usize,
    pub hi: usize,
    pub frac: f64,
    /// Whether the slope of the segment applies (false for clamped points).
    pub sloped: bool,
}

impl Bracket {
    /// Locate `x` on `grid`.
    ///
    /// Grids with fewer than two samples produce a flat bracket on sample 0.
    pub fn locate(grid: &[f64], x: f64, edge: Edge) -> Self {
        let n = grid.len();
        if n < 2 {
            return Self {
                lo: 0,
                hi: 0,
                frac: 0.0,
                sloped: false,
            };
        }

        // Number of grid points <= x.
        let above = grid.partition_point(|&g| g <= x);
        let (lo, hi, inside) = if above == 0 {
            (0, 1, false)
        } else if above >= n {
            (n - 2, n - 1, x == grid[n - 1])
        } else {
            (above - 1, above, true)
        };

        let frac = (x - grid[lo]) / (grid[hi] - grid[lo]);
        match (inside, edge) {
            (true, _) | (false, Edge::Extrapolate) => Self {
                lo,
                hi,
                frac,
                sloped: true,
            },
            (false, Edge::Clamp) => Self {
                lo,
                hi,
                frac: if above == 0 { 0.0 } else { 1.0 },
                sloped: false,
            },
        }
    }

    pub fn value(&self, ys: &[f64]) -> f64 {
        if self.lo == self.hi {
            return ys.first().copied().unwrap_or(f64::NAN);
        }
        ys[self.lo] * (1.0 - self.frac) + ys[self.hi] * self.frac
    }

    /// d value / d x at the bracketed coordinate.
    pub fn slope(&self, grid: &[f64], ys: &[f64]) -> f64 {
        if !self.sloped || self.lo == self.hi {
            return 0.0;
        }
        (ys[self.hi] - ys[self.lo]) / (grid[self.hi] - grid[self.lo])
    }
}

/// Interpolate `(grid, ys)` at every coordinate of `xs`.
pub fn interp_linear<I>(xs: I, grid: &[f64], ys: &[f64], edge: Edge) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    xs.into_iter()
        .map(|x| Bracket::locate(grid, x, edge).value(ys))
        .collect()
}

/// Whether `xs` is strictly increasing and finite.
pub fn is_strictly_increasing(xs: &[f64]) -> bool {
    xs.iter().all(|x| x.is_finite()) && xs.windows(2).all(|w| w[1] > w[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_points_are_linear() {
        let grid = [0.0, 1.0, 3.0];
        let ys = [1.0, 3.0, -1.0];
        let out = interp_linear([0.5, 1.0, 2.0], &grid, &ys, Edge::Clamp);
        assert_eq!(out, vec![2.0, 3.0, 1.0]);

        let b = Bracket::locate(&grid, 2.0, Edge::Clamp);
        assert_eq!((b.lo, b.hi), (1, 2));
        assert!((b.slope(&grid, &ys) + 2.0).abs() < 1e-15);
    }

    #[test]
    fn clamp_holds_end_values() {
        let grid = [0.0, 1.0];
        let ys = [2.0, 4.0];
        let out = interp_linear([-1.0, 5.0], &grid, &ys, Edge::Clamp);
        assert_eq!(out, vec![2.0, 4.0]);
        assert_eq!(Bracket::locate(&grid, -1.0, Edge::Clamp).slope(&grid, &ys), 0.0);
    }

    #[test]
    fn extrapolate_continues_end_segments() {
        let grid = [0.0, 1.0, 2.0];
        let ys = [0.0, 1.0, 3.0];
        let out = interp_linear([-1.0, 3.0], &grid, &ys, Edge::Extrapolate);
        assert!((out[0] + 1.0).abs() < 1e-15);
        assert!((out[1] - 5.0).abs() < 1e-15);
    }

    #[test]
    fn last_grid_point_is_sloped() {
        let grid = [0.0, 1.0, 2.0];
        let ys = [0.0, 1.0, 3.0];
        let b = Bracket::locate(&grid, 2.0, Edge::Clamp);
        assert_eq!(b.value(&ys), 3.0);
        assert!(b.sloped);
    }

    #[test]
    fn value_is_linear_in_samples() {
        // Weights (1 - frac, frac) are the gradient of the value w.r.t. the samples.
        let grid = [0.0, 2.0, 4.0];
        let b = Bracket::locate(&grid, 2.5, Edge::Extrapolate);
        let mut ys = [0.0, 0.0, 0.0];
        ys[b.lo] = 1.0;
        assert!((b.value(&ys) - (1.0 - b.frac)).abs() < 1e-15);
    }

    #[test]
    fn strictly_increasing_check() {
        assert!(is_strictly_increasing(&[0.0, 0.5, 2.0]));
        assert!(!is_strictly_increasing(&[0.0, 0.0, 2.0]));
        assert!(!is_strictly_increasing(&[0.0, f64::NAN]));
    }
}
