//! Least-squares slope through the origin.
//!
//! RV uncertainties are read off the slope of a gradient-vs-offset line:
//!
//! ```text
//! minimize Σ (y_i - β a_i)^2   =>   β = Σ a_i y_i / Σ a_i^2
//! ```
//!
//! No intercept is fitted: at the optimum the gradient vanishes at zero offset.

/// Fit `y ≈ β a` and return `β`.
///
/// Returns `None` if the inputs differ in length, the design is degenerate
/// (`Σ a² = 0`), or the result is not finite.
pub fn slope_through_origin(a: &[f64], y: &[f64]) -> Option<f64> {
    if a.len() != y.len() || a.is_empty() {
        return None;
    }
    let ata: f64 = a.iter().map(|v| v * v).sum();
    let aty: f64 = a.iter().zip(y).map(|(ai, yi)| ai * yi).sum();
    if ata <= 0.0 {
        return None;
    }
    let beta = aty / ata;
    beta.is_finite().then_some(beta)
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n as f64 - 1.0);
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_slope() {
        let a = linspace(-50.0, 50.0, 20);
        let y: Vec<f64> = a.iter().map(|v| 3.5 * v).collect();
        let beta = slope_through_origin(&a, &y).unwrap();
        assert!((beta - 3.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_design_is_none() {
        assert!(slope_through_origin(&[0.0, 0.0], &[1.0, 2.0]).is_none());
        assert!(slope_through_origin(&[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn linspace_includes_endpoints() {
        let v = linspace(-50.0, 50.0, 20);
        assert_eq!(v.len(), 20);
        assert!((v[0] + 50.0).abs() < 1e-12);
        assert!((v[19] - 50.0).abs() < 1e-12);
    }
}
