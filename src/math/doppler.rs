//! Relativistic Doppler factor.
//!
//! Velocities are in m/s, positive when receding. Wavelength grids are natural
//! logarithms, so a Doppler stretch becomes an additive shift:
//!
//! ```text
//! doppler(v) = sqrt((1 - v/c) / (1 + v/c))
//! x_rest     = x_obs + ln(doppler(v))
//! ```

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Multiplicative factor taking observed wavelengths to the emitter's rest frame.
pub fn doppler(v: f64) -> f64 {
    let beta = v / SPEED_OF_LIGHT;
    ((1.0 - beta) / (1.0 + beta)).sqrt()
}

/// `ln(doppler(v))`, computed without forming the ratio.
pub fn log_doppler(v: f64) -> f64 {
    let beta = v / SPEED_OF_LIGHT;
    0.5 * ((-beta).ln_1p() - beta.ln_1p())
}

/// Derivative of [`log_doppler`] with respect to `v`.
pub fn log_doppler_derivative(v: f64) -> f64 {
    let beta = v / SPEED_OF_LIGHT;
    -1.0 / (SPEED_OF_LIGHT * (1.0 - beta * beta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_doppler_matches_factor() {
        for &v in &[-3.0e4, -20.0, 0.0, 10.0, 2.5e5] {
            let direct = doppler(v).ln();
            assert!((log_doppler(v) - direct).abs() < 1e-15, "v={v}");
        }
        assert_eq!(log_doppler(0.0), 0.0);
    }

    #[test]
    fn receding_source_shifts_to_shorter_rest_wavelengths() {
        assert!(doppler(1.0e4) < 1.0);
        assert!(log_doppler(1.0e4) < 0.0);
        assert!(log_doppler(-1.0e4) > 0.0);
    }

    #[test]
    fn derivative_matches_central_difference() {
        for &v in &[-1.0e5, 0.0, 35.0, 4.0e4] {
            let h = 1.0;
            let numeric = (log_doppler(v + h) - log_doppler(v - h)) / (2.0 * h);
            let analytic = log_doppler_derivative(v);
            assert!(((numeric - analytic) / analytic).abs() < 1e-6, "v={v}");
        }
    }
}
