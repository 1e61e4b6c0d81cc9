//! Two-sample Kolmogorov–Smirnov test, used to compare the empirical distribution of a chain
//! with a reference sample. The p-value approximation follows *Numerical Recipes* (Third Edition).

use std::cmp::Ordering;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KsError {
    #[error("sample {0} is empty")]
    EmptySample(usize),
    #[error("sample {0} contains NaN")]
    NotANumber(usize),
    #[error("p-value needs more than 7 values per sample, got {n1} and {n2}")]
    TooFewSamples { n1: usize, n2: usize },
    #[error("bad argument {0} for the KS distribution function")]
    BadArgument(f64),
}

/// Outcome of a two-sample KS test at significance `level`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestResult {
    pub is_rejected: bool,
    pub statistic: f64,
    pub p_value: f64,
    pub level: f64,
}

/// Performs a two-sample KS test. The null hypothesis (both samples come from the same
/// distribution) is rejected when the p-value falls below `level`.
///
/// Both slices are sorted in place.
pub fn two_sample_ks_test(
    sample_1: &mut [f64],
    sample_2: &mut [f64],
    level: f64,
) -> Result<TestResult, KsError> {
    let statistic = ks_statistic(sample_1, sample_2)?;
    let p_value = ks_p_value(statistic, sample_1.len(), sample_2.len())?;
    Ok(TestResult {
        is_rejected: p_value < level,
        statistic,
        p_value,
        level,
    })
}

/// Largest absolute difference between the empirical CDFs of two samples.
///
/// Both slices are sorted in place.
///
/// ```rust
/// use mh_ensemble::ks_test::ks_statistic;
///
/// let mut a = [0.0, 1.0, 2.0, 3.0];
/// let mut b = [4.0, 3.0, 2.0, 1.0];
/// assert_eq!(ks_statistic(&mut a, &mut b).unwrap(), 0.25);
/// ```
pub fn ks_statistic(sample_1: &mut [f64], sample_2: &mut [f64]) -> Result<f64, KsError> {
    for (k, s) in [&*sample_1, &*sample_2].into_iter().enumerate() {
        if s.is_empty() {
            return Err(KsError::EmptySample(k + 1));
        }
        if s.iter().any(|x| x.is_nan()) {
            return Err(KsError::NotANumber(k + 1));
        }
    }
    sample_1.sort_unstable_by(cmp_f64);
    sample_2.sort_unstable_by(cmp_f64);

    let (n, m) = (sample_1.len(), sample_2.len());
    let (i_max, j_max) = (n as f64, m as f64);
    let (mut i, mut j) = (0, 0);
    let mut max_diff: f64 = 0.0;

    // Step both ECDFs past every value tied at x before comparing them.
    while i < n && j < m {
        let x = sample_1[i].min(sample_2[j]);
        while i < n && sample_1[i] <= x {
            i += 1;
        }
        while j < m && sample_2[j] <= x {
            j += 1;
        }
        max_diff = max_diff.max((i as f64 / i_max - j as f64 / j_max).abs());
    }
    Ok(max_diff)
}

fn ks_p_value(statistic: f64, n1: usize, n2: usize) -> Result<f64, KsError> {
    if n1 <= 7 || n2 <= 7 {
        return Err(KsError::TooFewSamples { n1, n2 });
    }
    let factor = ((n1 as f64 * n2 as f64) / (n1 as f64 + n2 as f64)).sqrt();
    qks(factor * statistic).map(|p| p.clamp(0.0, 1.0))
}

/// CDF of the Kolmogorov distribution.
fn pks(z: f64) -> Result<f64, KsError> {
    if z < 0. || z.is_nan() {
        return Err(KsError::BadArgument(z));
    }
    if z == 0. {
        return Ok(0.);
    }
    if z < 1.18 {
        let y = (-1.233_700_550_136_169_7 / z.powi(2)).exp();
        return Ok(2.256_758_334_191_025
            * (-y.ln()).sqrt()
            * (y + y.powf(9.) + y.powf(25.) + y.powf(49.)));
    }
    let x = (-2. * z.powi(2)).exp();
    Ok(1. - 2. * (x - x.powf(4.) + x.powf(9.)))
}

/// Complementary CDF of the Kolmogorov distribution.
fn qks(z: f64) -> Result<f64, KsError> {
    if z < 0. || z.is_nan() {
        return Err(KsError::BadArgument(z));
    }
    if z == 0. {
        return Ok(1.);
    }
    if z < 1.18 {
        return Ok(1. - pks(z)?);
    }
    let x = (-2. * z.powi(2)).exp();
    Ok(2. * (x - x.powf(4.) + x.powf(9.)))
}

fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn simple_case() {
        let mut s1 = [1.0, 2.0, 3.0];
        let mut s2 = [2.0, 3.0, 4.0];
        assert_abs_diff_eq!(ks_statistic(&mut s1, &mut s2).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn identical_samples() {
        let mut s1 = [3.0, 1.0, 2.0];
        let mut s2 = [1.0, 2.0, 3.0];
        assert_eq!(ks_statistic(&mut s1, &mut s2).unwrap(), 0.0);
    }

    #[test]
    fn non_overlapping() {
        let mut s1 = [1.0, 2.0, 3.0];
        let mut s2 = [10.0, 11.0, 12.0];
        assert_eq!(ks_statistic(&mut s1, &mut s2).unwrap(), 1.0);
        assert_eq!(ks_statistic(&mut s2, &mut s1).unwrap(), 1.0);
    }

    #[test]
    fn single_elements() {
        assert_eq!(ks_statistic(&mut [2.0], &mut [5.0]).unwrap(), 1.0);
    }

    #[test]
    fn repeated_values() {
        let mut s1 = [1.0, 1.0, 1.0, 2.0, 2.0];
        let mut s2 = [1.0, 1.0, 2.0, 2.0, 2.0];
        assert_abs_diff_eq!(ks_statistic(&mut s1, &mut s2).unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn different_lengths() {
        let mut s1 = [0.0, 1.0];
        let mut s2 = [0.5, 1.5, 2.5, 3.5];
        // After 1.0: F1 = 1, F2 = 1/4.
        assert_abs_diff_eq!(ks_statistic(&mut s1, &mut s2).unwrap(), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn p_value_for_nearly_equal_samples() {
        let mut s1: Vec<f64> = [0.12, 0.25, 0.25, 0.78, 0.99, 0.33, 0.15, 0.5]
            .iter()
            .cycle()
            .take(8 * 20)
            .copied()
            .collect();
        let mut s2: Vec<f64> = [0.12, 0.25, 0.25, 0.78, 0.99, 0.33, 0.15, 0.51]
            .iter()
            .cycle()
            .take(8 * 20)
            .copied()
            .collect();

        let result = two_sample_ks_test(&mut s1, &mut s2, 0.05).unwrap();
        assert_abs_diff_eq!(result.statistic, 0.125, epsilon = 1e-9);
        assert_abs_diff_eq!(result.p_value, 0.1641, epsilon = 1e-4);
        assert!(!result.is_rejected);
    }

    #[test]
    fn empty_and_nan_samples_are_errors() {
        assert_eq!(ks_statistic(&mut [], &mut [1.0]), Err(KsError::EmptySample(1)));
        assert_eq!(ks_statistic(&mut [1.0], &mut []), Err(KsError::EmptySample(2)));
        assert_eq!(
            ks_statistic(&mut [1.0], &mut [f64::NAN, 2.0]),
            Err(KsError::NotANumber(2))
        );
    }

    #[test]
    fn small_samples_have_no_p_value() {
        let err = two_sample_ks_test(&mut [1.0, 2.0], &mut [1.0; 10], 0.05).unwrap_err();
        assert_eq!(err, KsError::TooFewSamples { n1: 2, n2: 10 });
    }

    #[test]
    fn kolmogorov_distribution_values() {
        assert!(pks(-1.0).is_err());
        assert_eq!(pks(0.0).unwrap(), 0.0);
        assert_eq!(qks(0.0).unwrap(), 1.0);
        assert_abs_diff_eq!(pks(1.23).unwrap(), 0.9029731024047791, epsilon = 1e-8);
        assert_abs_diff_eq!(pks(2.34).unwrap(), 0.9999649260833611, epsilon = 1e-8);
        assert_abs_diff_eq!(pks(3.45).unwrap(), 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(pks(0.8).unwrap() + qks(0.8).unwrap(), 1.0, epsilon = 1e-12);
    }
}
