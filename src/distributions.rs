/*!
Traits for target densities, proposals and general distributions, plus the
concrete distributions used to build priors, noise models and random-walk
proposals.

Everything is generic over the floating-point precision (`f32` or `f64`)
through [`num_traits::Float`]. Random draws always go through a random source
passed in by the caller; no distribution owns a generator.

# Examples

### Targets and proposals

```rust
use mh_ensemble::distributions::{IsotropicGaussian, Normal, Proposal, Target};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let target = Normal::new(5.0, 1.0).unwrap();
let lp = target.unnorm_log_prob(&[5.0]).unwrap();
assert!(lp > target.unnorm_log_prob(&[4.0]).unwrap());

let proposal = IsotropicGaussian::new(0.5).unwrap();
let mut rng = SmallRng::seed_from_u64(1);
let candidate = proposal.sample(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
assert!(proposal.is_symmetric());
```

### Priors built from marginals

```rust
use mh_ensemble::distributions::{Density, HalfNormal, Independent, Normal};

let prior = Independent::new()
    .with(Normal::new(0.0, 10.0).unwrap())
    .with(HalfNormal::new(1.0).unwrap());
assert_eq!(prior.dim(), 2);
assert_eq!(prior.log_prob(&[1.0, -0.1]), f64::NEG_INFINITY);
```
*/

use std::convert::Infallible;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use num_traits::Float;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};

use crate::error::{DensityError, LogpError};

/// Converts an `f64` constant into `T`.
#[inline]
pub(crate) fn lit<T: Float>(x: f64) -> T {
    T::from(x).unwrap_or_else(T::nan)
}

/// A target distribution we want to sample from.
pub trait Target<T: Float> {
    /// Error raised when the density cannot be evaluated.
    type LogpError: LogpError;

    /// Returns the log of the unnormalized density at `theta`.
    ///
    /// `-inf` (or a recoverable error) marks `theta` as outside the support.
    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Self::LogpError>;
}

/// A proposal mechanism for Metropolis-Hastings.
pub trait Proposal<T: Float> {
    /// Draws a candidate from q(x' | x).
    fn sample<R: Rng + ?Sized>(&self, current: &[T], rng: &mut R) -> Vec<T>;

    /// Evaluates log q(to | from).
    fn log_prob(&self, from: &[T], to: &[T]) -> T;

    /// Symmetric proposals (q(x' | x) = q(x | x')) skip the Hastings correction.
    fn is_symmetric(&self) -> bool {
        false
    }
}

/// Anything that can both score and draw points of a fixed dimension.
pub trait Density<T: Float> {
    fn dim(&self) -> usize;

    /// Normalized log-density at `x`.
    fn log_prob(&self, x: &[T]) -> T;

    fn sample(&self, rng: &mut dyn RngCore) -> Vec<T>;
}

/// A scalar distribution. Object safe, so heterogeneous marginals can be
/// combined in an [`Independent`] product.
pub trait Univariate<T: Float>: Send + Sync + fmt::Debug {
    fn ln_pdf(&self, x: T) -> T;
    fn draw(&self, rng: &mut dyn RngCore) -> T;
}

fn check_scale<T: Float>(name: &str, scale: T) -> Result<(), DensityError> {
    if scale > T::zero() && scale.is_finite() {
        Ok(())
    } else {
        Err(DensityError::Invalid(format!(
            "{name} must be positive and finite"
        )))
    }
}

/// Univariate normal distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal<T> {
    pub mean: T,
    pub std: T,
}

impl<T: Float> Normal<T> {
    pub fn new(mean: T, std: T) -> Result<Self, DensityError> {
        check_scale("Normal standard deviation", std)?;
        Ok(Self { mean, std })
    }
}

impl<T> Univariate<T> for Normal<T>
where
    T: Float + Send + Sync + fmt::Debug,
    StandardNormal: Distribution<T>,
{
    fn ln_pdf(&self, x: T) -> T {
        let z = (x - self.mean) / self.std;
        -lit::<T>(0.5) * z * z - self.std.ln() - lit::<T>(0.5) * lit::<T>(2.0 * PI).ln()
    }

    fn draw(&self, rng: &mut dyn RngCore) -> T {
        let z: T = rng.sample(StandardNormal);
        self.mean + self.std * z
    }
}

/// Normal distribution folded at zero, for positive scale parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfNormal<T> {
    pub scale: T,
}

impl<T: Float> HalfNormal<T> {
    pub fn new(scale: T) -> Result<Self, DensityError> {
        check_scale("HalfNormal scale", scale)?;
        Ok(Self { scale })
    }
}

impl<T> Univariate<T> for HalfNormal<T>
where
    T: Float + Send + Sync + fmt::Debug,
    StandardNormal: Distribution<T>,
{
    fn ln_pdf(&self, x: T) -> T {
        if x < T::zero() {
            return T::neg_infinity();
        }
        let z = x / self.scale;
        lit::<T>((2.0 / PI).sqrt()).ln() - self.scale.ln() - lit::<T>(0.5) * z * z
    }

    fn draw(&self, rng: &mut dyn RngCore) -> T {
        let z: T = rng.sample(StandardNormal);
        (self.scale * z).abs()
    }
}

/// Continuous uniform distribution on `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform<T> {
    pub low: T,
    pub high: T,
}

impl<T: Float> Uniform<T> {
    pub fn new(low: T, high: T) -> Result<Self, DensityError> {
        if low < high && low.is_finite() && high.is_finite() {
            Ok(Self { low, high })
        } else {
            Err(DensityError::Invalid(
                "Uniform bounds must be finite with low < high".into(),
            ))
        }
    }
}

impl<T> Univariate<T> for Uniform<T>
where
    T: Float + Send + Sync + fmt::Debug,
{
    fn ln_pdf(&self, x: T) -> T {
        if x < self.low || x > self.high {
            T::neg_infinity()
        } else {
            -(self.high - self.low).ln()
        }
    }

    fn draw(&self, rng: &mut dyn RngCore) -> T {
        let u: T = lit(rng.gen::<f64>());
        self.low + u * (self.high - self.low)
    }
}

/// Product of independent scalar marginals, one per coordinate.
#[derive(Debug, Clone)]
pub struct Independent<T: Float> {
    marginals: Vec<Arc<dyn Univariate<T>>>,
}

impl<T: Float> Independent<T> {
    pub fn new() -> Self {
        Self {
            marginals: Vec::new(),
        }
    }

    /// Appends the marginal for the next coordinate.
    pub fn with<U: Univariate<T> + 'static>(mut self, marginal: U) -> Self {
        self.marginals.push(Arc::new(marginal));
        self
    }

    /// The same marginal repeated `dim` times.
    pub fn iid<U: Univariate<T> + Clone + 'static>(marginal: U, dim: usize) -> Self {
        (0..dim).fold(Self::new(), |acc, _| acc.with(marginal.clone()))
    }
}

impl<T: Float> Default for Independent<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Float> Density<T> for Independent<T> {
    fn dim(&self) -> usize {
        self.marginals.len()
    }

    fn log_prob(&self, x: &[T]) -> T {
        if x.len() != self.marginals.len() {
            return T::nan();
        }
        self.marginals
            .iter()
            .zip(x)
            .fold(T::zero(), |acc, (m, &xi)| acc + m.ln_pdf(xi))
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Vec<T> {
        self.marginals.iter().map(|m| m.draw(rng)).collect()
    }
}

impl<T: Float> Target<T> for Independent<T> {
    type LogpError = Infallible;

    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Self::LogpError> {
        Ok(self.log_prob(theta))
    }
}

/// A univariate normal used directly as a target scores every coordinate of
/// `theta` as an independent draw.
impl<T> Target<T> for Normal<T>
where
    T: Float + Send + Sync + fmt::Debug,
    StandardNormal: Distribution<T>,
{
    type LogpError = Infallible;

    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Self::LogpError> {
        Ok(theta
            .iter()
            .fold(T::zero(), |acc, &x| acc + self.ln_pdf(x)))
    }
}

/**
A 2D Gaussian distribution parameterized by a mean vector and a 2×2 covariance matrix.

# Examples

```rust
use mh_ensemble::distributions::{Density, Gaussian2D};
use ndarray::{arr1, arr2};

let gauss = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let lp = gauss.log_prob(&[0.5, -0.5]);
assert!((lp - (-(2.0 * std::f64::consts::PI).ln() - 0.25)).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D<T> {
    pub mean: Array1<T>,
    pub cov: Array2<T>,
}

impl<T: Float> Gaussian2D<T> {
    fn det(&self) -> T {
        self.cov[(0, 0)] * self.cov[(1, 1)] - self.cov[(0, 1)] * self.cov[(1, 0)]
    }

    /// Quadratic form diff^T Σ^{-1} diff.
    fn mahalanobis_sq(&self, theta: &[T]) -> T {
        if theta.len() != 2 {
            return T::nan();
        }
        let (a, b, c, d) = (
            self.cov[(0, 0)],
            self.cov[(0, 1)],
            self.cov[(1, 0)],
            self.cov[(1, 1)],
        );
        let x0 = theta[0] - self.mean[0];
        let x1 = theta[1] - self.mean[1];
        (x0 * (d * x0 - b * x1) + x1 * (a * x1 - c * x0)) / self.det()
    }
}

impl<T> Density<T> for Gaussian2D<T>
where
    T: Float,
    StandardNormal: Distribution<T>,
{
    fn dim(&self) -> usize {
        2
    }

    fn log_prob(&self, theta: &[T]) -> T {
        let half = lit::<T>(0.5);
        -lit::<T>(2.0 * PI).ln() - half * self.det().abs().ln() - half * self.mahalanobis_sq(theta)
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Vec<T> {
        // Cholesky factor of the 2x2 covariance.
        let l00 = self.cov[(0, 0)].sqrt();
        let l10 = self.cov[(1, 0)] / l00;
        let l11 = (self.cov[(1, 1)] - l10 * l10).sqrt();
        let z0: T = rng.sample(StandardNormal);
        let z1: T = rng.sample(StandardNormal);
        vec![self.mean[0] + l00 * z0, self.mean[1] + l10 * z0 + l11 * z1]
    }
}

impl<T: Float> Target<T> for Gaussian2D<T> {
    type LogpError = Infallible;

    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Self::LogpError> {
        Ok(-lit::<T>(0.5) * self.mahalanobis_sq(theta))
    }
}

/**
An isotropic Gaussian, used both as a symmetric random-walk proposal and as a
centred target.

As a proposal it adds independent N(0, `std`²) noise to every coordinate of
the current state.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian<T> {
    pub std: T,
}

impl<T: Float> IsotropicGaussian<T> {
    pub fn new(std: T) -> Result<Self, DensityError> {
        check_scale("IsotropicGaussian standard deviation", std)?;
        Ok(Self { std })
    }
}

impl<T> Proposal<T> for IsotropicGaussian<T>
where
    T: Float,
    StandardNormal: Distribution<T>,
{
    fn sample<R: Rng + ?Sized>(&self, current: &[T], rng: &mut R) -> Vec<T> {
        current
            .iter()
            .map(|&x| {
                let z: T = rng.sample(StandardNormal);
                x + self.std * z
            })
            .collect()
    }

    fn log_prob(&self, from: &[T], to: &[T]) -> T {
        let var = self.std * self.std;
        let d = lit::<T>(from.len() as f64);
        let sq = from
            .iter()
            .zip(to)
            .fold(T::zero(), |acc, (&f, &t)| acc + (t - f) * (t - f));
        -sq / (lit::<T>(2.0) * var) - d * lit::<T>(0.5) * (lit::<T>(2.0 * PI) * var).ln()
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

impl<T: Float> Target<T> for IsotropicGaussian<T> {
    type LogpError = Infallible;

    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Self::LogpError> {
        let sum = theta.iter().fold(T::zero(), |acc, &x| acc + x * x);
        Ok(-lit::<T>(0.5) * sum / (self.std * self.std))
    }
}

/// Multiplicative random walk for strictly positive parameters:
/// `x' = x * exp(scale * z)` with `z ~ N(0, 1)` per coordinate.
///
/// The proposal is not symmetric, so the sampler applies the Hastings correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormalWalk<T> {
    pub scale: T,
}

impl<T: Float> LogNormalWalk<T> {
    pub fn new(scale: T) -> Result<Self, DensityError> {
        check_scale("LogNormalWalk scale", scale)?;
        Ok(Self { scale })
    }
}

impl<T> Proposal<T> for LogNormalWalk<T>
where
    T: Float,
    StandardNormal: Distribution<T>,
{
    fn sample<R: Rng + ?Sized>(&self, current: &[T], rng: &mut R) -> Vec<T> {
        current
            .iter()
            .map(|&x| {
                let z: T = rng.sample(StandardNormal);
                x * (self.scale * z).exp()
            })
            .collect()
    }

    fn log_prob(&self, from: &[T], to: &[T]) -> T {
        let two = lit::<T>(2.0);
        let norm = self.scale.ln() + lit::<T>(0.5) * lit::<T>(2.0 * PI).ln();
        let mut lp = T::zero();
        for (&f, &t) in from.iter().zip(to) {
            if f <= T::zero() || t <= T::zero() {
                return T::neg_infinity();
            }
            let d = t.ln() - f.ln();
            lp = lp - t.ln() - norm - d * d / (two * self.scale * self.scale);
        }
        lp
    }
}
