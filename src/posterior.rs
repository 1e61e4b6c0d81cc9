/*!
Posterior densities assembled from a prior and a likelihood.

The likelihood compares the output of a forward model (any simulator that maps
parameters to predicted observations) with observed data under Gaussian
measurement noise. A simulator that fails for some parameter vector makes the
point unusable, which is reported as a recoverable error so the sampler simply
rejects it.

# Examples

```rust
use mh_ensemble::distributions::{HalfNormal, Independent, Normal, Target};
use mh_ensemble::error::SimulationError;
use mh_ensemble::posterior::{GaussianLikelihood, Posterior};

// y(t) = a * exp(-k t), observed at t = 0, 1, 2.
let times = [0.0, 1.0, 2.0];
let model = move |theta: &[f64]| -> Result<Vec<f64>, SimulationError> {
    Ok(times.iter().map(|t| theta[0] * (-theta[1] * t).exp()).collect())
};
let likelihood = GaussianLikelihood::new(model, vec![2.0, 1.2, 0.75], 0.1).unwrap();
let prior = Independent::new()
    .with(Normal::new(0.0, 10.0).unwrap())
    .with(HalfNormal::new(1.0).unwrap());
let posterior = Posterior::new(prior, likelihood);

assert!(posterior.unnorm_log_prob(&[2.0, 0.5]).unwrap().is_finite());
// Negative decay rate lies outside the prior support.
assert_eq!(posterior.unnorm_log_prob(&[2.0, -0.5]).unwrap(), f64::NEG_INFINITY);
```
*/

use std::convert::Infallible;
use std::fmt;

use num_traits::Float;
use rand_distr::{Distribution, StandardNormal};

use crate::distributions::{Density, Normal, Target, Univariate};
use crate::error::{DensityError, LogpError, SimulationError};

/// A simulator mapping parameters to predicted observations.
pub trait ForwardModel<T: Float> {
    fn simulate(&self, theta: &[T]) -> Result<Vec<T>, SimulationError>;
}

impl<T, F> ForwardModel<T> for F
where
    T: Float,
    F: Fn(&[T]) -> Result<Vec<T>, SimulationError>,
{
    fn simulate(&self, theta: &[T]) -> Result<Vec<T>, SimulationError> {
        self(theta)
    }
}

/// Log-likelihood of the observed data given parameters.
pub trait Likelihood<T: Float> {
    type LogpError: LogpError;

    fn log_likelihood(&self, theta: &[T]) -> Result<T, Self::LogpError>;
}

/// Where the standard deviation of the measurement noise comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseScale<T> {
    /// Known noise level.
    Fixed(T),
    /// Noise level sampled as the parameter at this index.
    Parameter(usize),
}

/// Independent Gaussian measurement noise around a forward model's prediction.
#[derive(Clone)]
pub struct GaussianLikelihood<T, M> {
    pub model: M,
    pub observed: Vec<T>,
    pub noise: NoiseScale<T>,
}

impl<T: Float, M> GaussianLikelihood<T, M> {
    /// Likelihood with a fixed noise standard deviation.
    pub fn new(model: M, observed: Vec<T>, noise_std: T) -> Result<Self, DensityError> {
        Normal::new(T::zero(), noise_std)?;
        Ok(Self {
            model,
            observed,
            noise: NoiseScale::Fixed(noise_std),
        })
    }

    /// Likelihood whose noise standard deviation is the parameter at `index`.
    pub fn with_noise_parameter(model: M, observed: Vec<T>, index: usize) -> Self {
        Self {
            model,
            observed,
            noise: NoiseScale::Parameter(index),
        }
    }
}

impl<T, M> fmt::Debug for GaussianLikelihood<T, M>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaussianLikelihood")
            .field("n_observed", &self.observed.len())
            .field("noise", &self.noise)
            .finish_non_exhaustive()
    }
}

impl<T, M> Likelihood<T> for GaussianLikelihood<T, M>
where
    T: Float + Send + Sync + fmt::Debug,
    M: ForwardModel<T>,
    StandardNormal: Distribution<T>,
{
    type LogpError = DensityError;

    fn log_likelihood(&self, theta: &[T]) -> Result<T, DensityError> {
        let std = match self.noise {
            NoiseScale::Fixed(std) => std,
            NoiseScale::Parameter(i) => *theta.get(i).ok_or_else(|| {
                DensityError::Invalid(format!(
                    "noise parameter index {i} out of range for {} parameters",
                    theta.len()
                ))
            })?,
        };
        if std <= T::zero() {
            return Err(DensityError::OutsideSupport);
        }
        let noise = Normal {
            mean: T::zero(),
            std,
        };

        let predicted = self.model.simulate(theta)?;
        if predicted.len() != self.observed.len() {
            return Err(DensityError::Invalid(format!(
                "forward model returned {} values for {} observations",
                predicted.len(),
                self.observed.len()
            )));
        }
        if let Some(i) = predicted.iter().position(|y| !y.is_finite()) {
            return Err(SimulationError::NonFinite(i).into());
        }

        Ok(self
            .observed
            .iter()
            .zip(&predicted)
            .fold(T::zero(), |acc, (&y, &mu)| acc + noise.ln_pdf(y - mu)))
    }
}

/// Unnormalized posterior: prior density times likelihood.
#[derive(Debug, Clone)]
pub struct Posterior<P, L> {
    pub prior: P,
    pub likelihood: L,
}

impl<P, L> Posterior<P, L> {
    pub fn new(prior: P, likelihood: L) -> Self {
        Self { prior, likelihood }
    }
}

impl<T, P, L> Target<T> for Posterior<P, L>
where
    T: Float,
    P: Density<T>,
    L: Likelihood<T>,
{
    type LogpError = L::LogpError;

    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Self::LogpError> {
        let log_prior = self.prior.log_prob(theta);
        // Skip the (possibly expensive) simulation outside the prior support.
        if log_prior == T::neg_infinity() {
            return Ok(log_prior);
        }
        Ok(log_prior + self.likelihood.log_likelihood(theta)?)
    }
}

/// Wraps a plain closure returning a log-density as a [`Target`].
///
/// ```rust
/// use mh_ensemble::distributions::Target;
/// use mh_ensemble::posterior::FnTarget;
///
/// let target = FnTarget(|x: &[f64]| -0.5 * x[0] * x[0]);
/// assert_eq!(target.unnorm_log_prob(&[2.0]).unwrap(), -2.0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FnTarget<F>(pub F);

impl<T, F> Target<T> for FnTarget<F>
where
    T: Float,
    F: Fn(&[T]) -> T,
{
    type LogpError = Infallible;

    fn unnorm_log_prob(&self, theta: &[T]) -> Result<T, Infallible> {
        Ok((self.0)(theta))
    }
}
