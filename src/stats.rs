//! Running statistics for individual chains and convergence diagnostics for ensembles.
//!
//! Split-R-hat and the effective sample size follow the definitions in the
//! Stan reference manual. Autocovariances are computed with an FFT.

use std::collections::VecDeque;
use std::fmt;

use ndarray::{concatenate, prelude::*, ShapeError};
use num_traits::{Float, ToPrimitive};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use thiserror::Error;

use crate::core::EnsembleRun;

/// Number of recent iterations used for the running acceptance rate.
const ACCEPT_WINDOW: usize = 100;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Need at least {need} draws per chain, got {got}")]
    TooFewDraws { need: usize, got: usize },

    #[error("No successful chains to summarize")]
    NoChains,

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Online mean/variance and windowed acceptance rate of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker {
    n: u64,
    mean: Array1<f64>,
    mean_sq: Array1<f64>,
    accept_queue: VecDeque<bool>,
    n_window_accepted: usize,
}

impl ChainTracker {
    pub fn new(n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
            accept_queue: VecDeque::with_capacity(ACCEPT_WINDOW + 1),
            n_window_accepted: 0,
        }
    }

    pub fn step<T: ToPrimitive>(&mut self, x: &[T], accepted: bool) {
        self.n += 1;

        self.accept_queue.push_back(accepted);
        self.n_window_accepted += accepted as usize;
        if self.accept_queue.len() > ACCEPT_WINDOW {
            if let Some(true) = self.accept_queue.pop_front() {
                self.n_window_accepted -= 1;
            }
        }

        let n = self.n as f64;
        for ((m, m2), xi) in self.mean.iter_mut().zip(self.mean_sq.iter_mut()).zip(x) {
            let v = xi.to_f64().unwrap_or(f64::NAN);
            *m += (v - *m) / n;
            *m2 += (v * v - *m2) / n;
        }
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    /// Acceptance rate over the last [`ACCEPT_WINDOW`] iterations.
    pub fn p_accept(&self) -> f64 {
        if self.accept_queue.is_empty() {
            return 0.0;
        }
        self.n_window_accepted as f64 / self.accept_queue.len() as f64
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Unbiased sample variance per parameter.
    pub fn variance(&self) -> Array1<f64> {
        let n = self.n as f64;
        (&self.mean_sq - &self.mean.mapv(|m| m * m)) * n / (n - 1.0)
    }
}

/// Splits every chain into halves: `(chains, draws, params)` becomes
/// `(2 * chains, draws / 2, params)`. With an odd number of draws the middle one is dropped.
fn splitcat(sample: ArrayView3<f64>) -> Result<Array3<f64>, ShapeError> {
    let n = sample.shape()[1];
    let half = n / 2;
    let first = sample.slice(s![.., ..half, ..]);
    let second = sample.slice(s![.., n - half.., ..]);
    concatenate(Axis(0), &[first, second])
}

/// Mean within-chain variance `W` and the pooled variance estimate `var+` per parameter.
fn within_and_var(sample: ArrayView3<f64>) -> (Array1<f64>, Array1<f64>) {
    let (m, n, p) = sample.dim();
    let nf = n as f64;
    let (within, var): (Vec<f64>, Vec<f64>) = (0..p)
        .into_par_iter()
        .map(|param| {
            let data = sample.slice(s![.., .., param]);
            let chain_means = data.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(m));
            let overall = chain_means.mean().unwrap_or(0.0);
            let between = chain_means.mapv(|c| (c - overall).powi(2)).sum() * nf / (m as f64 - 1.0);
            let within = data.var_axis(Axis(1), 1.0).mean().unwrap_or(f64::NAN);
            (within, within * (nf - 1.0) / nf + between / nf)
        })
        .unzip();
    (Array1::from(within), Array1::from(var))
}

/// Autocovariance at lags `0..n` with `1/n` normalization.
fn autocov_fft(x: ArrayView1<f64>) -> Vec<f64> {
    let n = x.len();
    let mean = x.mean().unwrap_or(0.0);
    let mut n_padded = 1;
    while n_padded < (2 * n).saturating_sub(1) {
        n_padded <<= 1;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_padded);
    let ifft = planner.plan_fft_inverse(n_padded);

    let mut buf: Vec<Complex<f64>> = x
        .iter()
        .map(|&xi| Complex::new(xi - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n_padded)
        .collect();
    fft.process(&mut buf);
    buf.iter_mut().for_each(|c| *c = *c * c.conj());
    ifft.process(&mut buf);
    // rustfft leaves the inverse transform unnormalized.
    buf.iter()
        .take(n)
        .map(|c| c.re / n_padded as f64 / n as f64)
        .collect()
}

fn ess_from(sample: ArrayView3<f64>, within: &Array1<f64>, var: &Array1<f64>) -> Array1<f64> {
    let (m, n, p) = sample.dim();
    let total = (m * n) as f64;
    let ess: Vec<f64> = (0..p)
        .into_par_iter()
        .map(|param| {
            let mut mean_acov = vec![0.0; n];
            for chain in 0..m {
                let acov = autocov_fft(sample.slice(s![chain, .., param]));
                mean_acov.iter_mut().zip(acov).for_each(|(a, b)| *a += b / m as f64);
            }
            let rho: Vec<f64> = mean_acov
                .iter()
                .map(|a| 1.0 - (within[param] - a) / var[param])
                .collect();

            // Geyer's initial monotone sequence over pairs of lags.
            let mut sum = 0.0;
            let mut prev = f64::INFINITY;
            for pair in rho.chunks_exact(2) {
                let pt = pair[0] + pair[1];
                if pt <= 0.0 {
                    break;
                }
                let pt = pt.min(prev);
                sum += pt;
                prev = pt;
            }
            let tau = (-1.0 + 2.0 * sum).max(1.0 / total.log10());
            total / tau
        })
        .collect();
    Array1::from(ess)
}

/// Split-R-hat and bulk effective sample size per parameter.
///
/// `sample` has shape `(chains, draws, params)` and needs at least four draws per chain.
pub fn split_rhat_ess<T>(sample: ArrayView3<T>) -> Result<(Array1<f64>, Array1<f64>), StatsError>
where
    T: ToPrimitive + Clone,
{
    let draws = sample.shape()[1];
    if draws < 4 {
        return Err(StatsError::TooFewDraws { need: 4, got: draws });
    }
    let sample = sample.mapv(|x| x.to_f64().unwrap_or(f64::NAN));
    let split = splitcat(sample.view())?;
    let (within, var) = within_and_var(split.view());
    let rhat = (&var / &within).mapv(f64::sqrt);
    let ess = ess_from(split.view(), &within, &var);
    Ok((rhat, ess))
}

/// Posterior summary of an ensemble run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSummary {
    pub n_chains: usize,
    pub n_draws: usize,
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
    pub rhat: Array1<f64>,
    pub ess: Array1<f64>,
    pub acceptance_rate: f64,
}

impl EnsembleSummary {
    /// Summarizes the successful chains of `run`.
    pub fn from_run<T>(run: &EnsembleRun<T>) -> Result<Self, StatsError>
    where
        T: Float,
    {
        let stacked = run.stacked()?.mapv(|x| x.to_f64().unwrap_or(f64::NAN));
        let (n_chains, n_draws, dim) = stacked.dim();
        if n_chains == 0 {
            return Err(StatsError::NoChains);
        }
        let (rhat, ess) = split_rhat_ess(stacked.view())?;
        let pooled = stacked.into_shape_with_order((n_chains * n_draws, dim))?;
        Ok(Self {
            n_chains,
            n_draws,
            mean: pooled.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim)),
            std: pooled.std_axis(Axis(0), 1.0),
            rhat,
            ess,
            acceptance_rate: run.acceptance_rate(),
        })
    }

    /// Largest R-hat over all parameters. An undefined (`NaN`) R-hat, e.g. from a chain
    /// that never moved, counts as infinite.
    pub fn max_rhat(&self) -> f64 {
        self.rhat
            .iter()
            .map(|&r| if r.is_nan() { f64::INFINITY } else { r })
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

impl fmt::Display for EnsembleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} chains x {} draws, acceptance rate {:.3}",
            self.n_chains, self.n_draws, self.acceptance_rate
        )?;
        writeln!(f, "{:>6} {:>10} {:>10} {:>8} {:>10}", "param", "mean", "std", "rhat", "ess")?;
        for i in 0..self.mean.len() {
            writeln!(
                f,
                "{:>6} {:>10.4} {:>10.4} {:>8.4} {:>10.1}",
                i, self.mean[i], self.std[i], self.rhat[i], self.ess[i]
            )?;
        }
        Ok(())
    }
}
