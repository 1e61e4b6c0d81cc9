/*!
# Core MCMC Utilities.

This module provides the machinery shared by every sampler in the crate:
- The [`MarkovChain<T>`] trait, which abstracts a single chain.
- [`Chain<T>`] and [`CompressedChain<T>`], the records produced by running a chain.
- [`run_chain`], [`run_chain_compressed`] and [`run_chain_progress`] for executing a single chain.
- The [`HasChains<T>`] trait for types that own multiple chains, and the [`ChainRunner<T>`]
  extension trait that runs them in parallel with Rayon and collects an [`EnsembleRun<T>`].

Any type implementing [`HasChains<T>`] automatically implements [`ChainRunner<T>`].

Chains never share mutable state. Each one owns its random generator, so a failure
or cancellation in one chain has no effect on the others.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{concatenate, prelude::*, stack, ShapeError};
use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;

use crate::error::{Result, SamplerError};
use crate::stats::ChainTracker;

/// A trait that abstracts a single MCMC chain.
pub trait MarkovChain<T> {
    /// Performs one iteration and reports whether the proposed move was accepted.
    fn step(&mut self) -> Result<bool>;

    /// Returns the current state without advancing the chain.
    fn current_state(&self) -> &[T];

    /// Log-density cached for the current state.
    fn current_log_prob(&self) -> T;
}

/// Every state visited by one chain, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain<T> {
    /// Visited states, shape `[n_iterations, dim]`.
    pub samples: Array2<T>,
    /// Log-density of each visited state.
    pub log_probs: Array1<T>,
    /// Whether the move into each state was an accepted proposal.
    pub accepted: Vec<bool>,
}

impl<T: Float> Chain<T> {
    fn with_capacity(n_iterations: usize, dim: usize) -> Self {
        Self {
            samples: Array2::zeros((n_iterations, dim)),
            log_probs: Array1::zeros(n_iterations),
            accepted: Vec::with_capacity(n_iterations),
        }
    }

    fn record(&mut self, i: usize, state: &[T], log_prob: T, accepted: bool) {
        self.samples
            .row_mut(i)
            .iter_mut()
            .zip(state)
            .for_each(|(dst, &src)| *dst = src);
        self.log_probs[i] = log_prob;
        self.accepted.push(accepted);
    }

    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.samples.ncols()
    }

    pub fn n_accepted(&self) -> usize {
        self.accepted.iter().filter(|&&a| a).count()
    }

    /// Fraction of iterations whose proposal was accepted; `0.0` for an empty chain.
    pub fn acceptance_rate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.n_accepted() as f64 / self.len() as f64
    }

    /// Drops the first `n` iterations (burn-in).
    pub fn discard(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            samples: self.samples.slice(s![n.., ..]).to_owned(),
            log_probs: self.log_probs.slice(s![n..]).to_owned(),
            accepted: self.accepted[n..].to_vec(),
        }
    }

    /// Keeps every `k`-th iteration, starting with the first. `k = 0` behaves like `k = 1`.
    pub fn thin(&self, k: usize) -> Self {
        let k = k.max(1) as isize;
        Self {
            samples: self.samples.slice(s![..;k, ..]).to_owned(),
            log_probs: self.log_probs.slice(s![..;k]).to_owned(),
            accepted: self.accepted.iter().step_by(k as usize).copied().collect(),
        }
    }

    /// Per-dimension sample mean.
    pub fn mean(&self) -> Option<Array1<T>>
    where
        T: FromPrimitive,
    {
        self.samples.mean_axis(Axis(0))
    }

    /// Per-dimension sample standard deviation (denominator `n - 1`).
    pub fn std(&self) -> Array1<T>
    where
        T: FromPrimitive,
    {
        self.samples.std_axis(Axis(0), T::one())
    }

    /// Values of one coordinate across all iterations.
    pub fn column(&self, dim: usize) -> Vec<T> {
        self.samples.column(dim).to_vec()
    }
}

/// Run-length encoded chain: each accepted state is stored once together with
/// the number of consecutive iterations the chain spent there.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedChain<T> {
    pub states: Vec<Vec<T>>,
    pub log_probs: Vec<T>,
    pub counts: Vec<usize>,
    pub n_accepted: usize,
}

impl<T: Float> CompressedChain<T> {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            log_probs: Vec::new(),
            counts: Vec::new(),
            n_accepted: 0,
        }
    }

    fn record(&mut self, state: &[T], log_prob: T, accepted: bool) {
        if accepted {
            self.n_accepted += 1;
        } else if let Some(count) = self.counts.last_mut() {
            *count += 1;
            return;
        }
        self.states.push(state.to_vec());
        self.log_probs.push(log_prob);
        self.counts.push(1);
    }

    /// Total number of iterations represented.
    pub fn n_iterations(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn acceptance_rate(&self) -> f64 {
        match self.n_iterations() {
            0 => 0.0,
            n => self.n_accepted as f64 / n as f64,
        }
    }

    /// Reconstructs the full visited sequence, shape `[n_iterations, dim]`.
    pub fn expand(&self) -> Array2<T> {
        let dim = self.states.first().map_or(0, Vec::len);
        let mut out = Array2::zeros((self.n_iterations(), dim));
        let mut rows = out.rows_mut().into_iter();
        for (state, &count) in self.states.iter().zip(&self.counts) {
            for row in rows.by_ref().take(count) {
                row.into_iter()
                    .zip(state)
                    .for_each(|(dst, &src)| *dst = src);
            }
        }
        out
    }
}

/// Runs a single chain for exactly `n_iterations` steps, recording every visited state.
pub fn run_chain<T, M>(chain: &mut M, n_iterations: usize) -> Result<Chain<T>>
where
    M: MarkovChain<T>,
    T: Float,
{
    let dim = chain.current_state().len();
    let mut out = Chain::with_capacity(n_iterations, dim);
    for i in 0..n_iterations {
        let accepted = chain.step()?;
        out.record(i, chain.current_state(), chain.current_log_prob(), accepted);
    }
    Ok(out)
}

/// Like [`run_chain`], but stores accepted states with repeat counts instead of
/// every iteration.
pub fn run_chain_compressed<T, M>(chain: &mut M, n_iterations: usize) -> Result<CompressedChain<T>>
where
    M: MarkovChain<T>,
    T: Float,
{
    let mut out = CompressedChain::new();
    for _ in 0..n_iterations {
        let accepted = chain.step()?;
        out.record(chain.current_state(), chain.current_log_prob(), accepted);
    }
    Ok(out)
}

/// Runs a single chain while updating `pb`.
///
/// The bar message shows the running acceptance rate, refreshed at most once a second.
pub fn run_chain_progress<T, M>(chain: &mut M, n_iterations: usize, pb: &ProgressBar) -> Result<Chain<T>>
where
    M: MarkovChain<T>,
    T: Float,
{
    let dim = chain.current_state().len();
    let mut out = Chain::with_capacity(n_iterations, dim);
    let mut tracker = ChainTracker::new(dim);
    let mut last = Instant::now();
    let freq = Duration::from_secs(1);

    pb.set_length(n_iterations as u64);
    for i in 0..n_iterations {
        let accepted = chain.step()?;
        let state = chain.current_state();
        tracker.step(state, accepted);
        out.record(i, state, chain.current_log_prob(), accepted);

        pb.inc(1);
        let now = Instant::now();
        if now >= last + freq || i + 1 == n_iterations {
            pb.set_message(format!("p(accept)≈{:.2}", tracker.p_accept()));
            last = now;
        }
    }
    Ok(out)
}

/// The outcome of running every chain of an ensemble: one result per chain,
/// in chain order.
#[derive(Debug)]
pub struct EnsembleRun<T> {
    pub chains: Vec<Result<Chain<T>>>,
}

impl<T: Float> EnsembleRun<T> {
    /// Chains that finished without error.
    pub fn successful(&self) -> impl Iterator<Item = &Chain<T>> {
        self.chains.iter().filter_map(|c| c.as_ref().ok())
    }

    /// Indices and errors of the chains that failed.
    pub fn failures(&self) -> Vec<(usize, &SamplerError)> {
        self.chains
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().err().map(|e| (i, e)))
            .collect()
    }

    pub fn n_successful(&self) -> usize {
        self.successful().count()
    }

    /// Concatenation of all successful chains, shape `[total_iterations, dim]`.
    pub fn pooled(&self) -> std::result::Result<Array2<T>, ShapeError> {
        let views: Vec<ArrayView2<T>> = self.successful().map(|c| c.samples.view()).collect();
        if views.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        concatenate(Axis(0), &views)
    }

    /// Successful chains stacked as `[chain, iteration, dim]`.
    pub fn stacked(&self) -> std::result::Result<Array3<T>, ShapeError> {
        let views: Vec<ArrayView2<T>> = self.successful().map(|c| c.samples.view()).collect();
        if views.is_empty() {
            return Ok(Array3::zeros((0, 0, 0)));
        }
        stack(Axis(0), &views)
    }

    /// Acceptance rate over all iterations of all successful chains.
    pub fn acceptance_rate(&self) -> f64 {
        let (acc, total) = self
            .successful()
            .fold((0, 0), |(a, n), c| (a + c.n_accepted(), n + c.len()));
        if total == 0 {
            0.0
        } else {
            acc as f64 / total as f64
        }
    }

    /// Applies [`Chain::discard`] to every successful chain.
    pub fn discard(self, n: usize) -> Self {
        self.map_chains(|c| c.discard(n))
    }

    /// Applies [`Chain::thin`] to every successful chain.
    pub fn thin(self, k: usize) -> Self {
        self.map_chains(|c| c.thin(k))
    }

    fn map_chains(self, f: impl Fn(&Chain<T>) -> Chain<T>) -> Self {
        Self {
            chains: self
                .chains
                .into_iter()
                .map(|c| c.map(|chain| f(&chain)))
                .collect(),
        }
    }

    /// All chains, or the first error if any chain failed.
    pub fn into_result(self) -> Result<Vec<Chain<T>>> {
        self.chains.into_iter().collect()
    }
}

/// A trait for types that own multiple MCMC chains.
pub trait HasChains<T> {
    type Chain: MarkovChain<T> + Send;

    /// Returns a mutable reference to the vector of chains.
    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

fn log_outcome<T>(i: usize, result: &Result<T>) {
    match result {
        Ok(_) => log::debug!("chain {i} finished"),
        Err(SamplerError::Cancelled) => log::debug!("chain {i} cancelled before start"),
        Err(e) => log::warn!("chain {i} failed: {e}"),
    }
}

/// Runs all chains of a [`HasChains`] implementor in parallel.
///
/// Every chain runs on its own Rayon task. Results come back in chain order
/// regardless of scheduling.
pub trait ChainRunner<T>: HasChains<T>
where
    T: Float + Send,
{
    /// Runs every chain for `n_iterations` steps.
    fn run(&mut self, n_iterations: usize) -> EnsembleRun<T> {
        let chains = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let result = run_chain(chain, n_iterations);
                log_outcome(i, &result);
                result
            })
            .collect();
        EnsembleRun { chains }
    }

    /// Like [`ChainRunner::run`], but a chain only starts while `cancel` is unset.
    ///
    /// Chains that never started report [`SamplerError::Cancelled`]. Chains already
    /// running are not interrupted.
    fn run_cancellable(&mut self, n_iterations: usize, cancel: &AtomicBool) -> EnsembleRun<T> {
        let chains = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let result = if cancel.load(Ordering::Acquire) {
                    Err(SamplerError::Cancelled)
                } else {
                    run_chain(chain, n_iterations)
                };
                log_outcome(i, &result);
                result
            })
            .collect();
        EnsembleRun { chains }
    }

    /// Runs every chain, recording only accepted states with repeat counts.
    fn run_compressed(&mut self, n_iterations: usize) -> Vec<Result<CompressedChain<T>>> {
        self.chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let result = run_chain_compressed(chain, n_iterations);
                log_outcome(i, &result);
                result
            })
            .collect()
    }

    /// Runs every chain with one progress bar per chain.
    fn run_progress(&mut self, n_iterations: usize) -> EnsembleRun<T> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        let chains = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(n_iterations as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());

                let result = run_chain_progress(chain, n_iterations, &pb);
                match &result {
                    Ok(_) => pb.finish(),
                    Err(e) => pb.abandon_with_message(format!("failed: {e}")),
                }
                log_outcome(i, &result);
                result
            })
            .collect();
        EnsembleRun { chains }
    }
}

impl<T: Float + Send, H: HasChains<T>> ChainRunner<T> for H {}
