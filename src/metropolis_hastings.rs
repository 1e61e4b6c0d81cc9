/*!
# Metropolis–Hastings Sampler

This module implements a generic Metropolis–Hastings sampler for any target distribution `D`
and proposal distribution `Q` implementing [`Target`] and [`Proposal`]. The sampler runs
several independent Markov chains in parallel. A global seed makes runs reproducible: chain
`i` is seeded with `seed + i`.

## Overview

- **Target Distribution (`D`)**: provides the unnormalized log-density via [`Target`].
- **Proposal Distribution (`Q`)**: generates candidates and, for asymmetric proposals, the
  proposal density used in the Hastings correction.
- **Parallel Chains**: [`MetropolisHastings`] owns a vector of [`MHMarkovChain`]s, each with
  its own copy of the target and proposal and its own random generator.

## Support and failures

A candidate whose log-density is `-inf`, or whose evaluation fails with a recoverable
[`LogpError`](crate::error::LogpError), is rejected. A `NaN` or `+inf` log-density, an
unrecoverable evaluation error, or a proposal density that turns the acceptance ratio into
`NaN` stops the chain with a [`SamplerError`]. Other chains in the ensemble keep running.

## Example Usage

```rust
use mh_ensemble::core::ChainRunner;
use mh_ensemble::distributions::{IsotropicGaussian, Normal};
use mh_ensemble::metropolis_hastings::MetropolisHastings;

let target = Normal::new(5.0, 1.0).unwrap();
let proposal = IsotropicGaussian::new(0.5).unwrap();

let mut mh = MetropolisHastings::new(target, proposal, &[0.0], 4)
    .unwrap()
    .set_seed(42);
let run = mh.run(1_000).discard(200);

assert_eq!(run.n_successful(), 4);
assert_eq!(run.pooled().unwrap().nrows(), 4 * 800);
```
*/

use num_traits::Float;
use rand::prelude::*;

use crate::core::{ChainRunner, EnsembleRun, HasChains, MarkovChain};
use crate::distributions::{Proposal, Target};
use crate::error::{LogpError, Result, SamplerError};

/// Result of one Metropolis–Hastings step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    pub state: Vec<T>,
    pub log_prob: T,
    pub accepted: bool,
}

fn to_f64_vec<T: Float>(state: &[T]) -> Vec<f64> {
    state.iter().map(|x| x.to_f64().unwrap_or(f64::NAN)).collect()
}

/// Evaluates the target, mapping points outside the support to `-inf`.
fn evaluate<T, D>(target: &D, state: &[T]) -> Result<T>
where
    T: Float,
    D: Target<T>,
{
    match target.unnorm_log_prob(state) {
        Ok(lp) if lp.is_nan() || lp == T::infinity() => Err(SamplerError::NonFinite {
            value: lp.to_f64().unwrap_or(f64::NAN),
            state: to_f64_vec(state),
        }),
        Ok(lp) => Ok(lp),
        Err(e) if e.is_recoverable() => {
            log::trace!("treating point as outside support: {e}");
            Ok(T::neg_infinity())
        }
        Err(e) => Err(SamplerError::LogpFailure(Box::new(e))),
    }
}

/// Probability `min(1, exp(Δ))` of moving to a candidate, where
/// `Δ = candidate_lp - current_lp + log_correction`.
///
/// Exactly `1` when `Δ >= 0` and exactly `0` when the candidate has log-density `-inf`.
pub fn acceptance_probability<T: Float>(current_lp: T, candidate_lp: T, log_correction: T) -> T {
    if candidate_lp == T::neg_infinity() {
        return T::zero();
    }
    let delta = candidate_lp - current_lp + log_correction;
    if delta >= T::zero() {
        T::one()
    } else {
        delta.exp()
    }
}

/// Proposes, evaluates and decides. Returns the candidate and its density if accepted.
fn propose_and_decide<T, D, Q, R>(
    target: &D,
    proposal: &Q,
    rng: &mut R,
    current: &[T],
    current_lp: T,
) -> Result<Option<(Vec<T>, T)>>
where
    T: Float,
    D: Target<T>,
    Q: Proposal<T>,
    R: Rng + ?Sized,
{
    let candidate = proposal.sample(current, rng);
    let candidate_lp = evaluate(target, &candidate)?;

    let mut log_correction = T::zero();
    if !proposal.is_symmetric() && candidate_lp != T::neg_infinity() {
        log_correction = proposal.log_prob(&candidate, current) - proposal.log_prob(current, &candidate);
    }
    let alpha = acceptance_probability(current_lp, candidate_lp, log_correction);
    if alpha.is_nan() {
        return Err(SamplerError::InvalidProposal {
            from: to_f64_vec(current),
            to: to_f64_vec(&candidate),
        });
    }

    // u is in [0, 1): alpha = 1 always accepts, alpha = 0 never does.
    let u = rng.gen::<f64>();
    let accepted = alpha.to_f64().is_some_and(|a| u < a);
    Ok(accepted.then_some((candidate, candidate_lp)))
}

/// One Metropolis–Hastings step from `current` with cached log-density `current_lp`.
///
/// Every call costs exactly one target evaluation. On rejection the returned
/// state and log-density equal the inputs.
///
/// ```rust
/// use mh_ensemble::distributions::{IsotropicGaussian, Normal};
/// use mh_ensemble::metropolis_hastings::step;
/// use rand::rngs::SmallRng;
/// use rand::SeedableRng;
///
/// let target = Normal::new(0.0, 1.0).unwrap();
/// let proposal = IsotropicGaussian::new(1.0).unwrap();
/// let mut rng = SmallRng::seed_from_u64(0);
/// let t = step(&target, &proposal, &mut rng, &[0.5], -0.125 - 0.9189385332046727).unwrap();
/// if !t.accepted {
///     assert_eq!(t.state, vec![0.5]);
/// }
/// ```
pub fn step<T, D, Q, R>(
    target: &D,
    proposal: &Q,
    rng: &mut R,
    current: &[T],
    current_lp: T,
) -> Result<Transition<T>>
where
    T: Float,
    D: Target<T>,
    Q: Proposal<T>,
    R: Rng + ?Sized,
{
    Ok(
        match propose_and_decide(target, proposal, rng, current, current_lp)? {
            Some((state, log_prob)) => Transition {
                state,
                log_prob,
                accepted: true,
            },
            None => Transition {
                state: current.to_vec(),
                log_prob: current_lp,
                accepted: false,
            },
        },
    )
}

/**
The Metropolis–Hastings sampler: a set of independent chains sharing read-only copies of
the target and proposal.

# Type Parameters
- `T`: The floating-point type (e.g. `f32` or `f64`).
- `D`: The target distribution type. Must implement [`Target`].
- `Q`: The proposal distribution type. Must implement [`Proposal`].
*/
#[derive(Debug, Clone)]
pub struct MetropolisHastings<T, D, Q> {
    /// The target distribution we want to sample from.
    pub target: D,
    /// The proposal distribution used to generate candidate states.
    pub proposal: Q,
    /// The vector of independent Markov chains.
    pub chains: Vec<MHMarkovChain<T, D, Q>>,
    /// The global random seed.
    pub seed: u64,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
///
/// Each chain stores its own copy of the target and proposal distributions,
/// its current state with the cached log-density, and a chain-specific random
/// number generator.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<T, D, Q> {
    /// The target distribution to sample from.
    pub target: D,
    /// The proposal distribution used to generate candidate states.
    pub proposal: Q,
    /// The current state of the chain.
    pub current_state: Vec<T>,
    /// Log-density of `current_state`.
    pub current_log_prob: T,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
    /// Number of steps taken.
    pub n_steps: usize,
    /// Number of accepted proposals.
    pub n_accepted: usize,
}

/// Run configuration for [`MetropolisHastings::sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    /// Iterations per chain, burn-in included.
    pub n_iterations: usize,
    /// Leading iterations dropped from every chain.
    pub n_discard: usize,
    /// Keep every `thin`-th iteration after burn-in.
    pub thin: usize,
    /// Reseed the chains before running (chain `i` gets `seed + i`).
    pub seed: Option<u64>,
    /// Show one progress bar per chain.
    pub show_progress: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            n_iterations: 2_000,
            n_discard: 500,
            thin: 1,
            seed: None,
            show_progress: false,
        }
    }
}

impl<T, D, Q> MHMarkovChain<T, D, Q>
where
    T: Float,
    D: Target<T>,
    Q: Proposal<T>,
{
    /**
    Creates a new chain, evaluating the target at `initial_state`.

    Fails with [`SamplerError::InvalidInitialState`] if the initial state lies outside the
    support of the target.

    # Examples

    ```rust
    use mh_ensemble::distributions::{IsotropicGaussian, Normal};
    use mh_ensemble::metropolis_hastings::MHMarkovChain;

    let chain = MHMarkovChain::new(Normal::new(0.0, 1.0).unwrap(), IsotropicGaussian::new(1.0).unwrap(), &[0.0]).unwrap();
    assert_eq!(chain.current_state, vec![0.0]);
    ```
    */
    pub fn new(target: D, proposal: Q, initial_state: &[T]) -> Result<Self> {
        let current_log_prob = evaluate(&target, initial_state)?;
        if current_log_prob == T::neg_infinity() {
            return Err(SamplerError::InvalidInitialState(to_f64_vec(initial_state)));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            proposal,
            current_state: initial_state.to_vec(),
            current_log_prob,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            n_steps: 0,
            n_accepted: 0,
        })
    }

    /// Reseeds the chain's random number generator.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.n_steps == 0 {
            return 0.0;
        }
        self.n_accepted as f64 / self.n_steps as f64
    }
}

impl<T, D, Q> MarkovChain<T> for MHMarkovChain<T, D, Q>
where
    T: Float,
    D: Target<T>,
    Q: Proposal<T>,
{
    /**
    Performs one Metropolis–Hastings update.

    A candidate is drawn from the proposal and its log-density evaluated. The log acceptance
    ratio is

    \[
    \log \alpha = \left[\log p(\text{proposed}) + \log q(\text{current} \mid \text{proposed})\right]
                  - \left[\log p(\text{current}) + \log q(\text{proposed} \mid \text{current})\right]
    \]

    where the proposal terms are dropped for symmetric proposals. The candidate is accepted if
    \(\log(\text{Uniform}(0,1)) < \log \alpha\).
    */
    fn step(&mut self) -> Result<bool> {
        self.n_steps += 1;
        let decision = propose_and_decide(
            &self.target,
            &self.proposal,
            &mut self.rng,
            &self.current_state,
            self.current_log_prob,
        )?;
        Ok(match decision {
            Some((state, log_prob)) => {
                self.current_state = state;
                self.current_log_prob = log_prob;
                self.n_accepted += 1;
                true
            }
            None => false,
        })
    }

    fn current_state(&self) -> &[T] {
        &self.current_state
    }

    fn current_log_prob(&self) -> T {
        self.current_log_prob
    }
}

impl<T, D, Q> MetropolisHastings<T, D, Q>
where
    T: Float + Send,
    D: Target<T> + Clone + Send,
    Q: Proposal<T> + Clone + Send,
{
    /**
    Constructs a sampler with `n_chains` chains, all starting at `initial_state`.

    # Examples

    ```rust
    use mh_ensemble::distributions::{IsotropicGaussian, Normal};
    use mh_ensemble::metropolis_hastings::MetropolisHastings;

    let mh = MetropolisHastings::new(Normal::new(0.0, 1.0).unwrap(), IsotropicGaussian::new(1.0).unwrap(), &[0.0], 3).unwrap();
    assert_eq!(mh.chains.len(), 3);
    ```
    */
    pub fn new(target: D, proposal: Q, initial_state: &[T], n_chains: usize) -> Result<Self> {
        let states = vec![initial_state.to_vec(); n_chains];
        Self::from_initial_states(target, proposal, &states)
    }

    /// Constructs a sampler with one chain per initial state.
    ///
    /// Fails if any initial state lies outside the support of the target.
    pub fn from_initial_states(target: D, proposal: Q, initial_states: &[Vec<T>]) -> Result<Self> {
        let chains = initial_states
            .iter()
            .map(|s| MHMarkovChain::new(target.clone(), proposal.clone(), s))
            .collect::<Result<Vec<_>>>()?;
        let seed = thread_rng().gen::<u64>();
        log::debug!("initialised {} Metropolis-Hastings chains", chains.len());
        Ok(Self {
            target,
            proposal,
            chains,
            seed,
        }
        .set_seed(seed))
    }

    /**
    Sets a new global seed. Chain `i` receives `seed + i`.

    # Examples

    ```rust
    use mh_ensemble::distributions::{IsotropicGaussian, Normal};
    use mh_ensemble::metropolis_hastings::MetropolisHastings;

    let mh = MetropolisHastings::new(Normal::new(0.0, 1.0).unwrap(), IsotropicGaussian::new(1.0).unwrap(), &[0.0], 2)
        .unwrap()
        .set_seed(42);
    assert_eq!(mh.chains[0].seed, 42);
    assert_eq!(mh.chains[1].seed, 43);
    ```
    */
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.reseed(seed);
        self
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            chain.seed = seed.wrapping_add(i as u64);
            chain.rng = SmallRng::seed_from_u64(chain.seed);
        }
    }

    /// Runs every chain according to `settings`, then applies burn-in and thinning.
    pub fn sample(&mut self, settings: &SamplerSettings) -> EnsembleRun<T> {
        if let Some(seed) = settings.seed {
            self.reseed(seed);
        }
        log::debug!(
            "sampling {} chains x {} iterations (seed {})",
            self.chains.len(),
            settings.n_iterations,
            self.seed
        );
        let run = if settings.show_progress {
            self.run_progress(settings.n_iterations)
        } else {
            self.run(settings.n_iterations)
        };
        run.discard(settings.n_discard).thin(settings.thin)
    }
}

impl<T, D, Q> HasChains<T> for MetropolisHastings<T, D, Q>
where
    T: Float + Send,
    D: Target<T> + Clone + Send,
    Q: Proposal<T> + Clone + Send,
{
    type Chain = MHMarkovChain<T, D, Q>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

/// Runs `n_chains` independent chains for `n_iterations` each and returns their
/// per-chain results. Use [`EnsembleRun::pooled`] for the combined sample set.
///
/// `initial_states` holds either one state, shared by every chain, or exactly
/// `n_chains` states.
pub fn run_ensemble<T, D, Q>(
    target: D,
    proposal: Q,
    initial_states: &[Vec<T>],
    n_iterations: usize,
    n_chains: usize,
    seed: u64,
) -> Result<EnsembleRun<T>>
where
    T: Float + Send,
    D: Target<T> + Clone + Send,
    Q: Proposal<T> + Clone + Send,
{
    let mut mh = match initial_states {
        [single] => MetropolisHastings::new(target, proposal, single, n_chains)?,
        states if states.len() == n_chains => {
            MetropolisHastings::from_initial_states(target, proposal, states)?
        }
        states => {
            return Err(SamplerError::ChainCountMismatch {
                expected: n_chains,
                got: states.len(),
            })
        }
    }
    .set_seed(seed);
    Ok(mh.run(n_iterations))
}
