//! Infers amplitude and rate of an exponential decay `y(t) = a * exp(-k t)` from noisy
//! synthetic observations, then prints convergence diagnostics for the ensemble.
//!
//! Run with `RUST_LOG=debug` to see per-chain progress in the log.

use std::error::Error;

use mh_ensemble::core::Chain;
use mh_ensemble::distributions::{HalfNormal, Independent, IsotropicGaussian, Normal, Univariate};
use mh_ensemble::error::SimulationError;
use mh_ensemble::metropolis_hastings::{MetropolisHastings, SamplerSettings};
use mh_ensemble::posterior::{GaussianLikelihood, Posterior};
use mh_ensemble::stats::EnsembleSummary;
use rand::rngs::SmallRng;
use rand::SeedableRng;

const TRUE_AMPLITUDE: f64 = 2.0;
const TRUE_RATE: f64 = 0.5;
const NOISE_STD: f64 = 0.05;
const N_CHAINS: usize = 4;
const SEED: u64 = 42;

fn times() -> Vec<f64> {
    (0..20).map(|i| i as f64 * 0.5).collect()
}

fn decay(theta: &[f64]) -> Result<Vec<f64>, SimulationError> {
    let (a, k) = (theta[0], theta[1]);
    times()
        .into_iter()
        .map(|t| {
            let y = a * (-k * t).exp();
            if y.is_finite() {
                Ok(y)
            } else {
                Err(SimulationError::Diverged(t))
            }
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut rng = SmallRng::seed_from_u64(SEED);
    let noise = Normal::new(0.0, NOISE_STD)?;
    let observed: Vec<f64> = decay(&[TRUE_AMPLITUDE, TRUE_RATE])?
        .into_iter()
        .map(|y| y + noise.draw(&mut rng))
        .collect();

    let prior = Independent::new()
        .with(Normal::new(0.0, 10.0)?)
        .with(HalfNormal::new(2.0)?);
    let likelihood = GaussianLikelihood::new(decay, observed, NOISE_STD)?;
    let posterior = Posterior::new(prior, likelihood);

    let starts = vec![vec![1.0, 0.1], vec![3.0, 1.0], vec![0.5, 2.0], vec![2.5, 0.3]];
    let mut mh = MetropolisHastings::from_initial_states(posterior, IsotropicGaussian::new(0.02)?, &starts)?;

    let settings = SamplerSettings {
        n_iterations: 20_000,
        n_discard: 5_000,
        thin: 2,
        seed: Some(SEED),
        show_progress: true,
    };
    let run = mh.sample(&settings);

    let summary = EnsembleSummary::from_run(&run)?;
    println!("{summary}");
    println!("true values: a = {TRUE_AMPLITUDE}, k = {TRUE_RATE}");
    if summary.max_rhat() > 1.01 {
        println!("warning: max R-hat {:.3} > 1.01, chains may not have mixed", summary.max_rhat());
    }

    let n_draws: usize = run.successful().map(Chain::len).sum();
    println!("{n_draws} pooled draws from {} of {N_CHAINS} chains", run.n_successful());

    #[cfg(feature = "csv")]
    {
        mh_ensemble::io::csv::save_csv(&run, "decay_samples.csv")?;
        println!("samples written to decay_samples.csv");
    }

    Ok(())
}
