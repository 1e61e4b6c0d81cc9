//! Per-chain failure isolation and cancellation in an ensemble.

use std::sync::atomic::AtomicBool;

use mh_ensemble::core::ChainRunner;
use mh_ensemble::distributions::{IsotropicGaussian, Target};
use mh_ensemble::error::{DensityError, SamplerError};
use mh_ensemble::metropolis_hastings::{run_ensemble, MetropolisHastings};

/// Two flat islands. Falling off the lower edge of the left one is a model error;
/// everywhere else outside the islands is simply outside the support.
#[derive(Debug, Clone, Copy)]
struct Islands;

impl Target<f64> for Islands {
    type LogpError = DensityError;

    fn unnorm_log_prob(&self, theta: &[f64]) -> Result<f64, DensityError> {
        match theta[0] {
            x if (-1.0..=0.0).contains(&x) || (99.0..=101.0).contains(&x) => Ok(0.0),
            x if x < -1.0 => Err(DensityError::Invalid(format!("no model below -1, got {x}"))),
            _ => Err(DensityError::OutsideSupport),
        }
    }
}

fn starts() -> Vec<Vec<f64>> {
    vec![vec![100.0], vec![-0.5], vec![100.5], vec![99.5]]
}

#[test]
fn failing_chain_is_isolated() {
    let run = run_ensemble(Islands, IsotropicGaussian::new(1.0).unwrap(), &starts(), 2_000, 4, 9).unwrap();

    let failures = run.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 1);
    assert!(matches!(failures[0].1, SamplerError::LogpFailure(_)));

    assert_eq!(run.n_successful(), 3);
    let pooled = run.pooled().unwrap();
    assert_eq!(pooled.dim(), (3 * 2_000, 1));
    // Recoverable rejections keep the surviving chains on their island.
    assert!(pooled.iter().all(|x| (99.0..=101.0).contains(x)));
}

#[test]
fn start_outside_support_is_rejected_up_front() {
    let err = run_ensemble(Islands, IsotropicGaussian::new(1.0).unwrap(), &[vec![50.0]], 10, 2, 0).unwrap_err();
    assert!(matches!(err, SamplerError::InvalidInitialState(s) if s == vec![50.0]));
}

#[test]
fn cancelled_before_start() {
    let mut mh = MetropolisHastings::from_initial_states(Islands, IsotropicGaussian::new(1.0).unwrap(), &starts())
        .unwrap()
        .set_seed(1);

    let run = mh.run_cancellable(100, &AtomicBool::new(true));
    assert_eq!(run.n_successful(), 0);
    assert!(run
        .chains
        .iter()
        .all(|c| matches!(c, Err(SamplerError::Cancelled))));

    let run = mh.run_cancellable(100, &AtomicBool::new(false));
    assert_eq!(run.n_successful(), 3);
}

#[test]
fn into_result_reports_first_failure() {
    let run = run_ensemble(Islands, IsotropicGaussian::new(1.0).unwrap(), &starts(), 2_000, 4, 9).unwrap();
    assert!(matches!(run.into_result(), Err(SamplerError::LogpFailure(_))));
}
