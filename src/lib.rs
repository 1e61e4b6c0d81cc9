//! # mh-ensemble
//!
//! Random-walk Metropolis–Hastings sampling with independent chains run in parallel.
//!
//! - [`distributions`]: densities, priors and proposal kernels.
//! - [`posterior`]: prior × likelihood targets built around a forward model.
//! - [`metropolis_hastings`]: the single step, per-chain state and the ensemble sampler.
//! - [`core`]: chain records and the parallel chain runner.
//! - [`stats`]: split-R-hat, effective sample size and run summaries.
//! - [`ks_test`]: two-sample Kolmogorov–Smirnov statistic.
//! - [`io`]: CSV export (feature `csv`).
//!
//! ```rust
//! use mh_ensemble::distributions::{IsotropicGaussian, Normal};
//! use mh_ensemble::metropolis_hastings::run_ensemble;
//!
//! let run = run_ensemble(
//!     Normal::new(5.0, 1.0).unwrap(),
//!     IsotropicGaussian::new(0.5).unwrap(),
//!     &[vec![0.0]],
//!     2_000,
//!     4,
//!     42,
//! )
//! .unwrap();
//! let pooled = run.discard(500).pooled().unwrap();
//! assert_eq!(pooled.dim(), (4 * 1_500, 1));
//! ```

pub mod core;
pub mod distributions;
pub mod error;
pub mod io;
pub mod ks_test;
pub mod metropolis_hastings;
pub mod posterior;
pub mod stats;
