/*!
# Saving Ensemble Runs to CSV

Enable via the `csv` feature.
*/

use std::error::Error;
use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use ::csv::Writer;
use num_traits::Float;

use crate::core::EnsembleRun;

/**
Saves every successful chain of an ensemble run as CSV.

The header row is `chain, iteration, log_prob, accepted, dim_0, dim_1, ...`; each further
row is one iteration of one chain. Chains that failed are skipped with a warning, and
keep their index in the `chain` column of the chains that follow.

# Examples

```rust
use mh_ensemble::core::ChainRunner;
use mh_ensemble::distributions::{IsotropicGaussian, Normal};
use mh_ensemble::io::csv::save_csv;
use mh_ensemble::metropolis_hastings::MetropolisHastings;

let mut mh = MetropolisHastings::new(Normal::new(0.0, 1.0)?, IsotropicGaussian::new(1.0)?, &[0.0], 2)?;
let run = mh.run(100);

let file = tempfile::NamedTempFile::new()?;
save_csv(&run, file.path())?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv<T, P>(run: &EnsembleRun<T>, path: P) -> Result<(), Box<dyn Error>>
where
    T: Float + Display,
    P: AsRef<Path>,
{
    let mut wtr = Writer::from_writer(File::create(path.as_ref())?);
    let n_dims = run.successful().next().map_or(0, |c| c.dim());

    let mut header: Vec<String> = ["chain", "iteration", "log_prob", "accepted"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend((0..n_dims).map(|i| format!("dim_{i}")));
    wtr.write_record(&header)?;

    for (chain_idx, result) in run.chains.iter().enumerate() {
        let chain = match result {
            Ok(chain) => chain,
            Err(e) => {
                log::warn!("skipping chain {chain_idx} in csv export: {e}");
                continue;
            }
        };
        for (i, state) in chain.samples.outer_iter().enumerate() {
            let mut row = vec![
                chain_idx.to_string(),
                i.to_string(),
                chain.log_probs[i].to_string(),
                chain.accepted[i].to_string(),
            ];
            row.extend(state.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    log::debug!("wrote {} chains to {}", run.n_successful(), path.as_ref().display());
    Ok(())
}
