use factorized_ep::{
    EpDriver, FactorizedRep, GaussianSites, Marginals, UpdateStatus,
};
use log::{info, warn};

// Denoising chain: one observation site per variable, one zero-mean
// difference site per neighbour pair. The round-robin sweep below is
// the thin external schedule; the crate only provides the per-factor
// update primitive.
fn main() {
    env_logger::init();

    let n = 8;
    let observations = [0.8, 1.1, 0.9, 1.4, 2.1, 2.2, 1.9, 2.0];

    let mut rows = Vec::new();
    let mut site_obs = Vec::new();
    let mut site_var = Vec::new();
    for (i, &y) in observations.iter().enumerate() {
        rows.push((vec![i], vec![1.0]));
        site_obs.push(y);
        site_var.push(1.0);
    }
    for i in 0..n - 1 {
        rows.push((vec![i, i + 1], vec![-1.0, 1.0]));
        site_obs.push(0.0);
        site_var.push(0.5);
    }

    let rep = FactorizedRep::from_rows(n, rows).expect("chain rows are well formed");
    let m = rep.num_potentials();
    // Vague base prior seeds the marginals so the first cavities exist
    let marg = Marginals::from_parts(vec![0.0; n], vec![1e-2; n]);
    let index = rep.max_pi_index();
    let sites = GaussianSites::new(site_obs, site_var);
    let mut driver = EpDriver::new_univariate(&sites, rep, marg, 1e-8, Some(index))
        .expect("driver configuration is valid");

    let tol = 1e-8;
    let max_sweeps = 100;
    for sweep in 0..max_sweeps {
        let mut max_delta: f64 = 0.0;
        let mut failures = 0;
        for j in 0..m {
            match driver.sequential_update(j, 0.0) {
                UpdateStatus::Success { delta, .. } => max_delta = max_delta.max(delta),
                status => {
                    warn!("sweep {sweep}: factor {j} returned {status:?}");
                    failures += 1;
                }
            }
        }
        info!("sweep {sweep}: max delta {max_delta:.3e}, {failures} non-success updates");
        if max_delta < tol {
            info!("converged after {} sweeps", sweep + 1);
            break;
        }
    }

    let marg = driver.marginals();
    for i in 0..n {
        let mean = marg.beta()[i] / marg.pi()[i];
        let stddev = (1.0 / marg.pi()[i]).sqrt();
        println!("x[{i}]: mean {mean:.4}, stddev {stddev:.4}  (observed {})", observations[i]);
    }
}
