// Batched local EP updates: moment matching for many potentials at
// once against caller-supplied cavity moments. Nothing is committed to
// any driver state; schedules use this to probe tilts (and log
// partition values) in bulk.

use bitvec::vec::BitVec;
use log::debug;
use thiserror::Error;

use super::potential::{CavityInput, PotentialOracle, TiltOutput};

#[derive(Error, Debug, PartialEq)]
pub enum BatchError {
    #[error("cavity mean and variance vectors differ in length ({means} vs {variances})")]
    CavitySizeMismatch { means: usize, variances: usize },
    #[error("{got} cavity entries for {expected} potentials")]
    CountMismatch { got: usize, expected: usize },
    #[error("update index {index} out of range for {num_potentials} potentials")]
    IndexOutOfRange {
        index: usize,
        num_potentials: usize,
    },
}

/// Results of [`local_updates`], entry t describing potential
/// `indices[t]` (or `t` when no index subset was given). Entries whose
/// moment matching failed have their `ok` bit cleared and NaN in the
/// value vectors.
#[derive(Debug)]
pub struct LocalUpdates {
    pub ok: BitVec,
    pub alpha: Vec<f64>,
    pub nu: Vec<f64>,
    pub log_z: Option<Vec<f64>>,
}

impl LocalUpdates {
    pub fn num_failed(&self) -> usize {
        self.ok.count_zeros()
    }
}

/// Runs univariate moment matching on every potential of `oracle` (or
/// only those listed in `indices`) against the cavity moments
/// `(cav_h[t], cav_rho[t])`. Set `want_log_z` to collect log partition
/// values alongside the tilts.
pub fn local_updates(
    oracle: &dyn PotentialOracle,
    cav_h: &[f64],
    cav_rho: &[f64],
    indices: Option<&[usize]>,
    want_log_z: bool,
) -> Result<LocalUpdates, BatchError> {
    if cav_h.len() != cav_rho.len() {
        return Err(BatchError::CavitySizeMismatch {
            means: cav_h.len(),
            variances: cav_rho.len(),
        });
    }
    let total = cav_h.len();
    match indices {
        Some(indices) => {
            if indices.len() != total {
                return Err(BatchError::CountMismatch {
                    got: total,
                    expected: indices.len(),
                });
            }
            for &j in indices {
                if j >= oracle.num_potentials() {
                    return Err(BatchError::IndexOutOfRange {
                        index: j,
                        num_potentials: oracle.num_potentials(),
                    });
                }
            }
        }
        None => {
            if total != oracle.num_potentials() {
                return Err(BatchError::CountMismatch {
                    got: total,
                    expected: oracle.num_potentials(),
                });
            }
        }
    }

    let mut out = LocalUpdates {
        ok: BitVec::repeat(true, total),
        alpha: vec![f64::NAN; total],
        nu: vec![f64::NAN; total],
        log_z: want_log_z.then(|| vec![f64::NAN; total]),
    };
    for t in 0..total {
        let j = indices.map_or(t, |ind| ind[t]);
        let cavity = CavityInput::Univariate {
            h: cav_h[t],
            rho: cav_rho[t],
        };
        match oracle.comp_moments(j, cavity) {
            Some(TiltOutput::Univariate { alpha, nu, log_z }) => {
                out.alpha[t] = alpha;
                out.nu[t] = nu;
                if let (Some(collected), Some(value)) = (out.log_z.as_mut(), log_z) {
                    collected[t] = value;
                }
            }
            _ => {
                debug!("local update failed for potential {j}");
                out.ok.set(t, false);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::ep::potential::{GaussianSites, PotentialGroup};

    struct FailsAt {
        m: usize,
        bad: usize,
    }

    impl PotentialOracle for FailsAt {
        fn num_potentials(&self) -> usize {
            self.m
        }

        fn group(&self, _j: usize) -> PotentialGroup {
            PotentialGroup::Univariate
        }

        fn comp_moments(&self, j: usize, _cavity: CavityInput) -> Option<TiltOutput> {
            (j != self.bad).then_some(TiltOutput::Univariate {
                alpha: j as f64,
                nu: 1.0,
                log_z: Some(-1.0),
            })
        }
    }

    #[test]
    fn tilts_line_up_with_the_cavities() {
        let sites = GaussianSites::new(vec![1.0, -2.0], vec![1.0, 3.0]);
        let out = local_updates(&sites, &[0.0, 0.5], &[1.0, 1.0], None, true).unwrap();
        assert_eq!(out.num_failed(), 0);
        assert_relative_eq!(out.alpha[0], 0.5);
        assert_relative_eq!(out.nu[0], 0.5);
        assert_relative_eq!(out.alpha[1], -0.625);
        assert_relative_eq!(out.nu[1], 0.25);
        assert!(out.log_z.unwrap().iter().all(|z| z.is_finite()));
    }

    #[test]
    fn index_subsets_select_potentials() {
        let oracle = FailsAt { m: 4, bad: 2 };
        let out =
            local_updates(&oracle, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], Some(&[3, 2, 3]), false)
                .unwrap();
        assert!(out.ok[0]);
        assert!(!out.ok[1]);
        assert!(out.ok[2]);
        assert_eq!(out.alpha[0], 3.0);
        assert!(out.alpha[1].is_nan());
        assert!(out.log_z.is_none());
    }

    #[test]
    fn sizes_and_ranges_are_validated() {
        let oracle = FailsAt { m: 2, bad: 0 };
        assert_eq!(
            local_updates(&oracle, &[0.0], &[], None, false).unwrap_err(),
            BatchError::CavitySizeMismatch {
                means: 1,
                variances: 0,
            }
        );
        assert_eq!(
            local_updates(&oracle, &[0.0], &[1.0], None, false).unwrap_err(),
            BatchError::CountMismatch {
                got: 1,
                expected: 2,
            }
        );
        assert_eq!(
            local_updates(&oracle, &[0.0], &[1.0], Some(&[5]), false).unwrap_err(),
            BatchError::IndexOutOfRange {
                index: 5,
                num_potentials: 2,
            }
        );
    }
}
