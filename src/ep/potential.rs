use std::f64::consts::TAU;

/// Argument family of a potential. Every potential behind one driver
/// must belong to the family the driver was constructed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PotentialGroup {
    Univariate,
    BivariatePrecision,
}

/// Cavity moments handed to the oracle: mean and variance on s_j, plus
/// the (a, c) cavity parameters of the precision variable in the
/// bivariate family.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CavityInput {
    Univariate { h: f64, rho: f64 },
    BivarPrec { h: f64, rho: f64, a: f64, c: f64 },
}

/// Result of local moment matching. `alpha` and `nu` are the tilt
/// parameters in derivative form (first and negated second derivative
/// of the log partition w.r.t. the cavity mean); the bivariate family
/// also returns the new (a, c) marginal on the precision variable.
/// `log_z` is the log partition value; the update driver ignores it,
/// schedules and the batched local update surface it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TiltOutput {
    Univariate {
        alpha: f64,
        nu: f64,
        log_z: Option<f64>,
    },
    BivarPrec {
        alpha: f64,
        nu: f64,
        hat_a: f64,
        hat_c: f64,
        log_z: Option<f64>,
    },
}

/// Moment-matching capability consumed by the core. Quadrature-backed
/// potentials, registries and per-potential caches all live behind this
/// one interface; a failed match is `None` and the driver reports it as
/// a numerical error.
pub trait PotentialOracle {
    fn num_potentials(&self) -> usize;

    fn group(&self, j: usize) -> PotentialGroup;

    fn comp_moments(&self, j: usize, cavity: CavityInput) -> Option<TiltOutput>;
}

/// Exact Gaussian observation sites `t_j(s) = N(y_j | s, var_j)`.
///
/// The one moment-matching implementation shipped with the crate; used
/// by the demo binary and the end-to-end tests. Matching is analytic:
/// with cavity (h, rho), `alpha = (y - h) / (rho + var)` and
/// `nu = 1 / (rho + var)`.
pub struct GaussianSites {
    obs: Vec<f64>,
    noise_var: Vec<f64>,
}

impl GaussianSites {
    /// Panics if the lengths differ or a noise variance is not strictly
    /// positive.
    pub fn new(obs: Vec<f64>, noise_var: Vec<f64>) -> Self {
        assert_eq!(obs.len(), noise_var.len());
        assert!(noise_var.iter().all(|&v| v > 0.0 && v.is_finite()));
        GaussianSites { obs, noise_var }
    }
}

impl PotentialOracle for GaussianSites {
    fn num_potentials(&self) -> usize {
        self.obs.len()
    }

    fn group(&self, _j: usize) -> PotentialGroup {
        PotentialGroup::Univariate
    }

    fn comp_moments(&self, j: usize, cavity: CavityInput) -> Option<TiltOutput> {
        let CavityInput::Univariate { h, rho } = cavity else {
            return None;
        };
        let total_var = rho + self.noise_var[j];
        if !(total_var > 0.0 && total_var.is_finite()) {
            return None;
        }
        let resid = self.obs[j] - h;
        Some(TiltOutput::Univariate {
            alpha: resid / total_var,
            nu: 1.0 / total_var,
            log_z: Some(-0.5 * (resid * resid / total_var + (TAU * total_var).ln())),
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn gaussian_site_matches_the_analytic_tilt() {
        let sites = GaussianSites::new(vec![3.0], vec![2.0]);
        let out = sites
            .comp_moments(0, CavityInput::Univariate { h: 1.0, rho: 2.0 })
            .unwrap();
        let TiltOutput::Univariate { alpha, nu, log_z } = out else {
            panic!("univariate site returned a bivariate tilt");
        };
        assert_relative_eq!(alpha, 0.5);
        assert_relative_eq!(nu, 0.25);
        // log N(3 | 1, 4)
        assert_relative_eq!(
            log_z.unwrap(),
            -0.5 * (1.0 + (TAU * 4.0).ln()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn gaussian_site_rejects_degenerate_cavities() {
        let sites = GaussianSites::new(vec![0.0], vec![1.0]);
        assert!(sites
            .comp_moments(0, CavityInput::Univariate { h: 0.0, rho: -2.0 })
            .is_none());
        assert!(sites
            .comp_moments(
                0,
                CavityInput::BivarPrec {
                    h: 0.0,
                    rho: 1.0,
                    a: 1.0,
                    c: 1.0,
                },
            )
            .is_none());
    }
}
