use log::{debug, warn};
use thiserror::Error;

use crate::data_structures::max_value_index::MaxValueIndex;
use crate::ep::marginals::{Marginals, PrecMarginals};
use crate::ep::potential::{CavityInput, PotentialGroup, PotentialOracle, TiltOutput};
use crate::ep::representation::{FactorizedRep, PrecisionRep};

// Numerical guards of the sequential update
const DENOM_GUARD: f64 = 1e-10;
const SMALL_COEFF: f64 = 1e-6;
const RETAIN_FLOOR: f64 = 0.02;
const DELTA_FLOOR: f64 = 1e-8;

// Outcome of one sequential update. Every non-Success status leaves the
// driver state bit-identical to its pre-call value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpdateStatus {
    // delta is the maximum relative change of mean and stddev on s_j;
    // eff_damp the damping factor actually applied
    Success { delta: f64, eff_damp: f64 },
    // a cavity precision fell below half its positivity threshold
    CavityInvalid,
    // moment matching failed, or a message denominator degenerated
    NumericalError,
    // the damped update would push an aggregate precision below half
    // its threshold
    MarginalsInvalid,
    // selective damping would have to retain 98% or more of the old
    // message; the update is abandoned
    Skipped { eff_damp: f64 },
}

impl UpdateStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateStatus::Success { .. })
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum DriverError {
    #[error("{name} must be positive, got {value}")]
    NonPositiveThreshold { name: &'static str, value: f64 },
    #[error("{name} has size {got}, expected {expected}")]
    SizeMismatch {
        name: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("potential {j} is in group {got:?}, driver mode requires {expected:?}")]
    WrongPotentialGroup {
        j: usize,
        got: PotentialGroup,
        expected: PotentialGroup,
    },
}

// Bivariate-precision half of the driver state
#[derive(Debug)]
struct BivarPrecState {
    rep: PrecisionRep,
    marg: PrecMarginals,
    a_min: f64,
    c_min: f64,
    max_a: Option<MaxValueIndex>,
    max_c: Option<MaxValueIndex>,
}

// Per-update working values for the precision variable of factor j
struct BivarWork {
    k: usize,
    a_j: f64,
    c_j: f64,
    cav_a: f64,
    cav_c: f64,
    new_a: f64,
    new_c: f64,
    marg_a: f64,
    marg_c: f64,
}

// Sequential EP update driver over a factorized representation. Owns
// the mutable inference state (representation, marginals, optional
// maximum-value indices) and borrows the moment-matching oracle.
// Construction fixes one of two modes, univariate or bivariate
// precision; every potential behind the oracle must belong to the
// matching argument family.
// The marginal vectors are the ground truth aggregates and may carry
// contributions from potentials outside this representation (a model
// can be split across several drivers sharing its marginals), which is
// also how vague initial cavities are seeded.
pub struct EpDriver<'a> {
    oracle: &'a dyn PotentialOracle,
    rep: FactorizedRep,
    marg: Marginals,
    pi_min: f64,
    max_pi: Option<MaxValueIndex>,
    prec: Option<BivarPrecState>,
    // Scratch rows, sized once to the largest support set
    cav_beta: Vec<f64>,
    cav_pi: Vec<f64>,
    new_beta: Vec<f64>,
    new_pi: Vec<f64>,
}

impl<'a> std::fmt::Debug for EpDriver<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpDriver")
            .field("rep", &self.rep)
            .field("marg", &self.marg)
            .field("pi_min", &self.pi_min)
            .field("max_pi", &self.max_pi)
            .field("prec", &self.prec)
            .field("cav_beta", &self.cav_beta)
            .field("cav_pi", &self.cav_pi)
            .field("new_beta", &self.new_beta)
            .field("new_pi", &self.new_pi)
            .finish()
    }
}

fn max_rel_diff(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(DELTA_FLOOR)
}

fn check_oracle(
    oracle: &dyn PotentialOracle,
    num_potentials: usize,
    expected: PotentialGroup,
) -> Result<(), DriverError> {
    if oracle.num_potentials() != num_potentials {
        return Err(DriverError::SizeMismatch {
            name: "oracle potential count",
            got: oracle.num_potentials(),
            expected: num_potentials,
        });
    }
    for j in 0..num_potentials {
        let got = oracle.group(j);
        if got != expected {
            return Err(DriverError::WrongPotentialGroup { j, got, expected });
        }
    }
    Ok(())
}

fn check_threshold(name: &'static str, value: f64) -> Result<(), DriverError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(DriverError::NonPositiveThreshold { name, value })
    }
}

fn check_size(name: &'static str, got: usize, expected: usize) -> Result<(), DriverError> {
    if got == expected {
        Ok(())
    } else {
        Err(DriverError::SizeMismatch {
            name,
            got,
            expected,
        })
    }
}

impl<'a> EpDriver<'a> {
    // Univariate mode: potentials t_j(s_j) only
    pub fn new_univariate(
        oracle: &'a dyn PotentialOracle,
        rep: FactorizedRep,
        marg: Marginals,
        pi_min: f64,
        max_pi: Option<MaxValueIndex>,
    ) -> Result<Self, DriverError> {
        check_threshold("pi threshold", pi_min)?;
        check_size("marginal vectors", marg.len(), rep.num_variables())?;
        if let Some(index) = &max_pi {
            check_size("max-pi index", index.num_targets(), rep.num_variables())?;
        }
        check_oracle(oracle, rep.num_potentials(), PotentialGroup::Univariate)?;
        let scratch = rep.max_row_size();
        Ok(EpDriver {
            oracle,
            rep,
            marg,
            pi_min,
            max_pi,
            prec: None,
            cav_beta: vec![0.0; scratch],
            cav_pi: vec![0.0; scratch],
            new_beta: vec![0.0; scratch],
            new_pi: vec![0.0; scratch],
        })
    }

    // Bivariate-precision mode: potentials t_j(s_j, tau_k(j))
    pub fn new_bivar_prec(
        oracle: &'a dyn PotentialOracle,
        rep: FactorizedRep,
        prec_rep: PrecisionRep,
        marg: Marginals,
        prec_marg: PrecMarginals,
        pi_min: f64,
        a_min: f64,
        c_min: f64,
        max_pi: Option<MaxValueIndex>,
        max_a: Option<MaxValueIndex>,
        max_c: Option<MaxValueIndex>,
    ) -> Result<Self, DriverError> {
        check_threshold("pi threshold", pi_min)?;
        check_threshold("a threshold", a_min)?;
        check_threshold("c threshold", c_min)?;
        check_size("marginal vectors", marg.len(), rep.num_variables())?;
        check_size(
            "precision map",
            prec_rep.num_potentials(),
            rep.num_potentials(),
        )?;
        check_size(
            "precision marginal vectors",
            prec_marg.len(),
            prec_rep.num_prec_vars(),
        )?;
        if let Some(index) = &max_pi {
            check_size("max-pi index", index.num_targets(), rep.num_variables())?;
        }
        for (name, index) in [("max-a index", &max_a), ("max-c index", &max_c)] {
            if let Some(index) = index {
                check_size(name, index.num_targets(), prec_rep.num_prec_vars())?;
            }
        }
        check_oracle(
            oracle,
            rep.num_potentials(),
            PotentialGroup::BivariatePrecision,
        )?;
        let scratch = rep.max_row_size();
        Ok(EpDriver {
            oracle,
            rep,
            marg,
            pi_min,
            max_pi,
            prec: Some(BivarPrecState {
                rep: prec_rep,
                marg: prec_marg,
                a_min,
                c_min,
                max_a,
                max_c,
            }),
            cav_beta: vec![0.0; scratch],
            cav_pi: vec![0.0; scratch],
            new_beta: vec![0.0; scratch],
            new_pi: vec![0.0; scratch],
        })
    }

    pub fn num_variables(&self) -> usize {
        self.rep.num_variables()
    }

    pub fn num_potentials(&self) -> usize {
        self.rep.num_potentials()
    }

    pub fn num_prec_vars(&self) -> Option<usize> {
        self.prec.as_ref().map(|p| p.rep.num_prec_vars())
    }

    pub fn representation(&self) -> &FactorizedRep {
        &self.rep
    }

    pub fn precision_rep(&self) -> Option<&PrecisionRep> {
        self.prec.as_ref().map(|p| &p.rep)
    }

    pub fn marginals(&self) -> &Marginals {
        &self.marg
    }

    pub fn prec_marginals(&self) -> Option<&PrecMarginals> {
        self.prec.as_ref().map(|p| &p.marg)
    }

    pub fn max_pi_index(&self) -> Option<&MaxValueIndex> {
        self.max_pi.as_ref()
    }

    pub fn max_a_index(&self) -> Option<&MaxValueIndex> {
        self.prec.as_ref().and_then(|p| p.max_a.as_ref())
    }

    pub fn max_c_index(&self) -> Option<&MaxValueIndex> {
        self.prec.as_ref().and_then(|p| p.max_c.as_ref())
    }

    // Runs the sequential EP update on potential j with damping factor
    // damp in [0, 1). Commits either the whole update or nothing; the
    // status says which and why.
    pub fn sequential_update(&mut self, j: usize, damp: f64) -> UpdateStatus {
        assert!(
            (0.0..1.0).contains(&damp),
            "damping factor must lie in [0, 1), got {damp}"
        );
        let expected = match self.prec {
            Some(_) => PotentialGroup::BivariatePrecision,
            None => PotentialGroup::Univariate,
        };
        let got = self.oracle.group(j);
        assert!(
            got == expected,
            "potential {j} is in group {got:?}, driver mode requires {expected:?}"
        );

        let Self {
            oracle,
            rep,
            marg,
            pi_min,
            max_pi,
            prec,
            cav_beta,
            cav_pi,
            new_beta,
            new_pi,
        } = self;
        let pi_min = *pi_min;
        let thres2 = 0.5 * pi_min;
        let mut damp = damp;
        let row = rep.row(j);
        let sz = row.vars.len();
        debug!("sequential update on factor {j} (support {sz}, damping {damp})");

        // Cavity marginals; the marginal moments on s_j feed the
        // relative-change metric at the end
        let mut c_h = 0.0;
        let mut c_rho = 0.0;
        let mut m_h = 0.0;
        let mut m_rho = 0.0;
        for ii in 0..sz {
            let i = row.vars[ii];
            let c_pi = marg.pi[i] - row.pi[ii];
            if c_pi < thres2 {
                debug!("factor {j}: cavity precision {c_pi} at variable {i} below {thres2}");
                return UpdateStatus::CavityInvalid;
            }
            let c_beta = marg.beta[i] - row.beta[ii];
            cav_pi[ii] = c_pi;
            cav_beta[ii] = c_beta;
            let b = row.coeff[ii];
            let t = b / c_pi;
            c_rho += b * t;
            c_h += t * c_beta;
            let t = b / marg.pi[i];
            m_rho += b * t;
            m_h += t * marg.beta[i];
        }
        let mut bivar = None;
        if let Some(p) = prec.as_ref() {
            let k = p.rep.prec_var(j);
            let a_j = p.rep.a(j);
            let c_j = p.rep.c(j);
            let cav_a = p.marg.a[k] - a_j;
            if cav_a < 0.5 * p.a_min {
                debug!("factor {j}: cavity a {cav_a} at precision variable {k} below threshold");
                return UpdateStatus::CavityInvalid;
            }
            let cav_c = p.marg.c[k] - c_j;
            if cav_c < 0.5 * p.c_min {
                debug!("factor {j}: cavity c {cav_c} at precision variable {k} below threshold");
                return UpdateStatus::CavityInvalid;
            }
            bivar = Some(BivarWork {
                k,
                a_j,
                c_j,
                cav_a,
                cav_c,
                new_a: 0.0,
                new_c: 0.0,
                marg_a: 0.0,
                marg_c: 0.0,
            });
        }

        // Local moment matching
        let cavity = match &bivar {
            None => CavityInput::Univariate { h: c_h, rho: c_rho },
            Some(w) => CavityInput::BivarPrec {
                h: c_h,
                rho: c_rho,
                a: w.cav_a,
                c: w.cav_c,
            },
        };
        let Some(tilt) = oracle.comp_moments(j, cavity) else {
            warn!("factor {j}: moment matching failed (h={c_h}, rho={c_rho})");
            return UpdateStatus::NumericalError;
        };
        let (alpha, nu) = match (tilt, bivar.as_mut()) {
            (TiltOutput::Univariate { alpha, nu, .. }, None) => (alpha, nu),
            (
                TiltOutput::BivarPrec {
                    alpha,
                    nu,
                    hat_a,
                    hat_c,
                    ..
                },
                Some(w),
            ) => {
                w.new_a = hat_a - w.cav_a;
                w.new_c = hat_c - w.cav_c;
                (alpha, nu)
            }
            _ => {
                warn!("factor {j}: oracle returned a tilt from the wrong argument family");
                return UpdateStatus::NumericalError;
            }
        };

        // Undamped messages; where a maximum index is present and a
        // message precision drops, raise the damping just enough to
        // keep the aggregate-minus-maximum slack at its threshold
        for ii in 0..sz {
            let i = row.vars[ii];
            let b = row.coeff[ii];
            let c_pi = cav_pi[ii];
            let c_beta = cav_beta[ii];
            let (pr_pi, pr_beta) = if b.abs() >= SMALL_COEFF {
                let t2 = c_pi / b;
                let denom = t2 / b - nu;
                if denom < DENOM_GUARD {
                    warn!("factor {j}: degenerate message denominator {denom} (b={b}, nu={nu})");
                    return UpdateStatus::NumericalError;
                }
                let e = 1.0 / denom;
                (e * c_pi * nu, e * (c_beta * nu + t2 * alpha))
            } else {
                // Very small non-zero coefficient
                let denom = c_pi - nu * b * b;
                if denom < DENOM_GUARD {
                    warn!("factor {j}: degenerate message denominator {denom} (b={b}, nu={nu})");
                    return UpdateStatus::NumericalError;
                }
                let t = b / denom;
                (t * b * nu * c_pi, t * (c_beta * b * nu + c_pi * alpha))
            };
            new_pi[ii] = pr_pi;
            new_beta[ii] = pr_beta;
            if let Some(index) = max_pi.as_ref() {
                if pr_pi < row.pi[ii] {
                    let kappa = index.max(i);
                    if kappa <= 0.0 {
                        warn!("factor {j}: nonpositive maximum precision {kappa} at variable {i}");
                        return UpdateStatus::NumericalError;
                    }
                    let retain = ((marg.pi[i] - kappa - pi_min) / (row.pi[ii] - pr_pi)).min(1.0);
                    if retain <= RETAIN_FLOOR {
                        debug!("factor {j}: selective damping exhausted at variable {i}");
                        return UpdateStatus::Skipped { eff_damp: 1.0 };
                    }
                    damp = damp.max(1.0 - retain);
                }
            }
        }
        if let (Some(w), Some(p)) = (bivar.as_ref(), prec.as_ref()) {
            // The identical clamp, per precision variable, for a and c
            for (index, new_msg, old_msg, aggregate, min_thres) in [
                (&p.max_a, w.new_a, w.a_j, p.marg.a[w.k], p.a_min),
                (&p.max_c, w.new_c, w.c_j, p.marg.c[w.k], p.c_min),
            ] {
                if let Some(index) = index {
                    if new_msg < old_msg {
                        let kappa = index.max(w.k);
                        if kappa <= 0.0 {
                            warn!(
                                "factor {j}: nonpositive maximum {kappa} at precision variable {}",
                                w.k
                            );
                            return UpdateStatus::NumericalError;
                        }
                        let retain = ((aggregate - kappa - min_thres) / (old_msg - new_msg)).min(1.0);
                        if retain <= RETAIN_FLOOR {
                            debug!("factor {j}: selective damping exhausted at precision variable {}", w.k);
                            return UpdateStatus::Skipped { eff_damp: 1.0 };
                        }
                        damp = damp.max(1.0 - retain);
                    }
                }
            }
        }

        // Damped messages and tentative marginals. The scratch rows
        // switch meaning here: new_* hold the damped messages, cav_*
        // the new marginals. The update can still fail, so observable
        // state stays untouched
        for ii in 0..sz {
            let c_pi = cav_pi[ii];
            let c_beta = cav_beta[ii];
            let undamped_pi = new_pi[ii];
            let mut pr_pi = undamped_pi;
            let mut pr_beta = new_beta[ii];
            if damp > 0.0 {
                pr_pi += damp * (row.pi[ii] - pr_pi);
                pr_beta += damp * (row.beta[ii] - pr_beta);
            }
            let marg_pi = c_pi + pr_pi;
            if marg_pi < thres2 {
                debug!("factor {j}: new marginal precision {marg_pi} below {thres2}");
                return UpdateStatus::MarginalsInvalid;
            }
            if undamped_pi < row.pi[ii] {
                if let Some(index) = max_pi.as_ref() {
                    if index.max_if_replaced(row.vars[ii], j, pr_pi) <= 0.0 {
                        debug!(
                            "factor {j}: maximum precision at variable {} would turn nonpositive",
                            row.vars[ii]
                        );
                        return UpdateStatus::Skipped { eff_damp: 1.0 };
                    }
                }
            }
            new_pi[ii] = pr_pi;
            new_beta[ii] = pr_beta;
            cav_pi[ii] = marg_pi;
            cav_beta[ii] = c_beta + pr_beta;
        }
        if let (Some(w), Some(p)) = (bivar.as_mut(), prec.as_ref()) {
            let dec_a = w.new_a < w.a_j;
            let dec_c = w.new_c < w.c_j;
            if damp > 0.0 {
                w.new_a += damp * (w.a_j - w.new_a);
                w.new_c += damp * (w.c_j - w.new_c);
            }
            w.marg_a = w.cav_a + w.new_a;
            if w.marg_a < 0.5 * p.a_min {
                debug!("factor {j}: new marginal a {} below threshold", w.marg_a);
                return UpdateStatus::MarginalsInvalid;
            }
            w.marg_c = w.cav_c + w.new_c;
            if w.marg_c < 0.5 * p.c_min {
                debug!("factor {j}: new marginal c {} below threshold", w.marg_c);
                return UpdateStatus::MarginalsInvalid;
            }
            for (index, decreasing, new_msg) in [
                (&p.max_a, dec_a, w.new_a),
                (&p.max_c, dec_c, w.new_c),
            ] {
                if let Some(index) = index {
                    if decreasing && index.max_if_replaced(w.k, j, new_msg) <= 0.0 {
                        return UpdateStatus::Skipped { eff_damp: 1.0 };
                    }
                }
            }
        }

        // Commit: messages, marginals, maximum indices
        let row = rep.row_mut(j);
        let mut mpr_h = 0.0;
        let mut mpr_rho = 0.0;
        for ii in 0..sz {
            let i = row.vars[ii];
            row.beta[ii] = new_beta[ii];
            row.pi[ii] = new_pi[ii];
            marg.beta[i] = cav_beta[ii];
            marg.pi[i] = cav_pi[ii];
            let b = row.coeff[ii];
            let t = b / cav_pi[ii];
            mpr_rho += b * t;
            mpr_h += t * cav_beta[ii];
            if let Some(index) = max_pi.as_mut() {
                index.update(i, j, new_pi[ii]);
            }
        }
        if let (Some(w), Some(p)) = (bivar.as_ref(), prec.as_mut()) {
            let (a_slot, c_slot) = p.rep.tau_row_mut(j);
            *a_slot = w.new_a;
            *c_slot = w.new_c;
            p.marg.a[w.k] = w.marg_a;
            p.marg.c[w.k] = w.marg_c;
            if let Some(index) = p.max_a.as_mut() {
                index.update(w.k, j, w.new_a);
            }
            if let Some(index) = p.max_c.as_mut() {
                index.update(w.k, j, w.new_c);
            }
        }

        // Maximum relative change of mean and stddev on s_j
        let delta = max_rel_diff(m_h, mpr_h).max(max_rel_diff(m_rho.sqrt(), mpr_rho.sqrt()));
        debug!("factor {j}: committed (delta {delta:.3e}, effective damping {damp})");
        UpdateStatus::Success {
            delta,
            eff_damp: damp,
        }
    }
}
