use super::representation::{FactorizedRep, PrecisionRep};

/// Aggregate marginal parameters over the variables: pi_i and beta_i.
///
/// Ground truth at every quiescent point is the reconstruction sum
/// `pi_i = sum_j pi_ji`, `beta_i = sum_j beta_ji`. The vectors may
/// carry contributions from representations outside this crate's view
/// (a model can split its potentials across several drivers sharing one
/// marginal state), so they are constructed explicitly and mutated only
/// by the update driver.
#[derive(Clone, Debug, PartialEq)]
pub struct Marginals {
    pub(crate) beta: Vec<f64>,
    pub(crate) pi: Vec<f64>,
}

impl Marginals {
    pub fn zeros(num_variables: usize) -> Self {
        Marginals {
            beta: vec![0.0; num_variables],
            pi: vec![0.0; num_variables],
        }
    }

    /// Explicit vectors; lengths are validated by the driver.
    pub fn from_parts(beta: Vec<f64>, pi: Vec<f64>) -> Self {
        Marginals { beta, pi }
    }

    /// Reconstruction sums over the current messages of `rep`.
    pub fn from_messages(rep: &FactorizedRep) -> Self {
        let mut out = Self::zeros(rep.num_variables());
        for j in 0..rep.num_potentials() {
            let row = rep.row(j);
            for ii in 0..row.vars.len() {
                let i = row.vars[ii];
                out.beta[i] += row.beta[ii];
                out.pi[i] += row.pi[ii];
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.pi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pi.is_empty()
    }

    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    pub fn pi(&self) -> &[f64] {
        &self.pi
    }
}

/// Aggregate (a_k, c_k) over the precision variables of the bivariate
/// extension.
#[derive(Clone, Debug, PartialEq)]
pub struct PrecMarginals {
    pub(crate) a: Vec<f64>,
    pub(crate) c: Vec<f64>,
}

impl PrecMarginals {
    pub fn zeros(num_prec_vars: usize) -> Self {
        PrecMarginals {
            a: vec![0.0; num_prec_vars],
            c: vec![0.0; num_prec_vars],
        }
    }

    pub fn from_parts(a: Vec<f64>, c: Vec<f64>) -> Self {
        PrecMarginals { a, c }
    }

    pub fn from_messages(prec: &PrecisionRep) -> Self {
        let mut out = Self::zeros(prec.num_prec_vars());
        for j in 0..prec.num_potentials() {
            let k = prec.prec_var(j);
            out.a[k] += prec.a(j);
            out.c[k] += prec.c(j);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn c(&self) -> &[f64] {
        &self.c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstruction_sums_messages_per_variable() {
        let mut rep = FactorizedRep::from_rows(
            3,
            vec![
                (vec![0, 1], vec![1.0, -1.0]),
                (vec![1, 2], vec![1.0, -1.0]),
            ],
        )
        .unwrap();
        rep.row_mut(0).pi.copy_from_slice(&[0.5, 0.25]);
        rep.row_mut(0).beta.copy_from_slice(&[1.0, 2.0]);
        rep.row_mut(1).pi.copy_from_slice(&[0.75, 0.125]);
        rep.row_mut(1).beta.copy_from_slice(&[-2.0, 4.0]);

        let marg = Marginals::from_messages(&rep);
        assert_eq!(marg.pi(), &[0.5, 1.0, 0.125]);
        assert_eq!(marg.beta(), &[1.0, 0.0, 4.0]);
    }

    #[test]
    fn precision_reconstruction_follows_the_map() {
        let prec = PrecisionRep::from_parts(
            2,
            vec![0, 1, 0],
            vec![1.0, 2.0, 4.0],
            vec![0.5, 0.25, 0.125],
        )
        .unwrap();
        let marg = PrecMarginals::from_messages(&prec);
        assert_eq!(marg.a(), &[5.0, 2.0]);
        assert_eq!(marg.c(), &[0.625, 0.25]);
    }
}
