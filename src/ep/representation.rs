use thiserror::Error;

use crate::data_structures::max_value_index::MaxValueIndex;

#[derive(Error, Debug, PartialEq)]
pub enum RepError {
    #[error("factor {factor}: variable index {variable} out of range for {num_variables} variables")]
    VariableOutOfRange {
        factor: usize,
        variable: usize,
        num_variables: usize,
    },
    #[error("factor {factor}: variable {variable} appears more than once in the support set")]
    DuplicateVariable { factor: usize, variable: usize },
    #[error("factor {factor} has an empty support set")]
    EmptySupport { factor: usize },
    #[error("{name}: expected {expected} values, got {got}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("factor {factor}: precision variable {prec_var} out of range for {num_prec_vars}")]
    PrecVarOutOfRange {
        factor: usize,
        prec_var: usize,
        num_prec_vars: usize,
    },
}

/// Shared read view of one factor row.
pub struct FactorRow<'a> {
    pub vars: &'a [usize],
    pub coeff: &'a [f64],
    pub beta: &'a [f64],
    pub pi: &'a [f64],
}

/// Row view with mutable message parameters. The support set and the
/// coefficients stay immutable after construction.
pub struct FactorRowMut<'a> {
    pub vars: &'a [usize],
    pub coeff: &'a [f64],
    pub beta: &'a mut [f64],
    pub pi: &'a mut [f64],
}

/// Row-oriented sparse storage of the design matrix B together with the
/// per-entry message parameters (pi_ji, beta_ji).
///
/// One row-offset vector is shared by four flat arrays (variable
/// indices, coefficients, beta messages, pi messages); entry `ii` of
/// row `j` addresses variable `V_j[ii]` in all of them.
#[derive(Debug)]
pub struct FactorizedRep {
    num_variables: usize,
    row_offset: Vec<usize>,
    var_index: Vec<usize>,
    coeff: Vec<f64>,
    msg_beta: Vec<f64>,
    msg_pi: Vec<f64>,
}

impl FactorizedRep {
    /// Builds the representation from per-factor (support set,
    /// coefficient) rows, with all messages zero.
    pub fn from_rows(
        num_variables: usize,
        rows: Vec<(Vec<usize>, Vec<f64>)>,
    ) -> Result<Self, RepError> {
        let row_sizes: Vec<usize> = rows.iter().map(|(vars, _)| vars.len()).collect();
        let mut var_index = Vec::with_capacity(row_sizes.iter().sum());
        let mut coeff = Vec::with_capacity(var_index.capacity());
        for (vars, b) in rows {
            if b.len() != vars.len() {
                return Err(RepError::LengthMismatch {
                    name: "coefficients",
                    expected: vars.len(),
                    got: b.len(),
                });
            }
            var_index.extend(vars);
            coeff.extend(b);
        }
        let nnz = var_index.len();
        Self::from_parts(
            num_variables,
            &row_sizes,
            var_index,
            coeff,
            vec![0.0; nnz],
            vec![0.0; nnz],
        )
    }

    /// Builds the representation from the flat transfer arrays: row
    /// sizes, concatenated support sets and coefficients, and the
    /// message arrays in the same entry order.
    pub fn from_parts(
        num_variables: usize,
        row_sizes: &[usize],
        var_index: Vec<usize>,
        coeff: Vec<f64>,
        msg_beta: Vec<f64>,
        msg_pi: Vec<f64>,
    ) -> Result<Self, RepError> {
        let mut row_offset = Vec::with_capacity(row_sizes.len() + 1);
        row_offset.push(0);
        for (j, sz) in row_sizes.iter().enumerate() {
            if *sz == 0 {
                return Err(RepError::EmptySupport { factor: j });
            }
            row_offset.push(row_offset[j] + sz);
        }
        let nnz = *row_offset.last().unwrap_or(&0);
        for (name, got) in [
            ("variable indices", var_index.len()),
            ("coefficients", coeff.len()),
            ("beta messages", msg_beta.len()),
            ("pi messages", msg_pi.len()),
        ] {
            if got != nnz {
                return Err(RepError::LengthMismatch {
                    name,
                    expected: nnz,
                    got,
                });
            }
        }
        for j in 0..row_sizes.len() {
            let row = &var_index[row_offset[j]..row_offset[j + 1]];
            for (ii, &i) in row.iter().enumerate() {
                if i >= num_variables {
                    return Err(RepError::VariableOutOfRange {
                        factor: j,
                        variable: i,
                        num_variables,
                    });
                }
                if row[..ii].contains(&i) {
                    return Err(RepError::DuplicateVariable {
                        factor: j,
                        variable: i,
                    });
                }
            }
        }
        Ok(FactorizedRep {
            num_variables,
            row_offset,
            var_index,
            coeff,
            msg_beta,
            msg_pi,
        })
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn num_potentials(&self) -> usize {
        self.row_offset.len() - 1
    }

    pub fn row_size(&self, j: usize) -> usize {
        self.row_offset[j + 1] - self.row_offset[j]
    }

    pub fn max_row_size(&self) -> usize {
        (0..self.num_potentials())
            .map(|j| self.row_size(j))
            .max()
            .unwrap_or(0)
    }

    pub fn row(&self, j: usize) -> FactorRow<'_> {
        let r = self.row_offset[j]..self.row_offset[j + 1];
        FactorRow {
            vars: &self.var_index[r.clone()],
            coeff: &self.coeff[r.clone()],
            beta: &self.msg_beta[r.clone()],
            pi: &self.msg_pi[r],
        }
    }

    pub fn row_mut(&mut self, j: usize) -> FactorRowMut<'_> {
        let r = self.row_offset[j]..self.row_offset[j + 1];
        FactorRowMut {
            vars: &self.var_index[r.clone()],
            coeff: &self.coeff[r.clone()],
            beta: &mut self.msg_beta[r.clone()],
            pi: &mut self.msg_pi[r],
        }
    }

    // Flat views in entry order, matching the transfer layout
    pub fn row_sizes(&self) -> Vec<usize> {
        (0..self.num_potentials()).map(|j| self.row_size(j)).collect()
    }

    pub fn var_indices(&self) -> &[usize] {
        &self.var_index
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeff
    }

    pub fn messages_beta(&self) -> &[f64] {
        &self.msg_beta
    }

    pub fn messages_pi(&self) -> &[f64] {
        &self.msg_pi
    }

    /// Index over kappa_i = max_j pi_ji, seeded from the current
    /// messages.
    pub fn max_pi_index(&self) -> MaxValueIndex {
        let entries = (0..self.num_potentials()).flat_map(|j| {
            let row = self.row(j);
            row.vars
                .iter()
                .zip(row.pi.iter())
                .map(move |(&i, &pi)| (i, j, pi))
                .collect::<Vec<_>>()
        });
        MaxValueIndex::new(self.num_variables, entries)
    }
}

/// Bivariate precision extension: the fixed map k(j) and the per-factor
/// message parameters (a_j, c_j) on the precision variables.
#[derive(Debug)]
pub struct PrecisionRep {
    num_prec_vars: usize,
    prec_var: Vec<usize>,
    msg_a: Vec<f64>,
    msg_c: Vec<f64>,
}

impl PrecisionRep {
    /// Map k(j) with all messages zero.
    pub fn new(num_prec_vars: usize, prec_var: Vec<usize>) -> Result<Self, RepError> {
        let m = prec_var.len();
        Self::from_parts(num_prec_vars, prec_var, vec![0.0; m], vec![0.0; m])
    }

    pub fn from_parts(
        num_prec_vars: usize,
        prec_var: Vec<usize>,
        msg_a: Vec<f64>,
        msg_c: Vec<f64>,
    ) -> Result<Self, RepError> {
        let m = prec_var.len();
        for (name, got) in [("a messages", msg_a.len()), ("c messages", msg_c.len())] {
            if got != m {
                return Err(RepError::LengthMismatch {
                    name,
                    expected: m,
                    got,
                });
            }
        }
        for (j, &k) in prec_var.iter().enumerate() {
            if k >= num_prec_vars {
                return Err(RepError::PrecVarOutOfRange {
                    factor: j,
                    prec_var: k,
                    num_prec_vars,
                });
            }
        }
        Ok(PrecisionRep {
            num_prec_vars,
            prec_var,
            msg_a,
            msg_c,
        })
    }

    pub fn num_potentials(&self) -> usize {
        self.prec_var.len()
    }

    pub fn num_prec_vars(&self) -> usize {
        self.num_prec_vars
    }

    pub fn prec_var(&self, j: usize) -> usize {
        self.prec_var[j]
    }

    pub fn a(&self, j: usize) -> f64 {
        self.msg_a[j]
    }

    pub fn c(&self, j: usize) -> f64 {
        self.msg_c[j]
    }

    pub fn tau_row_mut(&mut self, j: usize) -> (&mut f64, &mut f64) {
        (&mut self.msg_a[j], &mut self.msg_c[j])
    }

    pub fn prec_vars(&self) -> &[usize] {
        &self.prec_var
    }

    pub fn messages_a(&self) -> &[f64] {
        &self.msg_a
    }

    pub fn messages_c(&self) -> &[f64] {
        &self.msg_c
    }

    pub fn max_a_index(&self) -> MaxValueIndex {
        MaxValueIndex::new(
            self.num_prec_vars,
            self.prec_var
                .iter()
                .zip(self.msg_a.iter())
                .enumerate()
                .map(|(j, (&k, &a))| (k, j, a)),
        )
    }

    pub fn max_c_index(&self) -> MaxValueIndex {
        MaxValueIndex::new(
            self.num_prec_vars,
            self.prec_var
                .iter()
                .zip(self.msg_c.iter())
                .enumerate()
                .map(|(j, (&k, &c))| (k, j, c)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_address_the_flat_arrays() {
        let rep = FactorizedRep::from_rows(
            3,
            vec![
                (vec![0, 2], vec![1.0, -1.0]),
                (vec![1], vec![2.0]),
                (vec![0, 1, 2], vec![0.5, 0.5, 0.5]),
            ],
        )
        .unwrap();

        assert_eq!(rep.num_variables(), 3);
        assert_eq!(rep.num_potentials(), 3);
        assert_eq!(rep.row_size(0), 2);
        assert_eq!(rep.max_row_size(), 3);

        let row = rep.row(2);
        assert_eq!(row.vars, &[0, 1, 2]);
        assert_eq!(row.coeff, &[0.5, 0.5, 0.5]);
        assert!(row.pi.iter().all(|&pi| pi == 0.0));
    }

    #[test]
    fn row_mut_only_touches_messages() {
        let mut rep =
            FactorizedRep::from_rows(2, vec![(vec![0, 1], vec![1.0, 1.0])]).unwrap();
        {
            let row = rep.row_mut(0);
            row.pi[0] = 2.0;
            row.beta[1] = -1.0;
        }
        assert_eq!(rep.row(0).pi, &[2.0, 0.0]);
        assert_eq!(rep.row(0).beta, &[0.0, -1.0]);
        assert_eq!(rep.row(0).coeff, &[1.0, 1.0]);
    }

    #[test]
    fn construction_rejects_bad_rows() {
        assert_eq!(
            FactorizedRep::from_rows(2, vec![(vec![0, 2], vec![1.0, 1.0])]).unwrap_err(),
            RepError::VariableOutOfRange {
                factor: 0,
                variable: 2,
                num_variables: 2,
            }
        );
        assert_eq!(
            FactorizedRep::from_rows(2, vec![(vec![1, 1], vec![1.0, 1.0])]).unwrap_err(),
            RepError::DuplicateVariable {
                factor: 0,
                variable: 1,
            }
        );
        assert_eq!(
            FactorizedRep::from_rows(2, vec![(vec![], vec![])]).unwrap_err(),
            RepError::EmptySupport { factor: 0 }
        );
    }

    #[test]
    fn max_pi_index_reflects_messages() {
        let mut rep = FactorizedRep::from_rows(
            2,
            vec![
                (vec![0, 1], vec![1.0, 1.0]),
                (vec![0], vec![1.0]),
            ],
        )
        .unwrap();
        rep.row_mut(0).pi.copy_from_slice(&[3.0, 1.5]);
        rep.row_mut(1).pi[0] = 5.0;

        let index = rep.max_pi_index();
        assert_eq!(index.max(0), 5.0);
        assert_eq!(index.max_source(0), Some(1));
        assert_eq!(index.max(1), 1.5);
    }

    #[test]
    fn precision_rep_validates_the_map() {
        assert!(PrecisionRep::new(2, vec![0, 1, 1]).is_ok());
        assert_eq!(
            PrecisionRep::new(1, vec![0, 1]).unwrap_err(),
            RepError::PrecVarOutOfRange {
                factor: 1,
                prec_var: 1,
                num_prec_vars: 1,
            }
        );
    }
}
