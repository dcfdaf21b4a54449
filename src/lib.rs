// Expectation propagation with a factorized message backbone:
// approximate inference for p(x) ~ prod_j t_j(s_j) with s = B x,
// optionally extended to bivariate precision potentials
// t_j(s_j, tau_k(j)). EP schedules (round-robin, randomized,
// convergence control) are a thin loop on top of the sequential update
// primitive and stay outside this crate.

pub mod data_structures {
    pub mod max_value_index;
}

pub mod ep {
    pub mod batch;
    pub mod driver;
    pub mod marginals;
    pub mod potential;
    pub mod representation;
    pub mod wire;
}

pub use data_structures::max_value_index::MaxValueIndex;
pub use ep::driver::{DriverError, EpDriver, UpdateStatus};
pub use ep::marginals::{Marginals, PrecMarginals};
pub use ep::potential::{
    CavityInput, GaussianSites, PotentialGroup, PotentialOracle, TiltOutput,
};
pub use ep::representation::{FactorizedRep, PrecisionRep, RepError};
