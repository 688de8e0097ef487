#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hyperparameters for a peak fit
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// The maximum number of optimizer iterations to attempt
    pub max_iter: usize,
    /// The relative chi-square change below which the fit is considered
    /// converged
    pub convergence: f64,
    /// The floor applied to the per-bin counting variance so that empty
    /// bins do not produce infinite weights
    pub variance_floor: f64,
}

impl FitConfig {
    /// The maximum number of optimizer iterations to attempt
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// The relative chi-square change below which the fit is considered
    /// converged
    pub fn convergence(mut self, convergence: f64) -> Self {
        self.convergence = convergence;
        self
    }

    /// The floor applied to the per-bin counting variance
    pub fn variance_floor(mut self, variance_floor: f64) -> Self {
        self.variance_floor = variance_floor;
        self
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            convergence: 1e-9,
            variance_floor: 1.0,
        }
    }
}

/// Describe the outcome of a fit
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitStatus {
    /// The weighted chi-square at the end of the optimization run
    pub chisquare: f64,
    /// Bins in the fit window minus estimated parameters
    pub degrees_of_freedom: usize,
    /// The number of iterations run
    pub iterations: usize,
    /// Whether the optimizer reached its convergence criterion within the
    /// iteration budget
    pub converged: bool,
    /// Whether the optimizer was able to make progress *at all*. When this
    /// is false the parameter values are the best attempt and should be
    /// treated with suspicion.
    pub success: bool,
}
