use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A background model the peak fitter can compose with its peak sum.
///
/// An externally supplied background is held constant while the peaks are
/// fit; it is expected to have been estimated beforehand over a region
/// around the fit window. [`num_params`](Background::num_params) reports
/// how many free parameters that estimate consumed, which enters the
/// degrees-of-freedom bookkeeping of the peak fit.
pub trait Background: Debug {
    /// Evaluate the background at `x`
    fn eval(&self, x: f64) -> f64;

    /// The number of free parameters this background was fitted with
    fn num_params(&self) -> usize;
}

/// A polynomial background with coefficients in ascending power order.
///
/// Produced by [`TheuerkaufFitter`](crate::theuerkauf::TheuerkaufFitter)
/// when an internal polynomial background is requested, in which case the
/// coefficients were fit simultaneously with the peaks, or constructed
/// directly when restoring a persisted fit.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolyBackground {
    coeffs: Vec<f64>,
    errors: Vec<f64>,
}

impl PolyBackground {
    pub fn new(coeffs: Vec<f64>) -> Self {
        let errors = vec![f64::NAN; coeffs.len()];
        Self { coeffs, errors }
    }

    pub(crate) fn with_errors(coeffs: Vec<f64>, errors: Vec<f64>) -> Self {
        assert_eq!(coeffs.len(), errors.len());
        Self { coeffs, errors }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// 1-sigma errors paired with [`coeffs`](PolyBackground::coeffs). NaN
    /// when the coefficients did not come out of a fit.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }
}

impl Background for PolyBackground {
    fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    fn num_params(&self) -> usize {
        self.coeffs.len()
    }
}
