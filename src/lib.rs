//! `gammafit` is a library for fitting parametric peak shape models to
//! one-dimensional gamma-ray spectra, extracting peak positions, areas,
//! widths and shape parameters with uncertainties.
//!
//! The centerpiece is the [`theuerkauf`] module: the Theuerkauf peak shape
//! (a Gaussian core with optional one-sided exponential tails and an
//! optional smooth step) summed over any number of peaks plus a shared
//! background, solved by weighted nonlinear least squares against the bin
//! contents of a spectrum window. Fits can be persisted and restored
//! without re-running the optimizer.
//!
//! # Usage
//! ```
//! use gammafit::{BackgroundSpec, FitArgs, Param, TheuerkaufFitter, TheuerkaufPeak};
//!
//! // a synthetic spectrum: one line at channel 60.5 on a flat background
//! let channels: Vec<f64> = (0..120).map(|i| i as f64 + 0.5).collect();
//! let counts: Vec<f64> = channels
//!     .iter()
//!     .map(|&x| 20.0 + 500.0 * (-(x - 60.5f64).powi(2) / 8.0).exp())
//!     .collect();
//! let data = FitArgs::from((channels, counts));
//!
//! let mut fitter = TheuerkaufFitter::new(30.0, 90.0).unwrap();
//! fitter.add_peak(TheuerkaufPeak::new(
//!     Param::free(58.0),   // position, free with a starting guess
//!     Param::free(2000.0), // volume
//!     Param::free(1.8),    // sigma
//! ));
//!
//! let status = fitter.fit(&data, BackgroundSpec::Poly(0)).unwrap();
//! assert!(status.converged);
//!
//! let peak = fitter.peak(0);
//! assert!((peak.pos() - 60.5).abs() < 0.1);
//! println!("pos = {} +- {}", peak.pos(), peak.pos_error());
//! ```

pub mod optimize;
pub mod theuerkauf;

pub use crate::theuerkauf::{
    Background, BackgroundSpec, FitArgs, FitConfig, FitError, FitSnapshot, FitStatus, Param,
    PolyBackground, TheuerkaufFitter, TheuerkaufPeak,
};
