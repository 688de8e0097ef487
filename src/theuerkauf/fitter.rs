#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::optimize::{self, LmConfig};

use super::background::{Background, PolyBackground};
use super::config::{FitConfig, FitStatus};
use super::data::FitArgs;
use super::peak::TheuerkaufPeak;

/// Errors for structural misuse of the fitter. Convergence trouble is not
/// an error; it is reported through [`FitStatus`].
#[derive(Debug, Error)]
pub enum FitError {
    #[error("invalid fit range: min {min} must be less than max {max}")]
    InvalidRange { min: f64, max: f64 },

    #[error(
        "fit range [{min}, {max}] covers {points} bins but the model has {params} free parameters"
    )]
    InsufficientData {
        min: f64,
        max: f64,
        points: usize,
        params: usize,
    },

    #[error("restore payload describes {got} peaks but the fitter holds {expected}")]
    PeakCountMismatch { expected: usize, got: usize },

    #[error("restore payload for peak {index} holds {got} parameters, expected {expected}")]
    ParamCountMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
}

/// Which background model to compose with the peak sum during a fit.
#[derive(Debug)]
pub enum BackgroundSpec {
    /// No background term at all
    None,
    /// An internal polynomial of the given degree, fit simultaneously with
    /// the peaks
    Poly(usize),
    /// An externally fitted background, held constant during the peak fit
    External(Box<dyn Background>),
}

/// One (value, error) pair of a persisted fit result
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamState {
    pub value: f64,
    pub error: f64,
}

/// The persisted state of one peak: the (value, error) pairs of its free
/// parameters, in declared order (position, volume, sigma, then any of
/// tail-left, tail-right, step height, step width the peak carries as free).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakSnapshot {
    pub params: Vec<ParamState>,
}

/// A complete persisted fit result: per-peak parameter states in insertion
/// order, the chi-square, and the internal polynomial background when one
/// was fit. An external background is opaque to the fitter and must be
/// re-supplied by the caller on restore.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitSnapshot {
    pub chisquare: f64,
    pub peaks: Vec<PeakSnapshot>,
    pub background: Option<PolyBackground>,
}

/// Fits a sum of [`TheuerkaufPeak`]s plus a background to a spectrum window.
///
/// Peaks are stored in the order they were added, which keeps peak identity
/// (and the layout of [`FitSnapshot`]s) stable; the *reporting* order of
/// [`peak`](TheuerkaufFitter::peak) is sorted by fitted position through an
/// index permutation recomputed after every fit or restore.
///
/// The fitter owns in-flight optimizer bindings and is deliberately not
/// `Clone`; use one fitter per spectrum region.
#[derive(Debug)]
pub struct TheuerkaufFitter {
    min: f64,
    max: f64,
    peaks: Vec<TheuerkaufPeak>,
    order: Vec<usize>,
    background: Option<Box<dyn Background>>,
    int_bg: Option<PolyBackground>,
    chisquare: f64,
    status: Option<FitStatus>,
    debug_show_initial: bool,
}

impl TheuerkaufFitter {
    /// Create a fitter over the window `[min, max]`. The range is fixed for
    /// the fitter's lifetime and must be non-empty.
    pub fn new(min: f64, max: f64) -> Result<Self, FitError> {
        if !(min < max) {
            return Err(FitError::InvalidRange { min, max });
        }
        Ok(Self {
            min,
            max,
            peaks: Vec::new(),
            order: Vec::new(),
            background: None,
            int_bg: None,
            chisquare: f64::NAN,
            status: None,
            debug_show_initial: false,
        })
    }

    /// Log the initial parameter vector before optimization, for diagnosing
    /// divergent fits.
    pub fn debug_show_initial(mut self, on: bool) -> Self {
        self.debug_show_initial = on;
        self
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Append a peak. Peaks may be added at any time before fitting;
    /// insertion order is preserved internally.
    pub fn add_peak(&mut self, peak: TheuerkaufPeak) {
        self.order.push(self.peaks.len());
        self.peaks.push(peak);
    }

    pub fn num_peaks(&self) -> usize {
        self.peaks.len()
    }

    /// The `i`-th peak in position-sorted order (after a fit or restore;
    /// insertion order before).
    pub fn peak(&self, i: usize) -> &TheuerkaufPeak {
        &self.peaks[self.order[i]]
    }

    /// Iterate peaks in position-sorted order
    pub fn peaks(&self) -> impl Iterator<Item = &TheuerkaufPeak> {
        self.order.iter().map(|&i| &self.peaks[i])
    }

    /// The chi-square of the last fit or restore, NaN before either
    pub fn chisquare(&self) -> f64 {
        self.chisquare
    }

    /// The status of the last fit. `None` before any fit and after a
    /// restore, which never runs the optimizer.
    pub fn status(&self) -> Option<FitStatus> {
        self.status
    }

    /// Fit with default [`FitConfig`] settings
    pub fn fit(
        &mut self,
        data: &FitArgs<'_, '_>,
        background: BackgroundSpec,
    ) -> Result<FitStatus, FitError> {
        self.fit_with(data, background, FitConfig::default())
    }

    /// Run the weighted nonlinear least-squares fit of all peaks plus the
    /// requested background against `data`, restricted to the fit range.
    ///
    /// Bins are weighted by inverse counting variance, floored by
    /// [`FitConfig::variance_floor`] so empty bins stay finite. On return
    /// the free parameters of every peak hold the solution values and
    /// 1-sigma errors, and peaks are reported in position order. Repeated
    /// calls re-run the optimization from the current parameter values.
    pub fn fit_with(
        &mut self,
        data: &FitArgs<'_, '_>,
        background: BackgroundSpec,
        config: FitConfig,
    ) -> Result<FitStatus, FitError> {
        let int_bg_deg = match background {
            BackgroundSpec::None => {
                self.background = None;
                None
            }
            BackgroundSpec::Poly(deg) => {
                self.background = None;
                Some(deg)
            }
            BackgroundSpec::External(bg) => {
                self.background = Some(bg);
                None
            }
        };
        self.int_bg = None;

        let window = data.restrict(self.min, self.max);
        let points = window.len();

        // Slot table: peaks in insertion order, each peak's parameters in
        // declared order, internal background coefficients last.
        let mut init = Vec::new();
        let mut steps = Vec::new();
        for peak in self.peaks.iter_mut() {
            for param in peak.params_mut() {
                if param.is_free() {
                    param.bind(init.len());
                    init.push(param.value());
                    steps.push(param.step());
                }
            }
        }
        let n_peak_params = init.len();
        let n_bg_params = int_bg_deg.map(|deg| deg + 1).unwrap_or(0);
        init.resize(n_peak_params + n_bg_params, 0.0);
        steps.resize(n_peak_params + n_bg_params, 0.0);

        if points <= init.len() {
            return Err(FitError::InsufficientData {
                min: self.min,
                max: self.max,
                points,
                params: init.len(),
            });
        }

        if self.debug_show_initial {
            log::debug!("initial parameters: {init:?}");
        }

        let weights: Vec<f64> = window
            .counts
            .iter()
            .map(|&c| 1.0 / c.max(config.variance_floor))
            .collect();

        let peaks = &self.peaks;
        let external = self.background.as_deref();
        let model = |x: f64, p: &[f64]| -> f64 {
            let mut sum = external.map(|bg| bg.eval(x)).unwrap_or(0.0);
            if n_bg_params > 0 {
                sum += p[n_peak_params..].iter().rev().fold(0.0, |acc, &c| acc * x + c);
            }
            for peak in peaks {
                sum += peak.eval_vec(x, p);
            }
            sum
        };

        let lm_config = LmConfig {
            max_iter: config.max_iter,
            convergence: config.convergence,
            ..LmConfig::default()
        };
        let fit = optimize::least_squares(
            model,
            &window.channel,
            &window.counts,
            &weights,
            &init,
            &steps,
            &lm_config,
        );

        for peak in self.peaks.iter_mut() {
            for param in peak.params_mut() {
                if let Some(slot) = param.slot() {
                    param.update(fit.params[slot], fit.errors[slot]);
                }
            }
        }

        if n_bg_params > 0 {
            self.int_bg = Some(PolyBackground::with_errors(
                fit.params[n_peak_params..].to_vec(),
                fit.errors[n_peak_params..].to_vec(),
            ));
        }

        let external_params = self
            .background
            .as_ref()
            .map(|bg| bg.num_params())
            .unwrap_or(0);
        let status = FitStatus {
            chisquare: fit.chisquare,
            degrees_of_freedom: (points - fit.params.len()).saturating_sub(external_params),
            iterations: fit.iterations,
            converged: fit.converged,
            success: fit.success,
        };
        self.chisquare = fit.chisquare;
        self.status = Some(status);
        self.sort_by_position();
        Ok(status)
    }

    /// Reconstruct a previously computed fit without running the optimizer.
    ///
    /// `snapshots` must hold one entry per peak, in insertion order, each
    /// with exactly as many (value, error) pairs as the peak has free
    /// parameters; anything else is rejected before any parameter is
    /// touched. The background, if any, is installed as-is and the
    /// chi-square recorded verbatim.
    pub fn restore(
        &mut self,
        background: Option<Box<dyn Background>>,
        snapshots: &[PeakSnapshot],
        chisquare: f64,
    ) -> Result<(), FitError> {
        if snapshots.len() != self.peaks.len() {
            return Err(FitError::PeakCountMismatch {
                expected: self.peaks.len(),
                got: snapshots.len(),
            });
        }
        for (index, (peak, snapshot)) in self.peaks.iter().zip(snapshots).enumerate() {
            let expected = peak.params().iter().filter(|p| p.is_free()).count();
            if snapshot.params.len() != expected {
                return Err(FitError::ParamCountMismatch {
                    index,
                    expected,
                    got: snapshot.params.len(),
                });
            }
        }

        for (peak, snapshot) in self.peaks.iter_mut().zip(snapshots) {
            let free = peak.params_mut().into_iter().filter(|p| p.is_free());
            for (param, state) in free.zip(&snapshot.params) {
                param.restore(state.value, state.error);
            }
        }

        self.background = background;
        self.int_bg = None;
        self.chisquare = chisquare;
        self.status = None;
        self.sort_by_position();
        Ok(())
    }

    /// [`restore`](TheuerkaufFitter::restore) from a [`FitSnapshot`],
    /// reinstating the internal polynomial background it carries.
    pub fn restore_snapshot(&mut self, snapshot: &FitSnapshot) -> Result<(), FitError> {
        self.restore(None, &snapshot.peaks, snapshot.chisquare)?;
        self.int_bg = snapshot.background.clone();
        Ok(())
    }

    /// Capture the current fit state in the persisted layout consumed by
    /// [`restore_snapshot`](TheuerkaufFitter::restore_snapshot).
    pub fn snapshot(&self) -> FitSnapshot {
        FitSnapshot {
            chisquare: self.chisquare,
            peaks: self
                .peaks
                .iter()
                .map(|peak| PeakSnapshot {
                    params: peak
                        .params()
                        .iter()
                        .filter(|p| p.is_free())
                        .map(|p| ParamState {
                            value: p.value(),
                            error: p.error(),
                        })
                        .collect(),
                })
                .collect(),
            background: self.int_bg.clone(),
        }
    }

    /// The composed total model: background plus every peak, steps included
    pub fn sum_func(&self) -> SumFunc<'_> {
        SumFunc { fitter: self }
    }

    /// The background-side sum: the background plus every peak's step
    /// contribution, which belongs under the peaks rather than inside their
    /// volumes.
    pub fn bg_func(&self) -> BgFunc<'_> {
        BgFunc { fitter: self }
    }

    fn background_at(&self, x: f64) -> f64 {
        let mut sum = 0.0;
        if let Some(bg) = &self.background {
            sum += bg.eval(x);
        }
        if let Some(poly) = &self.int_bg {
            sum += poly.eval(x);
        }
        sum
    }

    /// Recompute the reporting permutation from a snapshot of current
    /// positions; ties fall back to insertion order so the result is
    /// reproducible.
    fn sort_by_position(&mut self) {
        let pos: Vec<f64> = self.peaks.iter().map(|p| p.pos()).collect();
        self.order = (0..self.peaks.len()).collect();
        self.order
            .sort_by(|&a, &b| pos[a].total_cmp(&pos[b]).then(a.cmp(&b)));
    }
}

/// Borrowed view evaluating the fitter's composed total model from its
/// current parameter state.
#[derive(Debug, Clone, Copy)]
pub struct SumFunc<'a> {
    fitter: &'a TheuerkaufFitter,
}

impl SumFunc<'_> {
    pub fn eval(&self, x: f64) -> f64 {
        self.fitter.background_at(x)
            + self
                .fitter
                .peaks
                .iter()
                .map(|peak| peak.eval(x))
                .sum::<f64>()
    }
}

/// Borrowed view evaluating the background-side sum (background plus peak
/// steps) from the fitter's current parameter state.
#[derive(Debug, Clone, Copy)]
pub struct BgFunc<'a> {
    fitter: &'a TheuerkaufFitter,
}

impl BgFunc<'_> {
    pub fn eval(&self, x: f64) -> f64 {
        self.fitter.background_at(x)
            + self
                .fitter
                .peaks
                .iter()
                .map(|peak| peak.eval_step(x))
                .sum::<f64>()
    }
}
