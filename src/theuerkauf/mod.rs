//! Multi-peak fitting with the Theuerkauf peak shape.
//!
//! This is the "standard" line shape for germanium detector spectra: a
//! Gaussian core with optional one-sided exponential tails and an optional
//! smooth step under the peak. An arbitrary number of
//! [`TheuerkaufPeak`]s plus a shared background are summed into one model
//! and fit against a spectrum window by weighted nonlinear least squares.
//!
//! The shape is described in appendix B of Jürgen Theuerkauf: *Die Analyse
//! von zwei- und mehrdimensionalen γγ-Koinzidenzspektren an Beispielen aus
//! Hochspinexperimenten in der Massengegend um 146Gd* (PhD thesis, IKP
//! Cologne, 1994).
//!
//! # Example
//!
//! ```rust
//! use gammafit::theuerkauf::{
//!     BackgroundSpec, FitArgs, Param, TheuerkaufFitter, TheuerkaufPeak,
//! };
//!
//! // a synthetic spectrum with one line at channel 60.5
//! let channels: Vec<f64> = (0..120).map(|i| i as f64 + 0.5).collect();
//! let counts: Vec<f64> = channels
//!     .iter()
//!     .map(|&x| 500.0 * (-(x - 60.5f64).powi(2) / 8.0).exp())
//!     .collect();
//! let data = FitArgs::from((channels, counts));
//!
//! let mut fitter = TheuerkaufFitter::new(30.0, 90.0).unwrap();
//! fitter.add_peak(TheuerkaufPeak::new(
//!     Param::free(58.0),
//!     Param::free(2000.0),
//!     Param::free(1.8),
//! ));
//! let status = fitter.fit(&data, BackgroundSpec::None).unwrap();
//! assert!(status.converged);
//! assert!((fitter.peak(0).pos() - 60.5).abs() < 0.1);
//!
//! // persist the result and bring it back later without re-optimizing
//! let snapshot = fitter.snapshot();
//! fitter.restore_snapshot(&snapshot).unwrap();
//! assert_eq!(fitter.chisquare(), snapshot.chisquare);
//! ```

mod background;
mod config;
mod data;
mod fitter;
mod param;
mod peak;

pub use background::{Background, PolyBackground};
pub use config::{FitConfig, FitStatus};
pub use data::FitArgs;
pub use fitter::{
    BackgroundSpec, BgFunc, FitError, FitSnapshot, ParamState, PeakSnapshot, SumFunc,
    TheuerkaufFitter,
};
pub use param::Param;
pub use peak::TheuerkaufPeak;

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    fn gaussian(x: f64, pos: f64, vol: f64, sigma: f64) -> f64 {
        let amplitude = vol / ((2.0 * std::f64::consts::PI).sqrt() * sigma);
        amplitude * (-(x - pos).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    /// Three well separated lines at 50, 100 and 150, sigma 2.0, no noise
    fn three_bump_spectrum() -> FitArgs<'static, 'static> {
        let channels: Vec<f64> = (0..200).map(|i| i as f64 + 0.5).collect();
        let counts: Vec<f64> = channels
            .iter()
            .map(|&x| {
                gaussian(x, 50.0, 5000.0, 2.0)
                    + gaussian(x, 100.0, 8000.0, 2.0)
                    + gaussian(x, 150.0, 3000.0, 2.0)
            })
            .collect();
        FitArgs::from((channels, counts))
    }

    #[test_log::test]
    fn test_three_peak_scenario() {
        let data = three_bump_spectrum();

        let mut fitter = TheuerkaufFitter::new(0.0, 200.0).unwrap();
        // deliberately added out of position order
        for init in [100.0, 50.0, 150.0] {
            fitter.add_peak(TheuerkaufPeak::new(
                Param::free(init),
                Param::free(1000.0),
                Param::fixed(2.0),
            ));
        }

        let status = fitter.fit(&data, BackgroundSpec::None).unwrap();
        assert!(status.converged, "fit did not converge: {status:?}");
        assert!(status.success);
        assert_eq!(status.degrees_of_freedom, 200 - 6);

        assert_eq!(fitter.num_peaks(), 3);
        let expected = [(50.0, 5000.0), (100.0, 8000.0), (150.0, 3000.0)];
        for (i, (pos, vol)) in expected.iter().enumerate() {
            let peak = fitter.peak(i);
            assert_is_close!(peak.pos(), *pos, 0.05, "position");
            assert_is_close!(peak.vol(), *vol, 0.01 * vol, "volume");
            assert!(peak.pos_error().is_finite() && peak.pos_error() > 0.0);
            assert_eq!(peak.sigma(), 2.0, "fixed sigma must not move");
            assert!(peak.sigma_error().is_nan());
        }

        // positions are reported in non-decreasing order
        let positions: Vec<f64> = fitter.peaks().map(|p| p.pos()).collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));

        // the composed model reproduces the data over the window
        let sum = fitter.sum_func();
        for (x, y) in data.iter().step_by(10) {
            assert_is_close!(sum.eval(x), y, 1.0, "model vs data");
        }
    }

    #[rstest::rstest]
    #[case(&[100.0, 50.0, 150.0])]
    #[case(&[50.0, 100.0, 150.0])]
    #[case(&[150.0, 100.0, 50.0])]
    fn test_reporting_order_is_insertion_independent(#[case] inits: &[f64]) {
        let data = three_bump_spectrum();

        let mut fitter = TheuerkaufFitter::new(0.0, 200.0).unwrap();
        for &init in inits {
            fitter.add_peak(TheuerkaufPeak::new(
                Param::free(init),
                Param::free(1000.0),
                Param::fixed(2.0),
            ));
        }
        fitter.fit(&data, BackgroundSpec::None).unwrap();

        let positions: Vec<f64> = fitter.peaks().map(|p| p.pos()).collect();
        assert!(
            positions.windows(2).all(|w| w[0] <= w[1]),
            "{positions:?} not sorted for insertion order {inits:?}"
        );
        assert_is_close!(positions[0], 50.0, 0.05, "first reported position");
    }

    #[test]
    fn test_refit_starts_from_previous_solution() {
        let data = three_bump_spectrum();

        let mut fitter = TheuerkaufFitter::new(30.0, 70.0).unwrap();
        fitter.add_peak(TheuerkaufPeak::new(
            Param::free(48.0),
            Param::free(2000.0),
            Param::fixed(2.0),
        ));

        let first = fitter.fit(&data, BackgroundSpec::None).unwrap();
        let pos = fitter.peak(0).pos();
        let vol = fitter.peak(0).vol();

        let second = fitter.fit(&data, BackgroundSpec::None).unwrap();
        assert!(second.converged);
        assert!(second.iterations <= first.iterations);
        assert_is_close!(fitter.peak(0).pos(), pos, 1e-4, "position after refit");
        assert_is_close!(fitter.peak(0).vol(), vol, 1.0, "volume after refit");
    }

    #[test_log::test]
    fn test_internal_polynomial_background() {
        let channels: Vec<f64> = (0..160).map(|i| i as f64 + 0.5).collect();
        let counts: Vec<f64> = channels
            .iter()
            .map(|&x| gaussian(x, 80.0, 5000.0, 2.0) + 10.0 + 0.05 * x)
            .collect();
        let data = FitArgs::from((channels, counts));

        let mut fitter = TheuerkaufFitter::new(0.0, 160.0).unwrap();
        fitter.add_peak(TheuerkaufPeak::new(
            Param::free(78.0),
            Param::free(4000.0),
            Param::fixed(2.0),
        ));
        let status = fitter.fit(&data, BackgroundSpec::Poly(1)).unwrap();
        assert!(status.converged);

        assert_is_close!(fitter.peak(0).pos(), 80.0, 0.05, "position");
        assert_is_close!(fitter.peak(0).vol(), 5000.0, 60.0, "volume");

        // the fitted polynomial reappears through the background view
        let bg = fitter.bg_func();
        assert_is_close!(bg.eval(20.0), 11.0, 0.5, "background at 20");
        assert_is_close!(bg.eval(140.0), 17.0, 0.5, "background at 140");

        // and it travels with the snapshot
        let snapshot = fitter.snapshot();
        let poly = snapshot.background.as_ref().expect("internal background");
        assert_eq!(poly.degree(), 1);
        assert_is_close!(poly.coeffs()[0], 10.0, 0.5, "constant coefficient");
        assert_is_close!(poly.coeffs()[1], 0.05, 0.01, "linear coefficient");
    }

    #[test]
    fn test_external_background_is_held_constant() {
        let channels: Vec<f64> = (0..120).map(|i| i as f64 + 0.5).collect();
        let counts: Vec<f64> = channels
            .iter()
            .map(|&x| gaussian(x, 60.0, 4000.0, 2.0) + 5.0)
            .collect();
        let data = FitArgs::from((channels, counts));

        let mut fitter = TheuerkaufFitter::new(0.0, 120.0).unwrap();
        fitter.add_peak(TheuerkaufPeak::new(
            Param::free(58.5),
            Param::free(3000.0),
            Param::fixed(2.0),
        ));
        let status = fitter
            .fit(
                &data,
                BackgroundSpec::External(Box::new(PolyBackground::new(vec![5.0]))),
            )
            .unwrap();

        assert!(status.converged);
        // 120 bins, 2 free peak parameters, 1 external background parameter
        assert_eq!(status.degrees_of_freedom, 117);
        assert_is_close!(fitter.peak(0).pos(), 60.0, 0.05, "position");
        assert_is_close!(fitter.peak(0).vol(), 4000.0, 40.0, "volume");
        assert_is_close!(fitter.bg_func().eval(30.0), 5.0, 1e-9, "background");
    }

    #[test_log::test]
    fn test_tailed_peak_fit() {
        let truth = TheuerkaufPeak::new(Param::fixed(80.0), Param::fixed(10000.0), Param::fixed(2.0))
            .with_left_tail(Param::fixed(2.5));

        let channels: Vec<f64> = (0..160).map(|i| i as f64 + 0.5).collect();
        let counts: Vec<f64> = channels.iter().map(|&x| truth.eval(x)).collect();
        let data = FitArgs::from((channels, counts));

        let mut fitter = TheuerkaufFitter::new(40.0, 120.0).unwrap();
        fitter.add_peak(
            TheuerkaufPeak::new(Param::free(79.5), Param::free(9000.0), Param::fixed(2.0))
                .with_left_tail(Param::free(3.0)),
        );
        let status = fitter.fit(&data, BackgroundSpec::None).unwrap();
        assert!(status.converged);

        let peak = fitter.peak(0);
        assert_is_close!(peak.pos(), 80.0, 0.05, "position");
        assert_is_close!(peak.vol(), 10000.0, 100.0, "volume");
        assert_is_close!(peak.left_tail(), 2.5, 0.1, "tail decay length");
        assert!(peak.left_tail_is_free());
    }

    #[test]
    fn test_insufficient_data_is_rejected() {
        let data = FitArgs::from((vec![1.0, 2.0], vec![5.0, 6.0]));
        let mut fitter = TheuerkaufFitter::new(0.0, 10.0).unwrap();
        fitter.add_peak(TheuerkaufPeak::new(
            Param::free(1.5),
            Param::free(10.0),
            Param::free(1.0),
        ));
        assert!(matches!(
            fitter.fit(&data, BackgroundSpec::None),
            Err(FitError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_peak_copy_taken_before_fit_is_unaffected() {
        let data = three_bump_spectrum();

        let peak = TheuerkaufPeak::new(Param::free(48.0), Param::free(2000.0), Param::fixed(2.0));
        let copy = peak.clone();

        let mut fitter = TheuerkaufFitter::new(30.0, 70.0).unwrap();
        fitter.add_peak(peak);
        fitter.fit(&data, BackgroundSpec::None).unwrap();

        assert_is_close!(fitter.peak(0).pos(), 50.0, 0.05, "fitted position");
        assert_eq!(copy.pos(), 48.0, "the copy must keep its pre-fit value");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_serde_round_trip() {
        let data = three_bump_spectrum();

        let mut fitter = TheuerkaufFitter::new(0.0, 200.0).unwrap();
        for init in [100.0, 50.0, 150.0] {
            fitter.add_peak(TheuerkaufPeak::new(
                Param::free(init),
                Param::free(1000.0),
                Param::fixed(2.0),
            ));
        }
        fitter.fit(&data, BackgroundSpec::Poly(0)).unwrap();

        let snapshot = fitter.snapshot();
        let payload = serde_json::to_string(&snapshot).unwrap();
        let recovered: FitSnapshot = serde_json::from_str(&payload).unwrap();
        assert_eq!(snapshot, recovered);

        let mut other = TheuerkaufFitter::new(0.0, 200.0).unwrap();
        for init in [100.0, 50.0, 150.0] {
            other.add_peak(TheuerkaufPeak::new(
                Param::free(init),
                Param::free(1000.0),
                Param::fixed(2.0),
            ));
        }
        other.restore_snapshot(&recovered).unwrap();
        assert_eq!(other.chisquare(), fitter.chisquare());
        assert_eq!(other.peak(0).pos(), fitter.peak(0).pos());
    }
}
