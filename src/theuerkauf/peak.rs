use std::cell::Cell;
use std::f64::consts::{PI, SQRT_2};

use libm::erf;

use super::param::Param;

/// The classic HPGe detector line shape: a Gaussian core with optional
/// one-sided exponential tails and an optional smooth step beneath the peak.
///
/// The tails model incomplete charge collection and meet the core with
/// continuous value and first derivative at a breakpoint set by the tail
/// decay length. The step approximates the Compton contribution that only
/// exists on one side of the line. Which features a peak carries is decided
/// at construction and never changes afterwards.
///
/// The peak is parameterized by its integral ("volume") rather than its
/// amplitude; the conversion factor depends on sigma and the tail decay
/// lengths and is cached because it involves the error function.
#[derive(Debug, Clone)]
pub struct TheuerkaufPeak {
    pub(crate) pos: Param,
    pub(crate) vol: Param,
    pub(crate) sigma: Param,
    pub(crate) tl: Param,
    pub(crate) tr: Param,
    pub(crate) sh: Param,
    pub(crate) sw: Param,
    has_left_tail: bool,
    has_right_tail: bool,
    has_step: bool,
    norm_cache: Cell<Option<NormCache>>,
}

/// The (sigma, tail-left, tail-right) triple a normalization constant was
/// computed from, compared by value before every reuse.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NormCache {
    sigma: f64,
    tl: f64,
    tr: f64,
    norm: f64,
}

impl TheuerkaufPeak {
    /// A pure Gaussian peak with the given position, volume and width.
    /// Tails and step are added with the `with_*` builder methods.
    pub fn new(pos: Param, vol: Param, sigma: Param) -> Self {
        Self {
            pos,
            vol,
            sigma,
            tl: Param::none(),
            tr: Param::none(),
            sh: Param::none(),
            sw: Param::none(),
            has_left_tail: false,
            has_right_tail: false,
            has_step: false,
            norm_cache: Cell::new(None),
        }
    }

    /// Enable the low-energy exponential tail with decay length `tl`.
    /// Passing [`Param::none`] leaves the tail off.
    pub fn with_left_tail(mut self, tl: Param) -> Self {
        self.has_left_tail = !tl.is_unused();
        self.tl = tl;
        self
    }

    /// Enable the high-energy exponential tail with decay length `tr`.
    pub fn with_right_tail(mut self, tr: Param) -> Self {
        self.has_right_tail = !tr.is_unused();
        self.tr = tr;
        self
    }

    /// Enable the step with relative height `height` and width `width`.
    /// Both must be supplied for the step to take effect.
    pub fn with_step(mut self, height: Param, width: Param) -> Self {
        self.has_step = !height.is_unused() && !width.is_unused();
        self.sh = height;
        self.sw = width;
        self
    }

    /// Evaluate the full shape at `x` from the stored parameter values
    pub fn eval(&self, x: f64) -> f64 {
        self.eval_vec(x, &[])
    }

    /// Evaluate the Gaussian core and tails at `x`, without the step
    pub fn eval_no_step(&self, x: f64) -> f64 {
        self.eval_no_step_vec(x, &[])
    }

    /// Evaluate the step alone at `x`
    pub fn eval_step(&self, x: f64) -> f64 {
        self.eval_step_vec(x, &[])
    }

    pub(crate) fn eval_vec(&self, x: f64, p: &[f64]) -> f64 {
        self.eval_no_step_vec(x, p) + self.eval_step_vec(x, p)
    }

    pub(crate) fn eval_no_step_vec(&self, x: f64, p: &[f64]) -> f64 {
        let dx = x - self.pos.value_in(p);
        let vol = self.vol.value_in(p);
        let sigma = self.sigma.value_in(p);
        let tl = self.tl.value_in(p);
        let tr = self.tr.value_in(p);
        let norm = self.norm(sigma, tl, tr);

        // The exponent switches from the Gaussian core to a one-sided
        // exponential beyond each tail breakpoint. At dx = -tl both branches
        // evaluate to -tl^2 / (2 sigma^2) with matching slope tl / sigma^2,
        // keeping the density C^1 across the joint.
        let t = if self.has_left_tail && dx < -tl {
            tl / (sigma * sigma) * (dx + tl / 2.0)
        } else if self.has_right_tail && dx > tr {
            -tr / (sigma * sigma) * (dx - tr / 2.0)
        } else {
            -dx * dx / (2.0 * sigma * sigma)
        };

        vol * norm * t.exp()
    }

    pub(crate) fn eval_step_vec(&self, x: f64, p: &[f64]) -> f64 {
        if !self.has_step {
            return 0.0;
        }
        let dx = x - self.pos.value_in(p);
        let sigma = self.sigma.value_in(p);
        let sh = self.sh.value_in(p);
        let sw = self.sw.value_in(p);
        let vol = self.vol.value_in(p);
        let norm = self.norm(sigma, self.tl.value_in(p), self.tr.value_in(p));

        vol * norm * sh * (PI / 2.0 + (sw * dx / (SQRT_2 * sigma)).atan())
    }

    /// The constant converting volume to amplitude, `1 / area` where area is
    /// the integral of the core-plus-tails shape at unit amplitude.
    ///
    /// Each side contributes a half Gaussian when it has no tail. With a
    /// tail, the Gaussian is truncated at the breakpoint and the exponential
    /// continuation integrates to `sigma^2/t * exp(-t^2 / 2 sigma^2)`.
    pub(crate) fn norm(&self, sigma: f64, tl: f64, tr: f64) -> f64 {
        if let Some(cache) = self.norm_cache.get() {
            if cache.sigma == sigma && cache.tl == tl && cache.tr == tr {
                return cache.norm;
            }
        }

        let mut area = if self.has_left_tail {
            sigma * sigma / tl * (-(tl * tl) / (2.0 * sigma * sigma)).exp()
                + (PI / 2.0).sqrt() * sigma * erf(tl / (SQRT_2 * sigma))
        } else {
            (PI / 2.0).sqrt() * sigma
        };

        area += if self.has_right_tail {
            sigma * sigma / tr * (-(tr * tr) / (2.0 * sigma * sigma)).exp()
                + (PI / 2.0).sqrt() * sigma * erf(tr / (SQRT_2 * sigma))
        } else {
            (PI / 2.0).sqrt() * sigma
        };

        let norm = 1.0 / area;
        self.norm_cache.set(Some(NormCache {
            sigma,
            tl,
            tr,
            norm,
        }));
        norm
    }

    /// The seven parameters in declared order: position, volume, sigma,
    /// tail-left, tail-right, step height, step width.
    pub(crate) fn params(&self) -> [&Param; 7] {
        [
            &self.pos, &self.vol, &self.sigma, &self.tl, &self.tr, &self.sh, &self.sw,
        ]
    }

    pub(crate) fn params_mut(&mut self) -> [&mut Param; 7] {
        [
            &mut self.pos,
            &mut self.vol,
            &mut self.sigma,
            &mut self.tl,
            &mut self.tr,
            &mut self.sh,
            &mut self.sw,
        ]
    }

    pub fn pos(&self) -> f64 {
        self.pos.value()
    }

    pub fn pos_error(&self) -> f64 {
        self.pos.error()
    }

    pub fn pos_is_free(&self) -> bool {
        self.pos.is_free()
    }

    pub fn restore_pos(&mut self, value: f64, error: f64) {
        self.pos.restore(value, error)
    }

    pub fn vol(&self) -> f64 {
        self.vol.value()
    }

    pub fn vol_error(&self) -> f64 {
        self.vol.error()
    }

    pub fn vol_is_free(&self) -> bool {
        self.vol.is_free()
    }

    pub fn restore_vol(&mut self, value: f64, error: f64) {
        self.vol.restore(value, error)
    }

    pub fn sigma(&self) -> f64 {
        self.sigma.value()
    }

    pub fn sigma_error(&self) -> f64 {
        self.sigma.error()
    }

    pub fn sigma_is_free(&self) -> bool {
        self.sigma.is_free()
    }

    pub fn restore_sigma(&mut self, value: f64, error: f64) {
        self.sigma.restore(value, error)
    }

    pub fn has_left_tail(&self) -> bool {
        self.has_left_tail
    }

    pub fn left_tail(&self) -> f64 {
        if self.has_left_tail {
            self.tl.value()
        } else {
            f64::INFINITY
        }
    }

    pub fn left_tail_error(&self) -> f64 {
        if self.has_left_tail {
            self.tl.error()
        } else {
            f64::NAN
        }
    }

    pub fn left_tail_is_free(&self) -> bool {
        self.has_left_tail && self.tl.is_free()
    }

    pub fn restore_left_tail(&mut self, value: f64, error: f64) {
        self.tl.restore(value, error)
    }

    pub fn has_right_tail(&self) -> bool {
        self.has_right_tail
    }

    pub fn right_tail(&self) -> f64 {
        if self.has_right_tail {
            self.tr.value()
        } else {
            f64::INFINITY
        }
    }

    pub fn right_tail_error(&self) -> f64 {
        if self.has_right_tail {
            self.tr.error()
        } else {
            f64::NAN
        }
    }

    pub fn right_tail_is_free(&self) -> bool {
        self.has_right_tail && self.tr.is_free()
    }

    pub fn restore_right_tail(&mut self, value: f64, error: f64) {
        self.tr.restore(value, error)
    }

    pub fn has_step(&self) -> bool {
        self.has_step
    }

    pub fn step_height(&self) -> f64 {
        if self.has_step {
            self.sh.value()
        } else {
            0.0
        }
    }

    pub fn step_height_error(&self) -> f64 {
        if self.has_step {
            self.sh.error()
        } else {
            f64::NAN
        }
    }

    pub fn step_height_is_free(&self) -> bool {
        self.has_step && self.sh.is_free()
    }

    pub fn restore_step_height(&mut self, value: f64, error: f64) {
        self.sh.restore(value, error)
    }

    pub fn step_width(&self) -> f64 {
        if self.has_step {
            self.sw.value()
        } else {
            f64::NAN
        }
    }

    pub fn step_width_error(&self) -> f64 {
        if self.has_step {
            self.sw.error()
        } else {
            f64::NAN
        }
    }

    pub fn step_width_is_free(&self) -> bool {
        self.has_step && self.sw.is_free()
    }

    pub fn restore_step_width(&mut self, value: f64, error: f64) {
        self.sw.restore(value, error)
    }
}
