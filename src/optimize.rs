//! A small weighted Levenberg-Marquardt solver for curve models of the form
//! `y = f(x, p)`.
//!
//! The solver works on plain slices and a model callback, computing the
//! Jacobian by central finite differences and solving the damped normal
//! equations with [`nalgebra`]. Weights are interpreted as true inverse
//! variances, so parameter standard errors come straight from the diagonal
//! of the inverted normal matrix at the solution, without a reduced
//! chi-square rescaling.

use nalgebra::{DMatrix, DVector};

const LAMBDA_MAX: f64 = 1e12;
const LAMBDA_MIN: f64 = 1e-12;

/// Hyperparameters of the Levenberg-Marquardt loop
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// The maximum number of accepted-step iterations to attempt
    pub max_iter: usize,
    /// The relative chi-square improvement below which the solution is
    /// considered converged
    pub convergence: f64,
    /// Initial damping factor
    pub lambda_init: f64,
    /// Multiplier applied to the damping factor after a rejected step
    pub lambda_up: f64,
    /// Divisor applied to the damping factor after an accepted step
    pub lambda_down: f64,
    /// Relative step used for the finite-difference Jacobian
    pub fd_step: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            convergence: 1e-9,
            lambda_init: 1e-3,
            lambda_up: 10.0,
            lambda_down: 10.0,
            fd_step: 1e-6,
        }
    }
}

/// The outcome of a [`least_squares`] run
#[derive(Debug, Clone)]
pub struct LmFit {
    /// The best parameter vector found
    pub params: Vec<f64>,
    /// 1-sigma errors paired with `params`, NaN when the normal matrix was
    /// singular at the solution
    pub errors: Vec<f64>,
    /// The weighted chi-square at `params`
    pub chisquare: f64,
    /// The number of iterations run
    pub iterations: usize,
    /// Whether the convergence criterion was met within the iteration budget
    pub converged: bool,
    /// Whether the optimization produced a finite chi-square at all
    pub success: bool,
}

/// Minimize the weighted sum of squared residuals of `model` over the
/// observations `(x, y)`, starting from `init`.
///
/// `weights` must hold one inverse-variance weight per observation.
/// `steps` may carry one absolute finite-difference increment per
/// parameter; an entry of 0.0 (or an empty slice) derives the increment
/// from the parameter magnitude and [`LmConfig::fd_step`]. The iteration
/// budget and tolerances come from `config`. Failure to converge is not
/// fatal; the best parameters seen are always returned, flagged through
/// [`LmFit::converged`] and [`LmFit::success`].
pub fn least_squares<F>(
    model: F,
    x: &[f64],
    y: &[f64],
    weights: &[f64],
    init: &[f64],
    steps: &[f64],
    config: &LmConfig,
) -> LmFit
where
    F: Fn(f64, &[f64]) -> f64,
{
    let npoints = x.len();
    let nparams = init.len();
    assert_eq!(npoints, y.len(), "observation arrays must be the same length");
    assert_eq!(npoints, weights.len(), "one weight per observation required");

    let chisq_at = |p: &[f64]| -> f64 {
        x.iter()
            .zip(y)
            .zip(weights)
            .map(|((&xi, &yi), &wi)| {
                let r = yi - model(xi, p);
                wi * r * r
            })
            .sum()
    };

    let mut p = init.to_vec();
    let mut chisq = chisq_at(&p);

    if nparams == 0 || !chisq.is_finite() {
        return LmFit {
            params: p,
            errors: vec![f64::NAN; nparams],
            chisquare: chisq,
            iterations: 0,
            converged: nparams == 0 && chisq.is_finite(),
            success: chisq.is_finite(),
        };
    }

    let mut lambda = config.lambda_init;
    let mut converged = false;
    let mut iterations = 0;

    'outer: while iterations < config.max_iter {
        iterations += 1;

        let jac = jacobian(&model, x, &p, steps, config.fd_step);
        let residuals: Vec<f64> = x.iter().zip(y).map(|(&xi, &yi)| yi - model(xi, &p)).collect();
        let (a, g) = normal_equations(&jac, &residuals, weights);

        // Retry with stronger damping until a step lowers chi-square or the
        // damping factor runs out of room.
        loop {
            let mut damped = a.clone();
            for j in 0..nparams {
                let d = a[(j, j)];
                damped[(j, j)] = d + lambda * if d > 0.0 { d } else { 1.0 };
            }
            let step = damped
                .clone()
                .cholesky()
                .map(|ch| ch.solve(&g))
                .or_else(|| damped.lu().solve(&g));

            let trial = step.map(|s| {
                let tp: Vec<f64> = p.iter().zip(s.iter()).map(|(pi, si)| pi + si).collect();
                let tchisq = chisq_at(&tp);
                (tp, tchisq)
            });

            match trial {
                Some((tp, tchisq)) if tchisq.is_finite() && tchisq <= chisq => {
                    let improvement = chisq - tchisq;
                    p = tp;
                    lambda = (lambda / config.lambda_down).max(LAMBDA_MIN);
                    log::trace!("{iterations}: chi2 = {tchisq:.6e}, lambda = {lambda:.1e}");
                    if improvement / (tchisq + 1e-6) < config.convergence {
                        converged = true;
                    }
                    chisq = tchisq;
                    break;
                }
                Some((_, tchisq))
                    if tchisq.is_finite()
                        && (tchisq - chisq) / (chisq + 1e-6) < config.convergence =>
                {
                    // the rejected step changed chi-square by less than the
                    // tolerance in either direction; the surface is flat here
                    converged = true;
                    break;
                }
                _ => {
                    lambda *= config.lambda_up;
                    if lambda > LAMBDA_MAX {
                        log::trace!("{iterations}: no improving step, stopping");
                        break 'outer;
                    }
                }
            }
        }

        if converged {
            break;
        }
    }

    let jac = jacobian(&model, x, &p, steps, config.fd_step);
    let residuals: Vec<f64> = x.iter().zip(y).map(|(&xi, &yi)| yi - model(xi, &p)).collect();
    let (a, _) = normal_equations(&jac, &residuals, weights);
    let errors: Vec<f64> = match a.try_inverse() {
        Some(cov) => (0..nparams).map(|j| cov[(j, j)].max(0.0).sqrt()).collect(),
        None => vec![f64::NAN; nparams],
    };

    LmFit {
        params: p,
        errors,
        chisquare: chisq,
        iterations,
        converged,
        success: chisq.is_finite(),
    }
}

/// Central-difference Jacobian of `model` at `p` over the coordinates `x`
fn jacobian<F>(model: &F, x: &[f64], p: &[f64], steps: &[f64], fd_step: f64) -> DMatrix<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let npoints = x.len();
    let nparams = p.len();
    let mut jac = DMatrix::zeros(npoints, nparams);
    let mut probe = p.to_vec();
    for j in 0..nparams {
        let hint = steps.get(j).copied().unwrap_or_default();
        let h = if hint > 0.0 {
            hint
        } else {
            fd_step * probe[j].abs().max(1.0)
        };
        probe[j] = p[j] + h;
        let plus: Vec<f64> = x.iter().map(|&xi| model(xi, &probe)).collect();
        probe[j] = p[j] - h;
        for (i, &xi) in x.iter().enumerate() {
            jac[(i, j)] = (plus[i] - model(xi, &probe)) / (2.0 * h);
        }
        probe[j] = p[j];
    }
    jac
}

/// `(J^T W J, J^T W r)` for the weighted Gauss-Newton system
fn normal_equations(
    jac: &DMatrix<f64>,
    residuals: &[f64],
    weights: &[f64],
) -> (DMatrix<f64>, DVector<f64>) {
    let (npoints, nparams) = jac.shape();
    let mut a = DMatrix::zeros(nparams, nparams);
    let mut g = DVector::zeros(nparams);
    for i in 0..npoints {
        let wi = weights[i];
        for j in 0..nparams {
            let jij = jac[(i, j)];
            g[j] += wi * jij * residuals[i];
            for k in j..nparams {
                a[(j, k)] += wi * jij * jac[(i, k)];
            }
        }
    }
    for j in 0..nparams {
        for k in 0..j {
            a[(j, k)] = a[(k, j)];
        }
    }
    (a, g)
}
