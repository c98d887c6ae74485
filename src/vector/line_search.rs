//! Step length selection along a feasible descent direction.
//!
//! The search enforces the strong Wolfe conditions
//!
//! ```text
//! f(x + a d) <= f(x) + ftol a g^T d
//! |g(x + a d)^T d| <= gtol |g^T d|
//! ```
//!
//! using the bracketing strategy and safeguarded cubic/quadratic steps of
//!
//! J. J. More, D. J. Thuente. Line search algorithms with guaranteed
//! sufficient decrease. ACM Transactions on Mathematical Software 20 (1994),
//! pages 286-307.
//!
//! If the bracket degenerates or the objective returns non-finite values,
//! the search falls back to halving toward the best point seen so far and
//! accepts the first step with sufficient decrease.

use float_cmp::ApproxEqUlps;
use ndarray::prelude::*;

use super::bounds::Bounds;
use crate::utils::{Evaluation, WrappedFunction};

const XTRAPL: f64 = 1.1;
const XTRAPU: f64 = 4.0;

/// A point on the search line with its value and directional derivative.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    stp: f64,
    f: f64,
    dg: f64,
}

/// An evaluated point reached by the search.
#[derive(Debug, Clone)]
pub(crate) struct Trial {
    pub stp: f64,
    pub x: Array1<f64>,
    pub eval: Evaluation,
}

/// How a step was accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Acceptance {
    /// Both Wolfe conditions hold.
    Wolfe,
    /// The bracket could not shrink further; the point does not increase `f`.
    Degenerate,
    /// Sufficient decrease only, found while backtracking.
    Backtracked,
}

#[derive(Debug)]
pub(crate) enum LineSearchError {
    /// `g^T d >= 0` at the start.
    NotDescent(f64),
    /// Evaluation budget spent without an acceptable step. `best` is the
    /// lowest finite point seen that improved on the start, if any.
    Stalled { best: Option<Trial> },
    /// Every trial point produced non-finite values.
    NonFinite,
}

pub(crate) struct LineSearch {
    pub ulps: i64,
    pub max_evals: usize,
    pub ftol: f64,
    pub gtol: f64,
    pub xtol: f64,
}

impl LineSearch {
    #[cfg(test)]
    pub fn new() -> Self {
        LineSearch {
            ulps: 4,
            max_evals: 20,
            ftol: 1e-3,
            gtol: 0.9,
            xtol: 0.1,
        }
    }

    /// Searches along `d` from `x`, starting at step `stp` and never going
    /// past `stpmax`. Trial points are projected onto `bounds`.
    #[allow(clippy::too_many_arguments)]
    pub fn search<F>(
        &self,
        func: &mut WrappedFunction<F>,
        bounds: &Bounds,
        x: ArrayView1<f64>,
        f0: f64,
        g0: ArrayView1<f64>,
        d: ArrayView1<f64>,
        stp: f64,
        stpmax: f64,
    ) -> Result<(Trial, Acceptance), LineSearchError>
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
    {
        let ginit = g0.dot(&d);
        if !(ginit < 0.0) {
            return Err(LineSearchError::NotDescent(ginit));
        }
        let gtest = self.ftol * ginit;
        let mut width = stpmax;
        let mut width1 = 2.0 * width;

        let mut bx = Endpoint { stp: 0.0, f: f0, dg: ginit };
        let mut by = bx;
        let mut brackt = false;
        let mut stage1 = true;
        let mut stmin = 0.0;
        let mut stmax = stp + XTRAPU * stp;
        let mut stp = stp.min(stpmax);

        let mut backtracking = false;
        let mut best: Option<Trial> = None;
        let mut finite_seen = false;

        for _ in 0..self.max_evals {
            let trial = self.trial(func, bounds, x, d, stp);
            if !trial.eval.is_finite() {
                log::warn!("non-finite objective at step {:e}; backtracking", stp);
                backtracking = true;
                stp = bx.stp + 0.5 * (stp - bx.stp);
                continue;
            }
            finite_seen = true;
            let f = trial.eval.f;
            let dg = trial.eval.g.dot(&d);
            if f < f0 && best.as_ref().map_or(true, |b| f < b.eval.f) {
                best = Some(trial.clone());
            }
            let ftest = f0 + stp * gtest;

            if backtracking {
                if f <= ftest {
                    return Ok((trial, Acceptance::Backtracked));
                }
                stp = bx.stp + 0.5 * (stp - bx.stp);
                continue;
            }

            if stage1 && f <= ftest && dg >= 0.0 {
                stage1 = false;
            }
            if f <= ftest && dg.abs() <= self.gtol * -ginit {
                return Ok((trial, Acceptance::Wolfe));
            }

            let rounding = brackt && (stp <= stmin || stp >= stmax);
            let narrow = brackt && stmax - stmin <= self.xtol * stmax;
            let at_max = stp.approx_eq_ulps(&stpmax, self.ulps) && f <= ftest && dg <= gtest;
            if rounding || narrow || at_max {
                if f <= f0 {
                    log::debug!(
                        "line search bracket degenerated at step {:e} (rounding: {}, xtol: {}, stpmax: {})",
                        stp,
                        rounding,
                        narrow,
                        at_max
                    );
                    return Ok((trial, Acceptance::Degenerate));
                }
                backtracking = true;
                stp = bx.stp + 0.5 * (stp - bx.stp);
                continue;
            }

            let here = Endpoint { stp, f, dg };
            stp = if stage1 && f <= bx.f && f > ftest {
                // work on the modified function f - ftol * ginit * stp
                let shift = |e: Endpoint| Endpoint {
                    stp: e.stp,
                    f: e.f - e.stp * gtest,
                    dg: e.dg - gtest,
                };
                let mut mx = shift(bx);
                let mut my = shift(by);
                let next = safeguarded_step(&mut mx, &mut my, shift(here), &mut brackt, stmin, stmax);
                bx = Endpoint {
                    stp: mx.stp,
                    f: mx.f + mx.stp * gtest,
                    dg: mx.dg + gtest,
                };
                by = Endpoint {
                    stp: my.stp,
                    f: my.f + my.stp * gtest,
                    dg: my.dg + gtest,
                };
                next
            } else {
                safeguarded_step(&mut bx, &mut by, here, &mut brackt, stmin, stmax)
            };

            if brackt {
                if (by.stp - bx.stp).abs() >= 0.66 * width1 {
                    stp = bx.stp + 0.5 * (by.stp - bx.stp);
                }
                width1 = width;
                width = (by.stp - bx.stp).abs();
                stmin = bx.stp.min(by.stp);
                stmax = bx.stp.max(by.stp);
            } else {
                stmin = stp + XTRAPL * (stp - bx.stp);
                stmax = stp + XTRAPU * (stp - bx.stp);
            }

            stp = stp.max(0.0).min(stpmax);
            if brackt && (stp <= stmin || stp >= stmax || stmax - stmin <= self.xtol * stmax) {
                stp = bx.stp;
            }
        }

        if finite_seen {
            Err(LineSearchError::Stalled { best })
        } else {
            Err(LineSearchError::NonFinite)
        }
    }

    fn trial<F>(
        &self,
        func: &mut WrappedFunction<F>,
        bounds: &Bounds,
        x: ArrayView1<f64>,
        d: ArrayView1<f64>,
        stp: f64,
    ) -> Trial
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
    {
        let mut xt = &x + &(stp * &d);
        bounds.project(xt.view_mut());
        let eval = func.call(xt.view());
        Trial { stp, x: xt, eval }
    }
}

/// One safeguarded step of the More-Thuente search. `x` is the endpoint
/// with the lowest value so far, `y` the other end of the interval,
/// `trial` the newest point. Updates the interval and returns the next
/// trial step.
fn safeguarded_step(
    x: &mut Endpoint,
    y: &mut Endpoint,
    trial: Endpoint,
    brackt: &mut bool,
    stpmin: f64,
    stpmax: f64,
) -> f64 {
    let Endpoint { stp, f: fp, dg: dp } = trial;
    let (stx, fx, dx) = (x.stp, x.f, x.dg);
    let sgnd = dp * (dx / dx.abs());

    let stpf = if fp > fx {
        // higher value: the minimum is bracketed
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp < stx {
            gamma = -gamma;
        }
        let p = (gamma - dx) + theta;
        let q = ((gamma - dx) + gamma) + dp;
        let r = p / q;
        let stpc = stx + r * (stp - stx);
        let stpq = stx + ((dx / ((fx - fp) / (stp - stx) + dx)) / 2.0) * (stp - stx);
        *brackt = true;
        if (stpc - stx).abs() < (stpq - stx).abs() {
            stpc
        } else {
            stpc + (stpq - stpc) / 2.0
        }
    } else if sgnd < 0.0 {
        // derivatives of opposite sign: the minimum is bracketed
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp > stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + dx;
        let r = p / q;
        let stpc = stp + r * (stx - stp);
        let stpq = stp + (dp / (dp - dx)) * (stx - stp);
        *brackt = true;
        if (stpc - stp).abs() > (stpq - stp).abs() {
            stpc
        } else {
            stpq
        }
    } else if dp.abs() < dx.abs() {
        // same sign, derivative magnitude decreasing
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).max(0.0).sqrt();
        if stp > stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = (gamma + (dx - dp)) + gamma;
        let r = p / q;
        let stpc = if r < 0.0 && gamma != 0.0 {
            stp + r * (stx - stp)
        } else if stp > stx {
            stpmax
        } else {
            stpmin
        };
        let stpq = stp + (dp / (dp - dx)) * (stx - stp);
        if *brackt {
            let stpf = if (stpc - stp).abs() < (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            if stp > stx {
                stpf.min(stp + 0.66 * (y.stp - stp))
            } else {
                stpf.max(stp + 0.66 * (y.stp - stp))
            }
        } else {
            let stpf = if (stpc - stp).abs() > (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            stpf.min(stpmax).max(stpmin)
        }
    } else if *brackt {
        // same sign, derivative not decreasing: cubic through stp and sty
        let (sty, fy, dy) = (y.stp, y.f, y.dg);
        let theta = 3.0 * (fp - fy) / (sty - stp) + dy + dp;
        let s = theta.abs().max(dy.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dy / s) * (dp / s)).sqrt();
        if stp > sty {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + dy;
        let r = p / q;
        stp + r * (sty - stp)
    } else if stp > stx {
        stpmax
    } else {
        stpmin
    };

    if fp > fx {
        *y = trial;
    } else {
        if sgnd < 0.0 {
            *y = *x;
        }
        *x = trial;
    }
    stpf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_on<F>(func: F, x: Array1<f64>, d: Array1<f64>, stp: f64) -> (Trial, Acceptance, usize)
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
    {
        let mut func = WrappedFunction::new(func);
        let bounds = Bounds::unbounded(x.len());
        let start = func.call(x.view());
        let ls = LineSearch::new();
        let (trial, how) = ls
            .search(&mut func, &bounds, x.view(), start.f, start.g.view(), d.view(), stp, 1e10)
            .unwrap();
        (trial, how, func.num - 1)
    }

    #[test]
    fn accepts_unit_step_on_exact_newton_direction() {
        let f = |x: ArrayView1<f64>| ((&x - 2.0).mapv(|v| v * v).sum(), 2.0 * (&x - 2.0));
        let (trial, how, evals) = search_on(f, arr1(&[0.0, 0.0]), arr1(&[2.0, 2.0]), 1.0);
        assert_eq!(how, Acceptance::Wolfe);
        assert_eq!(evals, 1);
        assert_eq!(trial.stp, 1.0);
    }

    #[test]
    fn satisfies_strong_wolfe_after_extrapolation() {
        // minimum along d at a = 50
        let f = |x: ArrayView1<f64>| ((x[0] - 5.0).powi(2), arr1(&[2.0 * (x[0] - 5.0)]));
        let d = arr1(&[0.1]);
        let (trial, how, _) = search_on(f, arr1(&[0.0]), d.clone(), 1.0);
        assert_eq!(how, Acceptance::Wolfe);
        let ginit = -10.0 * 0.1;
        let ls = LineSearch::new();
        assert!(trial.eval.f <= 25.0 + ls.ftol * trial.stp * ginit);
        assert!(trial.eval.g.dot(&d).abs() <= ls.gtol * ginit.abs());
        assert!(trial.stp > 1.0);
    }

    #[test]
    fn interpolates_back_from_overshoot() {
        let f = |x: ArrayView1<f64>| (x[0].powi(4), arr1(&[4.0 * x[0].powi(3)]));
        let d = arr1(&[-10.0]);
        let (trial, how, _) = search_on(f, arr1(&[1.0]), d.clone(), 1.0);
        assert_eq!(how, Acceptance::Wolfe);
        assert!(trial.eval.f < 1.0);
        assert!(trial.stp < 1.0);
    }

    #[test]
    fn routes_around_non_finite_values() {
        let f = |x: ArrayView1<f64>| {
            if x[0] > 1.0 {
                (f64::NAN, arr1(&[f64::NAN]))
            } else {
                ((x[0] - 2.0).powi(2), arr1(&[2.0 * (x[0] - 2.0)]))
            }
        };
        let (trial, how, _) = search_on(f, arr1(&[0.0]), arr1(&[4.0]), 1.0);
        assert_eq!(how, Acceptance::Backtracked);
        assert!(trial.x[0] <= 1.0);
        assert!(trial.eval.f < 4.0);
    }

    #[test]
    fn rejects_ascent_direction() {
        let mut func = WrappedFunction::new(|x: ArrayView1<f64>| (x[0] * x[0], arr1(&[2.0 * x[0]])));
        let bounds = Bounds::unbounded(1);
        let ls = LineSearch::new();
        let x = arr1(&[1.0]);
        match ls.search(&mut func, &bounds, x.view(), 1.0, arr1(&[2.0]).view(), arr1(&[1.0]).view(), 1.0, 10.0) {
            Err(LineSearchError::NotDescent(gd)) => assert_eq!(gd, 2.0),
            other => panic!("unexpected {:?}", other.map(|(_, how)| how)),
        }
        assert_eq!(func.num, 0);
    }

    #[test]
    fn all_non_finite_is_reported() {
        let mut func = WrappedFunction::new(|_: ArrayView1<f64>| (f64::INFINITY, arr1(&[0.0])));
        let bounds = Bounds::unbounded(1);
        let mut ls = LineSearch::new();
        ls.max_evals = 5;
        let x = arr1(&[0.0]);
        let r = ls.search(&mut func, &bounds, x.view(), 1.0, arr1(&[-1.0]).view(), arr1(&[1.0]).view(), 1.0, 10.0);
        assert!(matches!(r, Err(LineSearchError::NonFinite)));
        assert_eq!(func.num, 5);
    }

    #[test]
    fn trial_points_stay_in_the_box() {
        let bounds = Bounds::from_pairs(Some(&[(0.0, 1.0)]), 1).unwrap();
        let mut func = WrappedFunction::new(|x: ArrayView1<f64>| (-x[0], arr1(&[-1.0])));
        let ls = LineSearch::new();
        let x = arr1(&[0.5]);
        let (trial, how) = ls
            .search(&mut func, &bounds, x.view(), -0.5, arr1(&[-1.0]).view(), arr1(&[0.5]).view(), 1.0, 1.0)
            .unwrap();
        assert_eq!(trial.x[0], 1.0);
        assert_eq!(how, Acceptance::Degenerate);
    }
}
