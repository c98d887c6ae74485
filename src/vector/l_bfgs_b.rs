//! Limited-memory BFGS with box constraints, as formulated in
//!
//! R. H. Byrd, P. Lu, J. Nocedal, C. Zhu. A limited memory algorithm for
//! bound constrained optimization. SIAM Journal on Scientific Computing 16
//! (1995), pages 1190-1208.
//!
//! Every iteration computes the generalized Cauchy point of the quadratic
//! model, minimizes the model over the variables left free there, and runs
//! a line search toward that point. Iterates never leave the box.
//!
//! # Examples
//!
//! ```
//! # extern crate ndarray;
//! # extern crate lbfgsb;
//! # use ndarray::prelude::*;
//! # use lbfgsb::{LBFGSBBuilder, Minimizer, Status};
//!
//! let rosenbrock = |x: ArrayView1<f64>| {
//!     let f = (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
//!     let g = arr1(&[
//!         -2.0 * (1.0 - x[0]) - 400.0 * x[0] * (x[1] - x[0].powi(2)),
//!         200.0 * (x[1] - x[0].powi(2)),
//!     ]);
//!     (f, g)
//! };
//! let minimizer = LBFGSBBuilder::default()
//!     .pgtol(1e-8)
//!     .build()
//!     .unwrap();
//! let x0 = arr1(&[-1.2, 1.0]);
//! let res = minimizer
//!     .minimize(rosenbrock, x0.view(), Some(&[(-2.0, 0.5), (-2.0, 2.0)]))
//!     .unwrap();
//! assert_eq!(res.status, Status::Converged);
//! assert!(res.x[0] <= 0.5);
//! ```

use std::time::Instant;

use ndarray::prelude::*;

use super::bounds::Bounds;
use super::cauchy::cauchy_point;
use super::correction::CorrectionStore;
use super::line_search::{LineSearch, LineSearchError};
use super::subspace::subspace_minimize;
use crate::error::Error;
use crate::minimizer::{Minimizer, OptimResult, Progress, Status};
use crate::utils::WrappedFunction;

const DEFAULT_FACTR: f64 = 1e7;
const DEFAULT_PGTOL: f64 = 1e-5;
const DEFAULT_MAXCOR: usize = 10;
const DEFAULT_MAXITER: usize = 15000;
const DEFAULT_C1: f64 = 1e-3;
const DEFAULT_C2: f64 = 0.9;
const DEFAULT_XTOL: f64 = 0.1;
const DEFAULT_MAX_LINE_SEARCH_EVALS: usize = 20;
const DEFAULT_ULPS: i64 = 4;

/// Upper limit on line search steps for unconstrained problems.
const BIG_STEP: f64 = 1e10;

#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(build_fn(validate = "Self::validate", error = "Error"))]
/// A minimizer for a differentiable function of one or more variables subject to independent
/// lower and upper bounds, using the L-BFGS-B algorithm.
pub struct LBFGSB {
    /// Stop when `(f_prev - f) / max(|f_prev|, |f|, 1) <= factr * eps`. Typical values are
    /// 1e12 for low accuracy, 1e7 for moderate and 10 for extremely high accuracy.
    #[builder(default = "DEFAULT_FACTR")]
    pub factr: f64,

    /// Stop when the infinity norm of the projected gradient is at most this.
    #[builder(default = "DEFAULT_PGTOL")]
    pub pgtol: f64,

    /// The number of correction pairs kept to approximate the Hessian.
    #[builder(default = "DEFAULT_MAXCOR")]
    pub maxcor: usize,

    /// The maximum number of iterations.
    #[builder(default = "DEFAULT_MAXITER")]
    pub maxiter: usize,

    /// Sufficient decrease constant of the line search.
    #[builder(default = "DEFAULT_C1")]
    pub c1: f64,

    /// Curvature constant of the line search.
    #[builder(default = "DEFAULT_C2")]
    pub c2: f64,

    /// Relative width at which the line search bracket counts as collapsed.
    #[builder(default = "DEFAULT_XTOL")]
    pub xtol: f64,

    /// Objective evaluations allowed in a single line search.
    #[builder(default = "DEFAULT_MAX_LINE_SEARCH_EVALS")]
    pub max_line_search_evals: usize,

    /// The required number of floating point representations that separate two numbers to consider them
    /// equal. See crate float_cmp for more information.
    #[builder(default = "DEFAULT_ULPS")]
    pub ulps: i64,
}

impl Default for LBFGSB {
    fn default() -> Self {
        LBFGSB {
            factr: DEFAULT_FACTR,
            pgtol: DEFAULT_PGTOL,
            maxcor: DEFAULT_MAXCOR,
            maxiter: DEFAULT_MAXITER,
            c1: DEFAULT_C1,
            c2: DEFAULT_C2,
            xtol: DEFAULT_XTOL,
            max_line_search_evals: DEFAULT_MAX_LINE_SEARCH_EVALS,
            ulps: DEFAULT_ULPS,
        }
    }
}

impl LBFGSBBuilder {
    fn validate(&self) -> Result<(), Error> {
        let d = LBFGSB::default();
        LBFGSB {
            factr: self.factr.unwrap_or(d.factr),
            pgtol: self.pgtol.unwrap_or(d.pgtol),
            maxcor: self.maxcor.unwrap_or(d.maxcor),
            maxiter: self.maxiter.unwrap_or(d.maxiter),
            c1: self.c1.unwrap_or(d.c1),
            c2: self.c2.unwrap_or(d.c2),
            xtol: self.xtol.unwrap_or(d.xtol),
            max_line_search_evals: self.max_line_search_evals.unwrap_or(d.max_line_search_evals),
            ulps: self.ulps.unwrap_or(d.ulps),
        }
        .check()
    }
}

/// The accepted point of the current iteration.
struct Iterate {
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
}

impl LBFGSB {
    /// Checks every parameter. The builder runs this too, but the fields are public and may
    /// have been changed since.
    pub fn check(&self) -> Result<(), Error> {
        let positive = |name: &str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{} must be positive, got {}", name, v)))
            }
        };
        positive("factr", self.factr)?;
        positive("pgtol", self.pgtol)?;
        positive("xtol", self.xtol)?;
        if self.maxcor == 0 {
            return Err(Error::InvalidConfig("maxcor must be at least 1".to_string()));
        }
        if self.maxiter == 0 {
            return Err(Error::InvalidConfig("maxiter must be at least 1".to_string()));
        }
        if self.max_line_search_evals == 0 {
            return Err(Error::InvalidConfig(
                "max_line_search_evals must be at least 1".to_string(),
            ));
        }
        if !(0.0 < self.c1 && self.c1 < self.c2 && self.c2 < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "line search constants must satisfy 0 < c1 < c2 < 1, got c1 = {}, c2 = {}",
                self.c1, self.c2
            )));
        }
        if self.ulps < 0 {
            return Err(Error::InvalidConfig(format!(
                "ulps must be non-negative, got {}",
                self.ulps
            )));
        }
        Ok(())
    }

    /// Like [`Minimizer::minimize`], reporting every iteration to `progress`.
    pub fn minimize_with_progress<F, P>(
        &self,
        func: F,
        x0: ArrayView1<f64>,
        bounds: Option<&[(f64, f64)]>,
        progress: P,
    ) -> Result<OptimResult, Error>
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
        P: Progress,
    {
        self.check()?;
        let bounds = Bounds::from_pairs(bounds, x0.len())?;
        self.minimize_within(func, x0, &bounds, progress)
    }

    /// Minimizes `func` from `x0` inside already classified `bounds`.
    pub fn minimize_within<F, P>(
        &self,
        func: F,
        x0: ArrayView1<f64>,
        bounds: &Bounds,
        mut progress: P,
    ) -> Result<OptimResult, Error>
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
        P: Progress,
    {
        self.check()?;
        if x0.is_empty() {
            return Err(Error::InvalidConfig(
                "initial point has no variables".to_string(),
            ));
        }
        if bounds.len() != x0.len() {
            return Err(Error::InvalidBounds(format!(
                "bounds cover {} variables, initial point has {}",
                bounds.len(),
                x0.len()
            )));
        }
        let store = CorrectionStore::new(x0.len(), self.maxcor)?;
        Ok(self.run(WrappedFunction::new(func), x0, bounds, store, &mut progress))
    }

    fn line_search(&self) -> LineSearch {
        LineSearch {
            ulps: self.ulps,
            max_evals: self.max_line_search_evals,
            ftol: self.c1,
            gtol: self.c2,
            xtol: self.xtol,
        }
    }

    fn run<F, P>(
        &self,
        mut func: WrappedFunction<F>,
        x0: ArrayView1<f64>,
        bounds: &Bounds,
        mut store: CorrectionStore,
        progress: &mut P,
    ) -> OptimResult
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
        P: Progress,
    {
        let start = Instant::now();
        let ls = self.line_search();
        let tol = self.factr * f64::EPSILON;

        let finish = |it: Iterate, iterations: usize, evals: usize, status: Status, reason: &str| {
            let projected_gradient_norm = bounds.projected_gradient_norm(it.x.view(), it.g.view());
            log::info!(
                "stopped after {} iterations and {} evaluations: {:?} ({}), f = {:e}, |pg| = {:e}",
                iterations,
                evals,
                status,
                reason,
                it.f,
                projected_gradient_norm
            );
            OptimResult {
                runtime: start.elapsed(),
                f_evals: evals,
                iterations,
                x: it.x,
                f: it.f,
                gradient: it.g,
                projected_gradient_norm,
                status,
            }
        };

        let mut x = x0.to_owned();
        bounds.project(x.view_mut());
        if x != x0 {
            log::info!("initial point projected onto the bounds");
        }
        let eval = func.call(x.view());
        let finite = eval.is_finite();
        let mut it = Iterate {
            x,
            f: eval.f,
            g: eval.g,
        };
        if !finite {
            return finish(
                it,
                0,
                func.num,
                Status::NumericalError,
                "non-finite value at the initial point",
            );
        }

        let mut iterations = 0;
        let pgnorm = bounds.projected_gradient_norm(it.x.view(), it.g.view());
        progress.on_iteration(0, it.f, pgnorm);
        if pgnorm <= self.pgtol {
            return finish(it, 0, func.num, Status::Converged, "projected gradient below pgtol");
        }

        loop {
            let cp = cauchy_point(it.x.view(), it.g.view(), bounds, &store);
            let step = subspace_minimize(it.x.view(), it.g.view(), bounds, &store, &cp);
            let d = step.direction(it.x.view());

            let stpmax = if !bounds.is_constrained() {
                BIG_STEP
            } else if iterations == 0 {
                1.0
            } else {
                // x + d is feasible by construction, whatever rounding says
                bounds.max_step(it.x.view(), d.view(), BIG_STEP).max(1.0)
            };
            let stp = if iterations == 0 && !bounds.is_boxed() {
                (1.0 / d.dot(&d).sqrt()).min(stpmax)
            } else {
                1.0
            };

            let searched = ls.search(
                &mut func,
                bounds,
                it.x.view(),
                it.f,
                it.g.view(),
                d.view(),
                stp,
                stpmax,
            );
            let (trial, how) = match searched {
                Ok(accepted) => accepted,
                Err(e) => {
                    if !store.is_empty() {
                        log::warn!(
                            "line search failed ({}); discarding {} correction pairs and retrying",
                            describe(&e),
                            store.len()
                        );
                        store.clear();
                        continue;
                    }
                    log::warn!("line search failed with an empty store ({})", describe(&e));
                    let (status, reason) = match e {
                        LineSearchError::NonFinite => (
                            Status::NumericalError,
                            "objective non-finite along the search direction",
                        ),
                        LineSearchError::NotDescent(_) => (
                            Status::LineSearchFailed,
                            "search direction is not a descent direction",
                        ),
                        LineSearchError::Stalled { best } => {
                            if let Some(best) = best {
                                it = Iterate {
                                    x: best.x,
                                    f: best.eval.f,
                                    g: best.eval.g,
                                };
                            }
                            (
                                Status::LineSearchFailed,
                                "no acceptable step within the evaluation budget",
                            )
                        }
                    };
                    return finish(it, iterations, func.num, status, reason);
                }
            };

            iterations += 1;
            let s = &trial.x - &it.x;
            let y = &trial.eval.g - &it.g;
            let f_prev = it.f;
            it = Iterate {
                x: trial.x,
                f: trial.eval.f,
                g: trial.eval.g,
            };
            let pgnorm = bounds.projected_gradient_norm(it.x.view(), it.g.view());
            log::debug!(
                "iteration {}: f = {:e}, |pg| = {:e}, step = {:e} ({:?}), {} free, {} active, {} breakpoints passed",
                iterations,
                it.f,
                pgnorm,
                trial.stp,
                how,
                cp.free.len(),
                cp.active.len(),
                cp.segments
            );
            if let Some(i) = step.truncated_at {
                log::debug!("subspace step truncated at the bound of variable {}", i);
            }
            if step.fallback {
                log::debug!("subspace step fell back to steepest descent");
            }
            progress.on_iteration(iterations, it.f, pgnorm);

            if pgnorm <= self.pgtol {
                return finish(it, iterations, func.num, Status::Converged, "projected gradient below pgtol");
            }
            let scale = f_prev.abs().max(it.f.abs()).max(1.0);
            if f_prev - it.f <= tol * scale {
                return finish(
                    it,
                    iterations,
                    func.num,
                    Status::Converged,
                    "relative reduction of f below factr * eps",
                );
            }
            store.push(s, y);
            if iterations >= self.maxiter {
                return finish(it, iterations, func.num, Status::MaxIterReached, "iteration limit");
            }
        }
    }
}

fn describe(e: &LineSearchError) -> String {
    match e {
        LineSearchError::NotDescent(gd) => format!("not a descent direction, g.d = {:e}", gd),
        LineSearchError::Stalled { .. } => "evaluation budget exhausted".to_string(),
        LineSearchError::NonFinite => "non-finite values".to_string(),
    }
}

impl Minimizer for LBFGSB {
    fn minimize<F>(
        &self,
        func: F,
        x0: ArrayView1<f64>,
        bounds: Option<&[(f64, f64)]>,
    ) -> Result<OptimResult, Error>
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>),
    {
        self.minimize_with_progress(func, x0, bounds, |_: usize, _: f64, _: f64| {})
    }
}
