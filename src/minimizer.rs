//! This module provides the base framework for the minimizer in this crate, such as the base
//! trait, the progress callback and the return type.
use ndarray::prelude::*;
use std::time::Duration;

use crate::error::Error;

/// Minimizer states at the end of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The relative reduction of the objective or the projected gradient fell below tolerance.
    Converged,
    /// The iteration limit was reached first.
    MaxIterReached,
    /// No acceptable step could be found even after discarding the curvature history.
    LineSearchFailed,
    /// The objective produced values that could not be worked around.
    NumericalError,
}

/// A minimization result, storing various details of the run and the final results.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimResult {
    /// The runtime of the minimization according to the system clock.
    pub runtime: Duration,
    /// The number of objective evaluations performed.
    pub f_evals: usize,
    /// The number of accepted iterations.
    pub iterations: usize,
    /// The final parameter values. Always inside the bounds.
    pub x: Array1<f64>,
    /// The function value at `x`.
    pub f: f64,
    /// The gradient at `x`.
    pub gradient: Array1<f64>,
    /// Infinity norm of the projected gradient at `x`.
    pub projected_gradient_norm: f64,
    /// Why the run stopped.
    pub status: Status,
}

impl OptimResult {
    /// True when the run stopped on the projected gradient or the relative
    /// reduction test rather than on a limit or a failure.
    pub fn converged(&self) -> bool {
        self.status == Status::Converged
    }
}

/// Receives one report per iteration. Purely informational: nothing it does
/// affects the run.
pub trait Progress {
    fn on_iteration(&mut self, iteration: usize, f: f64, projected_gradient_norm: f64);
}

impl<F: FnMut(usize, f64, f64)> Progress for F {
    fn on_iteration(&mut self, iteration: usize, f: f64, projected_gradient_norm: f64) {
        self(iteration, f, projected_gradient_norm)
    }
}

/// A general bound-constrained minimizer trait.
pub trait Minimizer {
    /// Minimizes the value returned by `func`, which also returns the gradient, starting from
    /// `x0` and keeping every iterate inside `bounds` (one `(lower, upper)` pair per variable,
    /// non-finite meaning unbounded on that side).
    fn minimize<F>(
        &self,
        func: F,
        x0: ArrayView1<f64>,
        bounds: Option<&[(f64, f64)]>,
    ) -> Result<OptimResult, Error>
    where
        F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>);
}
