//! Bound-constrained minimization of smooth functions with L-BFGS-B.
//!
//! The objective returns its value and gradient together. Each variable may
//! carry a lower bound, an upper bound, both, or neither, and every point the
//! objective is evaluated at lies inside those bounds.
//!
//! ```
//! # extern crate ndarray;
//! # extern crate lbfgsb;
//! # use ndarray::prelude::*;
//! use lbfgsb::{Minimizer, Status, LBFGSB};
//!
//! let res = LBFGSB::default()
//!     .minimize(
//!         |x: ArrayView1<f64>| (x[0] * x[0], arr1(&[2.0 * x[0]])),
//!         arr1(&[3.0]).view(),
//!         Some(&[(1.0, 5.0)]),
//!     )
//!     .unwrap();
//! assert_eq!(res.status, Status::Converged);
//! assert!((res.x[0] - 1.0).abs() < 1e-10);
//! ```

#[macro_use]
extern crate derive_builder;

pub mod error;
mod minimizer;
mod utils;
pub mod vector;

pub use error::Error;
pub use minimizer::{Minimizer, OptimResult, Progress, Status};
pub use vector::{BoundType, Bounds, CorrectionStore, LBFGSBBuilder, LBFGSB};
