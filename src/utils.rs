use std::fmt;

use faer::linalg::solvers::{Lblt as FaerLblt, Llt as FaerLlt, Solve as FaerSolve};
use faer::Mat as FaerMat;
use faer::Side;
use ndarray::prelude::*;

/// An objective together with the number of times it has been called.
pub struct WrappedFunction<F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>)> {
    pub num: usize,
    pub func: F,
}

/// The value and gradient returned by one objective call.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub f: f64,
    pub g: Array1<f64>,
}

impl Evaluation {
    /// False for NaN or infinite values anywhere, which the solver treats as
    /// a failed evaluation.
    pub fn is_finite(&self) -> bool {
        self.f.is_finite() && self.g.iter().all(|gi| gi.is_finite())
    }
}

impl<F: FnMut(ArrayView1<f64>) -> (f64, Array1<f64>)> WrappedFunction<F> {
    pub fn new(func: F) -> Self {
        WrappedFunction { num: 0, func }
    }

    /// Evaluates the objective at `arg`. A gradient of the wrong length is
    /// replaced by NaNs so that callers route it through the same path as
    /// any other unusable value.
    pub fn call(&mut self, arg: ArrayView1<f64>) -> Evaluation {
        self.num += 1;
        let (f, g) = (self.func)(arg);
        if g.len() != arg.len() {
            log::error!(
                "objective returned a gradient of length {} for {} variables",
                g.len(),
                arg.len()
            );
            return Evaluation {
                f,
                g: Array1::from_elem(arg.len(), f64::NAN),
            };
        }
        Evaluation { f, g }
    }
}

fn to_faer(a: ArrayView2<f64>) -> FaerMat<f64> {
    let mut m = FaerMat::zeros(a.nrows(), a.ncols());
    for ((i, j), &v) in a.indexed_iter() {
        m[(i, j)] = v;
    }
    m
}

fn column(b: ArrayView1<f64>) -> FaerMat<f64> {
    let mut m = FaerMat::zeros(b.len(), 1);
    for (i, &v) in b.iter().enumerate() {
        m[(i, 0)] = v;
    }
    m
}

fn from_column(m: &FaerMat<f64>) -> Array1<f64> {
    Array1::from_shape_fn(m.nrows(), |i| m[(i, 0)])
}

fn max_abs(v: ArrayView1<f64>) -> f64 {
    v.iter().fold(0f64, |acc, e| acc.max(e.abs()))
}

/// Cholesky factorization of a small symmetric positive definite matrix.
pub struct Cholesky {
    llt: FaerLlt<f64>,
    dim: usize,
}

impl Cholesky {
    /// `None` when `a` is not square, has non-finite entries, or is not
    /// positive definite.
    pub fn new(a: ArrayView2<f64>) -> Option<Self> {
        if a.nrows() != a.ncols() || a.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let llt = FaerLlt::new(to_faer(a).as_ref(), Side::Lower).ok()?;
        Some(Cholesky {
            llt,
            dim: a.nrows(),
        })
    }

    pub fn solve(&self, b: ArrayView1<f64>) -> Array1<f64> {
        let mut rhs = column(b);
        self.llt.solve_in_place(rhs.as_mut());
        from_column(&rhs)
    }
}

impl fmt::Debug for Cholesky {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cholesky").field("dim", &self.dim).finish()
    }
}

/// Solves a small symmetric, possibly indefinite, system through a pivoted
/// `LBLᵀ` factorization.
///
/// Returns `None` when the solution is not finite, does not reproduce `b`,
/// or has `|A| |x| > |b| / rcond`, which puts the condition number of `a`
/// above `1 / rcond`.
pub fn symmetric_solve(a: ArrayView2<f64>, b: ArrayView1<f64>, rcond: f64) -> Option<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return None;
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let lb = FaerLblt::new(to_faer(a).as_ref(), Side::Lower);
    let mut rhs = column(b);
    lb.solve_in_place(rhs.as_mut());
    let x = from_column(&rhs);
    if !x.iter().all(|v| v.is_finite()) {
        return None;
    }
    let a_norm = a
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0f64, f64::max);
    let x_norm = max_abs(x.view());
    let b_norm = max_abs(b);
    let residual = max_abs((a.dot(&x) - &b).view());
    if rcond * a_norm * x_norm > b_norm
        || residual > f64::EPSILON.sqrt() * (a_norm * x_norm + b_norm)
    {
        None
    } else {
        Some(x)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use float_cmp::ApproxEq;

    #[test]
    fn counts_calls() {
        let mut func = WrappedFunction::new(|x: ArrayView1<f64>| (x.dot(&x), 2.0 * &x));
        let x = arr1(&[1.0, 2.0]);
        let e = func.call(x.view());
        func.call(x.view());
        assert_eq!(func.num, 2);
        assert!(e.f.approx_eq(5.0, (1e-12, 2)));
        assert!(e.is_finite());
    }

    #[test]
    fn wrong_gradient_length_is_not_finite() {
        let mut func = WrappedFunction::new(|_: ArrayView1<f64>| (1.0, arr1(&[0.0])));
        let e = func.call(arr1(&[1.0, 2.0, 3.0]).view());
        assert_eq!(e.g.len(), 3);
        assert!(!e.is_finite());
    }

    #[test]
    fn cholesky_round_trip() {
        let a = arr2(&[[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]]);
        let b = arr1(&[1.0, -2.0, 0.5]);
        let x = Cholesky::new(a.view()).unwrap().solve(b.view());
        let r = a.dot(&x) - &b;
        assert!(r.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = arr2(&[[1.0, 2.0], [2.0, 1.0]]);
        assert!(Cholesky::new(a.view()).is_none());
        let a = arr2(&[[f64::INFINITY, 0.0], [0.0, 1.0]]);
        assert!(Cholesky::new(a.view()).is_none());
    }

    #[test]
    fn solves_indefinite_system() {
        let a = arr2(&[[0.0, 2.0, 1.0], [2.0, -3.0, 0.5], [1.0, 0.5, -1.0]]);
        let b = arr1(&[1.0, 0.0, 2.0]);
        let x = symmetric_solve(a.view(), b.view(), 1e-14).unwrap();
        let r = a.dot(&x) - &b;
        assert!(r.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn flags_singular_system() {
        let a = arr2(&[[1.0, 2.0], [2.0, 4.0]]);
        let b = arr1(&[1.0, 1.0]);
        assert!(symmetric_solve(a.view(), b.view(), 1e-12).is_none());
    }

    #[test]
    fn flags_ill_conditioned_system() {
        let a = arr2(&[[1.0, 1.0], [1.0, 1.0 + 1e-14]]);
        let b = arr1(&[1.0, -1.0]);
        assert!(symmetric_solve(a.view(), b.view(), 1e-12).is_none());
        assert!(symmetric_solve(a.view(), b.view(), 1e-16).is_some());
    }
}
