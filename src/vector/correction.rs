//! Limited-memory curvature history in compact form.
//!
//! With `S` and `Y` the `n x k` matrices of stored corrections (oldest
//! first), the quasi-Newton matrix is
//!
//! ```text
//! B = theta I - W M W^T,   W = [Y, theta S],
//! M = [ -D   L^T       ]^-1
//!     [  L   theta S^TS ]
//! ```
//!
//! where `D` is the diagonal and `L` the strict lower triangle of `S^T Y`,
//! as formulated in
//!
//! R. H. Byrd, J. Nocedal, R. B. Schnabel. Representations of quasi-Newton
//! matrices and their use in limited memory methods. Mathematical
//! Programming 63 (1994), pages 129-156.
//!
//! `S^T S` and `S^T Y` are kept as small dense matrices and updated with one
//! new row and column per admitted pair, so nothing of size `n x n` is ever
//! formed. Products with `M` go through the Cholesky factor of
//! `theta S^T S + L D^-1 L^T`.

use std::ops::Index;

use ndarray::prelude::*;

use crate::error::Error;
use crate::utils::Cholesky;

/// Fixed-capacity ring buffer; index 0 is the oldest element.
#[derive(Debug, Clone)]
struct RobinVec<T> {
    i0: usize,
    capacity: usize,
    vec: Vec<T>,
}

impl<T> RobinVec<T> {
    fn with_capacity(capacity: usize) -> RobinVec<T> {
        RobinVec {
            i0: 0,
            capacity,
            vec: Vec::with_capacity(capacity),
        }
    }

    fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.vec[self.i0..].iter().chain(self.vec[..self.i0].iter())
    }

    fn len(&self) -> usize {
        self.vec.len()
    }

    fn is_full(&self) -> bool {
        self.vec.len() == self.capacity
    }

    fn clear(&mut self) {
        self.vec.clear();
        self.i0 = 0;
    }

    /// Appends `el`, overwriting the oldest element once full.
    fn push(&mut self, el: T) {
        if self.is_full() {
            self.vec[self.i0] = el;
            self.i0 = (self.i0 + 1) % self.capacity;
        } else {
            self.vec.push(el);
        }
    }
}

impl<T> Index<usize> for RobinVec<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.vec[(index + self.i0) % self.vec.len()]
    }
}

#[derive(Debug, Clone)]
struct Correction {
    s: Array1<f64>,
    y: Array1<f64>,
    /// `1 / s^T y`
    rho: f64,
}

/// The last `capacity` admitted `(s, y)` pairs and the dense quantities
/// derived from them.
#[derive(Debug)]
pub struct CorrectionStore {
    n: usize,
    pairs: RobinVec<Correction>,
    /// `S^T S`, top-left `len x len` block in use.
    sts: Array2<f64>,
    /// `S^T Y`, entry `(i, j)` is `s_i . y_j`.
    sty: Array2<f64>,
    theta: f64,
    /// Cholesky factorization of `theta S^T S + L D^-1 L^T`.
    factor: Option<Cholesky>,
}

impl CorrectionStore {
    /// An empty store for `n` variables holding at most `capacity` pairs.
    pub fn new(n: usize, capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "maxcor must be at least 1".to_string(),
            ));
        }
        Ok(CorrectionStore {
            n,
            pairs: RobinVec::with_capacity(capacity),
            sts: Array2::zeros((capacity, capacity)),
            sty: Array2::zeros((capacity, capacity)),
            theta: 1.0,
            factor: None,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pairs.capacity
    }

    /// Scaling of the initial matrix `theta I`; `y.y / s.y` of the newest
    /// pair, or 1 while the store is empty.
    #[inline]
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Forgets every pair and resets `theta` to 1.
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.sts.fill(0.0);
        self.sty.fill(0.0);
        self.theta = 1.0;
        self.factor = None;
    }

    /// Offers a correction pair. It is admitted only if
    /// `s.y > eps * y.y`; otherwise the store is left untouched and `false`
    /// is returned.
    pub fn push(&mut self, s: Array1<f64>, y: Array1<f64>) -> bool {
        debug_assert_eq!(s.len(), self.n);
        debug_assert_eq!(y.len(), self.n);
        let sy = s.dot(&y);
        let yy = y.dot(&y);
        if !(sy > f64::EPSILON * yy) || !yy.is_finite() {
            log::debug!("skipping correction: s.y = {:e}, y.y = {:e}", sy, yy);
            return false;
        }

        if self.pairs.is_full() {
            let m = self.capacity();
            for mat in [&mut self.sts, &mut self.sty].iter_mut() {
                let tail = mat.slice(s![1.., 1..]).to_owned();
                mat.slice_mut(s![..m - 1, ..m - 1]).assign(&tail);
            }
        }
        self.pairs.push(Correction {
            s,
            y,
            rho: 1.0 / sy,
        });
        self.theta = yy / sy;

        let k = self.len() - 1;
        for j in 0..=k {
            let (sj, yj) = (&self.pairs[j].s, &self.pairs[j].y);
            let (sk, yk) = (&self.pairs[k].s, &self.pairs[k].y);
            let ss = sj.dot(sk);
            self.sts[[j, k]] = ss;
            self.sts[[k, j]] = ss;
            self.sty[[k, j]] = sk.dot(yj);
            self.sty[[j, k]] = sj.dot(yk);
        }

        if !self.refactor() {
            log::warn!("correction history is numerically dependent; keeping only the newest pair");
            let newest = self.pairs[k].clone();
            self.clear();
            self.pairs.push(newest);
            self.theta = yy / sy;
            self.sts[[0, 0]] = self.pairs[0].s.dot(&self.pairs[0].s);
            self.sty[[0, 0]] = sy;
            if !self.refactor() {
                self.clear();
                return false;
            }
        }
        true
    }

    /// Rebuilds the Cholesky factor of `theta S^T S + L D^-1 L^T`.
    fn refactor(&mut self) -> bool {
        let k = self.len();
        let mut t = Array2::<f64>::zeros((k, k));
        for i in 0..k {
            for j in 0..=i {
                let mut v = self.theta * self.sts[[i, j]];
                for l in 0..j {
                    v += self.sty[[i, l]] * self.sty[[j, l]] / self.sty[[l, l]];
                }
                t[[i, j]] = v;
                t[[j, i]] = v;
            }
        }
        self.factor = Cholesky::new(t.view());
        self.factor.is_some()
    }

    /// `H v` for the inverse approximation with `H0 = I / theta`, by the
    /// two-loop recursion.
    pub fn apply_inverse(&self, v: ArrayView1<f64>) -> Array1<f64> {
        let mut q = v.to_owned();
        let mut a = Vec::with_capacity(self.len());

        for c in self.pairs.iter().rev() {
            let ai = c.rho * c.s.dot(&q);
            q.scaled_add(-ai, &c.y);
            a.push(ai);
        }

        q /= self.theta;

        for (c, ai) in self.pairs.iter().zip(a.iter().rev()) {
            let bi = c.rho * c.y.dot(&q);
            q.scaled_add(ai - bi, &c.s);
        }
        q
    }

    /// `B v` for the forward approximation.
    pub fn apply_forward(&self, v: ArrayView1<f64>) -> Array1<f64> {
        let mut out = &v * self.theta;
        if !self.is_empty() {
            let mwv = self.middle_times(self.w_transpose(v).view());
            out -= &self.w_times(mwv.view());
        }
        out
    }

    /// Size of the compact vectors, `2 * len`.
    #[inline]
    pub(crate) fn width(&self) -> usize {
        2 * self.len()
    }

    /// `W^T v`.
    pub(crate) fn w_transpose(&self, v: ArrayView1<f64>) -> Array1<f64> {
        let k = self.len();
        let mut out = Array1::zeros(2 * k);
        for (j, c) in self.pairs.iter().enumerate() {
            out[j] = c.y.dot(&v);
            out[k + j] = self.theta * c.s.dot(&v);
        }
        out
    }

    /// `W q` for a compact vector `q`.
    pub(crate) fn w_times(&self, q: ArrayView1<f64>) -> Array1<f64> {
        let k = self.len();
        let mut out = Array1::zeros(self.n);
        for (j, c) in self.pairs.iter().enumerate() {
            out.scaled_add(q[j], &c.y);
            out.scaled_add(self.theta * q[k + j], &c.s);
        }
        out
    }

    /// Row `i` of `W`.
    pub(crate) fn w_row(&self, i: usize) -> Array1<f64> {
        let k = self.len();
        let mut row = Array1::zeros(2 * k);
        for (j, c) in self.pairs.iter().enumerate() {
            row[j] = c.y[i];
            row[k + j] = self.theta * c.s[i];
        }
        row
    }

    /// The rows of `W` for the given variables, one row per index.
    pub(crate) fn w_rows(&self, indices: &[usize]) -> Array2<f64> {
        let mut rows = Array2::zeros((indices.len(), self.width()));
        for (r, &i) in indices.iter().enumerate() {
            rows.row_mut(r).assign(&self.w_row(i));
        }
        rows
    }

    /// `M v` for a compact vector `v`.
    pub(crate) fn middle_times(&self, v: ArrayView1<f64>) -> Array1<f64> {
        let k = self.len();
        let factor = match self.factor {
            Some(ref f) if k > 0 => f,
            _ => return Array1::zeros(v.len()),
        };
        let (v1, v2) = (v.slice(s![..k]), v.slice(s![k..]));

        let mut rhs = v2.to_owned();
        for i in 1..k {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.sty[[i, j]] * v1[j] / self.sty[[j, j]];
            }
            rhs[i] += sum;
        }
        let p2 = factor.solve(rhs.view());

        let mut p = Array1::zeros(2 * k);
        for j in 0..k {
            let mut sum = 0.0;
            for i in (j + 1)..k {
                sum += self.sty[[i, j]] * p2[i];
            }
            p[j] = (sum - v1[j]) / self.sty[[j, j]];
        }
        p.slice_mut(s![k..]).assign(&p2);
        p
    }

    /// `M^-1`, the symmetric indefinite middle block before inversion.
    pub(crate) fn middle_inverse(&self) -> Array2<f64> {
        let k = self.len();
        let mut out = Array2::zeros((2 * k, 2 * k));
        for i in 0..k {
            out[[i, i]] = -self.sty[[i, i]];
            for j in 0..k {
                if i > j {
                    // L in the lower-left block, L^T in the upper-right one
                    out[[k + i, j]] = self.sty[[i, j]];
                    out[[j, k + i]] = self.sty[[i, j]];
                }
                out[[k + i, k + j]] = self.theta * self.sts[[i, j]];
            }
        }
        out
    }
}
