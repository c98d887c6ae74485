//! Subspace minimization over the variables left free at the Cauchy point.
//!
//! Active variables stay on their bounds. For the free ones the model is
//! minimized without bounds using the reduced matrix
//! `B_F = theta I - W_F M W_F^T`, whose inverse follows from the
//! Sherman-Morrison-Woodbury identity:
//!
//! ```text
//! B_F^-1 = I / theta + W_F (M^-1 - W_F^T W_F / theta)^-1 W_F^T / theta^2
//! ```
//!
//! so the only solve is of size `2k`. The resulting step is then cut back
//! once, to the first bound it would cross.

use ndarray::prelude::*;

use super::bounds::Bounds;
use super::cauchy::CauchyPoint;
use super::correction::CorrectionStore;
use crate::utils::symmetric_solve;

/// Reciprocal condition threshold for the `2k x 2k` system.
const RCOND: f64 = 1e-12;

#[derive(Debug, Clone)]
pub(crate) struct SubspaceStep {
    /// End point of the search direction, inside the box.
    pub xbar: Array1<f64>,
    /// The free variable that limited the step, if any.
    pub truncated_at: Option<usize>,
    /// True when the reduced system was singular or not finite and the step
    /// fell back to scaled steepest descent on the free variables.
    pub fallback: bool,
}

impl SubspaceStep {
    /// Search direction `xbar - x`.
    pub fn direction(&self, x: ArrayView1<f64>) -> Array1<f64> {
        &self.xbar - &x
    }
}

pub(crate) fn subspace_minimize(
    x: ArrayView1<f64>,
    g: ArrayView1<f64>,
    bounds: &Bounds,
    store: &CorrectionStore,
    cp: &CauchyPoint,
) -> SubspaceStep {
    let mut xbar = cp.xc.clone();
    if cp.free.is_empty() {
        return SubspaceStep {
            xbar,
            truncated_at: None,
            fallback: false,
        };
    }
    let theta = store.theta();
    let free = &cp.free;

    // reduced gradient, negated: -(g + B (xc - x)) on the free variables
    let wf = if store.is_empty() {
        None
    } else {
        Some(store.w_rows(free))
    };
    let mut r = Array1::from_shape_fn(free.len(), |j| {
        let i = free[j];
        -(g[i] + theta * (cp.xc[i] - x[i]))
    });
    if let Some(ref wf) = wf {
        let mc = store.middle_times(cp.c.view());
        r += &wf.dot(&mc);
    }

    let mut fallback = false;
    let du = match wf {
        None => &r / theta,
        Some(wf) => {
            let mut system = store.middle_inverse();
            system -= &(wf.t().dot(&wf) / theta);
            let rhs = wf.t().dot(&r);
            match symmetric_solve(system.view(), rhs.view(), RCOND) {
                Some(q) => &r / theta + &(wf.dot(&q) / (theta * theta)),
                None => {
                    log::warn!(
                        "reduced system with {} free variables is singular or not finite; using steepest descent",
                        free.len()
                    );
                    fallback = true;
                    &r / theta
                }
            }
        }
    };
    let du = if du.iter().all(|v| v.is_finite()) {
        du
    } else {
        log::warn!("non-finite subspace step; using steepest descent");
        fallback = true;
        &r / theta
    };

    let (alpha, hit) = longest_feasible_step(bounds, cp.xc.view(), free, du.view());
    for (j, &i) in free.iter().enumerate() {
        xbar[i] = cp.xc[i] + alpha * du[j];
    }
    if let Some(j) = hit {
        let i = free[j];
        let kind = bounds.kind(i);
        let edge = if du[j] > 0.0 { kind.upper() } else { kind.lower() };
        if let Some(b) = edge {
            xbar[i] = b;
        }
    }
    bounds.project(xbar.view_mut());

    SubspaceStep {
        xbar,
        truncated_at: hit.map(|j| free[j]),
        fallback,
    }
}

/// Largest `alpha <= 1` keeping `xc + alpha du` feasible on the free
/// variables, and the position in `free` of the variable that limits it.
fn longest_feasible_step(
    bounds: &Bounds,
    xc: ArrayView1<f64>,
    free: &[usize],
    du: ArrayView1<f64>,
) -> (f64, Option<usize>) {
    let mut alpha = 1.0;
    let mut hit = None;
    for (j, &i) in free.iter().enumerate() {
        let dk = du[j];
        let kind = bounds.kind(i);
        let mut limit = alpha;
        if dk < 0.0 {
            if let Some(l) = kind.lower() {
                let room = l - xc[i];
                if room >= 0.0 {
                    limit = 0.0;
                } else if dk * alpha < room {
                    limit = room / dk;
                }
            }
        } else if dk > 0.0 {
            if let Some(u) = kind.upper() {
                let room = u - xc[i];
                if room <= 0.0 {
                    limit = 0.0;
                } else if dk * alpha > room {
                    limit = room / dk;
                }
            }
        }
        if limit < alpha {
            alpha = limit;
            hit = Some(j);
        }
    }
    (alpha, hit)
}

#[cfg(test)]
mod tests {
    use super::super::cauchy::cauchy_point;
    use super::*;

    fn store_with_history(n: usize) -> CorrectionStore {
        let mut store = CorrectionStore::new(n, 5).unwrap();
        for k in 0..3 {
            let s = Array1::from_shape_fn(n, |i| ((k * 5 + i) as f64 * 0.61).sin());
            let y = Array1::from_shape_fn(n, |i| (2.0 + i as f64) * s[i]);
            assert!(store.push(s, y));
        }
        store
    }

    #[test]
    fn unbounded_step_is_quasi_newton_step() {
        let n = 6;
        let store = store_with_history(n);
        let bounds = Bounds::unbounded(n);
        let x = Array1::from_shape_fn(n, |i| i as f64 * 0.3 - 1.0);
        let g = Array1::from_shape_fn(n, |i| (i as f64).cos());
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        let step = subspace_minimize(x.view(), g.view(), &bounds, &store, &cp);
        assert!(!step.fallback);
        let d = step.direction(x.view());
        let expected = -store.apply_inverse(g.view());
        for (a, b) in d.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn truncates_at_first_bound() {
        let store = CorrectionStore::new(2, 3).unwrap();
        let bounds = Bounds::from_pairs(Some(&[(-0.1, 0.1), (-0.1, 0.1)]), 2).unwrap();
        let x = arr1(&[0.0, 0.0]);
        let g = arr1(&[1.0, 0.5]);
        let cp = CauchyPoint {
            xc: x.clone(),
            free: vec![0, 1],
            active: vec![],
            c: Array1::zeros(0),
            segments: 0,
        };
        let step = subspace_minimize(x.view(), g.view(), &bounds, &store, &cp);
        assert_eq!(step.truncated_at, Some(0));
        assert_eq!(step.xbar[0], -0.1);
        assert!((step.xbar[1] + 0.05).abs() < 1e-15);
    }

    #[test]
    fn overflowing_reduced_system_falls_back() {
        let mut store = CorrectionStore::new(2, 3).unwrap();
        assert!(store.push(arr1(&[1.0, 1.0]), arr1(&[10.0, 10.0])));
        let bounds = Bounds::from_pairs(Some(&[(-1.0, 1.0), (-1.0, 1.0)]), 2).unwrap();
        let x = arr1(&[0.0, 0.0]);
        // W^T r overflows although r / theta does not
        let g = arr1(&[1e308, 1e308]);
        let cp = CauchyPoint {
            xc: x.clone(),
            free: vec![0, 1],
            active: vec![],
            c: Array1::zeros(store.width()),
            segments: 0,
        };
        let step = subspace_minimize(x.view(), g.view(), &bounds, &store, &cp);
        assert!(step.fallback);
        assert_eq!(step.truncated_at, Some(0));
        assert_eq!(step.xbar[0], -1.0);
        assert!(bounds.contains(step.xbar.view()));
        assert!(step.direction(x.view()).iter().all(|&d| d < 0.0));
    }

    #[test]
    fn active_variables_do_not_move() {
        let n = 4;
        let store = store_with_history(n);
        let bounds =
            Bounds::from_pairs(Some(&[(0.0, 1.0), (0.0, 1.0), (0.0, 1.0), (0.0, 1.0)]), n).unwrap();
        let x = arr1(&[0.0, 0.5, 1.0, 0.5]);
        let g = arr1(&[3.0, 0.2, -2.0, -0.4]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        let step = subspace_minimize(x.view(), g.view(), &bounds, &store, &cp);
        assert!(bounds.contains(step.xbar.view()));
        for &i in &cp.active {
            assert_eq!(step.xbar[i], cp.xc[i]);
        }
        assert_eq!(step.xbar[0], 0.0);
        assert_eq!(step.xbar[2], 1.0);
        let d = step.direction(x.view());
        assert!(g.dot(&d) < 0.0);
    }
}
