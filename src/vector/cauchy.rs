//! Generalized Cauchy point.
//!
//! Follows `-g` from `x`, bending the path every time a variable reaches a
//! bound, and stops at the first local minimizer of the quadratic model
//! `m(z) = f + g^T (z - x) + 1/2 (z - x)^T B (z - x)` along that
//! piecewise-linear path. On each segment the model is a parabola in the
//! path parameter whose slope and curvature are updated in `O(k)` per
//! breakpoint from the compact form of `B`.

use std::cmp::Ordering;

use ndarray::prelude::*;

use super::bounds::{BoundType, Bounds};
use super::correction::CorrectionStore;

/// Where a variable stands at the start of the path.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Start {
    /// Moves along `-g_i` (may still hit a bound later).
    Moving,
    /// Zero gradient component: stays put but remains free.
    Stationary,
    /// On a bound with the gradient pushing outward, or `l == u`.
    Held,
}

/// The time at which variable `index` reaches its bound along `-g`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Breakpoint {
    pub index: usize,
    pub time: f64,
}

/// Breakpoints in increasing time, ties by variable index.
pub(crate) struct Breakpoints {
    sorted: Vec<Breakpoint>,
    pos: usize,
}

impl Breakpoints {
    fn new(mut sorted: Vec<Breakpoint>) -> Self {
        sorted.sort_by(|a, b| match a.time.partial_cmp(&b.time) {
            Some(Ordering::Equal) | None => a.index.cmp(&b.index),
            Some(o) => o,
        });
        Breakpoints { sorted, pos: 0 }
    }

    fn total(&self) -> usize {
        self.sorted.len()
    }

    fn remaining(&self) -> usize {
        self.sorted.len() - self.pos
    }
}

impl Iterator for Breakpoints {
    type Item = Breakpoint;

    fn next(&mut self) -> Option<Breakpoint> {
        let bp = self.sorted.get(self.pos).copied();
        if bp.is_some() {
            self.pos += 1;
        }
        bp
    }
}

/// Slope and curvature of the model restricted to the current segment,
/// plus the compact vectors needed to update them.
struct PathModel {
    /// First derivative at the start of the segment.
    slope: f64,
    /// Second derivative along the segment.
    curvature: f64,
    /// Curvature of the first segment; a tiny multiple of it is the floor.
    curvature0: f64,
    /// `W^T d` for the current direction.
    p: Array1<f64>,
    /// `W^T (z - x)` for the current path point `z`.
    c: Array1<f64>,
}

impl PathModel {
    /// Step to the minimizer of the current segment's parabola.
    #[inline]
    fn minimizer(&self) -> f64 {
        -self.slope / self.curvature
    }

    /// Moves the segment start forward by `dt` and drops variable `i`
    /// (whose direction component was `di` and which now sits `zi` away
    /// from `x`) out of the direction.
    fn pass(&mut self, store: &CorrectionStore, theta: f64, dt: f64, i: usize, di: f64, zi: f64) {
        let di2 = di * di;
        self.slope += dt * self.curvature + di2 - theta * di * zi;
        self.curvature -= theta * di2;
        if !store.is_empty() {
            self.c.scaled_add(dt, &self.p);
            let wi = store.w_row(i);
            let v = store.middle_times(wi.view());
            let wmc = self.c.dot(&v);
            let wmp = self.p.dot(&v);
            let wmw = wi.dot(&v);
            self.p.scaled_add(-di, &wi);
            self.slope += di * wmc;
            self.curvature += 2.0 * di * wmp - di2 * wmw;
        }
        self.curvature = self.curvature.max(f64::EPSILON * self.curvature0);
    }
}

/// Result of the Cauchy search.
#[derive(Debug, Clone)]
pub(crate) struct CauchyPoint {
    /// The generalized Cauchy point, inside the box.
    pub xc: Array1<f64>,
    /// Variables free at `xc`, ascending.
    pub free: Vec<usize>,
    /// Variables fixed on a bound at `xc`, ascending.
    pub active: Vec<usize>,
    /// `W^T (xc - x)`.
    pub c: Array1<f64>,
    /// Number of breakpoints passed before stopping.
    pub segments: usize,
}

/// Computes the generalized Cauchy point from `x` with gradient `g`.
pub(crate) fn cauchy_point(
    x: ArrayView1<f64>,
    g: ArrayView1<f64>,
    bounds: &Bounds,
    store: &CorrectionStore,
) -> CauchyPoint {
    let n = x.len();
    let theta = store.theta();
    let mut xc = x.to_owned();
    let mut d = Array1::<f64>::zeros(n);
    let mut held = vec![false; n];
    let mut candidates = Vec::new();
    let mut bounded_path = true;
    let mut dd = 0.0;

    for i in 0..n {
        let kind = bounds.kind(i);
        let neggi = -g[i];
        let start = start_of(kind, x[i], neggi);
        if start != Start::Moving {
            held[i] = start == Start::Held;
            continue;
        }
        d[i] = neggi;
        dd += neggi * neggi;
        match (kind.lower(), kind.upper()) {
            (Some(l), _) if neggi < 0.0 => candidates.push(Breakpoint {
                index: i,
                time: (x[i] - l) / -neggi,
            }),
            (_, Some(u)) if neggi > 0.0 => candidates.push(Breakpoint {
                index: i,
                time: (u - x[i]) / neggi,
            }),
            _ => bounded_path = false,
        }
    }

    let width = store.width();
    if dd == 0.0 {
        return finish(xc, held, Array1::zeros(width), 0);
    }

    let p = store.w_transpose(d.view());
    let curvature = theta * dd - p.dot(&store.middle_times(p.view()));
    let mut model = PathModel {
        slope: -dd,
        curvature,
        curvature0: curvature,
        p,
        c: Array1::zeros(width),
    };
    let mut dtm = model.minimizer();

    let mut breakpoints = Breakpoints::new(candidates);
    let all_hit = breakpoints.total() == n;
    let mut t_prev = 0.0;
    let mut t_sum = 0.0;
    let mut segments = 0;
    let mut exhausted = false;

    while let Some(bp) = breakpoints.next() {
        let dt = bp.time - t_prev;
        if dtm < dt {
            break;
        }
        let i = bp.index;
        t_sum += dt;
        segments += 1;
        let di = d[i];
        d[i] = 0.0;
        let kind = bounds.kind(i);
        let target = if di > 0.0 { kind.upper() } else { kind.lower() };
        let bound = target.unwrap_or(x[i]);
        xc[i] = bound;
        held[i] = true;

        if breakpoints.remaining() == 0 && all_hit {
            // Every variable is on a bound; the path ends here.
            dtm = dt;
            exhausted = true;
            break;
        }

        model.pass(store, theta, dt, i, di, bound - x[i]);
        t_prev = bp.time;
        dtm = if breakpoints.remaining() > 0 || !bounded_path {
            model.minimizer()
        } else {
            0.0
        };
    }

    let mut c = model.c;
    if !exhausted {
        dtm = dtm.max(0.0);
        t_sum += dtm;
        for i in 0..n {
            if d[i] != 0.0 {
                xc[i] = bounds.kind(i).clamp(x[i] + t_sum * d[i]);
            }
        }
    }
    if !store.is_empty() {
        c.scaled_add(dtm, &model.p);
    }
    log::trace!(
        "cauchy point after {} of {} breakpoints, t = {:e}",
        segments,
        breakpoints.total(),
        t_sum
    );
    finish(xc, held, c, segments)
}

fn start_of(kind: BoundType, xi: f64, neggi: f64) -> Start {
    if kind.is_fixed() {
        return Start::Held;
    }
    if kind == BoundType::Unbounded {
        return if neggi == 0.0 { Start::Stationary } else { Start::Moving };
    }
    let at_lower = kind.lower().map_or(false, |l| xi - l <= 0.0);
    let at_upper = kind.upper().map_or(false, |u| u - xi <= 0.0);
    if at_lower {
        if neggi <= 0.0 {
            return Start::Held;
        }
    } else if at_upper {
        if neggi >= 0.0 {
            return Start::Held;
        }
    } else if neggi == 0.0 {
        return Start::Stationary;
    }
    Start::Moving
}

fn finish(xc: Array1<f64>, held: Vec<bool>, c: Array1<f64>, segments: usize) -> CauchyPoint {
    let (active, free): (Vec<usize>, Vec<usize>) = (0..held.len()).partition(|&i| held[i]);
    CauchyPoint {
        xc,
        free,
        active,
        c,
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::ApproxEq;

    fn boxed(pairs: &[(f64, f64)]) -> Bounds {
        Bounds::from_pairs(Some(pairs), pairs.len()).unwrap()
    }

    #[test]
    fn breakpoints_sort_ties_by_index() {
        let bps = Breakpoints::new(vec![
            Breakpoint { index: 3, time: 1.0 },
            Breakpoint { index: 1, time: 0.5 },
            Breakpoint { index: 0, time: 1.0 },
        ]);
        let order: Vec<usize> = bps.map(|b| b.index).collect();
        assert_eq!(order, vec![1, 0, 3]);
    }

    #[test]
    fn unbounded_steepest_descent_with_identity() {
        // B = I, so the model minimizer along -g is at t = 1
        let store = CorrectionStore::new(2, 3).unwrap();
        let bounds = Bounds::unbounded(2);
        let x = arr1(&[1.0, -2.0]);
        let g = arr1(&[2.0, -4.0]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        assert!(cp.xc[0].approx_eq(-1.0, (1e-12, 2)));
        assert!(cp.xc[1].approx_eq(2.0, (1e-12, 2)));
        assert_eq!(cp.free, vec![0, 1]);
        assert!(cp.active.is_empty());
        assert_eq!(cp.segments, 0);
    }

    #[test]
    fn stops_at_first_bound_hit() {
        // first variable hits its bound at t = 0.25, the second is free
        let store = CorrectionStore::new(2, 3).unwrap();
        let bounds = boxed(&[(0.0, 10.0), (f64::NEG_INFINITY, f64::INFINITY)]);
        let x = arr1(&[0.5, 0.0]);
        let g = arr1(&[2.0, 1.0]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        assert_eq!(cp.xc[0], 0.0);
        assert_eq!(cp.active, vec![0]);
        assert_eq!(cp.free, vec![1]);
        assert_eq!(cp.segments, 1);
        // past the bend the slope is -0.75 with unit curvature, so the free
        // variable keeps moving until t = 1
        assert!(cp.xc[1].approx_eq(-1.0, (1e-12, 2)));
    }

    #[test]
    fn holds_variables_pushing_out_of_the_box() {
        let store = CorrectionStore::new(3, 3).unwrap();
        let bounds = boxed(&[(1.0, 5.0), (0.0, 2.0), (3.0, 3.0)]);
        let x = arr1(&[1.0, 2.0, 3.0]);
        let g = arr1(&[2.0, -1.0, 7.0]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        assert_eq!(cp.xc, x);
        assert_eq!(cp.active, vec![0, 1, 2]);
        assert!(cp.free.is_empty());
    }

    #[test]
    fn all_variables_reach_bounds() {
        let store = CorrectionStore::new(2, 3).unwrap();
        let bounds = boxed(&[(0.0, 1.0), (0.0, 1.0)]);
        let x = arr1(&[0.9, 0.1]);
        let g = arr1(&[10.0, -10.0]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        assert_eq!(cp.xc, arr1(&[0.0, 1.0]));
        assert_eq!(cp.active, vec![0, 1]);
        assert_eq!(cp.segments, 2);
    }

    #[test]
    fn stays_inside_the_box() {
        let mut store = CorrectionStore::new(3, 4).unwrap();
        store.push(arr1(&[0.1, -0.2, 0.3]), arr1(&[0.3, -0.1, 0.9]));
        store.push(arr1(&[-0.2, 0.1, 0.05]), arr1(&[-0.5, 0.4, 0.2]));
        let bounds = boxed(&[(-1.0, 1.0), (-0.5, 0.5), (0.0, 2.0)]);
        let x = arr1(&[0.2, 0.4, 0.1]);
        let g = arr1(&[3.0, -2.0, 1.5]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        assert!(bounds.contains(cp.xc.view()));
        assert_eq!(cp.c.len(), store.width());
        // W^T (xc - x) is maintained incrementally
        let direct = store.w_transpose((&cp.xc - &x).view());
        for (a, b) in cp.c.iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn model_decreases_from_x_to_cauchy_point() {
        let mut store = CorrectionStore::new(3, 4).unwrap();
        store.push(arr1(&[0.1, -0.2, 0.3]), arr1(&[0.3, -0.1, 0.9]));
        let bounds = boxed(&[(-1.0, 1.0), (-0.5, 0.5), (0.0, 2.0)]);
        let x = arr1(&[0.2, 0.4, 0.1]);
        let g = arr1(&[3.0, -2.0, 1.5]);
        let cp = cauchy_point(x.view(), g.view(), &bounds, &store);
        let step = &cp.xc - &x;
        let model = g.dot(&step) + 0.5 * step.dot(&store.apply_forward(step.view()));
        assert!(model < 0.0);
    }
}
