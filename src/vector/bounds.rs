//! Per-variable box constraints.
//!
//! Each variable gets one of four tags depending on which of its two limits
//! are finite. Non-finite limits mean "no bound on that side", so
//! `(f64::NEG_INFINITY, 3.0)` and `(f64::NAN, 3.0)` both describe an
//! upper-only variable.

use ndarray::prelude::*;

use crate::error::Error;

/// The kind of box constraint on a single variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundType {
    Unbounded,
    LowerOnly(f64),
    Both(f64, f64),
    UpperOnly(f64),
}

impl BoundType {
    /// Classifies a `(lower, upper)` pair.
    pub fn classify(lower: f64, upper: f64) -> Result<BoundType, Error> {
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => Ok(BoundType::Unbounded),
            (true, false) => Ok(BoundType::LowerOnly(lower)),
            (false, true) => Ok(BoundType::UpperOnly(upper)),
            (true, true) if lower <= upper => Ok(BoundType::Both(lower, upper)),
            (true, true) => Err(Error::InvalidBounds(format!(
                "lower bound {} exceeds upper bound {}",
                lower, upper
            ))),
        }
    }

    #[inline]
    pub fn lower(&self) -> Option<f64> {
        match *self {
            BoundType::LowerOnly(l) | BoundType::Both(l, _) => Some(l),
            _ => None,
        }
    }

    #[inline]
    pub fn upper(&self) -> Option<f64> {
        match *self {
            BoundType::UpperOnly(u) | BoundType::Both(_, u) => Some(u),
            _ => None,
        }
    }

    /// Both limits present and equal: the variable can never move.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        match *self {
            BoundType::Both(l, u) => l == u,
            _ => false,
        }
    }

    #[inline]
    pub fn clamp(&self, xi: f64) -> f64 {
        match *self {
            BoundType::Unbounded => xi,
            BoundType::LowerOnly(l) => xi.max(l),
            BoundType::UpperOnly(u) => xi.min(u),
            BoundType::Both(l, u) => xi.max(l).min(u),
        }
    }
}

/// The classified bounds of a whole problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    kinds: Vec<BoundType>,
}

impl Bounds {
    /// No variable is bounded.
    pub fn unbounded(n: usize) -> Self {
        Bounds {
            kinds: vec![BoundType::Unbounded; n],
        }
    }

    /// Classifies one `(lower, upper)` pair per variable. `None` leaves every
    /// variable unbounded.
    pub fn from_pairs(pairs: Option<&[(f64, f64)]>, n: usize) -> Result<Self, Error> {
        let pairs = match pairs {
            None => return Ok(Bounds::unbounded(n)),
            Some(p) => p,
        };
        if pairs.len() != n {
            return Err(Error::InvalidBounds(format!(
                "expected {} bound pairs, got {}",
                n,
                pairs.len()
            )));
        }
        let kinds = pairs
            .iter()
            .enumerate()
            .map(|(i, &(l, u))| {
                BoundType::classify(l, u).map_err(|e| match e {
                    Error::InvalidBounds(msg) => {
                        Error::InvalidBounds(format!("variable {}: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Bounds { kinds })
    }

    /// Classifies separate lower and upper arrays; a missing array means no
    /// bound on that side for any variable.
    pub fn from_arrays(
        lower: Option<ArrayView1<f64>>,
        upper: Option<ArrayView1<f64>>,
        n: usize,
    ) -> Result<Self, Error> {
        check_len("lower", lower.as_ref(), n)?;
        check_len("upper", upper.as_ref(), n)?;
        let pairs = (0..n)
            .map(|i| {
                (
                    lower.as_ref().map_or(f64::NEG_INFINITY, |l| l[i]),
                    upper.as_ref().map_or(f64::INFINITY, |u| u[i]),
                )
            })
            .collect::<Vec<_>>();
        Bounds::from_pairs(Some(&pairs), n)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    #[inline]
    pub fn kind(&self, i: usize) -> BoundType {
        self.kinds[i]
    }

    /// True when at least one variable has a finite bound.
    pub fn is_constrained(&self) -> bool {
        self.kinds.iter().any(|k| *k != BoundType::Unbounded)
    }

    /// True when every variable has both bounds.
    pub fn is_boxed(&self) -> bool {
        self.kinds.iter().all(|k| matches!(k, BoundType::Both(..)))
    }

    /// Clamps `x` onto the box in place.
    pub fn project(&self, mut x: ArrayViewMut1<f64>) {
        for (xi, kind) in x.iter_mut().zip(&self.kinds) {
            *xi = kind.clamp(*xi);
        }
    }

    pub fn contains(&self, x: ArrayView1<f64>) -> bool {
        x.iter()
            .zip(&self.kinds)
            .all(|(&xi, kind)| kind.clamp(xi) == xi)
    }

    /// Gradient with every component that would push further past an active
    /// bound clipped to the distance to that bound (zero when exactly on it).
    pub fn projected_gradient(&self, x: ArrayView1<f64>, g: ArrayView1<f64>) -> Array1<f64> {
        let mut pg = g.to_owned();
        for ((pgi, &xi), kind) in pg.iter_mut().zip(&x).zip(&self.kinds) {
            if *pgi < 0.0 {
                if let Some(u) = kind.upper() {
                    *pgi = pgi.max(xi - u);
                }
            } else if let Some(l) = kind.lower() {
                *pgi = pgi.min(xi - l);
            }
        }
        pg
    }

    /// Infinity norm of [`Bounds::projected_gradient`].
    pub fn projected_gradient_norm(&self, x: ArrayView1<f64>, g: ArrayView1<f64>) -> f64 {
        self.projected_gradient(x, g)
            .iter()
            .fold(0f64, |acc, v| acc.max(v.abs()))
    }

    /// Largest `alpha` such that `x + alpha * d` stays in the box, capped at
    /// `cap`.
    pub fn max_step(&self, x: ArrayView1<f64>, d: ArrayView1<f64>, cap: f64) -> f64 {
        let mut stpmx = cap;
        for ((&xi, &di), kind) in x.iter().zip(&d).zip(&self.kinds) {
            if di < 0.0 {
                if let Some(l) = kind.lower() {
                    let room = l - xi;
                    if room >= 0.0 {
                        return 0.0;
                    } else if di * stpmx < room {
                        stpmx = room / di;
                    }
                }
            } else if di > 0.0 {
                if let Some(u) = kind.upper() {
                    let room = u - xi;
                    if room <= 0.0 {
                        return 0.0;
                    } else if di * stpmx > room {
                        stpmx = room / di;
                    }
                }
            }
        }
        stpmx
    }
}

fn check_len(name: &str, side: Option<&ArrayView1<f64>>, n: usize) -> Result<(), Error> {
    match side {
        Some(v) if v.len() != n => Err(Error::InvalidBounds(format!(
            "{} bounds have length {}, expected {}",
            name,
            v.len(),
            n
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn classify() {
        let inf = f64::INFINITY;
        let pairs = [(-inf, inf), (0.0, inf), (0.0, 1.0), (f64::NAN, 2.0)];
        let b = Bounds::from_pairs(Some(&pairs), 4).unwrap();
        assert_eq!(b.kind(0), BoundType::Unbounded);
        assert_eq!(b.kind(1), BoundType::LowerOnly(0.0));
        assert_eq!(b.kind(2), BoundType::Both(0.0, 1.0));
        assert_eq!(b.kind(3), BoundType::UpperOnly(2.0));
        assert!(b.is_constrained());
        assert!(!b.is_boxed());
    }

    #[test]
    fn absent_bounds_are_unbounded() {
        let b = Bounds::from_pairs(None, 3).unwrap();
        assert!(!b.is_constrained());
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn length_mismatch() {
        let pairs = [(0.0, 1.0)];
        match Bounds::from_pairs(Some(&pairs), 2) {
            Err(Error::InvalidBounds(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        let lower = arr1(&[0.0, 0.0, 0.0]);
        assert!(Bounds::from_arrays(Some(lower.view()), None, 2).is_err());
    }

    #[test]
    fn inverted_bounds() {
        let pairs = [(0.0, 1.0), (2.0, 1.0)];
        match Bounds::from_pairs(Some(&pairs), 2) {
            Err(Error::InvalidBounds(msg)) => assert!(msg.contains("variable 1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn from_arrays_mixes_sides() {
        let lower = arr1(&[0.0, f64::NEG_INFINITY]);
        let b = Bounds::from_arrays(Some(lower.view()), None, 2).unwrap();
        assert_eq!(b.kind(0), BoundType::LowerOnly(0.0));
        assert_eq!(b.kind(1), BoundType::Unbounded);
    }

    #[test]
    fn from_arrays_with_views_of_different_owners() {
        let upper = arr1(&[3.0, 4.0]);
        let b = {
            let lower = arr1(&[1.0, f64::NAN]);
            Bounds::from_arrays(Some(lower.view()), Some(upper.view()), 2).unwrap()
        };
        assert_eq!(b.kind(0), BoundType::Both(1.0, 3.0));
        assert_eq!(b.kind(1), BoundType::UpperOnly(4.0));
        let short = arr1(&[0.0]);
        match Bounds::from_arrays(None, Some(short.view()), 2) {
            Err(Error::InvalidBounds(msg)) => assert!(msg.starts_with("upper")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fixed_variable() {
        assert!(BoundType::Both(1.5, 1.5).is_fixed());
        assert!(!BoundType::Both(1.0, 1.5).is_fixed());
    }

    #[test]
    fn projection_and_projected_gradient() {
        let pairs = [(1.0, 5.0), (0.0, f64::INFINITY), (f64::NEG_INFINITY, f64::INFINITY)];
        let b = Bounds::from_pairs(Some(&pairs), 3).unwrap();
        let mut x = arr1(&[0.0, -3.0, 7.0]);
        b.project(x.view_mut());
        assert_eq!(x, arr1(&[1.0, 0.0, 7.0]));
        assert!(b.contains(x.view()));

        let g = arr1(&[2.0, -1.0, 0.5]);
        let pg = b.projected_gradient(x.view(), g.view());
        // first variable sits on its lower bound with the gradient pushing out
        assert_eq!(pg[0], 0.0);
        assert_eq!(pg[1], -1.0);
        assert_eq!(pg[2], 0.5);
        assert_eq!(b.projected_gradient_norm(x.view(), g.view()), 1.0);
    }

    #[test]
    fn max_step() {
        let pairs = [(0.0, 2.0), (f64::NEG_INFINITY, 1.0)];
        let b = Bounds::from_pairs(Some(&pairs), 2).unwrap();
        let x = arr1(&[1.0, 0.0]);
        let d = arr1(&[-0.5, 0.25]);
        assert_eq!(b.max_step(x.view(), d.view(), 1e10), 2.0);
        let d = arr1(&[0.0, -1.0]);
        assert_eq!(b.max_step(x.view(), d.view(), 1e10), 1e10);
    }
}
