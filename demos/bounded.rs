extern crate lbfgsb;
extern crate ndarray;

use lbfgsb::{LBFGSBBuilder, Minimizer};
use ndarray::prelude::*;

/// Extended Rosenbrock function in `n` variables, with its gradient.
fn rosenbrock(x: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let n = x.len();
        let mut f = 0.0;
        let mut g = Array1::zeros(n);
        for i in 0..n - 1 {
                let a = 1.0 - x[i];
                let b = x[i + 1] - x[i] * x[i];
                f += a * a + 100.0 * b * b;
                g[i] += -2.0 * a - 400.0 * x[i] * b;
                g[i + 1] += 200.0 * b;
        }
        (f, g)
}

fn main() {
        let n = 25;
        let minimizer = LBFGSBBuilder::default()
                .maxcor(5)
                .factr(1e7)
                .pgtol(1e-5)
                .build()
                .unwrap();

        // even-indexed variables live in [1, 100], the rest in [-100, 100]
        let bounds: Vec<(f64, f64)> = (0..n)
                .map(|i| if i % 2 == 0 { (1.0, 100.0) } else { (-100.0, 100.0) })
                .collect();
        let x0 = Array1::from_elem(n, 3.0);

        let res = minimizer
                .minimize_with_progress(rosenbrock, x0.view(), Some(&bounds), |k: usize, f: f64, pg: f64| {
                        if k % 10 == 0 {
                                println!("iteration {:4}  f = {:12.6e}  |pg| = {:9.3e}", k, f, pg);
                        }
                })
                .unwrap();

        println!("{:?} after {} iterations, {} evaluations", res.status, res.iterations, res.f_evals);
        if !res.converged() {
                println!("warning: stopped before convergence");
        }
        println!("f = {:e}", res.f);
        println!("x = {}", res.x);

        // the same problem through the plain trait method
        let plain = minimizer.minimize(rosenbrock, x0.view(), Some(&bounds)).unwrap();
        assert_eq!(plain.x, res.x);
}
