//! Algorithms that search for local minima of functions along multiple dimensions, subject to
//! independent bounds on each variable.

mod bounds;
pub use self::bounds::BoundType;
pub use self::bounds::Bounds;

mod correction;
pub use self::correction::CorrectionStore;

mod cauchy;
mod line_search;
mod subspace;

mod l_bfgs_b;
pub use self::l_bfgs_b::LBFGSBBuilder;
pub use self::l_bfgs_b::LBFGSB;
