//! Linear solve backends used by the `gridfem` Newton solver.
//!
//! All backends consume a [`CsrMatrix`] and implement [`LinearSolver`], which asks for a
//! reduction of the initial defect by a prescribed factor.
pub mod bicgstab;
pub mod cg;
pub mod direct;
pub mod preconditioners;

mod solver;

pub use nalgebra_sparse::pattern::SparsityPattern;
pub use nalgebra_sparse::CsrMatrix;
pub use solver::*;
