//! Finite element discretization of stationary and instationary PDEs on adaptively refined
//! 2D grids.
//!
//! A [`FunctionSpace`](space::FunctionSpace) numbers the degrees of freedom of a
//! (possibly composite) finite element space on the leaf view of an
//! [`AdaptiveGrid`](mesh::AdaptiveGrid). [`AffineConstraints`](constraints::AffineConstraints)
//! express Dirichlet and hanging-node DOFs through unconstrained masters. The
//! [`GridOperator`](assembly::global::GridOperator) assembles residuals and Jacobians of a
//! [`LocalOperator`](assembly::local::LocalOperator) under these constraints, and the systems
//! are solved with the damped Newton method of [`optimize`] or advanced in time with the
//! one-step methods of [`timestepping`].
pub mod assembly;
pub mod constraints;
pub mod element;
pub mod error;
pub mod mesh;
pub mod quadrature;
pub mod space;
pub mod timestepping;

pub mod optimize {
    pub use gridfem_optimize::*;
}

pub mod sparse {
    pub use gridfem_sparse::*;
}

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use gridfem_traits::Real;
