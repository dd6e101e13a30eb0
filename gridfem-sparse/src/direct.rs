//! Dense direct solves for small systems.
use gridfem_traits::Real;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

/// Solves `A x = b` by dense LU factorization with partial pivoting.
///
/// Returns `None` if `A` is singular.
pub fn solve_dense_lu<T: Real>(a: &CsrMatrix<T>, b: &DVector<T>) -> Option<DVector<T>> {
    let dense = DMatrix::from(a);
    dense.lu().solve(b)
}
