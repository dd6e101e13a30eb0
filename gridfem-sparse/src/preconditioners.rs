//! Preconditioners assembled from a CSR matrix.
use crate::cg::LinearOperator;
use gridfem_traits::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;

/// The matrix has a zero (or missing) diagonal entry in the given row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ZeroDiagonalError {
    pub row: usize,
}

impl fmt::Display for ZeroDiagonalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix has a zero diagonal entry in row {}", self.row)
    }
}

impl Error for ZeroDiagonalError {}

/// Extracts the diagonal of a square CSR matrix, failing on zero or missing entries.
pub fn nonzero_diagonal<T: Real>(matrix: &CsrMatrix<T>) -> Result<DVector<T>, ZeroDiagonalError> {
    let mut diagonal = DVector::zeros(matrix.nrows());
    for (i, row) in matrix.row_iter().enumerate() {
        let a_ii = match row.col_indices().binary_search(&i) {
            Ok(idx) => row.values()[idx],
            Err(_) => T::zero(),
        };
        if a_ii == T::zero() {
            return Err(ZeroDiagonalError { row: i });
        }
        diagonal[i] = a_ii;
    }
    Ok(diagonal)
}

/// Which preconditioner a Krylov backend builds from the system matrix.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PreconditionerKind<T> {
    Identity,
    Jacobi,
    /// Symmetric successive over-relaxation with the given relaxation factor.
    Ssor { omega: T },
}

/// `z = D^{-1} r`.
#[derive(Debug, Clone)]
pub struct Jacobi<T: Real> {
    inverse_diagonal: DVector<T>,
}

impl<T: Real> Jacobi<T> {
    pub fn from_csr(matrix: &CsrMatrix<T>) -> Result<Self, ZeroDiagonalError> {
        let diagonal = nonzero_diagonal(matrix)?;
        Ok(Self {
            inverse_diagonal: diagonal.map(|d| T::one() / d),
        })
    }
}

impl<T: Real> LinearOperator<T> for Jacobi<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        y.component_mul_assign(&self.inverse_diagonal);
        Ok(())
    }
}

/// One symmetric SOR sweep (forward followed by backward) with relaxation factor `omega`.
///
/// With `A = L + D + U` this applies
/// `z = omega (2 - omega) (D + omega U)^{-1} D (D + omega L)^{-1} r`,
/// which is symmetric positive definite whenever `A` is and `0 < omega < 2`.
#[derive(Debug, Clone)]
pub struct Ssor<'a, T: Real> {
    matrix: &'a CsrMatrix<T>,
    diagonal: DVector<T>,
    omega: T,
}

impl<'a, T: Real> Ssor<'a, T> {
    pub fn from_csr(matrix: &'a CsrMatrix<T>, omega: T) -> Result<Self, ZeroDiagonalError> {
        assert_eq!(matrix.nrows(), matrix.ncols(), "SSOR requires a square matrix");
        let diagonal = nonzero_diagonal(matrix)?;
        Ok(Self {
            matrix,
            diagonal,
            omega,
        })
    }
}

impl<'a, T: Real> LinearOperator<T> for Ssor<'a, T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        let n = self.matrix.nrows();
        let omega = self.omega;

        // Forward sweep: (D + omega L) y = x
        for i in 0..n {
            let row = self.matrix.row(i);
            let mut sum = x[i];
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                if j < i {
                    sum -= omega * a_ij * y[j];
                }
            }
            y[i] = sum / self.diagonal[i];
        }

        // y <- D y
        y.component_mul_assign(&self.diagonal);

        // Backward sweep: (D + omega U) z = y, performed in place
        for i in (0..n).rev() {
            let row = self.matrix.row(i);
            let mut sum = y[i];
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                if j > i {
                    sum -= omega * a_ij * y[j];
                }
            }
            y[i] = sum / self.diagonal[i];
        }

        y *= omega * (2.0 - omega);
        Ok(())
    }
}
