use crate::bicgstab::{BiCgStab, BiCgStabErrorKind, BiCgStabWorkspace};
use crate::cg::{CgWorkspace, ConjugateGradient, DefectReductionCriterion, LinearOperator, SolveErrorKind};
use crate::direct::solve_dense_lu;
use crate::preconditioners::{Jacobi, PreconditionerKind, Ssor};
use crate::cg::IdentityOperator;
use gridfem_traits::Real;
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::fmt;

/// Outcome of a successful linear solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolveStatistics<T> {
    pub iterations: usize,
    pub initial_defect: T,
    pub final_defect: T,
}

impl<T: Real> LinearSolveStatistics<T> {
    /// Achieved reduction `final_defect / initial_defect` (zero if the initial defect vanished).
    pub fn reduction(&self) -> T {
        if self.initial_defect == T::zero() {
            T::zero()
        } else {
            self.final_defect / self.initial_defect
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LinearSolveError<T> {
    /// The requested reduction was not reached within the iteration budget.
    NotConverged {
        iterations: usize,
        residual_norm: T,
        target: T,
    },
    /// The Krylov recurrence broke down (or the operator was not definite for CG).
    Breakdown { iterations: usize, reason: String },
    /// The matrix is singular.
    Singular,
    DimensionMismatch { expected: usize, actual: usize },
    /// The preconditioner could not be built because of a zero diagonal entry.
    InvalidPreconditioner { row: usize },
}

impl<T: fmt::Display> fmt::Display for LinearSolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConverged {
                iterations,
                residual_norm,
                target,
            } => write!(
                f,
                "linear solver did not converge after {} iterations (residual {}, target {})",
                iterations, residual_norm, target
            ),
            Self::Breakdown { iterations, reason } => {
                write!(f, "linear solver broke down after {} iterations: {}", iterations, reason)
            }
            Self::Singular => write!(f, "matrix is singular"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {}, got {}", expected, actual)
            }
            Self::InvalidPreconditioner { row } => {
                write!(f, "cannot build preconditioner: zero diagonal in row {}", row)
            }
        }
    }
}

impl<T: fmt::Debug + fmt::Display> Error for LinearSolveError<T> {}

/// A linear solver for `A x = b` that reduces the initial defect `||b - A x_0||` by `reduction`.
///
/// `x` holds the initial guess on entry and the solution on exit.
pub trait LinearSolver<T: Real> {
    fn solve(
        &mut self,
        a: &CsrMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        reduction: T,
    ) -> Result<LinearSolveStatistics<T>, LinearSolveError<T>>;
}

impl<T: Real, S: ?Sized + LinearSolver<T>> LinearSolver<T> for Box<S> {
    fn solve(
        &mut self,
        a: &CsrMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        reduction: T,
    ) -> Result<LinearSolveStatistics<T>, LinearSolveError<T>> {
        (**self).solve(a, x, b, reduction)
    }
}

fn check_dimensions<T: Real>(
    a: &CsrMatrix<T>,
    x: &DVector<T>,
    b: &DVector<T>,
) -> Result<(), LinearSolveError<T>> {
    if a.nrows() != a.ncols() {
        return Err(LinearSolveError::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    for actual in [x.len(), b.len()] {
        if actual != a.nrows() {
            return Err(LinearSolveError::DimensionMismatch {
                expected: a.nrows(),
                actual,
            });
        }
    }
    Ok(())
}

/// Preconditioner built from the matrix for one solve.
enum BuiltPreconditioner<'a, T: Real> {
    Identity,
    Jacobi(Jacobi<T>),
    Ssor(Ssor<'a, T>),
}

impl<'a, T: Real> BuiltPreconditioner<'a, T> {
    fn build(kind: PreconditionerKind<T>, a: &'a CsrMatrix<T>) -> Result<Self, LinearSolveError<T>> {
        let result = match kind {
            PreconditionerKind::Identity => Ok(Self::Identity),
            PreconditionerKind::Jacobi => Jacobi::from_csr(a).map(Self::Jacobi),
            PreconditionerKind::Ssor { omega } => Ssor::from_csr(a, omega).map(Self::Ssor),
        };
        result.map_err(|err| LinearSolveError::InvalidPreconditioner { row: err.row })
    }
}

impl<'a, T: Real> LinearOperator<T> for BuiltPreconditioner<'a, T> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        match self {
            Self::Identity => IdentityOperator.apply(y, x),
            Self::Jacobi(jacobi) => jacobi.apply(y, x),
            Self::Ssor(ssor) => ssor.apply(y, x),
        }
    }
}

/// Preconditioned conjugate gradients. Requires a symmetric positive definite matrix.
#[derive(Debug, Clone)]
pub struct CgSolver<T: Real> {
    pub max_iterations: usize,
    pub preconditioner: PreconditionerKind<T>,
    workspace: CgWorkspace<T>,
}

impl<T: Real> CgSolver<T> {
    pub fn new(preconditioner: PreconditionerKind<T>) -> Self {
        Self {
            max_iterations: 5000,
            preconditioner,
            workspace: CgWorkspace::default(),
        }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self }
    }
}

impl<T: Real> Default for CgSolver<T> {
    fn default() -> Self {
        Self::new(PreconditionerKind::Jacobi)
    }
}

impl<T: Real> LinearSolver<T> for CgSolver<T> {
    fn solve(
        &mut self,
        a: &CsrMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        reduction: T,
    ) -> Result<LinearSolveStatistics<T>, LinearSolveError<T>> {
        check_dimensions(a, x, b)?;
        let preconditioner = BuiltPreconditioner::build(self.preconditioner, a)?;
        let result = ConjugateGradient::with_workspace(&mut self.workspace)
            .with_operator(a)
            .with_preconditioner(&preconditioner)
            .with_stopping_criterion(DefectReductionCriterion::new(reduction))
            .with_max_iter(self.max_iterations)
            .solve_with_guess(b, &mut *x);

        match result {
            Ok(output) => {
                debug!(
                    "CG converged in {} iterations (defect {} -> {})",
                    output.num_iterations, output.initial_residual_norm, output.residual_norm
                );
                Ok(LinearSolveStatistics {
                    iterations: output.num_iterations,
                    initial_defect: output.initial_residual_norm,
                    final_defect: output.residual_norm,
                })
            }
            Err(err) => {
                let output = err.output;
                Err(match err.kind {
                    SolveErrorKind::MaxIterationsReached { .. } => LinearSolveError::NotConverged {
                        iterations: output.num_iterations,
                        residual_norm: output.residual_norm,
                        target: reduction * output.initial_residual_norm,
                    },
                    kind => LinearSolveError::Breakdown {
                        iterations: output.num_iterations,
                        reason: kind.to_string(),
                    },
                })
            }
        }
    }
}

/// Preconditioned BiCGStab for general square matrices.
#[derive(Debug, Clone)]
pub struct BiCgStabSolver<T: Real> {
    pub max_iterations: usize,
    pub preconditioner: PreconditionerKind<T>,
    workspace: BiCgStabWorkspace<T>,
}

impl<T: Real> BiCgStabSolver<T> {
    pub fn new(preconditioner: PreconditionerKind<T>) -> Self {
        Self {
            max_iterations: 5000,
            preconditioner,
            workspace: BiCgStabWorkspace::default(),
        }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self }
    }
}

impl<T: Real> Default for BiCgStabSolver<T> {
    fn default() -> Self {
        Self::new(PreconditionerKind::Jacobi)
    }
}

impl<T: Real> LinearSolver<T> for BiCgStabSolver<T> {
    fn solve(
        &mut self,
        a: &CsrMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        reduction: T,
    ) -> Result<LinearSolveStatistics<T>, LinearSolveError<T>> {
        check_dimensions(a, x, b)?;
        let preconditioner = BuiltPreconditioner::build(self.preconditioner, a)?;
        let result = BiCgStab::new(&mut self.workspace, a, &preconditioner)
            .with_max_iter(self.max_iterations)
            .with_reduction(reduction)
            .solve_with_guess(b, x);

        match result {
            Ok(output) => {
                debug!(
                    "BiCGStab converged in {} iterations (defect {} -> {})",
                    output.num_iterations, output.initial_residual_norm, output.residual_norm
                );
                Ok(LinearSolveStatistics {
                    iterations: output.num_iterations,
                    initial_defect: output.initial_residual_norm,
                    final_defect: output.residual_norm,
                })
            }
            Err(err) => {
                let output = err.output;
                Err(match err.kind {
                    BiCgStabErrorKind::MaxIterationsReached { .. } => LinearSolveError::NotConverged {
                        iterations: output.num_iterations,
                        residual_norm: output.residual_norm,
                        target: reduction * output.initial_residual_norm,
                    },
                    kind => LinearSolveError::Breakdown {
                        iterations: output.num_iterations,
                        reason: kind.to_string(),
                    },
                })
            }
        }
    }
}

/// Dense LU factorization. Only suitable for small systems.
#[derive(Debug, Copy, Clone, Default)]
pub struct DenseLuSolver;

impl<T: Real> LinearSolver<T> for DenseLuSolver {
    fn solve(
        &mut self,
        a: &CsrMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        _reduction: T,
    ) -> Result<LinearSolveStatistics<T>, LinearSolveError<T>> {
        check_dimensions(a, x, b)?;
        let initial_defect = (b - a * &*x).norm();
        let solution = solve_dense_lu(a, b).ok_or(LinearSolveError::Singular)?;
        x.copy_from(&solution);
        let final_defect = (b - a * &*x).norm();
        Ok(LinearSolveStatistics {
            iterations: 1,
            initial_defect,
            final_defect,
        })
    }
}
