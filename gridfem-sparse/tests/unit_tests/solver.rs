use gridfem_sparse::preconditioners::PreconditionerKind;
use gridfem_sparse::{BiCgStabSolver, CgSolver, CsrMatrix, DenseLuSolver, LinearSolveError, LinearSolver};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};

fn poisson_2d(n: usize) -> CsrMatrix<f64> {
    let idx = |i: usize, j: usize| i * n + j;
    let mut dense = DMatrix::zeros(n * n, n * n);
    for i in 0..n {
        for j in 0..n {
            dense[(idx(i, j), idx(i, j))] = 4.0;
            if i > 0 {
                dense[(idx(i, j), idx(i - 1, j))] = -1.0;
            }
            if i + 1 < n {
                dense[(idx(i, j), idx(i + 1, j))] = -1.0;
            }
            if j > 0 {
                dense[(idx(i, j), idx(i, j - 1))] = -1.0;
            }
            if j + 1 < n {
                dense[(idx(i, j), idx(i, j + 1))] = -1.0;
            }
        }
    }
    CsrMatrix::from(&dense)
}

fn check_solver(solver: &mut dyn LinearSolver<f64>) {
    let a = poisson_2d(6);
    let x_exact = DVector::from_fn(36, |i, _| (i as f64 * 0.17).cos());
    let b = &a * &x_exact;
    let mut x = DVector::zeros(36);
    let stats = solver.solve(&a, &mut x, &b, 1e-12).unwrap();
    assert!(stats.reduction() <= 1e-10);
    assert_matrix_eq!(x, x_exact, comp = abs, tol = 1e-8);
}

#[test]
fn cg_backends_solve_poisson() {
    check_solver(&mut CgSolver::new(PreconditionerKind::Identity));
    check_solver(&mut CgSolver::new(PreconditionerKind::Jacobi));
    check_solver(&mut CgSolver::new(PreconditionerKind::Ssor { omega: 1.0 }));
}

#[test]
fn bicgstab_backends_solve_poisson() {
    check_solver(&mut BiCgStabSolver::new(PreconditionerKind::Identity));
    check_solver(&mut BiCgStabSolver::new(PreconditionerKind::Jacobi));
    check_solver(&mut BiCgStabSolver::new(PreconditionerKind::Ssor { omega: 1.2 }));
}

#[test]
fn dense_lu_solves_poisson() {
    check_solver(&mut DenseLuSolver);
}

#[test]
fn dense_lu_reports_singular_matrix() {
    let a = CsrMatrix::from(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]));
    let b = DVector::from_column_slice(&[1.0, 1.0]);
    let mut x = DVector::zeros(2);
    assert_eq!(DenseLuSolver.solve(&a, &mut x, &b, 1e-8), Err(LinearSolveError::Singular));
}

#[test]
fn solvers_reject_mismatched_dimensions() {
    let a = poisson_2d(2);
    let b = DVector::zeros(3);
    let mut x = DVector::zeros(4);
    let err = CgSolver::default().solve(&a, &mut x, &b, 1e-8).unwrap_err();
    assert_eq!(err, LinearSolveError::DimensionMismatch { expected: 4, actual: 3 });
}

#[test]
fn jacobi_on_zero_diagonal_is_invalid_preconditioner() {
    let a = CsrMatrix::from(&DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]));
    let b = DVector::from_column_slice(&[1.0, 1.0]);
    let mut x = DVector::zeros(2);
    let err = BiCgStabSolver::default().solve(&a, &mut x, &b, 1e-8).unwrap_err();
    assert_eq!(err, LinearSolveError::InvalidPreconditioner { row: 0 });
}

#[test]
fn max_iterations_gives_not_converged() {
    let a = poisson_2d(8);
    let b = DVector::repeat(64, 1.0);
    let mut x = DVector::zeros(64);
    let mut solver = CgSolver::new(PreconditionerKind::Identity).with_max_iterations(2);
    match solver.solve(&a, &mut x, &b, 1e-12) {
        Err(LinearSolveError::NotConverged { iterations, .. }) => assert_eq!(iterations, 2),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn zero_right_hand_side_converges_immediately() {
    let a = poisson_2d(3);
    let b = DVector::zeros(9);
    let mut x = DVector::zeros(9);
    let stats = CgSolver::default().solve(&a, &mut x, &b, 1e-8).unwrap();
    assert_eq!(stats.iterations, 0);
}
