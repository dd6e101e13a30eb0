use gridfem_sparse::bicgstab::{BiCgStab, BiCgStabWorkspace};
use gridfem_sparse::cg::{CgWorkspace, ConjugateGradient, DefectReductionCriterion, IdentityOperator};
use gridfem_sparse::CsrMatrix;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CooMatrix;
use proptest::prelude::*;

/// 1D Laplacian with Dirichlet rows eliminated: tridiagonal (-1, 2, -1).
fn laplace_1d(n: usize) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 2.0);
        if i > 0 {
            coo.push(i, i - 1, -1.0);
        }
        if i + 1 < n {
            coo.push(i, i + 1, -1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// Non-symmetric convection-diffusion-like matrix.
fn upwind_1d(n: usize) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 3.0);
        if i > 0 {
            coo.push(i, i - 1, -2.0);
        }
        if i + 1 < n {
            coo.push(i, i + 1, -0.5);
        }
    }
    CsrMatrix::from(&coo)
}

#[test]
fn cg_solves_laplace_system() {
    let a = laplace_1d(20);
    let x_exact = DVector::from_fn(20, |i, _| (i as f64 * 0.3).sin());
    let b = &a * &x_exact;

    let mut x = DVector::zeros(20);
    let output = ConjugateGradient::new()
        .with_operator(&a)
        .with_stopping_criterion(DefectReductionCriterion::new(1e-12))
        .solve_with_guess(&b, &mut x)
        .unwrap();

    assert!(output.num_iterations <= 20);
    assert_matrix_eq!(x, x_exact, comp = abs, tol = 1e-9);
}

#[test]
fn cg_with_exact_initial_guess_does_not_iterate() {
    let a = laplace_1d(5);
    let x_exact = DVector::repeat(5, 1.0);
    let b = &a * &x_exact;

    let mut x = x_exact.clone();
    let output = ConjugateGradient::new()
        .with_operator(&a)
        .with_stopping_criterion(DefectReductionCriterion::new(1e-12))
        .solve_with_guess(&b, &mut x)
        .unwrap();
    assert_eq!(output.num_iterations, 0);
    assert_eq!(output.initial_residual_norm, 0.0);
}

#[test]
fn cg_reports_indefinite_operator() {
    let a = DMatrix::from_diagonal(&DVector::from_column_slice(&[1.0, -1.0]));
    let b = DVector::from_column_slice(&[1.0, 1.0]);
    let mut x = DVector::zeros(2);
    let result = ConjugateGradient::new()
        .with_operator(&a)
        .with_stopping_criterion(DefectReductionCriterion::new(1e-12))
        .solve_with_guess(&b, &mut x);
    assert!(result.is_err());
}

#[test]
fn cg_workspace_reuse_gives_same_solutions() {
    let a = laplace_1d(12);
    let mut workspace = CgWorkspace::default();
    for k in 1..4 {
        let x_exact = DVector::repeat(12, k as f64);
        let b = &a * &x_exact;

        let mut x_reused = DVector::zeros(12);
        ConjugateGradient::with_workspace(&mut workspace)
            .with_operator(&a)
            .with_preconditioner(IdentityOperator)
            .with_stopping_criterion(DefectReductionCriterion::new(1e-12))
            .solve_with_guess(&b, &mut x_reused)
            .unwrap();

        let mut x_fresh = DVector::zeros(12);
        ConjugateGradient::new()
            .with_operator(&a)
            .with_stopping_criterion(DefectReductionCriterion::new(1e-12))
            .solve_with_guess(&b, &mut x_fresh)
            .unwrap();

        assert_eq!(x_reused, x_fresh);
    }
}

#[test]
fn bicgstab_solves_nonsymmetric_system() {
    let n = 30;
    let a = upwind_1d(n);
    let x_exact = DVector::from_fn(n, |i, _| 1.0 + i as f64 / n as f64);
    let b = &a * &x_exact;

    let mut workspace = BiCgStabWorkspace::default();
    let mut x = DVector::zeros(n);
    let output = BiCgStab::new(&mut workspace, &a, IdentityOperator)
        .with_reduction(1e-12)
        .solve_with_guess(&b, &mut x)
        .unwrap();

    assert!(output.residual_norm <= 1e-12 * output.initial_residual_norm);
    assert_matrix_eq!(x, x_exact, comp = abs, tol = 1e-8);
}

#[test]
fn bicgstab_reports_max_iterations() {
    let a = upwind_1d(50);
    let b = DVector::repeat(50, 1.0);
    let mut workspace = BiCgStabWorkspace::default();
    let mut x = DVector::zeros(50);
    let result = BiCgStab::new(&mut workspace, &a, IdentityOperator)
        .with_reduction(1e-14)
        .with_max_iter(1)
        .solve_with_guess(&b, &mut x);
    let err = result.unwrap_err();
    assert_eq!(err.output.num_iterations, 1);
}

proptest! {
    #[test]
    fn cg_reaches_requested_reduction(n in 1usize..30, reduction in 1e-10..1e-2f64) {
        let a = laplace_1d(n);
        let b = DVector::from_fn(n, |i, _| (i as f64).cos() + 2.0);
        let mut x = DVector::zeros(n);
        let output = ConjugateGradient::new()
            .with_operator(&a)
            .with_stopping_criterion(DefectReductionCriterion::new(reduction))
            .solve_with_guess(&b, &mut x)
            .unwrap();
        prop_assert!(output.residual_norm <= reduction * output.initial_residual_norm);
    }
}
