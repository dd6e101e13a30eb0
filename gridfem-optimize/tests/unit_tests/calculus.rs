use gridfem_optimize::calculus::*;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};

#[test]
fn approximate_jacobian_simple_function() {
    let f = |x: DVectorView<f64>, mut f: DVectorViewMut<f64>| {
        let (x1, x2) = (x[0], x[1]);
        f[0] = x1 * x2 + 3.0;
        f[1] = x1 * x1 + x2 * x2 + x1 + 5.0;
    };

    let mut x = DVector::from_column_slice(&[3.0, 4.0]);
    let j = approximate_jacobian_fd(2, f, &mut x, 1e-6);

    // J = [   x2           x1 ]
    //     [ 2*x1 + 1     2*x2 ]
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 2,
                                           &[4.0, 3.0,
                                             7.0, 8.0]);

    assert_matrix_eq!(j, expected, comp = abs, tol = 1e-6);
    // The point of evaluation is restored
    assert_eq!(x, DVector::from_column_slice(&[3.0, 4.0]));
}

#[test]
fn approximate_jacobian_into_non_square_output() {
    let f = |x: DVectorView<f64>, mut f: DVectorViewMut<f64>| {
        f[0] = x[0] * x[1] * x[2];
    };
    let mut x = DVector::from_column_slice(&[1.0, 2.0, 3.0]);
    let mut j = DMatrix::zeros(1, 3);
    approximate_jacobian_fd_into(&mut j, f, &mut x, 1e-6);
    assert_matrix_eq!(j, DMatrix::from_row_slice(1, 3, &[6.0, 3.0, 2.0]), comp = abs, tol = 1e-6);
}

#[test]
fn scaled_step_size_grows_with_magnitude() {
    let small = DVector::from_column_slice(&[0.0, 0.5]);
    let large = DVector::from_column_slice(&[-1000.0, 2.0]);
    assert!(scaled_step_size(DVectorView::from(&small)) < scaled_step_size(DVectorView::from(&large)));
    assert_eq!(scaled_step_size(DVectorView::from(&DVector::<f64>::zeros(2))), 1e-7);
}
