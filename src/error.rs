//! Functionality for error estimation.
use crate::assembly::buffers::CellValues;
use crate::assembly::AssemblyError;
use crate::space::FunctionSpace;
use crate::Real;
use itertools::izip;
use nalgebra::{DVector, DVectorView, Point2, Vector2};

fn gather_cell<T: Real>(space: &FunctionSpace<T>, cell: usize, x: &DVector<T>, x_local: &mut DVector<T>) {
    let dofs = space.cell_dofs(cell);
    x_local.resize_vertically_mut(dofs.len(), T::zero());
    for (x_i, &dof) in x_local.iter_mut().zip(dofs) {
        *x_i = x[dof];
    }
}

/// Estimate the squared $L^2$ error $\norm{u_h - u}^2_{L^2}$ of the discrete function of `leaf`
/// with coefficients `x`, using a quadrature rule exact for polynomials of the given order.
///
/// # Panics
///
/// Panics if `x` does not have the length of the space or `leaf` is out of range.
pub fn estimate_l2_error_squared<T: Real>(
    space: &FunctionSpace<T>,
    leaf: usize,
    x: &DVector<T>,
    u: impl Fn(&Point2<T>) -> T,
    order: usize,
) -> Result<T, AssemblyError> {
    assert_eq!(x.len(), space.num_dofs(), "Coefficient vector must match the space");
    assert!(leaf < space.num_leaves(), "Leaf out of range");
    let mut values = CellValues::default();
    let mut x_local = DVector::zeros(0);
    let mut result = T::zero();
    for cell in 0..space.num_cells() {
        values.populate(space, cell, order)?;
        gather_cell(space, cell, x, &mut x_local);
        for (q, (&w, point)) in izip!(values.weights(), values.points()).enumerate() {
            let u_h = values.value(leaf, q, DVectorView::from(&x_local));
            let error = u_h - u(point);
            result += w * error * error;
        }
    }
    Ok(result)
}

/// Estimate the $L^2$ error $\norm{u_h - u}_{L^2}$ of the discrete function of `leaf`.
pub fn estimate_l2_error<T: Real>(
    space: &FunctionSpace<T>,
    leaf: usize,
    x: &DVector<T>,
    u: impl Fn(&Point2<T>) -> T,
    order: usize,
) -> Result<T, AssemblyError> {
    estimate_l2_error_squared(space, leaf, x, u, order).map(|e| e.sqrt())
}

/// Estimate the $H^1$ *seminorm* error $\seminorm{u_h - u}_{H^1}$ of the discrete function of
/// `leaf`, given the gradient of the exact solution.
pub fn estimate_h1_seminorm_error<T: Real>(
    space: &FunctionSpace<T>,
    leaf: usize,
    x: &DVector<T>,
    u_grad: impl Fn(&Point2<T>) -> Vector2<T>,
    order: usize,
) -> Result<T, AssemblyError> {
    assert_eq!(x.len(), space.num_dofs(), "Coefficient vector must match the space");
    assert!(leaf < space.num_leaves(), "Leaf out of range");
    let mut values = CellValues::default();
    let mut x_local = DVector::zeros(0);
    let mut result = T::zero();
    for cell in 0..space.num_cells() {
        values.populate(space, cell, order)?;
        gather_cell(space, cell, x, &mut x_local);
        for (q, (&w, point)) in izip!(values.weights(), values.points()).enumerate() {
            let error = values.gradient(leaf, q, DVectorView::from(&x_local)) - u_grad(point);
            result += w * error.norm_squared();
        }
    }
    Ok(result.sqrt())
}
