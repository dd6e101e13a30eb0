use crate::assembly::buffers::{CellValues, FaceValues};
use crate::Real;
use gridfem_optimize::calculus::{approximate_jacobian_fd_into, scaled_step_size};
use nalgebra::{DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

/// Problem-specific contributions of one cell or boundary face to the residual and Jacobian.
///
/// All local vectors and matrices are indexed by the cell's local DOFs, i.e. leaf by leaf as
/// given by [`CellValues::leaf_range`]. Outputs are zero on entry and implementations add their
/// contributions to them.
///
/// Only the residuals are required. The default Jacobians approximate the derivative of the
/// residual with central finite differences.
pub trait LocalOperator<T: Real> {
    /// Polynomial order for which volume and boundary quadrature must be exact.
    fn quadrature_order(&self) -> usize;

    /// Informs time-dependent operators about the time at which the next evaluations happen.
    fn set_time(&mut self, _time: T) {}

    fn volume_residual(&self, values: &CellValues<T>, x: DVectorView<T>, r: DVectorViewMut<T>) -> eyre::Result<()>;

    fn volume_jacobian(
        &self,
        values: &CellValues<T>,
        x: DVectorView<T>,
        jacobian: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        approximate_local_jacobian(x, jacobian, |x, r| self.volume_residual(values, x, r))
    }

    /// Whether the operator has boundary terms at all. Boundary faces are skipped otherwise.
    fn uses_boundary_terms(&self) -> bool {
        false
    }

    fn boundary_residual(&self, _values: &FaceValues<T>, _x: DVectorView<T>, _r: DVectorViewMut<T>) -> eyre::Result<()> {
        Ok(())
    }

    fn boundary_jacobian(
        &self,
        values: &FaceValues<T>,
        x: DVectorView<T>,
        jacobian: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        approximate_local_jacobian(x, jacobian, |x, r| self.boundary_residual(values, x, r))
    }
}

/// Central finite-difference Jacobian of a fallible local residual.
pub fn approximate_local_jacobian<T: Real>(
    x: DVectorView<T>,
    jacobian: DMatrixViewMut<T>,
    mut residual: impl FnMut(DVectorView<T>, DVectorViewMut<T>) -> eyre::Result<()>,
) -> eyre::Result<()> {
    let mut x: DVector<T> = x.clone_owned();
    let h = scaled_step_size(DVectorView::from(&x));
    let mut failure = None;
    approximate_jacobian_fd_into(
        jacobian,
        |x, r| {
            if failure.is_none() {
                if let Err(err) = residual(x, r) {
                    failure = Some(err);
                }
            }
        },
        &mut x,
        h,
    );
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
