use super::add_stiffness;
use crate::assembly::buffers::{CellValues, FaceValues};
use crate::assembly::local::LocalOperator;
use crate::constraints::BoundaryClassifier;
use crate::Real;
use nalgebra::{convert, DMatrixViewMut, DVectorView, DVectorViewMut, Point2};

/// The Poisson problem `-Δu = f` with Neumann flux `j = -∇u · n` on all boundary faces that are
/// not classified as Dirichlet.
///
/// The residual is
///
/// ```text
/// r_i = ∫ ∇u · ∇φ_i - f φ_i dx + ∫_{Γ_N} j φ_i ds.
/// ```
#[derive(Debug, Clone)]
pub struct PoissonOperator<F, J, B> {
    source: F,
    flux: J,
    classifier: B,
    quadrature_order: usize,
}

impl<F, J, B> PoissonOperator<F, J, B> {
    pub fn new(source: F, flux: J, classifier: B) -> Self {
        Self {
            source,
            flux,
            classifier,
            quadrature_order: 2,
        }
    }

    pub fn with_quadrature_order(self, quadrature_order: usize) -> Self {
        Self {
            quadrature_order,
            ..self
        }
    }
}

impl<T, F, J, B> LocalOperator<T> for PoissonOperator<F, J, B>
where
    T: Real,
    F: Fn(&Point2<T>) -> T,
    J: Fn(&Point2<T>) -> T,
    B: BoundaryClassifier<T>,
{
    fn quadrature_order(&self) -> usize {
        self.quadrature_order
    }

    fn volume_residual(&self, values: &CellValues<T>, x: DVectorView<T>, mut r: DVectorViewMut<T>) -> eyre::Result<()> {
        let basis = values.basis(0);
        for (q, (&w, point)) in values.weights().iter().zip(values.points()).enumerate() {
            let grad_u = values.gradient(0, q, x);
            let f = (self.source)(point);
            for (i, (&phi_i, grad_phi_i)) in basis.values(q).iter().zip(basis.gradients(q)).enumerate() {
                r[i] += w * (grad_u.dot(grad_phi_i) - f * phi_i);
            }
        }
        Ok(())
    }

    fn volume_jacobian(
        &self,
        values: &CellValues<T>,
        _x: DVectorView<T>,
        mut jacobian: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        add_stiffness(values, 0, T::one(), &mut jacobian);
        Ok(())
    }

    fn uses_boundary_terms(&self) -> bool {
        true
    }

    fn boundary_residual(&self, values: &FaceValues<T>, _x: DVectorView<T>, mut r: DVectorViewMut<T>) -> eyre::Result<()> {
        if self.classifier.is_dirichlet(values.face(), convert(0.5)) {
            return Ok(());
        }
        let basis = values.basis(0);
        for (q, (&w, point)) in values.weights().iter().zip(values.points()).enumerate() {
            let j = (self.flux)(point);
            for (i, &phi_i) in basis.values(q).iter().enumerate() {
                r[i] += w * j * phi_i;
            }
        }
        Ok(())
    }

    fn boundary_jacobian(
        &self,
        _values: &FaceValues<T>,
        _x: DVectorView<T>,
        _jacobian: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        Ok(())
    }
}
