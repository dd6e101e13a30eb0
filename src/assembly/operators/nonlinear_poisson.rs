use super::{add_stiffness, add_weighted_mass};
use crate::assembly::buffers::CellValues;
use crate::assembly::local::LocalOperator;
use crate::Real;
use nalgebra::{DMatrixViewMut, DVectorView, DVectorViewMut, Point2};
use numeric_literals::replace_float_literals;

/// The nonlinear reaction problem `-Δu + η u² = f` (homogeneous Neumann conditions on faces
/// that are not constrained).
#[derive(Debug, Clone)]
pub struct NonlinearPoissonOperator<T, F> {
    eta: T,
    source: F,
    quadrature_order: usize,
}

impl<T: Real, F> NonlinearPoissonOperator<T, F> {
    pub fn new(eta: T, source: F) -> Self {
        Self {
            eta,
            source,
            quadrature_order: 3,
        }
    }

    pub fn with_quadrature_order(self, quadrature_order: usize) -> Self {
        Self {
            quadrature_order,
            ..self
        }
    }
}

impl<T, F> LocalOperator<T> for NonlinearPoissonOperator<T, F>
where
    T: Real,
    F: Fn(&Point2<T>) -> T,
{
    fn quadrature_order(&self) -> usize {
        self.quadrature_order
    }

    fn volume_residual(&self, values: &CellValues<T>, x: DVectorView<T>, mut r: DVectorViewMut<T>) -> eyre::Result<()> {
        let basis = values.basis(0);
        for (q, (&w, point)) in values.weights().iter().zip(values.points()).enumerate() {
            let u = values.value(0, q, x);
            let grad_u = values.gradient(0, q, x);
            let reaction = self.eta * u * u - (self.source)(point);
            for (i, (&phi_i, grad_phi_i)) in basis.values(q).iter().zip(basis.gradients(q)).enumerate() {
                r[i] += w * (grad_u.dot(grad_phi_i) + reaction * phi_i);
            }
        }
        Ok(())
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn volume_jacobian(
        &self,
        values: &CellValues<T>,
        x: DVectorView<T>,
        mut jacobian: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        add_stiffness(values, 0, 1.0, &mut jacobian);
        add_weighted_mass(values, 0, 0, |q| 2.0 * self.eta * values.value(0, q, x), &mut jacobian);
        Ok(())
    }
}
