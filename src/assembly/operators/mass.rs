use super::add_weighted_mass;
use crate::assembly::buffers::CellValues;
use crate::assembly::local::LocalOperator;
use crate::Real;
use eyre::eyre;
use nalgebra::{DMatrixViewMut, DVectorView, DVectorViewMut};

/// The L² mass term `∫ τ_c u_c φ_i` of every component, used as the temporal operator of
/// one-step methods.
#[derive(Debug, Clone, PartialEq)]
pub struct MassOperator<T> {
    scaling: Vec<T>,
    quadrature_order: usize,
}

impl<T: Real> MassOperator<T> {
    /// Mass operator for `num_components` components with unit scaling.
    pub fn new(num_components: usize) -> Self {
        Self::with_scaling(vec![T::one(); num_components])
    }

    /// Mass operator with one scaling factor `τ_c` per component.
    pub fn with_scaling(scaling: Vec<T>) -> Self {
        Self {
            scaling,
            quadrature_order: 4,
        }
    }

    pub fn with_quadrature_order(self, quadrature_order: usize) -> Self {
        Self {
            quadrature_order,
            ..self
        }
    }

    pub fn scaling(&self) -> &[T] {
        &self.scaling
    }
}

impl<T: Real> LocalOperator<T> for MassOperator<T> {
    fn quadrature_order(&self) -> usize {
        self.quadrature_order
    }

    fn volume_residual(&self, values: &CellValues<T>, x: DVectorView<T>, mut r: DVectorViewMut<T>) -> eyre::Result<()> {
        if values.num_leaves() != self.scaling.len() {
            return Err(eyre!(
                "mass operator has {} components, but the space has {} leaves",
                self.scaling.len(),
                values.num_leaves()
            ));
        }
        for (c, &tau) in self.scaling.iter().enumerate() {
            let basis = values.basis(c);
            let offset = values.leaf_range(c).start;
            for (q, &w) in values.weights().iter().enumerate() {
                let u = values.value(c, q, x);
                for (i, &phi_i) in basis.values(q).iter().enumerate() {
                    r[offset + i] += w * tau * u * phi_i;
                }
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
        if values.num_leaves() != self.scaling.len() {
            return Err(eyre!(
                "mass operator has {} components, but the space has {} leaves",
                self.scaling.len(),
                values.num_leaves()
            ));
        }
        for (c, &tau) in self.scaling.iter().enumerate() {
            add_weighted_mass(values, c, c, |_| tau, &mut jacobian);
        }
        Ok(())
    }
}
