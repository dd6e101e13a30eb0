use super::{add_stiffness, add_weighted_mass, component_values};
use crate::assembly::buffers::{CellValues, FaceValues};
use crate::assembly::local::LocalOperator;
use crate::Real;
use eyre::eyre;
use nalgebra::{DMatrix, DMatrixViewMut, DVectorView, DVectorViewMut};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Pointwise reaction terms `f(u)` of a system of reaction-diffusion equations.
pub trait Kinetics<T: Real> {
    fn num_components(&self) -> usize;

    /// Evaluates `f(u)` into `f`.
    fn reaction(&self, u: &[T], f: &mut [T]);

    /// Evaluates `∂f_c / ∂u_k` into `df[(c, k)]`.
    fn reaction_jacobian(&self, u: &[T], df: &mut DMatrix<T>);
}

/// FitzHugh–Nagumo kinetics
///
/// ```text
/// f_0 = λ u_0 - u_0³ - σ u_1 + κ
/// f_1 = u_0 - u_1
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitzHughNagumo<T> {
    pub lambda: T,
    pub sigma: T,
    pub kappa: T,
}

impl<T: Real> Kinetics<T> for FitzHughNagumo<T> {
    fn num_components(&self) -> usize {
        2
    }

    fn reaction(&self, u: &[T], f: &mut [T]) {
        let (u0, u1) = (u[0], u[1]);
        f[0] = self.lambda * u0 - u0 * u0 * u0 - self.sigma * u1 + self.kappa;
        f[1] = u0 - u1;
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn reaction_jacobian(&self, u: &[T], df: &mut DMatrix<T>) {
        let u0 = u[0];
        df[(0, 0)] = self.lambda - 3.0 * u0 * u0;
        df[(0, 1)] = -self.sigma;
        df[(1, 0)] = 1.0;
        df[(1, 1)] = -1.0;
    }
}

/// Linear kinetics `f(u) = A u`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearKinetics<T: Real> {
    pub matrix: DMatrix<T>,
}

impl<T: Real> LinearKinetics<T> {
    pub fn new(matrix: DMatrix<T>) -> Self {
        assert!(matrix.is_square(), "Kinetics matrix must be square");
        Self { matrix }
    }
}

impl<T: Real> Kinetics<T> for LinearKinetics<T> {
    fn num_components(&self) -> usize {
        self.matrix.nrows()
    }

    fn reaction(&self, u: &[T], f: &mut [T]) {
        for (c, f_c) in f.iter_mut().enumerate() {
            *f_c = self
                .matrix
                .row(c)
                .iter()
                .zip(u)
                .fold(T::zero(), |acc, (&a, &u_k)| acc + a * u_k);
        }
    }

    fn reaction_jacobian(&self, _u: &[T], df: &mut DMatrix<T>) {
        df.copy_from(&self.matrix);
    }
}

/// A system of reaction-diffusion equations
///
/// ```text
/// -d_c Δu_c - f_c(u) = 0,   c = 0, ..., n - 1,
/// ```
///
/// where component `c` lives on leaf `c` of the function space. Each component may carry a
/// constant Neumann flux `j_c = -d_c ∇u_c · n` on all boundary faces.
#[derive(Debug, Clone)]
pub struct ReactionDiffusionOperator<T: Real, K> {
    kinetics: K,
    diffusion: Vec<T>,
    flux: Vec<T>,
    quadrature_order: usize,
}

impl<T: Real, K: Kinetics<T>> ReactionDiffusionOperator<T, K> {
    /// Creates the operator with one diffusion coefficient per component and zero fluxes.
    pub fn new(kinetics: K, diffusion: Vec<T>) -> Self {
        assert_eq!(
            diffusion.len(),
            kinetics.num_components(),
            "Need one diffusion coefficient per component"
        );
        let flux = vec![T::zero(); diffusion.len()];
        Self {
            kinetics,
            diffusion,
            flux,
            quadrature_order: 4,
        }
    }

    /// Sets the constant Neumann flux of every component.
    pub fn with_flux(self, flux: Vec<T>) -> Self {
        assert_eq!(flux.len(), self.diffusion.len(), "Need one flux per component");
        Self { flux, ..self }
    }

    pub fn with_quadrature_order(self, quadrature_order: usize) -> Self {
        Self {
            quadrature_order,
            ..self
        }
    }

    pub fn kinetics(&self) -> &K {
        &self.kinetics
    }

    fn check_components(&self, num_leaves: usize) -> eyre::Result<()> {
        if num_leaves == self.diffusion.len() {
            Ok(())
        } else {
            Err(eyre!(
                "reaction-diffusion system has {} components, but the space has {} leaves",
                self.diffusion.len(),
                num_leaves
            ))
        }
    }
}

impl<T: Real, K: Kinetics<T>> LocalOperator<T> for ReactionDiffusionOperator<T, K> {
    fn quadrature_order(&self) -> usize {
        self.quadrature_order
    }

    fn volume_residual(&self, values: &CellValues<T>, x: DVectorView<T>, mut r: DVectorViewMut<T>) -> eyre::Result<()> {
        self.check_components(values.num_leaves())?;
        let n = self.diffusion.len();
        let mut u = Vec::with_capacity(n);
        let mut f = vec![T::zero(); n];
        for (q, &w) in values.weights().iter().enumerate() {
            component_values(values, q, x, &mut u);
            self.kinetics.reaction(&u, &mut f);
            for (c, (&d_c, &f_c)) in self.diffusion.iter().zip(&f).enumerate() {
                let grad_u = values.gradient(c, q, x);
                let basis = values.basis(c);
                let offset = values.leaf_range(c).start;
                for (i, (&phi_i, grad_phi_i)) in basis.values(q).iter().zip(basis.gradients(q)).enumerate() {
                    r[offset + i] += w * (d_c * grad_u.dot(grad_phi_i) - f_c * phi_i);
                }
            }
        }
        Ok(())
    }

    fn volume_jacobian(
        &self,
        values: &CellValues<T>,
        x: DVectorView<T>,
        mut jacobian: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        self.check_components(values.num_leaves())?;
        let n = self.diffusion.len();
        for (c, &d_c) in self.diffusion.iter().enumerate() {
            add_stiffness(values, c, d_c, &mut jacobian);
        }

        // Reaction derivatives at all quadrature points
        let mut u = Vec::with_capacity(n);
        let mut df = DMatrix::zeros(n, n);
        let derivatives: Vec<DMatrix<T>> = (0..values.num_points())
            .map(|q| {
                component_values(values, q, x, &mut u);
                self.kinetics.reaction_jacobian(&u, &mut df);
                df.clone()
            })
            .collect();
        for c in 0..n {
            for k in 0..n {
                add_weighted_mass(values, c, k, |q| -derivatives[q][(c, k)], &mut jacobian);
            }
        }
        Ok(())
    }

    fn uses_boundary_terms(&self) -> bool {
        self.flux.iter().any(|&j| j != T::zero())
    }

    fn boundary_residual(&self, values: &FaceValues<T>, _x: DVectorView<T>, mut r: DVectorViewMut<T>) -> eyre::Result<()> {
        self.check_components(values.num_leaves())?;
        for (c, &j_c) in self.flux.iter().enumerate() {
            let basis = values.basis(c);
            let offset = values.leaf_range(c).start;
            for (q, &w) in values.weights().iter().enumerate() {
                for (i, &phi_i) in basis.values(q).iter().enumerate() {
                    r[offset + i] += w * j_c * phi_i;
                }
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
