//! Local operators for the model problems shipped with `gridfem`.
//!
//! Scalar operators act on leaf 0 of the function space. Operators for systems treat leaf `c`
//! as component `c`.
use crate::assembly::buffers::CellValues;
use crate::Real;
use nalgebra::{DMatrixViewMut, DVectorView};

mod mass;
mod nonlinear_poisson;
mod poisson;
mod reaction_diffusion;

pub use mass::*;
pub use nonlinear_poisson::*;
pub use poisson::*;
pub use reaction_diffusion::*;

/// Adds `scale * ∫ ∇φ_j · ∇φ_i` for the basis of `leaf` to the diagonal block of that leaf.
fn add_stiffness<T: Real>(values: &CellValues<T>, leaf: usize, scale: T, jacobian: &mut DMatrixViewMut<T>) {
    let range = values.leaf_range(leaf);
    let basis = values.basis(leaf);
    for (q, &w) in values.weights().iter().enumerate() {
        let gradients = basis.gradients(q);
        for (i, grad_i) in gradients.iter().enumerate() {
            for (j, grad_j) in gradients.iter().enumerate() {
                jacobian[(range.start + i, range.start + j)] += scale * w * grad_i.dot(grad_j);
            }
        }
    }
}

/// Adds `∫ c(x) φ_j φ_i` between the bases of `row_leaf` and `col_leaf`, where `c(q)` gives the
/// coefficient at quadrature point `q`.
fn add_weighted_mass<T: Real>(
    values: &CellValues<T>,
    row_leaf: usize,
    col_leaf: usize,
    mut coefficient: impl FnMut(usize) -> T,
    jacobian: &mut DMatrixViewMut<T>,
) {
    let rows = values.leaf_range(row_leaf);
    let cols = values.leaf_range(col_leaf);
    for (q, &w) in values.weights().iter().enumerate() {
        let c = coefficient(q);
        if c == T::zero() {
            continue;
        }
        let phi_row = values.basis(row_leaf).values(q);
        let phi_col = values.basis(col_leaf).values(q);
        for (i, &phi_i) in phi_row.iter().enumerate() {
            for (j, &phi_j) in phi_col.iter().enumerate() {
                jacobian[(rows.start + i, cols.start + j)] += w * c * phi_i * phi_j;
            }
        }
    }
}

/// Values of all components at quadrature point `q`.
fn component_values<T: Real>(values: &CellValues<T>, q: usize, x: DVectorView<T>, out: &mut Vec<T>) {
    out.clear();
    out.extend((0..values.num_leaves()).map(|leaf| values.value(leaf, q, x)));
}
