use crate::assembly::AssemblyError;
use crate::element::{reference_edge_point, CellGeometry};
use crate::mesh::{BoundaryFace, CellType};
use crate::quadrature::{edge_quadrature, quadrature_for, QuadratureRule};
use crate::space::FunctionSpace;
use crate::Real;
use nalgebra::{DVectorView, Point2, Vector2};
use std::ops::Range;

/// Basis values and physical gradients of one leaf at a set of quadrature points.
#[derive(Debug, Clone)]
pub struct LeafBasisBuffer<T: Real> {
    num_basis: usize,
    values: Vec<T>,
    gradients: Vec<Vector2<T>>,
}

impl<T: Real> Default for LeafBasisBuffer<T> {
    fn default() -> Self {
        Self {
            num_basis: 0,
            values: Vec::new(),
            gradients: Vec::new(),
        }
    }
}

impl<T: Real> LeafBasisBuffer<T> {
    pub fn resize(&mut self, num_points: usize, num_basis: usize) {
        self.num_basis = num_basis;
        self.values.resize(num_points * num_basis, T::zero());
        self.gradients.resize(num_points * num_basis, Vector2::zeros());
    }

    pub fn num_basis(&self) -> usize {
        self.num_basis
    }

    /// Basis values at quadrature point `q`.
    pub fn values(&self, q: usize) -> &[T] {
        &self.values[q * self.num_basis..(q + 1) * self.num_basis]
    }

    /// Physical basis gradients at quadrature point `q`.
    pub fn gradients(&self, q: usize) -> &[Vector2<T>] {
        &self.gradients[q * self.num_basis..(q + 1) * self.num_basis]
    }

    fn populate(
        &mut self,
        q: usize,
        space: &FunctionSpace<T>,
        leaf: usize,
        cell: usize,
        xi: &Point2<T>,
        inverse_transpose: &nalgebra::Matrix2<T>,
    ) {
        let local = space.local_space(cell);
        let fem = local.fem(leaf);
        let range = q * self.num_basis..(q + 1) * self.num_basis;
        fem.populate_basis(local.cell_type, &mut self.values[range.clone()], xi);
        let gradients = &mut self.gradients[range];
        fem.populate_basis_gradients(local.cell_type, gradients, xi);
        for gradient in gradients {
            *gradient = inverse_transpose * *gradient;
        }
    }
}

/// Quadrature rules of one order for all cell types, computed on demand.
#[derive(Debug, Clone)]
struct RuleCache<T: Real> {
    rules: Vec<(CellType, usize, QuadratureRule<T>)>,
}

impl<T: Real> Default for RuleCache<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T: Real> RuleCache<T> {
    fn get(&mut self, cell_type: CellType, order: usize) -> &QuadratureRule<T> {
        let idx = match self
            .rules
            .iter()
            .position(|(ct, o, _)| *ct == cell_type && *o == order)
        {
            Some(idx) => idx,
            None => {
                self.rules
                    .push((cell_type, order, quadrature_for(cell_type, order)));
                self.rules.len() - 1
            }
        };
        &self.rules[idx].2
    }
}

/// Evaluates a leaf's discrete function at quadrature point `q`, given the local coefficients
/// of that leaf.
fn leaf_value<T: Real>(buffer: &LeafBasisBuffer<T>, q: usize, x_leaf: DVectorView<T>) -> T {
    buffer
        .values(q)
        .iter()
        .zip(x_leaf.iter())
        .fold(T::zero(), |acc, (&phi, &x)| acc + phi * x)
}

fn leaf_gradient<T: Real>(buffer: &LeafBasisBuffer<T>, q: usize, x_leaf: DVectorView<T>) -> Vector2<T> {
    buffer
        .gradients(q)
        .iter()
        .zip(x_leaf.iter())
        .fold(Vector2::zeros(), |acc, (grad, &x)| acc + grad * x)
}

/// Quadrature data on one cell: physical points, weights scaled by `|det J|` and the basis of
/// every leaf.
#[derive(Debug, Clone)]
pub struct CellValues<T: Real> {
    cell: usize,
    cell_type: CellType,
    points: Vec<Point2<T>>,
    weights: Vec<T>,
    leaves: Vec<LeafBasisBuffer<T>>,
    leaf_ranges: Vec<Range<usize>>,
    rules: RuleCache<T>,
}

impl<T: Real> Default for CellValues<T> {
    fn default() -> Self {
        Self {
            cell: 0,
            cell_type: CellType::Triangle,
            points: Vec::new(),
            weights: Vec::new(),
            leaves: Vec::new(),
            leaf_ranges: Vec::new(),
            rules: RuleCache::default(),
        }
    }
}

impl<T: Real> CellValues<T> {
    /// Populates the buffer for a cell of `space` with a rule exact for the given order.
    pub fn populate(&mut self, space: &FunctionSpace<T>, cell: usize, order: usize) -> Result<(), AssemblyError> {
        let view = space.view();
        let local = space.local_space(cell);
        let geometry = CellGeometry::from_vertices(local.cell_type, &view.cell_points(cell));
        let rule = self.rules.get(local.cell_type, order);
        let num_points = rule.len();

        self.cell = cell;
        self.cell_type = local.cell_type;
        self.points.clear();
        self.weights.clear();
        self.leaf_ranges.clear();
        self.leaves.resize_with(local.num_leaves(), Default::default);
        for leaf in 0..local.num_leaves() {
            let range = local.leaf_range(leaf);
            self.leaves[leaf].resize(num_points, range.len());
            self.leaf_ranges.push(range);
        }

        for (q, (&w, xi)) in rule.weights.iter().zip(&rule.points).enumerate() {
            let (det, inverse_transpose) = geometry
                .jacobian_det_and_inverse_transpose(xi)
                .ok_or(AssemblyError::DegenerateGeometry { cell })?;
            self.points.push(geometry.map_reference_coords(xi));
            self.weights.push(w * det);
            for (leaf, buffer) in self.leaves.iter_mut().enumerate() {
                buffer.populate(q, space, leaf, cell, xi, &inverse_transpose);
            }
        }
        Ok(())
    }

    pub fn cell(&self) -> usize {
        self.cell
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn points(&self) -> &[Point2<T>] {
        &self.points
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Range of the local DOFs of `leaf` in the cell's local vectors.
    pub fn leaf_range(&self, leaf: usize) -> Range<usize> {
        self.leaf_ranges[leaf].clone()
    }

    pub fn basis(&self, leaf: usize) -> &LeafBasisBuffer<T> {
        &self.leaves[leaf]
    }

    /// Value of the discrete function of `leaf` at quadrature point `q`, where `x` holds all
    /// local coefficients of the cell.
    pub fn value(&self, leaf: usize, q: usize, x: DVectorView<T>) -> T {
        leaf_value(&self.leaves[leaf], q, x.rows_range(self.leaf_range(leaf)))
    }

    pub fn gradient(&self, leaf: usize, q: usize, x: DVectorView<T>) -> Vector2<T> {
        leaf_gradient(&self.leaves[leaf], q, x.rows_range(self.leaf_range(leaf)))
    }
}

/// Quadrature data on a boundary face: physical points, weights scaled by the face length and
/// the basis of every leaf of the adjacent cell.
#[derive(Debug, Clone)]
pub struct FaceValues<T: Real> {
    face: BoundaryFace<T>,
    points: Vec<Point2<T>>,
    weights: Vec<T>,
    leaves: Vec<LeafBasisBuffer<T>>,
    leaf_ranges: Vec<Range<usize>>,
}

impl<T: Real> Default for FaceValues<T> {
    fn default() -> Self {
        Self {
            face: BoundaryFace {
                cell: 0,
                local_edge: 0,
                edge: 0,
                endpoints: [Point2::origin(); 2],
                normal: Vector2::zeros(),
                length: T::zero(),
            },
            points: Vec::new(),
            weights: Vec::new(),
            leaves: Vec::new(),
            leaf_ranges: Vec::new(),
        }
    }
}

impl<T: Real> FaceValues<T> {
    pub fn populate(&mut self, space: &FunctionSpace<T>, face: &BoundaryFace<T>, order: usize) -> Result<(), AssemblyError> {
        let view = space.view();
        let local = space.local_space(face.cell);
        let geometry = CellGeometry::from_vertices(local.cell_type, &view.cell_points(face.cell));
        let (edge_weights, edge_points) = edge_quadrature::<T>(order);

        self.face = face.clone();
        self.points.clear();
        self.weights.clear();
        self.leaf_ranges.clear();
        self.leaves.resize_with(local.num_leaves(), Default::default);
        for leaf in 0..local.num_leaves() {
            let range = local.leaf_range(leaf);
            self.leaves[leaf].resize(edge_points.len(), range.len());
            self.leaf_ranges.push(range);
        }

        for (q, (&w, &s)) in edge_weights.iter().zip(&edge_points).enumerate() {
            let xi = reference_edge_point(local.cell_type, face.local_edge, s);
            let (_, inverse_transpose) = geometry
                .jacobian_det_and_inverse_transpose(&xi)
                .ok_or(AssemblyError::DegenerateGeometry { cell: face.cell })?;
            self.points.push(face.global(s));
            self.weights.push(w * face.length);
            for (leaf, buffer) in self.leaves.iter_mut().enumerate() {
                buffer.populate(q, space, leaf, face.cell, &xi, &inverse_transpose);
            }
        }
        Ok(())
    }

    /// The boundary face the buffer was populated for.
    pub fn face(&self) -> &BoundaryFace<T> {
        &self.face
    }

    /// Unit outward normal.
    pub fn normal(&self) -> &Vector2<T> {
        &self.face.normal
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn points(&self) -> &[Point2<T>] {
        &self.points
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaf_range(&self, leaf: usize) -> Range<usize> {
        self.leaf_ranges[leaf].clone()
    }

    pub fn basis(&self, leaf: usize) -> &LeafBasisBuffer<T> {
        &self.leaves[leaf]
    }

    pub fn value(&self, leaf: usize, q: usize, x: DVectorView<T>) -> T {
        leaf_value(&self.leaves[leaf], q, x.rows_range(self.leaf_range(leaf)))
    }

    pub fn gradient(&self, leaf: usize, q: usize, x: DVectorView<T>) -> Vector2<T> {
        leaf_gradient(&self.leaves[leaf], q, x.rows_range(self.leaf_range(leaf)))
    }
}
