//! Reference elements, finite element maps and cell geometry.
//!
//! A [`FiniteElementMap`] describes the local basis on each reference cell together with the
//! mesh entity every local basis function is attached to. Local degrees of freedom are always
//! ordered by entity: first all vertex DOFs (vertex by vertex), then edge DOFs, then interior
//! DOFs.
use crate::mesh::CellType;
use crate::Real;
use nalgebra::{Matrix2, Point2, Vector2};
use numeric_literals::replace_float_literals;
use std::fmt::Debug;

/// The mesh entity a local basis function belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DofAttachment {
    /// Local vertex index.
    Vertex(usize),
    /// Local edge index.
    Edge(usize),
    /// Index among the interior DOFs of the cell.
    Interior(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDof<T: Real> {
    pub attachment: DofAttachment,
    /// Reference coordinates of the Lagrange node.
    pub nodal_point: Point2<T>,
}

/// Reference vertices in counter-clockwise order.
#[replace_float_literals(T::from_f64(literal).unwrap())]
pub fn reference_vertices<T: Real>(cell_type: CellType) -> Vec<Point2<T>> {
    match cell_type {
        CellType::Triangle => vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)],
        CellType::Quadrilateral => vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ],
    }
}

/// Maps the parameter `t` in `[0, 1]` along a local edge to reference coordinates.
pub fn reference_edge_point<T: Real>(cell_type: CellType, local_edge: usize, t: T) -> Point2<T> {
    let vertices = reference_vertices::<T>(cell_type);
    let [i, j] = cell_type.edge_vertices(local_edge);
    vertices[i] + (vertices[j] - vertices[i]) * t
}

/// Local Lagrange basis on the reference cells of a mesh.
///
/// At most one DOF may be attached to each edge, which keeps the numbering independent of the
/// edge orientation.
pub trait FiniteElementMap<T: Real>: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, cell_type: CellType) -> bool;

    /// Polynomial degree of the basis, used to pick interpolation and quadrature orders.
    fn order(&self) -> usize;

    fn dofs_per_vertex(&self) -> usize;

    fn dofs_per_edge(&self) -> usize;

    fn dofs_per_cell(&self, cell_type: CellType) -> usize;

    fn num_local_dofs(&self, cell_type: CellType) -> usize {
        cell_type.num_vertices() * self.dofs_per_vertex()
            + cell_type.num_edges() * self.dofs_per_edge()
            + self.dofs_per_cell(cell_type)
    }

    /// Local DOFs in local basis order.
    fn local_dofs(&self, cell_type: CellType) -> Vec<LocalDof<T>>;

    /// Evaluates every basis function at the reference point `xi`.
    fn populate_basis(&self, cell_type: CellType, values: &mut [T], xi: &Point2<T>);

    /// Evaluates the reference gradient of every basis function at `xi`.
    fn populate_basis_gradients(&self, cell_type: CellType, gradients: &mut [Vector2<T>], xi: &Point2<T>);
}

/// Piecewise linear elements on triangles.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct P1;

/// Bilinear elements on quadrilaterals.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Q1;

/// Biquadratic 9-node elements on quadrilaterals.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Q2;

/// First order Lagrange elements on any cell type: [`P1`] on triangles and [`Q1`] on
/// quadrilaterals.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Lagrange1;

fn vertex_dofs<T: Real>(cell_type: CellType) -> Vec<LocalDof<T>> {
    reference_vertices(cell_type)
        .into_iter()
        .enumerate()
        .map(|(i, nodal_point)| LocalDof {
            attachment: DofAttachment::Vertex(i),
            nodal_point,
        })
        .collect()
}

impl<T: Real> FiniteElementMap<T> for P1 {
    fn name(&self) -> &str {
        "P1"
    }

    fn supports(&self, cell_type: CellType) -> bool {
        cell_type == CellType::Triangle
    }

    fn order(&self) -> usize {
        1
    }

    fn dofs_per_vertex(&self) -> usize {
        1
    }

    fn dofs_per_edge(&self) -> usize {
        0
    }

    fn dofs_per_cell(&self, _cell_type: CellType) -> usize {
        0
    }

    fn local_dofs(&self, cell_type: CellType) -> Vec<LocalDof<T>> {
        vertex_dofs(cell_type)
    }

    fn populate_basis(&self, _cell_type: CellType, values: &mut [T], xi: &Point2<T>) {
        assert_eq!(values.len(), 3);
        values[0] = T::one() - xi.x - xi.y;
        values[1] = xi.x;
        values[2] = xi.y;
    }

    fn populate_basis_gradients(&self, _cell_type: CellType, gradients: &mut [Vector2<T>], _xi: &Point2<T>) {
        assert_eq!(gradients.len(), 3);
        gradients[0] = Vector2::new(-T::one(), -T::one());
        gradients[1] = Vector2::new(T::one(), T::zero());
        gradients[2] = Vector2::new(T::zero(), T::one());
    }
}

impl<T: Real> FiniteElementMap<T> for Q1 {
    fn name(&self) -> &str {
        "Q1"
    }

    fn supports(&self, cell_type: CellType) -> bool {
        cell_type == CellType::Quadrilateral
    }

    fn order(&self) -> usize {
        1
    }

    fn dofs_per_vertex(&self) -> usize {
        1
    }

    fn dofs_per_edge(&self) -> usize {
        0
    }

    fn dofs_per_cell(&self, _cell_type: CellType) -> usize {
        0
    }

    fn local_dofs(&self, cell_type: CellType) -> Vec<LocalDof<T>> {
        vertex_dofs(cell_type)
    }

    fn populate_basis(&self, _cell_type: CellType, values: &mut [T], xi: &Point2<T>) {
        assert_eq!(values.len(), 4);
        let (x, y) = (xi.x, xi.y);
        let one = T::one();
        values[0] = (one - x) * (one - y);
        values[1] = x * (one - y);
        values[2] = x * y;
        values[3] = (one - x) * y;
    }

    fn populate_basis_gradients(&self, _cell_type: CellType, gradients: &mut [Vector2<T>], xi: &Point2<T>) {
        assert_eq!(gradients.len(), 4);
        let (x, y) = (xi.x, xi.y);
        let one = T::one();
        gradients[0] = Vector2::new(-(one - y), -(one - x));
        gradients[1] = Vector2::new(one - y, -x);
        gradients[2] = Vector2::new(y, x);
        gradients[3] = Vector2::new(-y, one - x);
    }
}

/// 1D quadratic Lagrange polynomials on `[0, 1]` with nodes `0`, `1/2` and `1`.
#[derive(Debug, Copy, Clone)]
enum Node1d {
    Start,
    Mid,
    End,
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
fn quadratic_1d<T: Real>(node: Node1d, s: T) -> (T, T) {
    match node {
        Node1d::Start => ((2.0 * s - 1.0) * (s - 1.0), 4.0 * s - 3.0),
        Node1d::Mid => (4.0 * s * (1.0 - s), 4.0 - 8.0 * s),
        Node1d::End => (s * (2.0 * s - 1.0), 4.0 * s - 1.0),
    }
}

/// Tensor node of every Q2 basis function, in local basis order.
const Q2_NODES: [(Node1d, Node1d); 9] = [
    (Node1d::Start, Node1d::Start),
    (Node1d::End, Node1d::Start),
    (Node1d::End, Node1d::End),
    (Node1d::Start, Node1d::End),
    (Node1d::Mid, Node1d::Start),
    (Node1d::End, Node1d::Mid),
    (Node1d::Mid, Node1d::End),
    (Node1d::Start, Node1d::Mid),
    (Node1d::Mid, Node1d::Mid),
];

impl<T: Real> FiniteElementMap<T> for Q2 {
    fn name(&self) -> &str {
        "Q2"
    }

    fn supports(&self, cell_type: CellType) -> bool {
        cell_type == CellType::Quadrilateral
    }

    fn order(&self) -> usize {
        2
    }

    fn dofs_per_vertex(&self) -> usize {
        1
    }

    fn dofs_per_edge(&self) -> usize {
        1
    }

    fn dofs_per_cell(&self, _cell_type: CellType) -> usize {
        1
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn local_dofs(&self, cell_type: CellType) -> Vec<LocalDof<T>> {
        let mut dofs = vertex_dofs(cell_type);
        for edge in 0..4 {
            dofs.push(LocalDof {
                attachment: DofAttachment::Edge(edge),
                nodal_point: reference_edge_point(cell_type, edge, 0.5),
            });
        }
        dofs.push(LocalDof {
            attachment: DofAttachment::Interior(0),
            nodal_point: Point2::new(0.5, 0.5),
        });
        dofs
    }

    fn populate_basis(&self, _cell_type: CellType, values: &mut [T], xi: &Point2<T>) {
        assert_eq!(values.len(), 9);
        for (value, &(node_x, node_y)) in values.iter_mut().zip(&Q2_NODES) {
            *value = quadratic_1d(node_x, xi.x).0 * quadratic_1d(node_y, xi.y).0;
        }
    }

    fn populate_basis_gradients(&self, _cell_type: CellType, gradients: &mut [Vector2<T>], xi: &Point2<T>) {
        assert_eq!(gradients.len(), 9);
        for (gradient, &(node_x, node_y)) in gradients.iter_mut().zip(&Q2_NODES) {
            let (phi_x, dphi_x) = quadratic_1d(node_x, xi.x);
            let (phi_y, dphi_y) = quadratic_1d(node_y, xi.y);
            *gradient = Vector2::new(dphi_x * phi_y, phi_x * dphi_y);
        }
    }
}

impl<T: Real> FiniteElementMap<T> for Lagrange1 {
    fn name(&self) -> &str {
        "Lagrange1"
    }

    fn supports(&self, _cell_type: CellType) -> bool {
        true
    }

    fn order(&self) -> usize {
        1
    }

    fn dofs_per_vertex(&self) -> usize {
        1
    }

    fn dofs_per_edge(&self) -> usize {
        0
    }

    fn dofs_per_cell(&self, _cell_type: CellType) -> usize {
        0
    }

    fn local_dofs(&self, cell_type: CellType) -> Vec<LocalDof<T>> {
        vertex_dofs(cell_type)
    }

    fn populate_basis(&self, cell_type: CellType, values: &mut [T], xi: &Point2<T>) {
        match cell_type {
            CellType::Triangle => P1.populate_basis(cell_type, values, xi),
            CellType::Quadrilateral => Q1.populate_basis(cell_type, values, xi),
        }
    }

    fn populate_basis_gradients(&self, cell_type: CellType, gradients: &mut [Vector2<T>], xi: &Point2<T>) {
        match cell_type {
            CellType::Triangle => P1.populate_basis_gradients(cell_type, gradients, xi),
            CellType::Quadrilateral => Q1.populate_basis_gradients(cell_type, gradients, xi),
        }
    }
}

/// The map from the reference cell to a physical cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellGeometry<T: Real> {
    /// `x = origin + J xi`, used for triangles.
    Affine { origin: Point2<T>, jacobian: Matrix2<T> },
    /// Bilinear map of the unit square onto a quadrilateral.
    Bilinear { vertices: [Point2<T>; 4] },
}

impl<T: Real> CellGeometry<T> {
    /// Geometry of a cell from its vertices in counter-clockwise order.
    pub fn from_vertices(cell_type: CellType, vertices: &[Point2<T>]) -> Self {
        assert_eq!(vertices.len(), cell_type.num_vertices());
        match cell_type {
            CellType::Triangle => {
                let (a, b, c) = (vertices[0], vertices[1], vertices[2]);
                let mut jacobian = Matrix2::zeros();
                jacobian.set_column(0, &(b - a));
                jacobian.set_column(1, &(c - a));
                CellGeometry::Affine { origin: a, jacobian }
            }
            CellType::Quadrilateral => CellGeometry::Bilinear {
                vertices: [vertices[0], vertices[1], vertices[2], vertices[3]],
            },
        }
    }

    pub fn map_reference_coords(&self, xi: &Point2<T>) -> Point2<T> {
        match self {
            CellGeometry::Affine { origin, jacobian } => origin + jacobian * xi.coords,
            CellGeometry::Bilinear { vertices } => {
                let mut phi = [T::zero(); 4];
                Q1.populate_basis(CellType::Quadrilateral, &mut phi, xi);
                let coords = vertices
                    .iter()
                    .zip(phi)
                    .fold(Vector2::zeros(), |acc, (v, phi_i)| acc + v.coords * phi_i);
                Point2::from(coords)
            }
        }
    }

    /// Jacobian `dx/dxi` of the reference-to-physical map.
    pub fn reference_jacobian(&self, xi: &Point2<T>) -> Matrix2<T> {
        match self {
            CellGeometry::Affine { jacobian, .. } => *jacobian,
            CellGeometry::Bilinear { vertices } => {
                let mut gradients = [Vector2::zeros(); 4];
                Q1.populate_basis_gradients(CellType::Quadrilateral, &mut gradients, xi);
                vertices
                    .iter()
                    .zip(gradients)
                    .fold(Matrix2::zeros(), |acc, (v, grad)| acc + v.coords * grad.transpose())
            }
        }
    }

    /// Determinant of the Jacobian and the inverse transpose used to map reference gradients
    /// to physical gradients.
    ///
    /// Returns `None` for degenerate (or inverted) cells, i.e. if the determinant does not exceed
    /// a small multiple of machine epsilon relative to the cell size.
    pub fn jacobian_det_and_inverse_transpose(&self, xi: &Point2<T>) -> Option<(T, Matrix2<T>)> {
        let j = self.reference_jacobian(xi);
        let det = j.determinant();
        let scale = j.norm_squared();
        if det <= T::default_epsilon() * scale {
            return None;
        }
        let inverse = j.try_inverse()?;
        Some((det, inverse.transpose()))
    }
}
