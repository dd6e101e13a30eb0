//! Adaptive, hierarchically refined 2D grids of triangles and quadrilaterals.
//!
//! Cells are refined by edge bisection ("red" refinement) without any closure, so refining a
//! cell next to a coarser neighbour creates hanging vertices on the shared edge. The discrete
//! layers of `gridfem` never look at the hierarchy directly; they consume an immutable
//! [`LeafView`] snapshot of the finest cells.
use crate::Real;
use log::trace;
use nalgebra::{Point2, Vector2};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod procedural;
mod refinement;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    Triangle,
    Quadrilateral,
}

impl CellType {
    pub fn num_vertices(&self) -> usize {
        match self {
            CellType::Triangle => 3,
            CellType::Quadrilateral => 4,
        }
    }

    /// Edges and vertices coincide in number for 2D polygons.
    pub fn num_edges(&self) -> usize {
        self.num_vertices()
    }

    /// Local vertex indices of the local edge `edge`, i.e. `(edge, edge + 1)` modulo the vertex count.
    pub fn edge_vertices(&self, edge: usize) -> [usize; 2] {
        let n = self.num_vertices();
        assert!(edge < n, "Local edge index out of bounds");
        [edge, (edge + 1) % n]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("the grid has no cells")]
    Empty,
    #[error("cell {cell} has {count} vertices, expected 3 or 4")]
    InvalidVertexCount { cell: usize, count: usize },
    #[error("cell {cell} references vertex {vertex}, but there are only {num_vertices} vertices")]
    VertexOutOfBounds {
        cell: usize,
        vertex: usize,
        num_vertices: usize,
    },
    #[error("cell {cell} references vertex {vertex} more than once")]
    RepeatedVertex { cell: usize, vertex: usize },
    #[error("cell {cell} is not positively (counter-clockwise) oriented")]
    NonPositiveOrientation { cell: usize },
    #[error("vertex {vertex} is not referenced by any cell")]
    UnusedVertex { vertex: usize },
}

#[derive(Debug, Clone)]
struct GridCell {
    cell_type: CellType,
    vertices: Vec<usize>,
    level: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    marked: bool,
}

impl GridCell {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A hierarchical grid that can be locally refined.
///
/// Cells are identified by their (stable) grid cell index. Refined cells remain in the grid as
/// parents of their children. Every call to [`adapt`](Self::adapt) increments the
/// [`generation`](Self::generation), which invalidates leaf views taken before.
#[derive(Debug, Clone)]
pub struct AdaptiveGrid<T: Real> {
    vertices: Vec<Point2<T>>,
    cells: Vec<GridCell>,
    /// Maps a sorted vertex pair to the vertex at the midpoint of that edge.
    midpoints: FxHashMap<(usize, usize), usize>,
    generation: usize,
}

fn sorted_pair(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Twice the signed area of a polygon.
fn signed_double_area<T: Real>(points: impl IntoIterator<Item = Point2<T>> + Clone) -> T {
    let first = points.clone().into_iter().next();
    let mut area = T::zero();
    let mut iter = points.into_iter().peekable();
    while let Some(p) = iter.next() {
        let q = match iter.peek() {
            Some(q) => *q,
            None => match first {
                Some(first) => first,
                None => break,
            },
        };
        area += p.x * q.y - q.x * p.y;
    }
    area
}

impl<T: Real> AdaptiveGrid<T> {
    /// Constructs a grid from vertices and the vertex indices of each cell.
    ///
    /// Cells with 3 vertices are triangles, cells with 4 vertices quadrilaterals. Vertices must
    /// be given in counter-clockwise order, and every vertex must belong to at least one cell.
    pub fn from_vertices_and_cells(vertices: Vec<Point2<T>>, cells: Vec<Vec<usize>>) -> Result<Self, GridError> {
        if cells.is_empty() {
            return Err(GridError::Empty);
        }

        let mut used = vec![false; vertices.len()];
        let mut grid_cells = Vec::with_capacity(cells.len());
        for (cell_idx, cell_vertices) in cells.into_iter().enumerate() {
            let cell_type = match cell_vertices.len() {
                3 => CellType::Triangle,
                4 => CellType::Quadrilateral,
                count => return Err(GridError::InvalidVertexCount { cell: cell_idx, count }),
            };
            for (i, &v) in cell_vertices.iter().enumerate() {
                if v >= vertices.len() {
                    return Err(GridError::VertexOutOfBounds {
                        cell: cell_idx,
                        vertex: v,
                        num_vertices: vertices.len(),
                    });
                }
                if cell_vertices[..i].contains(&v) {
                    return Err(GridError::RepeatedVertex { cell: cell_idx, vertex: v });
                }
                used[v] = true;
            }
            let area = signed_double_area(cell_vertices.iter().map(|&v| vertices[v]));
            if area <= T::zero() {
                return Err(GridError::NonPositiveOrientation { cell: cell_idx });
            }

            grid_cells.push(GridCell {
                cell_type,
                vertices: cell_vertices,
                level: 0,
                parent: None,
                children: Vec::new(),
                marked: false,
            });
        }

        if let Some(vertex) = used.iter().position(|used| !used) {
            return Err(GridError::UnusedVertex { vertex });
        }

        Ok(Self {
            vertices,
            cells: grid_cells,
            midpoints: FxHashMap::default(),
            generation: 0,
        })
    }

    pub fn vertices(&self) -> &[Point2<T>] {
        &self.vertices
    }

    /// Total number of cells in the hierarchy, including refined ones.
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_leaf_cells(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_leaf()).count()
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn max_level(&self) -> usize {
        self.cells.iter().map(|cell| cell.level).max().unwrap_or(0)
    }

    pub fn is_leaf(&self, cell: usize) -> bool {
        self.cells[cell].is_leaf()
    }

    pub fn cell_level(&self, cell: usize) -> usize {
        self.cells[cell].level
    }

    pub fn cell_parent(&self, cell: usize) -> Option<usize> {
        self.cells[cell].parent
    }

    pub fn cell_children(&self, cell: usize) -> &[usize] {
        &self.cells[cell].children
    }

    /// Grid cell indices of all leaf cells, in increasing order.
    pub fn leaf_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_leaf())
            .map(|(idx, _)| idx)
    }

    /// Marks (or unmarks) a leaf cell for refinement.
    ///
    /// Returns `false` if the cell is not a leaf, in which case nothing changes.
    pub fn mark(&mut self, cell: usize, refine: bool) -> bool {
        let cell = &mut self.cells[cell];
        if cell.is_leaf() {
            cell.marked = refine;
            true
        } else {
            false
        }
    }

    pub fn is_marked(&self, cell: usize) -> bool {
        self.cells[cell].marked
    }

    /// Returns `true` if any cell is marked, i.e. if [`adapt`](Self::adapt) would change the grid.
    pub fn pre_adapt(&self) -> bool {
        self.cells.iter().any(|cell| cell.marked)
    }

    /// Refines all marked leaf cells and bumps the generation.
    ///
    /// The marks of refined cells are consumed.
    pub fn adapt(&mut self) {
        let marked: Vec<usize> = self
            .leaf_cells()
            .filter(|&cell| self.cells[cell].marked)
            .collect();
        for &cell in &marked {
            self.refine_cell(cell);
        }
        self.generation += 1;
        trace!(
            "Adapted grid to generation {}: refined {} cells, {} leaf cells",
            self.generation,
            marked.len(),
            self.num_leaf_cells()
        );
    }

    /// Clears all refinement marks.
    pub fn post_adapt(&mut self) {
        for cell in &mut self.cells {
            cell.marked = false;
        }
    }

    /// Refines every leaf cell `levels` times.
    pub fn global_refine(&mut self, levels: usize) {
        for _ in 0..levels {
            let leaves: Vec<_> = self.leaf_cells().collect();
            for cell in leaves {
                self.mark(cell, true);
            }
            self.adapt();
            self.post_adapt();
        }
    }

    /// Returns the vertex at the midpoint of the edge `(a, b)`, if the edge has been bisected.
    pub fn edge_midpoint(&self, a: usize, b: usize) -> Option<usize> {
        self.midpoints.get(&sorted_pair(a, b)).copied()
    }

    /// Takes a snapshot of the leaf cells.
    pub fn leaf_view(&self) -> LeafView<T> {
        LeafView::from_grid(self)
    }
}

/// A leaf cell of a [`LeafView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub cell_type: CellType,
    /// Vertex indices in counter-clockwise order.
    pub vertices: Vec<usize>,
    /// Leaf edge index of every local edge.
    pub edges: Vec<usize>,
    pub level: usize,
    /// Index of the cell in the originating [`AdaptiveGrid`].
    pub grid_cell: usize,
}

/// An edge of a leaf cell on the domain boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFace<T: Real> {
    /// Leaf cell index.
    pub cell: usize,
    pub local_edge: usize,
    /// Leaf edge index.
    pub edge: usize,
    /// Start and end point of the edge in the orientation of the cell.
    pub endpoints: [Point2<T>; 2],
    /// Unit outward normal.
    pub normal: Vector2<T>,
    pub length: T,
}

impl<T: Real> BoundaryFace<T> {
    /// Maps the edge-local coordinate `s` in `[0, 1]` to a point on the face.
    pub fn global(&self, s: T) -> Point2<T> {
        let [a, b] = self.endpoints;
        a + (b - a) * s
    }

    pub fn centre(&self) -> Point2<T> {
        nalgebra::center(&self.endpoints[0], &self.endpoints[1])
    }
}

/// The coarse side of a non-conforming interface.
///
/// The edge belongs to exactly one leaf cell, while the neighbouring cells have been refined
/// further, so the edge is covered by several finer leaf edges and carries hanging vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct HangingEdge<T: Real> {
    /// The coarse leaf cell.
    pub cell: usize,
    pub local_edge: usize,
    /// Leaf edge index of the coarse edge.
    pub edge: usize,
    /// Start and end vertex in the orientation of the coarse cell.
    pub endpoints: [usize; 2],
    /// Hanging vertices and their parameter along the edge, sorted by parameter.
    pub hanging_vertices: Vec<(usize, T)>,
    /// Fine leaf edges covering the coarse edge, with their parameter interval.
    pub sub_edges: Vec<(usize, T, T)>,
}

/// Immutable snapshot of the leaf cells of an [`AdaptiveGrid`].
///
/// Vertex indices of the view coincide with the vertex indices of the grid.
#[derive(Debug, Clone)]
pub struct LeafView<T: Real> {
    generation: usize,
    vertices: Vec<Point2<T>>,
    cells: Vec<LeafCell>,
    edges: Vec<[usize; 2]>,
    edge_lookup: FxHashMap<(usize, usize), usize>,
    boundary_faces: Vec<BoundaryFace<T>>,
    hanging_edges: Vec<HangingEdge<T>>,
}

impl<T: Real> LeafView<T> {
    fn from_grid(grid: &AdaptiveGrid<T>) -> Self {
        let mut cells = Vec::new();
        let mut edges = Vec::new();
        let mut edge_lookup = FxHashMap::default();
        let mut edge_cell_count = Vec::new();

        for grid_cell in grid.leaf_cells() {
            let cell = &grid.cells[grid_cell];
            let cell_edges = (0..cell.cell_type.num_edges())
                .map(|local_edge| {
                    let [i, j] = cell.cell_type.edge_vertices(local_edge);
                    let key = sorted_pair(cell.vertices[i], cell.vertices[j]);
                    let edge = *edge_lookup.entry(key).or_insert_with(|| {
                        edges.push([key.0, key.1]);
                        edge_cell_count.push(0);
                        edges.len() - 1
                    });
                    edge_cell_count[edge] += 1;
                    edge
                })
                .collect();

            cells.push(LeafCell {
                cell_type: cell.cell_type,
                vertices: cell.vertices.clone(),
                edges: cell_edges,
                level: cell.level,
                grid_cell,
            });
        }

        let mut view = Self {
            generation: grid.generation,
            vertices: grid.vertices.clone(),
            cells,
            edges,
            edge_lookup,
            boundary_faces: Vec::new(),
            hanging_edges: Vec::new(),
        };

        // Edges owned by a single leaf cell are either on the boundary, the coarse side of a
        // hanging interface, or a fine sub-edge of such an interface.
        let mut is_sub_edge = vec![false; view.edges.len()];
        for (cell_idx, cell) in view.cells.iter().enumerate() {
            for (local_edge, &edge) in cell.edges.iter().enumerate() {
                let [i, j] = cell.cell_type.edge_vertices(local_edge);
                let (a, b) = (cell.vertices[i], cell.vertices[j]);
                if edge_cell_count[edge] == 1 && grid.edge_midpoint(a, b).is_some() {
                    let mut hanging = HangingEdge {
                        cell: cell_idx,
                        local_edge,
                        edge,
                        endpoints: [a, b],
                        hanging_vertices: Vec::new(),
                        sub_edges: Vec::new(),
                    };
                    view.collect_hanging(grid, &mut hanging, a, b, T::zero(), T::one());
                    for &(sub_edge, _, _) in &hanging.sub_edges {
                        is_sub_edge[sub_edge] = true;
                    }
                    view.hanging_edges.push(hanging);
                }
            }
        }

        for (cell_idx, cell) in view.cells.iter().enumerate() {
            for (local_edge, &edge) in cell.edges.iter().enumerate() {
                let [i, j] = cell.cell_type.edge_vertices(local_edge);
                let (a, b) = (cell.vertices[i], cell.vertices[j]);
                if edge_cell_count[edge] == 1 && !is_sub_edge[edge] && grid.edge_midpoint(a, b).is_none() {
                    let endpoints = [view.vertices[a], view.vertices[b]];
                    let tangent = endpoints[1] - endpoints[0];
                    let length = tangent.norm();
                    let normal = Vector2::new(tangent.y, -tangent.x) / length;
                    view.boundary_faces.push(BoundaryFace {
                        cell: cell_idx,
                        local_edge,
                        edge,
                        endpoints,
                        normal,
                        length,
                    });
                }
            }
        }

        trace!(
            "Leaf view (generation {}): {} cells, {} edges, {} boundary faces, {} hanging edges",
            view.generation,
            view.cells.len(),
            view.edges.len(),
            view.boundary_faces.len(),
            view.hanging_edges.len()
        );
        view
    }

    /// Recursively collects hanging vertices and leaf sub-edges of the edge `(a, b)`
    /// spanning the parameter interval `[t0, t1]`.
    fn collect_hanging(&self, grid: &AdaptiveGrid<T>, hanging: &mut HangingEdge<T>, a: usize, b: usize, t0: T, t1: T) {
        match grid.edge_midpoint(a, b) {
            Some(m) => {
                let t_mid = (t0 + t1) / (T::one() + T::one());
                self.collect_hanging(grid, hanging, a, m, t0, t_mid);
                hanging.hanging_vertices.push((m, t_mid));
                self.collect_hanging(grid, hanging, m, b, t_mid, t1);
            }
            None => {
                if let Some(edge) = self.find_edge(a, b) {
                    hanging.sub_edges.push((edge, t0, t1));
                }
            }
        }
    }

    /// Generation of the grid the view was taken from.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn vertices(&self) -> &[Point2<T>] {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn cells(&self) -> &[LeafCell] {
        &self.cells
    }

    pub fn cell(&self, cell: usize) -> &LeafCell {
        &self.cells[cell]
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Leaf edges as sorted vertex pairs.
    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn find_edge(&self, a: usize, b: usize) -> Option<usize> {
        self.edge_lookup.get(&sorted_pair(a, b)).copied()
    }

    /// Physical coordinates of the vertices of a leaf cell.
    pub fn cell_points(&self, cell: usize) -> Vec<Point2<T>> {
        self.cells[cell]
            .vertices
            .iter()
            .map(|&v| self.vertices[v])
            .collect()
    }

    pub fn boundary_faces(&self) -> &[BoundaryFace<T>] {
        &self.boundary_faces
    }

    pub fn hanging_edges(&self) -> &[HangingEdge<T>] {
        &self.hanging_edges
    }

    /// Number of hanging vertices on each hanging edge, in the order of
    /// [`hanging_edges`](Self::hanging_edges).
    pub fn hanging_nodes_per_edge(&self) -> Vec<usize> {
        self.hanging_edges
            .iter()
            .map(|hanging| hanging.hanging_vertices.len())
            .collect()
    }

    /// Total area covered by the leaf cells.
    pub fn area(&self) -> T {
        let half = T::one() / (T::one() + T::one());
        (0..self.num_cells())
            .map(|cell| signed_double_area(self.cell_points(cell)) * half)
            .fold(T::zero(), |acc, area| acc + area)
    }
}
