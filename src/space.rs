//! Function spaces: mapping mesh entities to global degrees of freedom.
//!
//! A [`FunctionSpace`] is a tree. Leaves bind a [`FiniteElementMap`] to a [`LeafView`], power
//! nodes repeat one child a number of times (e.g. the components of a vector field) and
//! composite nodes combine heterogeneous children (e.g. mixed formulations). The DOFs of all
//! leaves together partition `0 .. num_dofs` exactly once.
//!
//! The [`DofOrdering`] of a power or composite node decides how the DOFs of its children are
//! interleaved. It changes the sparsity pattern and bandwidth of assembled matrices, never the
//! discrete solution.
use crate::element::{CellGeometry, DofAttachment, FiniteElementMap};
use crate::mesh::{CellType, LeafView};
use crate::Real;
use itertools::izip;
use log::debug;
use nalgebra::{DVector, Point2};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

static NEXT_SPACE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DofOrdering {
    /// All DOFs of child 0 precede all DOFs of child 1, and so on.
    #[default]
    Lexicographic,
    /// For each mesh entity, the DOFs of all children on that entity are consecutive.
    EntityBlocked,
}

/// Identifies a mesh entity of a leaf view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Vertex(usize),
    /// Leaf edge index.
    Edge(usize),
    /// Leaf cell index.
    Cell(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpaceConstructionError {
    #[error("the leaf view has no cells")]
    EmptyGrid,
    #[error("finite element map {fem} does not support cell type {cell_type:?} of cell {cell}")]
    UnsupportedCellType {
        fem: String,
        cell_type: CellType,
        cell: usize,
    },
    #[error("power and composite spaces need at least one child")]
    EmptyComposition,
    #[error("children of a power or composite space must share one leaf view")]
    MismatchedViews,
    #[error("finite element map {fem} has {dofs_per_edge} DOFs per edge, at most one is supported")]
    UnsupportedEdgeLayout { fem: String, dofs_per_edge: usize },
}

#[derive(Debug, Clone)]
enum SpaceNode<T: Real> {
    Leaf(Arc<dyn FiniteElementMap<T>>),
    Power {
        child: Box<SpaceNode<T>>,
        count: usize,
        ordering: DofOrdering,
    },
    Composite {
        children: Vec<SpaceNode<T>>,
        ordering: DofOrdering,
    },
}

impl<T: Real> SpaceNode<T> {
    fn children(&self) -> Vec<&SpaceNode<T>> {
        match self {
            SpaceNode::Leaf(_) => Vec::new(),
            SpaceNode::Power { child, count, .. } => vec![child.as_ref(); *count],
            SpaceNode::Composite { children, .. } => children.iter().collect(),
        }
    }

    fn collect_leaves(&self, leaves: &mut Vec<Arc<dyn FiniteElementMap<T>>>) {
        match self {
            SpaceNode::Leaf(fem) => leaves.push(fem.clone()),
            _ => {
                for child in self.children() {
                    child.collect_leaves(leaves);
                }
            }
        }
    }

    fn num_leaves(&self) -> usize {
        match self {
            SpaceNode::Leaf(_) => 1,
            _ => self.children().iter().map(|child| child.num_leaves()).sum(),
        }
    }
}

/// Where the DOFs of a subtree are placed in the global numbering.
enum Placement {
    /// One contiguous block starting at the given index.
    Contiguous(usize),
    /// The DOFs on entity `e` start at `starts[e]`.
    PerEntity(Vec<usize>),
}

/// Entity-wise layout of the global numbering, shared by all routines that need to
/// translate between entities and DOFs.
#[derive(Debug, Clone)]
struct EntityLayout {
    num_vertices: usize,
    num_edges: usize,
    cell_types: Vec<CellType>,
}

impl EntityLayout {
    fn num_entities(&self) -> usize {
        self.num_vertices + self.num_edges + self.cell_types.len()
    }

    fn entity_index(&self, key: EntityKey) -> usize {
        match key {
            EntityKey::Vertex(v) => v,
            EntityKey::Edge(e) => self.num_vertices + e,
            EntityKey::Cell(c) => self.num_vertices + self.num_edges + c,
        }
    }

    fn entity_key(&self, entity: usize) -> EntityKey {
        if entity < self.num_vertices {
            EntityKey::Vertex(entity)
        } else if entity < self.num_vertices + self.num_edges {
            EntityKey::Edge(entity - self.num_vertices)
        } else {
            EntityKey::Cell(entity - self.num_vertices - self.num_edges)
        }
    }

    fn leaf_counts<T: Real>(&self, fem: &dyn FiniteElementMap<T>) -> Vec<usize> {
        let mut counts = Vec::with_capacity(self.num_entities());
        counts.extend(std::iter::repeat(fem.dofs_per_vertex()).take(self.num_vertices));
        counts.extend(std::iter::repeat(fem.dofs_per_edge()).take(self.num_edges));
        counts.extend(self.cell_types.iter().map(|&ct| fem.dofs_per_cell(ct)));
        counts
    }

    /// Number of DOFs of a subtree on every entity.
    fn node_counts<T: Real>(&self, node: &SpaceNode<T>) -> Vec<usize> {
        match node {
            SpaceNode::Leaf(fem) => self.leaf_counts(fem.as_ref()),
            _ => {
                let mut counts = vec![0; self.num_entities()];
                for child in node.children() {
                    for (total, c) in counts.iter_mut().zip(self.node_counts(child)) {
                        *total += c;
                    }
                }
                counts
            }
        }
    }

    /// Assigns the first global DOF of every leaf on every entity.
    fn place<T: Real>(&self, node: &SpaceNode<T>, placement: Placement, leaf_offsets: &mut Vec<Vec<usize>>) {
        match node {
            SpaceNode::Leaf(fem) => {
                let counts = self.leaf_counts(fem.as_ref());
                let offsets = match placement {
                    Placement::Contiguous(start) => exclusive_prefix_sum(start, &counts),
                    Placement::PerEntity(starts) => starts,
                };
                leaf_offsets.push(offsets);
            }
            SpaceNode::Power { ordering, .. } | SpaceNode::Composite { ordering, .. } => {
                let children = node.children();
                let child_counts: Vec<_> = children.iter().map(|child| self.node_counts(child)).collect();
                let mut placement = placement;
                if *ordering == DofOrdering::EntityBlocked {
                    if let Placement::Contiguous(start) = placement {
                        let counts = self.node_counts(node);
                        placement = Placement::PerEntity(exclusive_prefix_sum(start, &counts));
                    }
                }

                match placement {
                    Placement::Contiguous(mut start) => {
                        for (child, counts) in izip!(children, &child_counts) {
                            self.place(child, Placement::Contiguous(start), leaf_offsets);
                            start += counts.iter().sum::<usize>();
                        }
                    }
                    Placement::PerEntity(mut starts) => {
                        for (child, counts) in izip!(children, &child_counts) {
                            self.place(child, Placement::PerEntity(starts.clone()), leaf_offsets);
                            for (s, c) in starts.iter_mut().zip(counts) {
                                *s += c;
                            }
                        }
                    }
                }
            }
        }
    }
}

fn exclusive_prefix_sum(start: usize, counts: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut next = start;
    for &count in counts {
        offsets.push(next);
        next += count;
    }
    offsets
}

/// The local view of a function space on a single cell.
///
/// Local DOFs are ordered leaf by leaf; within a leaf they follow the local basis order of its
/// finite element map.
#[derive(Debug, Clone, Copy)]
pub struct LocalFunctionSpace<'a, T: Real> {
    pub cell: usize,
    pub cell_type: CellType,
    dofs: &'a [usize],
    ranges: &'a [Range<usize>],
    fems: &'a [Arc<dyn FiniteElementMap<T>>],
}

impl<'a, T: Real> LocalFunctionSpace<'a, T> {
    pub fn num_dofs(&self) -> usize {
        self.dofs.len()
    }

    /// Global DOFs of all local DOFs.
    pub fn dofs(&self) -> &'a [usize] {
        self.dofs
    }

    pub fn num_leaves(&self) -> usize {
        self.ranges.len()
    }

    /// Local index range of the DOFs of `leaf`.
    pub fn leaf_range(&self, leaf: usize) -> Range<usize> {
        self.ranges[leaf].clone()
    }

    pub fn fem(&self, leaf: usize) -> &'a dyn FiniteElementMap<T> {
        self.fems[leaf].as_ref()
    }
}

/// A (possibly composite) finite element space on a leaf view.
#[derive(Debug, Clone)]
pub struct FunctionSpace<T: Real> {
    id: u64,
    view: Arc<LeafView<T>>,
    root: SpaceNode<T>,
    fems: Vec<Arc<dyn FiniteElementMap<T>>>,
    num_dofs: usize,
    cell_dof_offsets: Vec<usize>,
    cell_dof_indices: Vec<usize>,
    /// Local leaf ranges per cell type (triangles, quadrilaterals).
    local_ranges: [Vec<Range<usize>>; 2],
    layout: EntityLayout,
    /// First global DOF of every leaf on every entity.
    leaf_offsets: Vec<Vec<usize>>,
    leaf_dofs: Vec<Vec<usize>>,
    dof_leaf: Vec<usize>,
    dof_entity: Vec<EntityKey>,
    dof_points: Vec<Point2<T>>,
}

fn cell_type_index(cell_type: CellType) -> usize {
    match cell_type {
        CellType::Triangle => 0,
        CellType::Quadrilateral => 1,
    }
}

impl<T: Real> FunctionSpace<T> {
    /// A scalar space given by one finite element map.
    pub fn leaf(
        view: Arc<LeafView<T>>,
        fem: impl FiniteElementMap<T> + 'static,
    ) -> Result<Self, SpaceConstructionError> {
        Self::from_node(view, SpaceNode::Leaf(Arc::new(fem)))
    }

    /// Repeats `child` `count` times, e.g. for the components of a vector field.
    pub fn power(child: FunctionSpace<T>, count: usize, ordering: DofOrdering) -> Result<Self, SpaceConstructionError> {
        if count == 0 {
            return Err(SpaceConstructionError::EmptyComposition);
        }
        let node = SpaceNode::Power {
            child: Box::new(child.root),
            count,
            ordering,
        };
        Self::from_node(child.view, node)
    }

    /// Combines heterogeneous children sharing one leaf view.
    pub fn composite(children: Vec<FunctionSpace<T>>, ordering: DofOrdering) -> Result<Self, SpaceConstructionError> {
        let view = match children.first() {
            Some(first) => first.view.clone(),
            None => return Err(SpaceConstructionError::EmptyComposition),
        };
        if children
            .iter()
            .any(|child| !Arc::ptr_eq(&child.view, &view))
        {
            return Err(SpaceConstructionError::MismatchedViews);
        }
        let node = SpaceNode::Composite {
            children: children.into_iter().map(|child| child.root).collect(),
            ordering,
        };
        Self::from_node(view, node)
    }

    fn from_node(view: Arc<LeafView<T>>, root: SpaceNode<T>) -> Result<Self, SpaceConstructionError> {
        if view.num_cells() == 0 {
            return Err(SpaceConstructionError::EmptyGrid);
        }

        let mut fems = Vec::new();
        root.collect_leaves(&mut fems);
        for fem in &fems {
            if fem.dofs_per_edge() > 1 {
                return Err(SpaceConstructionError::UnsupportedEdgeLayout {
                    fem: fem.name().to_string(),
                    dofs_per_edge: fem.dofs_per_edge(),
                });
            }
            for (cell_idx, cell) in view.cells().iter().enumerate() {
                if !fem.supports(cell.cell_type) {
                    return Err(SpaceConstructionError::UnsupportedCellType {
                        fem: fem.name().to_string(),
                        cell_type: cell.cell_type,
                        cell: cell_idx,
                    });
                }
            }
        }
        debug_assert_eq!(fems.len(), root.num_leaves());

        let layout = EntityLayout {
            num_vertices: view.num_vertices(),
            num_edges: view.num_edges(),
            cell_types: view.cells().iter().map(|cell| cell.cell_type).collect(),
        };
        let num_dofs = layout.node_counts(&root).iter().sum();

        let mut leaf_offsets = Vec::with_capacity(fems.len());
        layout.place(&root, Placement::Contiguous(0), &mut leaf_offsets);

        // Global DOFs owned by each leaf, entity by entity
        let mut leaf_dofs = Vec::with_capacity(fems.len());
        let mut dof_leaf = vec![usize::MAX; num_dofs];
        let mut dof_entity = vec![EntityKey::Vertex(0); num_dofs];
        for (leaf, (fem, offsets)) in fems.iter().zip(&leaf_offsets).enumerate() {
            let counts = layout.leaf_counts(fem.as_ref());
            let mut dofs = Vec::with_capacity(counts.iter().sum());
            for (entity, (&offset, &count)) in offsets.iter().zip(&counts).enumerate() {
                for dof in offset..offset + count {
                    dof_leaf[dof] = leaf;
                    dof_entity[dof] = layout.entity_key(entity);
                    dofs.push(dof);
                }
            }
            dofs.sort_unstable();
            leaf_dofs.push(dofs);
        }
        debug_assert!(dof_leaf.iter().all(|&leaf| leaf != usize::MAX));

        let local_ranges = [CellType::Triangle, CellType::Quadrilateral].map(|cell_type| {
            let mut start = 0;
            fems.iter()
                .map(|fem| {
                    let range = start..start + fem.num_local_dofs(cell_type);
                    start = range.end;
                    range
                })
                .collect::<Vec<_>>()
        });

        let mut cell_dof_offsets = Vec::with_capacity(view.num_cells() + 1);
        let mut cell_dof_indices = Vec::new();
        let mut dof_points = vec![Point2::origin(); num_dofs];
        cell_dof_offsets.push(0);
        for (cell_idx, cell) in view.cells().iter().enumerate() {
            let geometry = CellGeometry::from_vertices(cell.cell_type, &view.cell_points(cell_idx));
            for (fem, offsets) in fems.iter().zip(&leaf_offsets) {
                let mut seen_on_vertex = vec![0; cell.cell_type.num_vertices()];
                let mut seen_on_edge = vec![0; cell.cell_type.num_edges()];
                for local_dof in fem.local_dofs(cell.cell_type) {
                    let (entity, index) = match local_dof.attachment {
                        DofAttachment::Vertex(i) => {
                            seen_on_vertex[i] += 1;
                            (EntityKey::Vertex(cell.vertices[i]), seen_on_vertex[i] - 1)
                        }
                        DofAttachment::Edge(i) => {
                            seen_on_edge[i] += 1;
                            (EntityKey::Edge(cell.edges[i]), seen_on_edge[i] - 1)
                        }
                        DofAttachment::Interior(k) => (EntityKey::Cell(cell_idx), k),
                    };
                    let dof = offsets[layout.entity_index(entity)] + index;
                    dof_points[dof] = geometry.map_reference_coords(&local_dof.nodal_point);
                    cell_dof_indices.push(dof);
                }
            }
            cell_dof_offsets.push(cell_dof_indices.len());
        }

        let id = NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Function space {} with {} leaves: {} DOFs on {} cells",
            id,
            fems.len(),
            num_dofs,
            view.num_cells()
        );

        Ok(Self {
            id,
            view,
            root,
            fems,
            num_dofs,
            cell_dof_offsets,
            cell_dof_indices,
            local_ranges,
            layout,
            leaf_offsets,
            leaf_dofs,
            dof_leaf,
            dof_entity,
            dof_points,
        })
    }

    /// Unique identity of this space (and its numbering).
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn view(&self) -> &Arc<LeafView<T>> {
        &self.view
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_cells(&self) -> usize {
        self.view.num_cells()
    }

    pub fn num_leaves(&self) -> usize {
        self.fems.len()
    }

    pub fn fem(&self, leaf: usize) -> &dyn FiniteElementMap<T> {
        self.fems[leaf].as_ref()
    }

    /// Global DOFs of a cell, leaf by leaf in local basis order.
    pub fn cell_dofs(&self, cell: usize) -> &[usize] {
        &self.cell_dof_indices[self.cell_dof_offsets[cell]..self.cell_dof_offsets[cell + 1]]
    }

    pub fn local_space(&self, cell: usize) -> LocalFunctionSpace<T> {
        let cell_type = self.view.cell(cell).cell_type;
        LocalFunctionSpace {
            cell,
            cell_type,
            dofs: self.cell_dofs(cell),
            ranges: &self.local_ranges[cell_type_index(cell_type)],
            fems: &self.fems,
        }
    }

    /// Global DOFs of one leaf (component), in increasing order.
    pub fn leaf_dofs(&self, leaf: usize) -> &[usize] {
        &self.leaf_dofs[leaf]
    }

    /// Global DOFs of `leaf` attached to a mesh entity.
    pub fn entity_dofs(&self, leaf: usize, entity: EntityKey) -> Range<usize> {
        let fem = &self.fems[leaf];
        let count = match entity {
            EntityKey::Vertex(_) => fem.dofs_per_vertex(),
            EntityKey::Edge(_) => fem.dofs_per_edge(),
            EntityKey::Cell(cell) => fem.dofs_per_cell(self.layout.cell_types[cell]),
        };
        let start = self.leaf_offsets[leaf][self.layout.entity_index(entity)];
        start..start + count
    }

    pub fn dof_leaf(&self, dof: usize) -> usize {
        self.dof_leaf[dof]
    }

    pub fn dof_entity(&self, dof: usize) -> EntityKey {
        self.dof_entity[dof]
    }

    /// Physical coordinates of the Lagrange node of a DOF.
    pub fn dof_nodal_point(&self, dof: usize) -> &Point2<T> {
        &self.dof_points[dof]
    }

    /// Nodal interpolation of `f(leaf, x)` into the coefficient vector `x`.
    pub fn interpolate(&self, x: &mut DVector<T>, f: impl Fn(usize, &Point2<T>) -> T) {
        assert_eq!(x.len(), self.num_dofs);
        for (dof, (&leaf, point)) in self.dof_leaf.iter().zip(&self.dof_points).enumerate() {
            x[dof] = f(leaf, point);
        }
    }

    /// Nodal interpolation of `f` into the DOFs of one leaf, leaving all other DOFs untouched.
    pub fn interpolate_leaf(&self, x: &mut DVector<T>, leaf: usize, f: impl Fn(&Point2<T>) -> T) {
        assert_eq!(x.len(), self.num_dofs);
        for &dof in &self.leaf_dofs[leaf] {
            x[dof] = f(&self.dof_points[dof]);
        }
    }

    /// Evaluates the discrete function of `leaf` at the reference point `xi` of `cell`.
    pub fn evaluate(&self, x: &DVector<T>, cell: usize, xi: &Point2<T>, leaf: usize) -> T {
        let local = self.local_space(cell);
        let range = local.leaf_range(leaf);
        let mut phi = vec![T::zero(); range.len()];
        local
            .fem(leaf)
            .populate_basis(local.cell_type, &mut phi, xi);
        local.dofs()[range]
            .iter()
            .zip(phi)
            .fold(T::zero(), |acc, (&dof, phi_k)| acc + x[dof] * phi_k)
    }
}
