use super::{ConstraintPolicy, ConstraintRelation, ConstraintResolutionError, ConstraintsBuilder};
use crate::element::reference_edge_point;
use crate::mesh::{AdaptiveGrid, HangingEdge};
use crate::space::{EntityKey, FunctionSpace};
use crate::Real;
use log::{debug, warn};
use nalgebra::{convert, Point2};
use serde::{Deserialize, Serialize};

/// Constrains DOFs on the fine side of non-conforming edges to the coarse-side basis.
///
/// Every hanging vertex (at any depth) and, for elements with edge DOFs, every fine sub-edge of a
/// hanging edge gets a relation whose masters are the DOFs of the coarse cell, weighted by the
/// coarse basis functions at the DOF's position along the edge. Masters that are themselves
/// constrained (hanging on an even coarser edge) are left to chain resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct HangingNodeConstraints;

/// Relation of a DOF located at parameter `t` along a hanging edge.
fn coarse_relation<T: Real>(
    space: &FunctionSpace<T>,
    leaf: usize,
    hanging: &HangingEdge<T>,
    t: T,
) -> ConstraintRelation<T> {
    let local = space.local_space(hanging.cell);
    let fem = local.fem(leaf);
    let xi: Point2<T> = reference_edge_point(local.cell_type, hanging.local_edge, t);
    let mut phi = vec![T::zero(); local.leaf_range(leaf).len()];
    fem.populate_basis(local.cell_type, &mut phi, &xi);

    let tolerance: T = convert(1e-12);
    let masters = local.dofs()[local.leaf_range(leaf)]
        .iter()
        .copied()
        .zip(phi)
        .filter(|(_, weight)| weight.abs() > tolerance)
        .collect();
    ConstraintRelation::hanging_node(masters)
}

impl<T: Real> ConstraintPolicy<T> for HangingNodeConstraints {
    fn add_constraints(
        &self,
        space: &FunctionSpace<T>,
        leaf: usize,
        builder: &mut ConstraintsBuilder<T>,
    ) -> Result<(), ConstraintResolutionError> {
        let half: T = convert(0.5);
        for hanging in space.view().hanging_edges() {
            for &(vertex, t) in &hanging.hanging_vertices {
                let relation = coarse_relation(space, leaf, hanging, t);
                for dof in space.entity_dofs(leaf, EntityKey::Vertex(vertex)) {
                    builder.add_relation(dof, relation.clone())?;
                }
            }
            if space.fem(leaf).dofs_per_edge() > 0 {
                for &(sub_edge, t0, t1) in &hanging.sub_edges {
                    let relation = coarse_relation(space, leaf, hanging, (t0 + t1) * half);
                    for dof in space.entity_dofs(leaf, EntityKey::Edge(sub_edge)) {
                        builder.add_relation(dof, relation.clone())?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSettings {
    /// Maximum number of refinement passes.
    pub max_passes: usize,
}

impl Default for IsolationSettings {
    fn default() -> Self {
        Self { max_passes: 10 }
    }
}

/// Refines the grid until every edge carries at most one hanging vertex.
///
/// In each pass, the coarse cell of every edge with more than one hanging vertex is refined.
/// Returns the number of passes that were needed.
pub fn isolate_hanging_nodes<T: Real>(
    grid: &mut AdaptiveGrid<T>,
    settings: &IsolationSettings,
) -> Result<usize, ConstraintResolutionError> {
    let mut passes = 0;
    loop {
        let view = grid.leaf_view();
        let offending: Vec<usize> = view
            .hanging_edges()
            .iter()
            .filter(|hanging| hanging.hanging_vertices.len() > 1)
            .map(|hanging| view.cell(hanging.cell).grid_cell)
            .collect();

        if offending.is_empty() {
            debug!("Hanging nodes isolated after {} passes", passes);
            return Ok(passes);
        }
        if passes == settings.max_passes {
            warn!(
                "Hanging-node isolation gave up after {} passes with {} offending edges",
                passes,
                offending.len()
            );
            return Err(ConstraintResolutionError::IsolationDidNotConverge {
                passes,
                remaining: offending.len(),
            });
        }

        for cell in offending {
            grid.mark(cell, true);
        }
        grid.adapt();
        grid.post_adapt();
        passes += 1;
    }
}
