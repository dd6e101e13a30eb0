use gridfem::element::{Lagrange1, P1, Q1, Q2};
use gridfem::mesh::procedural::{create_unit_square_uniform_quad_grid, create_unit_square_uniform_tri_grid};
use gridfem::space::{DofOrdering, EntityKey, FunctionSpace, SpaceConstructionError};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, Point2};
use std::collections::BTreeSet;
use std::sync::Arc;

fn quad_view(cells_per_dim: usize) -> Arc<gridfem::mesh::LeafView<f64>> {
    Arc::new(create_unit_square_uniform_quad_grid(cells_per_dim).leaf_view())
}

#[test]
fn scalar_space_dof_counts() {
    let view = quad_view(2);
    assert_eq!(FunctionSpace::leaf(view.clone(), Q1).unwrap().num_dofs(), 9);
    // 9 vertices, 12 edges and 4 cells
    assert_eq!(FunctionSpace::leaf(view, Q2).unwrap().num_dofs(), 25);

    let tri_view = Arc::new(create_unit_square_uniform_tri_grid::<f64>(3).leaf_view());
    let space = FunctionSpace::leaf(tri_view, P1).unwrap();
    assert_eq!(space.num_dofs(), 16);
    assert_eq!(space.num_leaves(), 1);
    assert_eq!(space.cell_dofs(0).len(), 3);
}

#[test]
fn unsupported_cell_type_is_rejected() {
    let result = FunctionSpace::leaf(quad_view(1), P1);
    assert!(matches!(
        result,
        Err(SpaceConstructionError::UnsupportedCellType { cell: 0, .. })
    ));
}

#[test]
fn empty_compositions_are_rejected() {
    let child = FunctionSpace::leaf(quad_view(1), Q1).unwrap();
    assert_eq!(
        FunctionSpace::power(child, 0, DofOrdering::Lexicographic).unwrap_err(),
        SpaceConstructionError::EmptyComposition
    );
    assert_eq!(
        FunctionSpace::<f64>::composite(vec![], DofOrdering::Lexicographic).unwrap_err(),
        SpaceConstructionError::EmptyComposition
    );
}

#[test]
fn composite_children_must_share_view() {
    let a = FunctionSpace::leaf(quad_view(1), Q1).unwrap();
    let b = FunctionSpace::leaf(quad_view(1), Q1).unwrap();
    assert_eq!(
        FunctionSpace::composite(vec![a, b], DofOrdering::Lexicographic).unwrap_err(),
        SpaceConstructionError::MismatchedViews
    );
}

#[test]
fn shared_entities_get_shared_dofs() {
    let space = FunctionSpace::leaf(quad_view(2), Q2).unwrap();
    // Cells 0 and 1 share the vertical edge x = 0.5, y in [0, 0.5]
    let dofs_0: BTreeSet<_> = space.cell_dofs(0).iter().copied().collect();
    let dofs_1: BTreeSet<_> = space.cell_dofs(1).iter().copied().collect();
    let shared: Vec<_> = dofs_0.intersection(&dofs_1).copied().collect();
    assert_eq!(shared.len(), 3);
    for dof in shared {
        assert_scalar_eq!(space.dof_nodal_point(dof).x, 0.5, comp = abs, tol = 1e-14);
    }
}

#[test]
fn lexicographic_power_space_blocks_components() {
    let view = quad_view(2);
    let child = FunctionSpace::leaf(view, Q1).unwrap();
    let space = FunctionSpace::power(child, 2, DofOrdering::Lexicographic).unwrap();
    assert_eq!(space.num_dofs(), 18);
    assert_eq!(space.num_leaves(), 2);
    assert_eq!(space.leaf_dofs(0), (0..9).collect::<Vec<_>>().as_slice());
    assert_eq!(space.leaf_dofs(1), (9..18).collect::<Vec<_>>().as_slice());
    assert_eq!(space.entity_dofs(1, EntityKey::Vertex(4)), 13..14);
    assert_eq!(space.dof_leaf(13), 1);
    assert_eq!(space.dof_entity(13), EntityKey::Vertex(4));

    // Local DOFs are ordered leaf by leaf
    let local = space.local_space(3);
    assert_eq!(local.num_dofs(), 8);
    assert_eq!(local.leaf_range(1), 4..8);
    for i in 0..4 {
        assert_eq!(local.dofs()[i + 4], local.dofs()[i] + 9);
    }
}

#[test]
fn entity_blocked_power_space_interleaves_components() {
    let view = quad_view(2);
    let child = FunctionSpace::leaf(view, Q1).unwrap();
    let space = FunctionSpace::power(child, 2, DofOrdering::EntityBlocked).unwrap();
    for v in 0..9 {
        assert_eq!(space.entity_dofs(0, EntityKey::Vertex(v)), 2 * v..2 * v + 1);
        assert_eq!(space.entity_dofs(1, EntityKey::Vertex(v)), 2 * v + 1..2 * v + 2);
    }
    assert_eq!(space.dof_nodal_point(2 * 4), space.dof_nodal_point(2 * 4 + 1));
}

#[test]
fn orderings_partition_the_dof_range() {
    let view = quad_view(2);
    for ordering in [DofOrdering::Lexicographic, DofOrdering::EntityBlocked] {
        let velocity = FunctionSpace::power(FunctionSpace::leaf(view.clone(), Q2).unwrap(), 2, ordering).unwrap();
        let pressure = FunctionSpace::leaf(view.clone(), Q1).unwrap();
        let space = FunctionSpace::composite(vec![velocity, pressure], ordering).unwrap();
        assert_eq!(space.num_leaves(), 3);
        assert_eq!(space.num_dofs(), 2 * 25 + 9);

        let mut all: Vec<usize> = (0..space.num_leaves())
            .flat_map(|leaf| space.leaf_dofs(leaf).to_vec())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..space.num_dofs()).collect::<Vec<_>>());
        for leaf in 0..space.num_leaves() {
            assert!(space
                .leaf_dofs(leaf)
                .iter()
                .all(|&dof| space.dof_leaf(dof) == leaf));
        }
    }
}

#[test]
fn spaces_have_unique_ids() {
    let view = quad_view(1);
    let a = FunctionSpace::leaf(view.clone(), Q1).unwrap();
    let b = FunctionSpace::leaf(view, Q1).unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn interpolation_reproduces_element_polynomials() {
    let u = |p: &Point2<f64>| 1.0 + 2.0 * p.x - 3.0 * p.y + 0.5 * p.x * p.y;
    let mut grid = create_unit_square_uniform_quad_grid(2);
    grid.mark(0, true);
    grid.adapt();
    let view = Arc::new(grid.leaf_view());
    let space = FunctionSpace::leaf(view.clone(), Lagrange1).unwrap();
    let mut x = DVector::zeros(space.num_dofs());
    space.interpolate(&mut x, |_, p| u(p));

    // Bilinear functions are in the Q1 space of every cell
    for cell in 0..space.num_cells() {
        for xi in [Point2::new(0.25, 0.75), Point2::new(0.5, 0.5), Point2::new(0.9, 0.1)] {
            let geometry =
                gridfem::element::CellGeometry::from_vertices(view.cell(cell).cell_type, &view.cell_points(cell));
            let p = geometry.map_reference_coords(&xi);
            assert_scalar_eq!(space.evaluate(&x, cell, &xi, 0), u(&p), comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn leaf_interpolation_leaves_other_components_untouched() {
    let view = quad_view(1);
    let child = FunctionSpace::leaf(view, Q1).unwrap();
    let space = FunctionSpace::power(child, 2, DofOrdering::EntityBlocked).unwrap();
    let mut x = DVector::from_element(space.num_dofs(), -1.0);
    space.interpolate_leaf(&mut x, 1, |p| p.x + p.y);
    for dof in 0..space.num_dofs() {
        if space.dof_leaf(dof) == 0 {
            assert_eq!(x[dof], -1.0);
        } else {
            let p = space.dof_nodal_point(dof);
            assert_eq!(x[dof], p.x + p.y);
        }
    }
}
