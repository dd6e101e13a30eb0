use gridfem::mesh::procedural::{
    create_rectangular_uniform_quad_grid, create_unit_square_uniform_quad_grid, create_unit_square_uniform_tri_grid,
};
use gridfem::mesh::{AdaptiveGrid, CellType, GridError};
use gridfem::proptest::locally_refined_unit_square_strategy;
use matrixcompare::assert_scalar_eq;
use nalgebra::{Point2, Vector2};
use proptest::prelude::*;

#[test]
fn uniform_quad_grid_leaf_view() {
    let grid = create_unit_square_uniform_quad_grid::<f64>(2);
    let view = grid.leaf_view();
    assert_eq!(view.num_cells(), 4);
    assert_eq!(view.num_vertices(), 9);
    assert_eq!(view.num_edges(), 12);
    assert_eq!(view.boundary_faces().len(), 8);
    assert!(view.hanging_edges().is_empty());
    assert_scalar_eq!(view.area(), 1.0, comp = abs, tol = 1e-14);
    assert!(view
        .cells()
        .iter()
        .all(|cell| cell.cell_type == CellType::Quadrilateral));
}

#[test]
fn uniform_tri_grid_leaf_view() {
    let grid = create_unit_square_uniform_tri_grid::<f64>(3);
    let view = grid.leaf_view();
    assert_eq!(view.num_cells(), 18);
    assert_eq!(view.num_vertices(), 16);
    // 3 * 4 horizontal, 3 * 4 vertical and 9 diagonal edges
    assert_eq!(view.num_edges(), 33);
    assert_eq!(view.boundary_faces().len(), 12);
    assert_scalar_eq!(view.area(), 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn rectangular_grid_has_expected_extent() {
    let grid = create_rectangular_uniform_quad_grid(0.5, 3, 2, 2, &Vector2::new(1.0, -1.0));
    let view = grid.leaf_view();
    assert_eq!(view.num_cells(), 24);
    assert_scalar_eq!(view.area(), 1.5, comp = abs, tol = 1e-14);
    let max_x = view.vertices().iter().map(|v| v.x).fold(f64::MIN, f64::max);
    let min_y = view.vertices().iter().map(|v| v.y).fold(f64::MAX, f64::min);
    assert_scalar_eq!(max_x, 2.5, comp = abs, tol = 1e-14);
    assert_scalar_eq!(min_y, -1.0, comp = abs, tol = 1e-14);
}

#[test]
fn boundary_normals_point_outwards() {
    for grid in [
        create_unit_square_uniform_quad_grid::<f64>(3),
        create_unit_square_uniform_tri_grid::<f64>(3),
    ] {
        let view = grid.leaf_view();
        let centre = Point2::new(0.5, 0.5);
        let mut perimeter = 0.0;
        for face in view.boundary_faces() {
            assert_scalar_eq!(face.normal.norm(), 1.0, comp = abs, tol = 1e-14);
            assert!((face.centre() - centre).dot(&face.normal) > 0.0);
            perimeter += face.length;
        }
        assert_scalar_eq!(perimeter, 4.0, comp = abs, tol = 1e-14);
    }
}

#[test]
#[should_panic(expected = "Grid must have at least one cell")]
fn unit_square_quad_grid_without_cells_panics() {
    let _: AdaptiveGrid<f64> = create_unit_square_uniform_quad_grid(0);
}

#[test]
#[should_panic(expected = "Grid must have at least one cell")]
fn unit_square_tri_grid_without_cells_panics() {
    let _: AdaptiveGrid<f64> = create_unit_square_uniform_tri_grid(0);
}

#[test]
fn invalid_grids_are_rejected() {
    let vertices = vec![
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(1.0, 1.0),
        Point2::new(0.0, 1.0),
    ];
    assert_eq!(
        AdaptiveGrid::<f64>::from_vertices_and_cells(vertices.clone(), vec![]).unwrap_err(),
        GridError::Empty
    );
    assert_eq!(
        AdaptiveGrid::from_vertices_and_cells(vertices.clone(), vec![vec![0, 3, 2, 1]]).unwrap_err(),
        GridError::NonPositiveOrientation { cell: 0 }
    );
    assert_eq!(
        AdaptiveGrid::from_vertices_and_cells(vertices.clone(), vec![vec![0, 1]]).unwrap_err(),
        GridError::InvalidVertexCount { cell: 0, count: 2 }
    );
    assert_eq!(
        AdaptiveGrid::from_vertices_and_cells(vertices.clone(), vec![vec![0, 1, 2]]).unwrap_err(),
        GridError::UnusedVertex { vertex: 3 }
    );
    assert_eq!(
        AdaptiveGrid::from_vertices_and_cells(vertices.clone(), vec![vec![0, 1, 7]]).unwrap_err(),
        GridError::VertexOutOfBounds {
            cell: 0,
            vertex: 7,
            num_vertices: 4
        }
    );
    assert_eq!(
        AdaptiveGrid::from_vertices_and_cells(vertices, vec![vec![0, 1, 1, 2]]).unwrap_err(),
        GridError::RepeatedVertex { cell: 0, vertex: 1 }
    );
}

#[test]
fn local_quad_refinement_creates_hanging_edges() {
    let mut grid = create_unit_square_uniform_quad_grid::<f64>(2);
    let generation = grid.generation();
    assert!(!grid.pre_adapt());
    assert!(grid.mark(0, true));
    assert!(grid.pre_adapt());
    grid.adapt();
    grid.post_adapt();
    assert_eq!(grid.generation(), generation + 1);
    assert!(!grid.is_leaf(0));
    assert!(!grid.mark(0, true), "Refined cells cannot be marked");

    let view = grid.leaf_view();
    assert_eq!(view.num_cells(), 7);
    assert_scalar_eq!(view.area(), 1.0, comp = abs, tol = 1e-14);

    // The refined cell shares one edge with each of two coarse neighbours
    let hanging = view.hanging_edges();
    assert_eq!(hanging.len(), 2);
    for edge in hanging {
        assert_eq!(edge.hanging_vertices.len(), 1);
        assert_eq!(edge.hanging_vertices[0].1, 0.5);
        assert_eq!(edge.sub_edges.len(), 2);
        assert_eq!(view.cell(edge.cell).level, 0);
        let midpoint = view.vertices()[edge.hanging_vertices[0].0];
        let [a, b] = edge.endpoints;
        assert_eq!(midpoint, nalgebra::center(&view.vertices()[a], &view.vertices()[b]));
    }
    assert_eq!(view.hanging_nodes_per_edge(), vec![1, 1]);
    // The refined cell contributes four fine boundary faces instead of two coarse ones
    assert_eq!(view.boundary_faces().len(), 10);
}

#[test]
fn repeated_refinement_creates_deeper_hanging_vertices() {
    let mut grid = create_unit_square_uniform_quad_grid::<f64>(2);
    grid.mark(0, true);
    grid.adapt();
    grid.post_adapt();
    // Refine the child of cell 0 in the top-right corner, adjacent to both coarse neighbours
    let child = grid.cell_children(0)[2];
    grid.mark(child, true);
    grid.adapt();
    grid.post_adapt();

    let view = grid.leaf_view();
    // Two coarse neighbours see two hanging vertices each, two siblings of the refined child
    // see one
    let mut counts = view.hanging_nodes_per_edge();
    counts.sort();
    assert_eq!(counts, vec![1, 1, 2, 2]);
    for edge in view.hanging_edges() {
        let params: Vec<_> = edge.hanging_vertices.iter().map(|&(_, t)| t).collect();
        assert!(params.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(edge.sub_edges.len(), edge.hanging_vertices.len() + 1);
    }
}

#[test]
fn triangle_refinement() {
    let mut grid = create_unit_square_uniform_tri_grid::<f64>(1);
    grid.mark(0, true);
    grid.adapt();
    let view = grid.leaf_view();
    assert_eq!(view.num_cells(), 5);
    assert_eq!(view.hanging_edges().len(), 1);
    assert_eq!(grid.cell_children(0).len(), 4);
    assert!(grid
        .cell_children(0)
        .iter()
        .all(|&child| grid.cell_level(child) == 1 && grid.cell_parent(child) == Some(0)));
    assert_scalar_eq!(view.area(), 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn global_refinement_quadruples_cells() {
    let mut grid = create_unit_square_uniform_quad_grid::<f64>(1);
    grid.global_refine(2);
    assert_eq!(grid.num_leaf_cells(), 16);
    assert_eq!(grid.max_level(), 2);
    let view = grid.leaf_view();
    assert!(view.hanging_edges().is_empty());
    assert_eq!(view.num_vertices(), 25);
    assert_eq!(view.generation(), grid.generation());
}

proptest! {
    #[test]
    fn every_interior_edge_is_conforming_or_hanging(grid in locally_refined_unit_square_strategy(3)) {
        let view = grid.leaf_view();
        // Each edge is shared by two cells, or lies on the boundary, or is the coarse side or a
        // fine part of a non-conforming interface
        let mut count = vec![0; view.num_edges()];
        for cell in view.cells() {
            for &edge in &cell.edges {
                count[edge] += 1;
            }
        }
        let mut special = vec![false; view.num_edges()];
        for face in view.boundary_faces() {
            special[face.edge] = true;
        }
        for hanging in view.hanging_edges() {
            special[hanging.edge] = true;
            for &(sub_edge, _, _) in &hanging.sub_edges {
                special[sub_edge] = true;
            }
        }
        for edge in 0..view.num_edges() {
            prop_assert!(count[edge] == 2 || (count[edge] == 1 && special[edge]));
        }
    }
}
