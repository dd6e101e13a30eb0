//! Basic procedural grid generation routines.
use crate::mesh::AdaptiveGrid;
use crate::Real;
use nalgebra::{Point2, Vector2};

/// Uniform quadrilateral grid of the unit square with `cells_per_dim` cells along each axis.
///
/// # Panics
///
/// Panics if `cells_per_dim` is zero.
pub fn create_unit_square_uniform_quad_grid<T: Real>(cells_per_dim: usize) -> AdaptiveGrid<T> {
    create_rectangular_uniform_quad_grid(T::one(), 1, 1, cells_per_dim, &Vector2::zeros())
}

/// Uniform triangle grid of the unit square. Every square is split along its diagonal from
/// the bottom-left to the top-right corner.
///
/// # Panics
///
/// Panics if `cells_per_dim` is zero.
pub fn create_unit_square_uniform_tri_grid<T: Real>(cells_per_dim: usize) -> AdaptiveGrid<T> {
    let (vertices, squares) = uniform_square_lattice(T::one(), 1, 1, cells_per_dim, &Vector2::zeros());
    let cells = squares
        .into_iter()
        .flat_map(|[v00, v10, v11, v01]| [vec![v00, v10, v11], vec![v00, v11, v01]])
        .collect();
    AdaptiveGrid::from_vertices_and_cells(vertices, cells).expect("Procedural grids are always valid")
}

/// Generates an axis-aligned rectangular uniform grid given a unit length,
/// dimensions as multipliers of the unit length and the number of cells per unit length.
///
/// # Panics
///
/// Panics if any of the counts is zero.
pub fn create_rectangular_uniform_quad_grid<T: Real>(
    unit_length: T,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
    bottom_left: &Vector2<T>,
) -> AdaptiveGrid<T> {
    let (vertices, squares) = uniform_square_lattice(unit_length, units_x, units_y, cells_per_unit, bottom_left);
    let cells = squares.into_iter().map(Vec::from).collect();
    AdaptiveGrid::from_vertices_and_cells(vertices, cells).expect("Procedural grids are always valid")
}

/// Vertices of a uniform lattice and the counter-clockwise corner indices of each square.
fn uniform_square_lattice<T: Real>(
    unit_length: T,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
    bottom_left: &Vector2<T>,
) -> (Vec<Point2<T>>, Vec<[usize; 4]>) {
    assert!(
        cells_per_unit > 0 && units_x > 0 && units_y > 0,
        "Grid must have at least one cell"
    );

    let cell_size = unit_length / T::from_usize(cells_per_unit).expect("Must be able to fit usize in T");
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;

    let to_global_vertex_index = |i, j| (num_cells_x + 1) * j + i;

    let mut vertices = Vec::with_capacity((num_cells_x + 1) * (num_cells_y + 1));
    for j in 0..=num_cells_y {
        for i in 0..=num_cells_x {
            let i_as_t = T::from_usize(i).expect("Must be able to fit usize in T");
            let j_as_t = T::from_usize(j).expect("Must be able to fit usize in T");
            let v = bottom_left + Vector2::new(i_as_t, j_as_t) * cell_size;
            vertices.push(Point2::from(v));
        }
    }

    let mut squares = Vec::with_capacity(num_cells_x * num_cells_y);
    for j in 0..num_cells_y {
        for i in 0..num_cells_x {
            squares.push([
                to_global_vertex_index(i, j),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i, j + 1),
            ]);
        }
    }

    (vertices, squares)
}
