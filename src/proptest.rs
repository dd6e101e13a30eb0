use crate::mesh::procedural::{create_rectangular_uniform_quad_grid, create_unit_square_uniform_tri_grid};
use crate::mesh::AdaptiveGrid;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use nalgebra::{Point2, Vector2};
use std::cmp::max;

pub fn point2() -> impl Strategy<Value = Point2<f64>> {
    // Keep coordinates small so that products of them stay well-conditioned
    let range = -10.0..10.0;
    [range.clone(), range.clone()].prop_map(|[x, y]| Point2::new(x, y))
}

// Returns a strategy in which each value is a triplet (cells_per_unit, units_x, units_y)
// such that cells_per_unit^2 * units_x * units_y <= max(1, max_cells)
fn rectangular_uniform_grid_cell_distribution_strategy(
    max_cells: usize,
) -> impl Strategy<Value = (usize, usize, usize)> {
    let max_cells = max(1, max_cells);
    let max_cells_per_unit = f64::floor(f64::sqrt(max_cells as f64)) as usize;
    (1..=max(1, max_cells_per_unit))
        .prop_flat_map(move |cells_per_unit| (Just(cells_per_unit), 1..=max_cells / (cells_per_unit * cells_per_unit)))
        .prop_flat_map(move |(cells_per_unit, units_x)| {
            let units_y_strategy = 1..=max_cells / (cells_per_unit * cells_per_unit * units_x);
            (Just(cells_per_unit), Just(units_x), units_y_strategy)
        })
}

pub fn rectangular_uniform_grid_strategy(
    unit_length: f64,
    max_cells: usize,
) -> impl Strategy<Value = AdaptiveGrid<f64>> {
    rectangular_uniform_grid_cell_distribution_strategy(max_cells).prop_map(
        move |(cells_per_unit, units_x, units_y)| {
            create_rectangular_uniform_quad_grid(
                unit_length,
                units_x,
                units_y,
                cells_per_unit,
                &Vector2::new(0.0, 0.0),
            )
        },
    )
}

/// Grids of the unit square (triangles or quadrilaterals) that went through up to
/// `max_rounds` rounds of refinement of randomly marked leaf cells.
pub fn locally_refined_unit_square_strategy(max_rounds: usize) -> impl Strategy<Value = AdaptiveGrid<f64>> {
    let rounds = vec(vec(any::<bool>(), 1..16), 0..=max_rounds);
    (any::<bool>(), 1..=3usize, rounds).prop_map(|(triangles, cells_per_dim, rounds)| {
        let mut grid = if triangles {
            create_unit_square_uniform_tri_grid(cells_per_dim)
        } else {
            create_rectangular_uniform_quad_grid(1.0, 1, 1, cells_per_dim, &Vector2::zeros())
        };
        for flags in rounds {
            let leaves: Vec<_> = grid.leaf_cells().collect();
            for (k, cell) in leaves.into_iter().enumerate() {
                grid.mark(cell, flags[k % flags.len()]);
            }
            grid.adapt();
            grid.post_adapt();
        }
        grid
    })
}
