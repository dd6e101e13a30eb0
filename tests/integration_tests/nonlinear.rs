use gridfem::assembly::global::GridOperator;
use gridfem::assembly::operators::NonlinearPoissonOperator;
use gridfem::constraints::{AffineConstraints, AllDirichlet, ChainResolution, HangingNodeDirichletConstraints};
use gridfem::element::Q2;
use gridfem::error::estimate_l2_error;
use gridfem::mesh::procedural::create_unit_square_uniform_quad_grid;
use gridfem::optimize::newton::{LineSearchStrategy, NewtonSettings, NewtonSolver, NewtonStatistics};
use gridfem::space::FunctionSpace;
use gridfem::sparse::DenseLuSolver;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DVector, Point2};
use std::sync::Arc;

const ETA: f64 = 10.0;

fn exact(p: &Point2<f64>) -> f64 {
    1.0 + p.x * p.x + 2.0 * p.y * p.y
}

/// `f = -Δu + η u²` for the exact solution.
fn source(p: &Point2<f64>) -> f64 {
    let u = exact(p);
    -6.0 + ETA * u * u
}

type Problem = GridOperator<f64, NonlinearPoissonOperator<f64, fn(&Point2<f64>) -> f64>>;

fn problem() -> Problem {
    let mut grid = create_unit_square_uniform_quad_grid(4);
    grid.mark(5, true);
    grid.adapt();
    grid.post_adapt();
    let space = Arc::new(FunctionSpace::leaf(Arc::new(grid.leaf_view()), Q2).unwrap());
    let mut constraints = AffineConstraints::from_policy(
        &space,
        &HangingNodeDirichletConstraints::new(AllDirichlet),
        ChainResolution::Flatten,
    )
    .unwrap();
    let mut g = DVector::zeros(space.num_dofs());
    space.interpolate(&mut g, |_, p| exact(p));
    constraints.set_dirichlet_values(&g).unwrap();

    let operator = NonlinearPoissonOperator::new(ETA, source as fn(&Point2<f64>) -> f64).with_quadrature_order(6);
    GridOperator::new(space, Arc::new(constraints), operator).unwrap()
}

fn solve(settings: NewtonSettings<f64>) -> (DVector<f64>, NewtonStatistics<f64>) {
    let mut operator = problem();
    let mut x = DVector::zeros(operator.num_dofs());
    let mut newton = NewtonSolver::new(DenseLuSolver).with_settings(settings);
    let stats = newton.solve(&mut operator, &mut x).unwrap();
    (x, stats)
}

#[test]
fn newton_converges_quadratically() {
    let (x, stats) = solve(NewtonSettings::default());
    assert!(stats.iterations > 1);
    assert!(stats.iterations <= 10);
    assert_eq!(stats.jacobian_assemblies, stats.iterations);
    assert_eq!(stats.residual_history.len(), stats.iterations + 1);
    assert!(stats.residual_history.windows(2).all(|w| w[1] < w[0]));

    // Steps accelerate as the iterates approach the solution
    let history = &stats.residual_history;
    let n = history.len();
    assert!(history[n - 1] < 0.1 * history[n - 2], "{:?}", history);

    let operator = problem();
    let error = estimate_l2_error(operator.space(), 0, &x, exact, 6).unwrap();
    assert!(error < 1e-3, "L2 error {}", error);
}

#[test]
fn jacobian_reuse_reaches_the_same_solution() {
    let (x_reference, _) = solve(NewtonSettings::default());
    let (x, stats) = solve(NewtonSettings {
        reassemble_threshold: 0.5,
        max_iterations: 50,
        ..NewtonSettings::default()
    });
    assert!(stats.jacobian_assemblies < stats.iterations);
    assert_matrix_eq!(x, x_reference, comp = abs, tol = 1e-8);
}

#[test]
fn full_newton_steps_without_line_search() {
    let (x_reference, _) = solve(NewtonSettings::default());
    let (x, stats) = solve(NewtonSettings {
        line_search: LineSearchStrategy::NoLineSearch,
        ..NewtonSettings::default()
    });
    assert!(stats.residual_norm <= 1e-10 * stats.first_residual_norm || stats.residual_norm <= 1e-12);
    assert_matrix_eq!(x, x_reference, comp = abs, tol = 1e-8);
}
