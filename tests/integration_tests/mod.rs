use gridfem::assembly::global::GridOperator;
use gridfem::assembly::local::LocalOperator;
use gridfem::optimize::newton::{NewtonSolver, NewtonStatistics};
use gridfem::sparse::LinearSolver;
use nalgebra::DVector;

mod nonlinear;
mod reaction_diffusion;

/// Solves the stationary problem of `operator` with Newton, starting from `x`.
pub fn solve_stationary<L, S>(operator: &mut GridOperator<f64, L>, x: &mut DVector<f64>, linear_solver: S) -> NewtonStatistics<f64>
where
    L: LocalOperator<f64>,
    S: LinearSolver<f64>,
{
    let mut newton = NewtonSolver::new(linear_solver);
    match newton.solve(operator, x) {
        Ok(stats) => stats,
        Err(err) => panic!("Newton failed: {}", err),
    }
}
