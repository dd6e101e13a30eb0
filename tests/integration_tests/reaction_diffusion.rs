use gridfem::assembly::global::GridOperator;
use gridfem::assembly::operators::{
    FitzHughNagumo, Kinetics, LinearKinetics, MassOperator, ReactionDiffusionOperator,
};
use gridfem::constraints::{AffineConstraints, ChainResolution, HangingNodeConstraints};
use gridfem::element::Q1;
use gridfem::mesh::procedural::create_unit_square_uniform_quad_grid;
use gridfem::optimize::newton::NewtonSolver;
use gridfem::space::{DofOrdering, FunctionSpace};
use gridfem::sparse::preconditioners::PreconditionerKind;
use gridfem::sparse::{BiCgStabSolver, DenseLuSolver, LinearSolver};
use gridfem::timestepping::{
    FailurePolicy, OneStepGridOperator, OneStepMethod, OneStepScheme, TimeStepSettings, TimeStepper,
};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

fn two_component_space(ordering: DofOrdering) -> Arc<FunctionSpace<f64>> {
    let mut grid = create_unit_square_uniform_quad_grid(4);
    grid.mark(0, true);
    grid.adapt();
    grid.post_adapt();
    let scalar = FunctionSpace::leaf(Arc::new(grid.leaf_view()), Q1).unwrap();
    Arc::new(FunctionSpace::power(scalar, 2, ordering).unwrap())
}

fn stepper<K, L>(
    space: &Arc<FunctionSpace<f64>>,
    operator: ReactionDiffusionOperator<f64, K>,
    scheme: OneStepScheme<f64>,
    linear_solver: L,
) -> TimeStepper<f64, ReactionDiffusionOperator<f64, K>, MassOperator<f64>, L>
where
    K: Kinetics<f64>,
    L: LinearSolver<f64>,
{
    let constraints =
        Arc::new(AffineConstraints::from_policy(space, &HangingNodeConstraints, ChainResolution::Flatten).unwrap());
    let spatial = GridOperator::new(space.clone(), constraints.clone(), operator).unwrap();
    let temporal = GridOperator::new(space.clone(), constraints, MassOperator::new(2)).unwrap();
    let operator = OneStepGridOperator::new(spatial, temporal, scheme).unwrap();
    TimeStepper::new(OneStepMethod::new(operator, NewtonSolver::new(linear_solver)))
}

/// Integrals of all components, computed from the residual of the mass operator.
fn component_integrals(space: &Arc<FunctionSpace<f64>>, u: &DVector<f64>) -> Vec<f64> {
    let mass = GridOperator::new(
        space.clone(),
        Arc::new(AffineConstraints::none(space.num_dofs())),
        MassOperator::new(2),
    )
    .unwrap();
    let mut r = DVector::zeros(space.num_dofs());
    mass.residual(u, &mut r).unwrap();
    (0..space.num_leaves())
        .map(|leaf| space.leaf_dofs(leaf).iter().map(|&dof| r[dof]).sum())
        .collect()
}

#[test]
fn boundary_flux_drains_the_first_component() {
    let space = two_component_space(DofOrdering::EntityBlocked);
    // u_0 only diffuses and leaves the domain with flux 0.5, u_1 relaxes towards u_0
    let kinetics = LinearKinetics::new(DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, -1.0]));
    let operator = ReactionDiffusionOperator::new(kinetics, vec![0.1, 0.05]).with_flux(vec![0.5, 0.0]);
    let mut stepper = stepper(
        &space,
        operator,
        OneStepScheme::alexander2(),
        BiCgStabSolver::new(PreconditionerKind::Jacobi),
    );

    let mut u = DVector::zeros(space.num_dofs());
    space.interpolate_leaf(&mut u, 0, |p| 2.0 + p.x * p.y);
    space.interpolate_leaf(&mut u, 1, |p| p.y);
    stepper.method().operator().spatial().backtransform(&mut u);
    let initial = component_integrals(&space, &u);

    let settings = TimeStepSettings {
        t_start: 0.0,
        t_end: 0.5,
        dt_start: 0.05,
        dt_max: 0.1,
        growth_factor: 1.5,
        failure_policy: FailurePolicy::Abort,
    };
    let mut integrals = Vec::new();
    let stats = stepper
        .run(&mut u, &settings, |t, u| integrals.push((t, component_integrals(&space, u)[0])))
        .unwrap();
    assert_eq!(stats.rejected_steps, 0);
    assert!(stats.newton_iterations >= 2 * stats.steps);

    // The perimeter is 4, so the outflow is 2 per unit time
    for (t, integral) in integrals {
        assert_scalar_eq!(integral, initial[0] - 2.0 * t, comp = abs, tol = 1e-7);
    }
}

#[test]
fn fitzhugh_nagumo_stays_bounded() {
    let space = two_component_space(DofOrdering::Lexicographic);
    let kinetics = FitzHughNagumo {
        lambda: 1.0,
        sigma: 0.5,
        kappa: 0.05,
    };
    let operator = ReactionDiffusionOperator::new(kinetics, vec![0.05, 0.01]);
    let mut stepper = stepper(&space, operator, OneStepScheme::implicit_euler(), DenseLuSolver);

    let mut u = DVector::zeros(space.num_dofs());
    space.interpolate_leaf(&mut u, 0, |p| if p.x < 0.3 && p.y < 0.3 { 1.5 } else { -0.5 });
    space.interpolate_leaf(&mut u, 1, |_| -0.2);
    stepper.method().operator().spatial().backtransform(&mut u);

    let settings = TimeStepSettings {
        t_end: 2.0,
        ..TimeStepSettings::default()
    };
    let mut steps = 0;
    let stats = stepper
        .run(&mut u, &settings, |_, u| {
            steps += 1;
            assert!(u.iter().all(|u_i| u_i.is_finite() && u_i.abs() < 3.0));
        })
        .unwrap();
    assert_eq!(stats.steps, steps);
    assert_eq!(stats.final_time, 2.0);
}
