use gridfem::assembly::global::GridOperator;
use gridfem::assembly::operators::{LinearKinetics, MassOperator, ReactionDiffusionOperator};
use gridfem::constraints::AffineConstraints;
use gridfem::element::Q1;
use gridfem::mesh::procedural::create_unit_square_uniform_quad_grid;
use gridfem::optimize::newton::{DivergenceReason, NewtonSettings, NewtonSolver};
use gridfem::space::FunctionSpace;
use gridfem::sparse::DenseLuSolver;
use gridfem::timestepping::{
    FailurePolicy, OneStepGridOperator, OneStepMethod, OneStepScheme, TimeStepFailure, TimeStepSettings, TimeStepper,
};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

const LAMBDA: f64 = -2.0;

type DecayMethod = OneStepMethod<f64, ReactionDiffusionOperator<f64, LinearKinetics<f64>>, MassOperator<f64>, DenseLuSolver>;

/// `u_t = 0.1 Δu + λ u` with homogeneous Neumann conditions. Spatially constant initial data
/// stay constant, so every step can be compared with the scalar recursion of the scheme.
fn decay_method(scheme: OneStepScheme<f64>) -> DecayMethod {
    let grid = create_unit_square_uniform_quad_grid::<f64>(2);
    let space = Arc::new(FunctionSpace::leaf(Arc::new(grid.leaf_view()), Q1).unwrap());
    let constraints = Arc::new(AffineConstraints::none(space.num_dofs()));
    let kinetics = LinearKinetics::new(DMatrix::from_element(1, 1, LAMBDA));
    let spatial = GridOperator::new(
        space.clone(),
        constraints.clone(),
        ReactionDiffusionOperator::new(kinetics, vec![0.1]),
    )
    .unwrap();
    let temporal = GridOperator::new(space, constraints, MassOperator::new(1)).unwrap();
    let operator = OneStepGridOperator::new(spatial, temporal, scheme).unwrap();
    OneStepMethod::new(operator, NewtonSolver::new(DenseLuSolver))
}

fn constant(value: f64) -> DVector<f64> {
    DVector::from_element(9, value)
}

fn assert_constant(u: &DVector<f64>, expected: f64) {
    for &u_i in u.iter() {
        assert_scalar_eq!(u_i, expected, comp = abs, tol = 1e-12);
    }
}

#[test]
fn one_step_matches_scalar_recursions() {
    let dt = 0.1;
    let z = LAMBDA * dt;
    let cases = [
        (OneStepScheme::implicit_euler(), 1.0 / (1.0 - z)),
        (OneStepScheme::explicit_euler(), 1.0 + z),
        (OneStepScheme::crank_nicolson(), (1.0 + 0.5 * z) / (1.0 - 0.5 * z)),
        (
            OneStepScheme::one_step_theta(0.75),
            (1.0 + 0.25 * z) / (1.0 - 0.75 * z),
        ),
    ];
    for (scheme, amplification) in cases {
        let name = scheme.name().to_string();
        let mut method = decay_method(scheme);
        let mut u_new = DVector::zeros(9);
        let stats = method.apply(0.0, dt, &constant(2.0), &mut u_new).unwrap();
        assert_eq!(stats.stages.len(), 1, "{}", name);
        assert_constant(&u_new, 2.0 * amplification);
    }
}

#[test]
fn multi_stage_schemes_approximate_the_exponential() {
    let dt = 0.05;
    let exact = (LAMBDA * dt).exp();
    for scheme in [
        OneStepScheme::alexander2(),
        OneStepScheme::alexander3(),
        OneStepScheme::fractional_step_theta(),
    ] {
        let num_stages = scheme.num_stages();
        let order = scheme.order();
        let mut method = decay_method(scheme);
        let mut u_new = DVector::zeros(9);
        let stats = method.apply(1.0, dt, &constant(1.0), &mut u_new).unwrap();
        assert_eq!(stats.stages.len(), num_stages);
        assert!(stats.newton_iterations() >= num_stages);
        // Local error of a scheme of order p is O((λ dt)^(p+1))
        let tolerance = (LAMBDA * dt).abs().powi(order as i32 + 1);
        assert!((u_new[0] - exact).abs() < tolerance);
        assert_constant(&u_new, u_new[0]);
    }
}

#[test]
fn stepper_clips_the_last_step() {
    let mut stepper = TimeStepper::new(decay_method(OneStepScheme::implicit_euler()));
    let settings = TimeStepSettings {
        t_start: 0.0,
        t_end: 0.35,
        dt_start: 0.1,
        dt_max: 0.1,
        growth_factor: 1.0,
        failure_policy: FailurePolicy::Abort,
    };
    let mut u = constant(1.0);
    let mut times = Vec::new();
    let stats = stepper.run(&mut u, &settings, |t, _| times.push(t)).unwrap();

    assert_eq!(stats.steps, 4);
    assert_eq!(stats.rejected_steps, 0);
    assert_eq!(stats.final_time, 0.35);
    assert_scalar_eq!(stats.last_dt, 0.05, comp = abs, tol = 1e-14);
    assert_eq!(times.len(), 4);
    assert_eq!(*times.last().unwrap(), 0.35);

    let expected = (1.0 - LAMBDA * 0.1).powi(-3) / (1.0 - LAMBDA * 0.05);
    assert_constant(&u, expected);
}

#[test]
fn stepper_grows_the_step_size() {
    let mut stepper = TimeStepper::new(decay_method(OneStepScheme::crank_nicolson()));
    let settings = TimeStepSettings {
        t_start: 1.0,
        t_end: 1.2,
        dt_start: 0.01,
        dt_max: 0.1,
        growth_factor: 2.0,
        failure_policy: FailurePolicy::Abort,
    };
    let mut u = constant(1.0);
    let mut times = Vec::new();
    let stats = stepper.run(&mut u, &settings, |t, _| times.push(t)).unwrap();
    // 0.01, 0.02, 0.04, 0.08 and the remaining 0.05
    assert_eq!(stats.steps, 5);
    assert_eq!(stats.final_time, 1.2);
    assert_scalar_eq!(stats.last_dt, 0.05, comp = abs, tol = 1e-12);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert!((u[0] - (LAMBDA * 0.2).exp()).abs() < 2e-3);
}

#[test]
fn empty_interval_takes_no_steps() {
    let mut stepper = TimeStepper::new(decay_method(OneStepScheme::implicit_euler()));
    let settings = TimeStepSettings {
        t_start: 0.5,
        t_end: 0.5,
        ..TimeStepSettings::default()
    };
    let mut u = constant(3.0);
    let stats = stepper.run(&mut u, &settings, |_, _| panic!("No step expected")).unwrap();
    assert_eq!(stats.steps, 0);
    assert_eq!(stats.final_time, 0.5);
    assert_eq!(u, constant(3.0));
}

fn failing_method() -> DecayMethod {
    let mut method = decay_method(OneStepScheme::implicit_euler());
    *method.newton_mut().settings_mut() = NewtonSettings {
        max_iterations: 0,
        ..NewtonSettings::default()
    };
    method
}

#[test]
fn non_convergence_aborts() {
    let mut stepper = TimeStepper::new(failing_method());
    let settings = TimeStepSettings {
        failure_policy: FailurePolicy::Abort,
        ..TimeStepSettings::default()
    };
    let err = stepper
        .run(&mut constant(1.0), &settings, |_, _| {})
        .unwrap_err();
    match err {
        TimeStepFailure::StageNotConverged { stage, time, source, .. } => {
            assert_eq!(stage, 1);
            assert_eq!(time, 0.0);
            assert!(matches!(source.reason, DivergenceReason::MaxIterations));
        }
        other => panic!("Unexpected failure: {}", other),
    }
}

#[test]
fn step_reduction_gives_up_below_the_minimum() {
    let mut stepper = TimeStepper::new(failing_method());
    let settings = TimeStepSettings {
        failure_policy: FailurePolicy::ReduceStep {
            factor: 0.5,
            min_dt: 0.02,
        },
        ..TimeStepSettings::default()
    };
    let err = stepper
        .run(&mut constant(1.0), &settings, |_, _| {})
        .unwrap_err();
    match err {
        TimeStepFailure::StepSizeTooSmall { time, dt } => {
            assert_eq!(time, 0.0);
            assert_scalar_eq!(dt, 0.0125, comp = abs, tol = 1e-15);
        }
        other => panic!("Unexpected failure: {}", other),
    }
}

#[test]
fn steady_states_need_no_newton_iterations() {
    // With max_iterations = 0 a step still succeeds if the initial guess already solves it
    let mut method = failing_method();
    let mut u_new = DVector::zeros(9);
    let stats = method.apply(0.0, 0.1, &constant(0.0), &mut u_new).unwrap();
    assert_eq!(stats.newton_iterations(), 0);
    assert_eq!(u_new, constant(0.0));
}

#[test]
fn mismatched_operators_are_rejected() {
    let grid = create_unit_square_uniform_quad_grid::<f64>(2);
    let view = Arc::new(grid.leaf_view());
    let coarse = Arc::new(FunctionSpace::leaf(view.clone(), Q1).unwrap());
    let fine = Arc::new(FunctionSpace::leaf(view, gridfem::element::Q2).unwrap());
    let spatial = GridOperator::new(
        coarse.clone(),
        Arc::new(AffineConstraints::none(coarse.num_dofs())),
        MassOperator::new(1),
    )
    .unwrap();
    let temporal = GridOperator::new(
        fine.clone(),
        Arc::new(AffineConstraints::none(fine.num_dofs())),
        MassOperator::new(1),
    )
    .unwrap();
    assert!(OneStepGridOperator::new(spatial, temporal, OneStepScheme::implicit_euler()).is_err());
}

#[test]
fn settings_that_cannot_terminate_are_rejected() {
    let reduce = |factor, min_dt| FailurePolicy::ReduceStep { factor, min_dt };
    let cases = [
        TimeStepSettings {
            dt_start: 0.0,
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            dt_max: 0.0,
            t_end: 0.35,
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            dt_max: -0.1,
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            growth_factor: 0.0,
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            growth_factor: 0.5,
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            failure_policy: reduce(1.0, 0.01),
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            failure_policy: reduce(0.0, 0.01),
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            failure_policy: reduce(0.5, 0.0),
            ..TimeStepSettings::default()
        },
        TimeStepSettings {
            dt_max: f64::NAN,
            ..TimeStepSettings::default()
        },
    ];
    for settings in cases {
        assert!(matches!(
            settings.validate(),
            Err(TimeStepFailure::InvalidSettings { .. })
        ));
        let mut stepper = TimeStepper::new(decay_method(OneStepScheme::implicit_euler()));
        let mut u = constant(1.0);
        let err = stepper
            .run(&mut u, &settings, |_, _| panic!("No step expected"))
            .unwrap_err();
        assert!(matches!(err, TimeStepFailure::InvalidSettings { .. }), "{:?}", settings);
        assert_eq!(u, constant(1.0));
    }
    assert!(TimeStepSettings::<f64>::default().validate().is_ok());
}

#[test]
fn settings_serialize() {
    let settings = TimeStepSettings {
        t_end: 2.0,
        ..TimeStepSettings::<f64>::default()
    };
    let json = serde_json::to_string(&settings).unwrap();
    let deserialized: TimeStepSettings<f64> = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, settings);
    assert!(json.contains("ReduceStep"));
}
