//! One-step time integration of `d/dt m(u, t) + s(u, t) = 0`.
//!
//! The temporal operator `m` and the spatial operator `s` are both [`GridOperator`]s on the same
//! function space and constraints. A [`OneStepScheme`] describes how the stages of one step
//! combine them, [`OneStepGridOperator`] assembles the nonlinear system of a single stage,
//! [`OneStepMethod`] solves all stages of a step with Newton's method and [`TimeStepper`]
//! drives the method over a time interval with step size control.
use crate::assembly::global::GridOperator;
use crate::assembly::local::LocalOperator;
use crate::assembly::AssemblyError;
use crate::optimize::newton::{NewtonError, NewtonSolver, NewtonStatistics, NonlinearFunction, NonlinearSolveError};
use crate::sparse::LinearSolver;
use crate::Real;
use log::{debug, info, warn};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

mod scheme;

pub use scheme::OneStepScheme;

#[derive(Debug)]
pub enum TimeStepFailure<T> {
    /// The coefficients do not describe a valid one-step scheme.
    InvalidScheme { reason: String },
    /// Assembling a stage system failed.
    Assembly {
        stage: usize,
        time: T,
        source: AssemblyError,
    },
    /// Newton's method did not converge for a stage.
    StageNotConverged {
        stage: usize,
        time: T,
        dt: T,
        source: NonlinearSolveError<T>,
    },
    /// The step size fell below the minimum allowed by the failure policy.
    StepSizeTooSmall { time: T, dt: T },
    /// The time stepping settings cannot lead to termination.
    InvalidSettings { reason: String },
}

impl<T: Display> Display for TimeStepFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeStepFailure::InvalidScheme { reason } => write!(f, "Invalid one-step scheme: {}", reason),
            TimeStepFailure::Assembly { stage, time, source } => {
                write!(f, "Assembly failed in stage {} of the step at t = {}. Error: {}", stage, time, source)
            }
            TimeStepFailure::StageNotConverged { stage, time, dt, source } => write!(
                f,
                "Stage {} of the step at t = {} with dt = {} did not converge. Error: {}",
                stage, time, dt, source
            ),
            TimeStepFailure::StepSizeTooSmall { time, dt } => {
                write!(f, "Step size {} at t = {} is below the minimum step size", dt, time)
            }
            TimeStepFailure::InvalidSettings { reason } => write!(f, "Invalid time step settings: {}", reason),
        }
    }
}

impl<T: fmt::Debug + Display + 'static> Error for TimeStepFailure<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TimeStepFailure::Assembly { source, .. } => Some(source),
            TimeStepFailure::StageNotConverged { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The nonlinear system of a single stage of a one-step scheme.
///
/// For stage `r` with stage time `t_r = t + d_r Δt` the residual is
///
/// ```text
/// c_r + a_rr m(u, t_r) + Δt b_rr s(u, t_r),
/// ```
///
/// where the contribution `c_r` of the previous stage solutions is computed once by
/// [`prepare_stage`](Self::prepare_stage). Constrained rows are closed with the constraints
/// of the spatial operator.
pub struct OneStepGridOperator<T: Real, S, M> {
    spatial: GridOperator<T, S>,
    temporal: GridOperator<T, M>,
    scheme: OneStepScheme<T>,
    time: T,
    dt: T,
    stage: usize,
    stage_solutions: Vec<DVector<T>>,
    constant: DVector<T>,
}

impl<T, S, M> OneStepGridOperator<T, S, M>
where
    T: Real,
    S: LocalOperator<T>,
    M: LocalOperator<T>,
{
    pub fn new(
        spatial: GridOperator<T, S>,
        temporal: GridOperator<T, M>,
        scheme: OneStepScheme<T>,
    ) -> Result<Self, AssemblyError> {
        if temporal.num_dofs() != spatial.num_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                expected: spatial.num_dofs(),
                actual: temporal.num_dofs(),
            });
        }
        let n = spatial.num_dofs();
        Ok(Self {
            spatial,
            temporal,
            scheme,
            time: T::zero(),
            dt: T::zero(),
            stage: 1,
            stage_solutions: Vec::new(),
            constant: DVector::zeros(n),
        })
    }

    pub fn spatial(&self) -> &GridOperator<T, S> {
        &self.spatial
    }

    pub fn spatial_mut(&mut self) -> &mut GridOperator<T, S> {
        &mut self.spatial
    }

    pub fn temporal(&self) -> &GridOperator<T, M> {
        &self.temporal
    }

    pub fn temporal_mut(&mut self) -> &mut GridOperator<T, M> {
        &mut self.temporal
    }

    pub fn scheme(&self) -> &OneStepScheme<T> {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: OneStepScheme<T>) {
        self.scheme = scheme;
    }

    pub fn num_dofs(&self) -> usize {
        self.spatial.num_dofs()
    }

    /// The current stage (1-based).
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Starts a step from `time` with size `dt` and the old solution `u_old`.
    pub fn start_step(&mut self, time: T, dt: T, u_old: &DVector<T>) {
        self.time = time;
        self.dt = dt;
        self.stage = 1;
        self.stage_solutions.clear();
        self.stage_solutions.push(u_old.clone());
    }

    fn set_time(&mut self, time: T) {
        self.spatial.set_time(time);
        self.temporal.set_time(time);
    }

    /// Time of stage solution `j` in the current step.
    pub fn stage_time(&self, j: usize) -> T {
        self.time + self.scheme.d(j) * self.dt
    }

    /// Computes the contribution of all previous stage solutions to the residual of `stage`.
    ///
    /// Requires the solutions of stages `0, ..., stage - 1` to be available.
    pub fn prepare_stage(&mut self, stage: usize) -> Result<(), AssemblyError> {
        assert!(stage >= 1 && stage <= self.scheme.num_stages(), "Stage out of range");
        assert_eq!(
            self.stage_solutions.len(),
            stage,
            "Solutions of all previous stages must be available"
        );
        self.stage = stage;
        self.constant.fill(T::zero());
        for j in 0..stage {
            let a = self.scheme.a(stage, j);
            let b = self.scheme.b(stage, j);
            if a == T::zero() && b == T::zero() {
                continue;
            }
            self.set_time(self.stage_time(j));
            let u_j = &self.stage_solutions[j];
            if a != T::zero() {
                self.temporal.accumulate_residual(u_j, &mut self.constant, a)?;
            }
            if b != T::zero() {
                self.spatial
                    .accumulate_residual(u_j, &mut self.constant, self.dt * b)?;
            }
        }
        self.set_time(self.stage_time(stage));
        debug!("Prepared stage {} at t = {}", stage, self.stage_time(stage));
        Ok(())
    }

    /// Records the solution of the current stage.
    pub fn push_stage_solution(&mut self, u: DVector<T>) {
        assert_eq!(self.stage_solutions.len(), self.stage, "Stage solution already recorded");
        self.stage_solutions.push(u);
    }

    /// Combines the stage solutions of a completed step with the output weights.
    pub fn combine_stage_solutions(&self, u_new: &mut DVector<T>) {
        assert_eq!(
            self.stage_solutions.len(),
            self.scheme.num_stages() + 1,
            "All stages must be solved"
        );
        u_new.resize_vertically_mut(self.num_dofs(), T::zero());
        u_new.fill(T::zero());
        for (j, u_j) in self.stage_solutions.iter().enumerate() {
            let w = self.scheme.w(j);
            if w != T::zero() {
                u_new.axpy(w, u_j, T::one());
            }
        }
    }
}

impl<T, S, M> NonlinearFunction<T> for OneStepGridOperator<T, S, M>
where
    T: Real,
    S: LocalOperator<T>,
    M: LocalOperator<T>,
{
    type Error = AssemblyError;

    fn dimension(&self) -> usize {
        self.num_dofs()
    }

    fn residual(&mut self, x: &DVector<T>, r: &mut DVector<T>) -> Result<(), Self::Error> {
        if r.len() != self.num_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                expected: self.num_dofs(),
                actual: r.len(),
            });
        }
        let stage = self.stage;
        let a = self.scheme.a(stage, stage);
        let b = self.scheme.b(stage, stage);
        r.copy_from(&self.constant);
        self.temporal.accumulate_residual(x, r, a)?;
        if b != T::zero() {
            self.spatial.accumulate_residual(x, r, self.dt * b)?;
        }
        self.spatial.close_residual(r);
        Ok(())
    }

    fn create_jacobian(&mut self) -> Result<CsrMatrix<T>, Self::Error> {
        self.spatial.create_jacobian()
    }

    fn jacobian(&mut self, x: &DVector<T>, jacobian: &mut CsrMatrix<T>) -> Result<(), Self::Error> {
        let stage = self.stage;
        let a = self.scheme.a(stage, stage);
        let b = self.scheme.b(stage, stage);
        jacobian.values_mut().fill(T::zero());
        self.temporal.accumulate_jacobian(x, jacobian, a)?;
        if b != T::zero() {
            self.spatial.accumulate_jacobian(x, jacobian, self.dt * b)?;
        }
        self.spatial.close_jacobian(jacobian)
    }

    fn constrain_iterate(&mut self, x: &mut DVector<T>) {
        self.spatial.backtransform(x);
    }

    fn constrain_update(&mut self, dx: &mut DVector<T>) {
        self.spatial.constraints().distribute_homogeneous(dx);
    }
}

/// Newton statistics of every stage of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepStatistics<T> {
    pub stages: Vec<NewtonStatistics<T>>,
}

impl<T> StepStatistics<T> {
    pub fn newton_iterations(&self) -> usize {
        self.stages.iter().map(|stats| stats.iterations).sum()
    }

    pub fn linear_iterations(&self) -> usize {
        self.stages.iter().map(|stats| stats.linear_iterations).sum()
    }
}

/// Advances the solution by single steps of a one-step scheme, solving each stage with Newton's
/// method.
pub struct OneStepMethod<T: Real, S, M, L> {
    operator: OneStepGridOperator<T, S, M>,
    newton: NewtonSolver<T, L>,
}

impl<T, S, M, L> OneStepMethod<T, S, M, L>
where
    T: Real,
    S: LocalOperator<T>,
    M: LocalOperator<T>,
    L: LinearSolver<T>,
{
    pub fn new(operator: OneStepGridOperator<T, S, M>, newton: NewtonSolver<T, L>) -> Self {
        Self { operator, newton }
    }

    pub fn operator(&self) -> &OneStepGridOperator<T, S, M> {
        &self.operator
    }

    pub fn operator_mut(&mut self) -> &mut OneStepGridOperator<T, S, M> {
        &mut self.operator
    }

    pub fn newton_mut(&mut self) -> &mut NewtonSolver<T, L> {
        &mut self.newton
    }

    pub fn scheme(&self) -> &OneStepScheme<T> {
        self.operator.scheme()
    }

    /// Computes the solution `u_new` at `time + dt` from the solution `u_old` at `time`.
    ///
    /// Each stage starts Newton's method from the solution of the previous stage.
    pub fn apply(
        &mut self,
        time: T,
        dt: T,
        u_old: &DVector<T>,
        u_new: &mut DVector<T>,
    ) -> Result<StepStatistics<T>, TimeStepFailure<T>> {
        let num_stages = self.operator.scheme().num_stages();
        self.operator.start_step(time, dt, u_old);
        let mut u = u_old.clone();
        let mut stats = StepStatistics {
            stages: Vec::with_capacity(num_stages),
        };

        for stage in 1..=num_stages {
            self.operator
                .prepare_stage(stage)
                .map_err(|source| TimeStepFailure::Assembly { stage, time, source })?;
            let stage_stats = self
                .newton
                .solve(&mut self.operator, &mut u)
                .map_err(|err| match err {
                    NewtonError::Assembly { source, .. } => TimeStepFailure::Assembly { stage, time, source },
                    NewtonError::NotConverged(source) => TimeStepFailure::StageNotConverged {
                        stage,
                        time,
                        dt,
                        source,
                    },
                })?;
            debug!(
                "Stage {} of {} converged in {} Newton iterations",
                stage, num_stages, stage_stats.iterations
            );
            stats.stages.push(stage_stats);
            self.operator.push_stage_solution(u.clone());
        }

        self.operator.combine_stage_solutions(u_new);
        Ok(stats)
    }
}

/// What the [`TimeStepper`] does when Newton's method fails for a stage.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailurePolicy<T> {
    /// Return the failure.
    Abort,
    /// Retry the step with the step size multiplied by `factor`, failing once the step size
    /// drops below `min_dt`.
    ReduceStep { factor: T, min_dt: T },
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStepSettings<T> {
    pub t_start: T,
    pub t_end: T,
    pub dt_start: T,
    pub dt_max: T,
    /// Factor applied to the step size after every successful step.
    pub growth_factor: T,
    pub failure_policy: FailurePolicy<T>,
}

impl<T: Real> TimeStepSettings<T> {
    /// Checks that every step advances the time and that step reductions terminate.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn validate(&self) -> Result<(), TimeStepFailure<T>> {
        let invalid = |reason: &str| {
            Err(TimeStepFailure::InvalidSettings {
                reason: reason.to_string(),
            })
        };
        // Negated comparisons also reject NaN
        if !(self.dt_start > 0.0) {
            return invalid("dt_start must be positive");
        }
        if !(self.dt_max > 0.0) {
            return invalid("dt_max must be positive");
        }
        if !(self.growth_factor >= 1.0) {
            return invalid("growth_factor must be at least 1");
        }
        if let FailurePolicy::ReduceStep { factor, min_dt } = self.failure_policy {
            if !(factor > 0.0 && factor < 1.0) {
                return invalid("the step reduction factor must lie strictly between 0 and 1");
            }
            if !(min_dt > 0.0) {
                return invalid("min_dt must be positive");
            }
        }
        Ok(())
    }
}

impl<T: Real> Default for TimeStepSettings<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 1.0,
            dt_start: 0.1,
            dt_max: 0.1,
            growth_factor: 1.1,
            failure_policy: FailurePolicy::ReduceStep {
                factor: 0.5,
                min_dt: 1e-8,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics<T> {
    pub steps: usize,
    pub rejected_steps: usize,
    pub newton_iterations: usize,
    pub final_time: T,
    /// Size of the last successful step.
    pub last_dt: T,
}

/// Drives a [`OneStepMethod`] from `t_start` to `t_end`.
pub struct TimeStepper<T: Real, S, M, L> {
    method: OneStepMethod<T, S, M, L>,
}

impl<T, S, M, L> TimeStepper<T, S, M, L>
where
    T: Real,
    S: LocalOperator<T>,
    M: LocalOperator<T>,
    L: LinearSolver<T>,
{
    pub fn new(method: OneStepMethod<T, S, M, L>) -> Self {
        Self { method }
    }

    pub fn method(&self) -> &OneStepMethod<T, S, M, L> {
        &self.method
    }

    pub fn method_mut(&mut self) -> &mut OneStepMethod<T, S, M, L> {
        &mut self.method
    }

    /// Integrates `u` in place over `[t_start, t_end]`.
    ///
    /// The observer is called with the time and the solution after every accepted step. After a
    /// successful step the step size grows by `growth_factor` up to `dt_max`, and the last step
    /// is shortened to end exactly at `t_end`.
    ///
    /// Settings rejected by [`TimeStepSettings::validate`] fail with
    /// [`TimeStepFailure::InvalidSettings`] before any step is taken.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn run(
        &mut self,
        u: &mut DVector<T>,
        settings: &TimeStepSettings<T>,
        mut observer: impl FnMut(T, &DVector<T>),
    ) -> Result<RunStatistics<T>, TimeStepFailure<T>> {
        settings.validate()?;
        let tolerance = 1e-12 * T::max((settings.t_end - settings.t_start).abs(), 1.0);
        let mut time = settings.t_start;
        let mut dt = settings.dt_start.min(settings.dt_max);
        let mut u_new = DVector::zeros(u.len());
        let mut stats = RunStatistics {
            steps: 0,
            rejected_steps: 0,
            newton_iterations: 0,
            final_time: time,
            last_dt: T::zero(),
        };

        while settings.t_end - time > tolerance {
            let remaining = settings.t_end - time;
            let last_step = dt >= remaining - tolerance;
            let step = if last_step { remaining } else { dt };

            match self.method.apply(time, step, u, &mut u_new) {
                Ok(step_stats) => {
                    time = if last_step { settings.t_end } else { time + step };
                    u.copy_from(&u_new);
                    stats.steps += 1;
                    stats.newton_iterations += step_stats.newton_iterations();
                    stats.last_dt = step;
                    info!(
                        "{} step {} to t = {} (dt = {}) took {} Newton iterations",
                        self.method.scheme().name(),
                        stats.steps,
                        time,
                        step,
                        step_stats.newton_iterations()
                    );
                    observer(time, u);
                    dt = T::min(dt * settings.growth_factor, settings.dt_max);
                }
                Err(err @ TimeStepFailure::StageNotConverged { .. }) => match settings.failure_policy {
                    FailurePolicy::Abort => return Err(err),
                    FailurePolicy::ReduceStep { factor, min_dt } => {
                        let reduced = step * factor;
                        stats.rejected_steps += 1;
                        if reduced < min_dt {
                            warn!("{} Step size {} would drop below {}, giving up", err, reduced, min_dt);
                            return Err(TimeStepFailure::StepSizeTooSmall { time, dt: reduced });
                        }
                        warn!("{} Retrying with dt = {}", err, reduced);
                        dt = reduced;
                    }
                },
                Err(err) => return Err(err),
            }
        }

        stats.final_time = time;
        Ok(stats)
    }
}
