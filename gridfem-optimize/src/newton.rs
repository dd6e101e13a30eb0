use gridfem_sparse::{LinearSolveError, LinearSolver};
use gridfem_traits::Real;
use log::{debug, info, warn};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// A nonlinear system `F(x) = 0` with a sparse Jacobian.
///
/// Constrained systems restrict iterates and updates to the constrained manifold through
/// [`constrain_iterate`](Self::constrain_iterate) and [`constrain_update`](Self::constrain_update).
pub trait NonlinearFunction<T: Real> {
    type Error: Error + 'static;

    fn dimension(&self) -> usize;

    /// Evaluates `r = F(x)`, overwriting `r`.
    fn residual(&mut self, x: &DVector<T>, r: &mut DVector<T>) -> Result<(), Self::Error>;

    /// Creates a zero matrix with the sparsity pattern of the Jacobian.
    fn create_jacobian(&mut self) -> Result<CsrMatrix<T>, Self::Error>;

    /// Evaluates the Jacobian at `x` into a matrix created by [`create_jacobian`](Self::create_jacobian).
    fn jacobian(&mut self, x: &DVector<T>, jacobian: &mut CsrMatrix<T>) -> Result<(), Self::Error>;

    /// Projects an iterate onto the set of admissible iterates.
    fn constrain_iterate(&mut self, _x: &mut DVector<T>) {}

    /// Projects an update onto the set of admissible updates.
    fn constrain_update(&mut self, _dx: &mut DVector<T>) {}
}

impl<'a, T: Real, F: ?Sized + NonlinearFunction<T>> NonlinearFunction<T> for &'a mut F {
    type Error = F::Error;

    fn dimension(&self) -> usize {
        F::dimension(self)
    }

    fn residual(&mut self, x: &DVector<T>, r: &mut DVector<T>) -> Result<(), Self::Error> {
        F::residual(self, x, r)
    }

    fn create_jacobian(&mut self) -> Result<CsrMatrix<T>, Self::Error> {
        F::create_jacobian(self)
    }

    fn jacobian(&mut self, x: &DVector<T>, jacobian: &mut CsrMatrix<T>) -> Result<(), Self::Error> {
        F::jacobian(self, x, jacobian)
    }

    fn constrain_iterate(&mut self, x: &mut DVector<T>) {
        F::constrain_iterate(self, x)
    }

    fn constrain_update(&mut self, dx: &mut DVector<T>) {
        F::constrain_update(self, dx)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSearchStrategy {
    /// Always take the full Newton step.
    NoLineSearch,
    /// Halve the step until the residual norm strictly decreases.
    Halving,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings<T> {
    /// Converged once `|F(x)| < reduction * |F(x_0)|`.
    pub reduction: T,
    /// Converged once `|F(x)| <= abs_limit`.
    pub abs_limit: T,
    /// Upper bound on the defect reduction requested from the linear solver.
    pub min_linear_reduction: T,
    /// Always request `min_linear_reduction` instead of adapting it to the convergence rate.
    pub fixed_linear_reduction: bool,
    pub max_iterations: usize,
    /// Maximum number of step halvings.
    pub line_search_max_iterations: usize,
    pub line_search: LineSearchStrategy,
    /// The Jacobian is reassembled whenever the last step reduced the residual by less than
    /// this factor. Zero reassembles in every iteration.
    pub reassemble_threshold: T,
}

impl<T: Real> Default for NewtonSettings<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            reduction: 1e-10,
            abs_limit: 1e-12,
            min_linear_reduction: 1e-4,
            fixed_linear_reduction: false,
            max_iterations: 25,
            line_search_max_iterations: 10,
            line_search: LineSearchStrategy::Halving,
            reassemble_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewtonStatistics<T> {
    pub iterations: usize,
    pub first_residual_norm: T,
    pub residual_norm: T,
    /// Residual norm of every accepted iterate, starting with the initial guess.
    pub residual_history: Vec<T>,
    pub jacobian_assemblies: usize,
    pub linear_iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DivergenceReason<T> {
    MaxIterations,
    LineSearch,
    LinearSolve(LinearSolveError<T>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NonlinearSolveError<T> {
    pub reason: DivergenceReason<T>,
    pub iterations: usize,
    pub residual_norm: T,
}

impl<T: Display> Display for NonlinearSolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            DivergenceReason::MaxIterations => write!(
                f,
                "Failed to converge within maximum number of iterations ({}). Residual norm: {}",
                self.iterations, self.residual_norm
            ),
            DivergenceReason::LineSearch => write!(
                f,
                "Line search failed to reduce the residual in iteration {}. Residual norm: {}",
                self.iterations, self.residual_norm
            ),
            DivergenceReason::LinearSolve(err) => write!(
                f,
                "Failed to solve Jacobian system in iteration {}. Error: {}",
                self.iterations, err
            ),
        }
    }
}

impl<T: fmt::Debug + Display + 'static> Error for NonlinearSolveError<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.reason {
            DivergenceReason::LinearSolve(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum NewtonError<T, E> {
    /// Evaluating the residual or the Jacobian failed.
    Assembly { iteration: usize, source: E },
    NotConverged(NonlinearSolveError<T>),
}

impl<T: Display, E: Display> Display for NewtonError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NewtonError::Assembly { iteration, source } => {
                write!(f, "Assembly failed in Newton iteration {}. Error: {}", iteration, source)
            }
            NewtonError::NotConverged(err) => write!(f, "{}", err),
        }
    }
}

impl<T, E> Error for NewtonError<T, E>
where
    T: fmt::Debug + Display + 'static,
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NewtonError::Assembly { source, .. } => Some(source),
            NewtonError::NotConverged(err) => Some(err),
        }
    }
}

/// Damped Newton method with a pluggable linear solver.
#[derive(Debug, Clone)]
pub struct NewtonSolver<T, L> {
    settings: NewtonSettings<T>,
    linear_solver: L,
}

impl<T, L> NewtonSolver<T, L>
where
    T: Real,
    L: LinearSolver<T>,
{
    pub fn new(linear_solver: L) -> Self {
        Self {
            settings: NewtonSettings::default(),
            linear_solver,
        }
    }

    pub fn with_settings(self, settings: NewtonSettings<T>) -> Self {
        Self { settings, ..self }
    }

    pub fn settings(&self) -> &NewtonSettings<T> {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut NewtonSettings<T> {
        &mut self.settings
    }

    pub fn linear_solver_mut(&mut self) -> &mut L {
        &mut self.linear_solver
    }

    /// Solves `F(x) = 0`, starting from and updating `x` in place.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn solve<F>(&mut self, function: &mut F, x: &mut DVector<T>) -> Result<NewtonStatistics<T>, NewtonError<T, F::Error>>
    where
        F: NonlinearFunction<T>,
    {
        let settings = self.settings;
        let n = function.dimension();
        assert_eq!(x.len(), n, "Initial guess must have the dimension of the system");

        function.constrain_iterate(x);
        let mut r = DVector::zeros(n);
        function
            .residual(x, &mut r)
            .map_err(|source| NewtonError::Assembly { iteration: 0, source })?;

        let first_residual_norm = r.norm();
        let mut stats = NewtonStatistics {
            iterations: 0,
            first_residual_norm,
            residual_norm: first_residual_norm,
            residual_history: vec![first_residual_norm],
            jacobian_assemblies: 0,
            linear_iterations: 0,
        };
        debug!("Newton initial residual norm: {}", first_residual_norm);

        let not_converged = |reason, stats: &NewtonStatistics<T>| {
            NewtonError::NotConverged(NonlinearSolveError {
                reason,
                iterations: stats.iterations,
                residual_norm: stats.residual_norm,
            })
        };

        let mut jacobian: Option<CsrMatrix<T>> = None;
        // Whether the Jacobian was assembled at the current iterate
        let mut jacobian_is_current = false;
        // |F(x_k)| / |F(x_{k-1})| of the last accepted step
        let mut last_ratio: Option<T> = None;

        let mut rhs = DVector::zeros(n);
        let mut dx = DVector::zeros(n);
        let mut x_trial = DVector::zeros(n);
        let mut r_trial = DVector::zeros(n);

        loop {
            let norm = stats.residual_norm;
            if norm <= settings.abs_limit || norm < settings.reduction * first_residual_norm {
                info!(
                    "Newton converged in {} iterations (residual norm {} -> {})",
                    stats.iterations, first_residual_norm, norm
                );
                return Ok(stats);
            }
            if stats.iterations >= settings.max_iterations {
                return Err(not_converged(DivergenceReason::MaxIterations, &stats));
            }

            let iteration = stats.iterations;
            let assembly_error = |source| NewtonError::Assembly { iteration, source };
            let mut reassemble = jacobian.is_none()
                || last_ratio
                    .map(|ratio| ratio > settings.reassemble_threshold)
                    .unwrap_or(true);

            loop {
                let jac = match &mut jacobian {
                    Some(jac) => jac,
                    slot @ None => slot.insert(function.create_jacobian().map_err(assembly_error)?),
                };
                if reassemble {
                    function.jacobian(x, jac).map_err(assembly_error)?;
                    jacobian_is_current = true;
                    stats.jacobian_assemblies += 1;
                }

                let linear_reduction = if settings.fixed_linear_reduction {
                    settings.min_linear_reduction
                } else {
                    let ratio = last_ratio.unwrap_or(1.0);
                    let adaptive = settings.min_linear_reduction.min(ratio * ratio);
                    adaptive.max(0.5 * settings.abs_limit / norm)
                };

                // J dx = -F(x)
                rhs.copy_from(&r);
                rhs.neg_mut();
                dx.fill(T::zero());
                match self.linear_solver.solve(jac, &mut dx, &rhs, linear_reduction) {
                    Ok(linear_stats) => stats.linear_iterations += linear_stats.iterations,
                    Err(err) => return Err(not_converged(DivergenceReason::LinearSolve(err), &stats)),
                }
                function.constrain_update(&mut dx);

                let accepted_norm = match settings.line_search {
                    LineSearchStrategy::NoLineSearch => {
                        x_trial.copy_from(x);
                        x_trial.axpy(T::one(), &dx, T::one());
                        function
                            .residual(&x_trial, &mut r_trial)
                            .map_err(assembly_error)?;
                        Some(r_trial.norm())
                    }
                    LineSearchStrategy::Halving => {
                        let mut lambda = T::one();
                        let mut accepted = None;
                        for _ in 0..=settings.line_search_max_iterations {
                            x_trial.copy_from(x);
                            x_trial.axpy(lambda, &dx, T::one());
                            function
                                .residual(&x_trial, &mut r_trial)
                                .map_err(assembly_error)?;
                            let trial_norm = r_trial.norm();
                            if trial_norm < norm {
                                debug!("Newton step length at iter {}: {}", iteration, lambda);
                                accepted = Some(trial_norm);
                                break;
                            }
                            lambda *= 0.5;
                        }
                        accepted
                    }
                };

                match accepted_norm {
                    Some(new_norm) => {
                        x.copy_from(&x_trial);
                        r.copy_from(&r_trial);
                        jacobian_is_current = false;
                        last_ratio = Some(new_norm / norm);
                        stats.iterations += 1;
                        stats.residual_norm = new_norm;
                        stats.residual_history.push(new_norm);
                        debug!(
                            "Newton iteration {}: residual norm {} (linear reduction {})",
                            stats.iterations, new_norm, linear_reduction
                        );
                        break;
                    }
                    None if !jacobian_is_current => {
                        warn!(
                            "Line search failed with a stale Jacobian in Newton iteration {}, reassembling",
                            iteration
                        );
                        reassemble = true;
                    }
                    None => return Err(not_converged(DivergenceReason::LineSearch, &stats)),
                }
            }
        }
    }
}
