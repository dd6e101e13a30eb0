//! Preconditioned BiCGStab for general (non-symmetric) systems.
use crate::cg::LinearOperator;
use core::fmt;
use gridfem_traits::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;

#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct BiCgStabWorkspace<T: Real> {
    r: DVector<T>,
    r_hat: DVector<T>,
    p: DVector<T>,
    p_hat: DVector<T>,
    v: DVector<T>,
    s: DVector<T>,
    s_hat: DVector<T>,
    t: DVector<T>,
}

impl<T: Real> Default for BiCgStabWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            r_hat: DVector::zeros(0),
            p: DVector::zeros(0),
            p_hat: DVector::zeros(0),
            v: DVector::zeros(0),
            s: DVector::zeros(0),
            s_hat: DVector::zeros(0),
            t: DVector::zeros(0),
        }
    }
}

impl<T: Real> BiCgStabWorkspace<T> {
    fn resize(&mut self, dim: usize) {
        for buffer in [
            &mut self.r,
            &mut self.r_hat,
            &mut self.p,
            &mut self.p_hat,
            &mut self.v,
            &mut self.s,
            &mut self.s_hat,
            &mut self.t,
        ] {
            buffer.resize_vertically_mut(dim, T::zero());
            buffer.fill(T::zero());
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum BiCgStabErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    /// A scalar of the recurrence vanished.
    Breakdown { quantity: &'static str },
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for BiCgStabErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {}", err),
            Self::Breakdown { quantity } => write!(f, "Breakdown: {} vanished", quantity),
            Self::MaxIterationsReached { max_iter } => write!(f, "Max iterations ({}) reached.", max_iter),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BiCgStabOutput<T> {
    pub num_iterations: usize,
    pub initial_residual_norm: T,
    pub residual_norm: T,
}

#[derive(Debug)]
pub struct BiCgStabError<T> {
    pub output: BiCgStabOutput<T>,
    pub kind: BiCgStabErrorKind,
}

impl<T> fmt::Display for BiCgStabError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BiCGStab failed after {} iterations. Error: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl<T: fmt::Debug> Error for BiCgStabError<T> {}

/// BiCGStab with right preconditioning.
///
/// Convergence is declared once the residual norm has been reduced by `reduction` relative to
/// the initial residual.
#[derive(Debug)]
pub struct BiCgStab<'a, T: Real, A, P> {
    operator: A,
    preconditioner: P,
    max_iter: usize,
    reduction: T,
    workspace: &'a mut BiCgStabWorkspace<T>,
}

impl<'a, T: Real, A, P> BiCgStab<'a, T, A, P>
where
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    pub fn new(workspace: &'a mut BiCgStabWorkspace<T>, operator: A, preconditioner: P) -> Self {
        Self {
            operator,
            preconditioner,
            max_iter: 1000,
            reduction: T::default_epsilon().sqrt(),
            workspace,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_reduction(self, reduction: T) -> Self {
        Self { reduction, ..self }
    }

    #[allow(non_snake_case)]
    pub fn solve_with_guess(
        &mut self,
        b: &DVector<T>,
        x: &mut DVector<T>,
    ) -> Result<BiCgStabOutput<T>, BiCgStabError<T>> {
        use BiCgStabErrorKind::*;
        assert_eq!(b.len(), x.len());

        let ws = &mut *self.workspace;
        ws.resize(x.len());

        let mut output = BiCgStabOutput {
            num_iterations: 0,
            initial_residual_norm: T::zero(),
            residual_norm: T::zero(),
        };

        macro_rules! apply {
            ($op:expr, $y:expr, $x:expr, $kind:ident) => {
                if let Err(err) = $op.apply(DVectorViewMut::from(&mut $y), DVectorView::from(&$x)) {
                    return Err(BiCgStabError {
                        output,
                        kind: $kind(err),
                    });
                }
            };
        }

        // r = b - A x
        apply!(self.operator, ws.r, *x, OperatorError);
        ws.r.zip_apply(b, |Ax_i, b_i| *Ax_i = b_i - *Ax_i);
        ws.r_hat.copy_from(&ws.r);

        let r0_norm = ws.r.norm();
        output.initial_residual_norm = r0_norm;
        output.residual_norm = r0_norm;
        if r0_norm == T::zero() {
            return Ok(output);
        }
        let target = self.reduction * r0_norm;

        let mut rho = T::one();
        let mut alpha = T::one();
        let mut omega = T::one();

        while output.residual_norm > target {
            if output.num_iterations >= self.max_iter {
                return Err(BiCgStabError {
                    output,
                    kind: MaxIterationsReached { max_iter: self.max_iter },
                });
            }

            let rho_next = ws.r_hat.dot(&ws.r);
            if rho_next == T::zero() {
                return Err(BiCgStabError {
                    output,
                    kind: Breakdown { quantity: "rho" },
                });
            }

            // p = r + beta (p - omega v)
            let beta = (rho_next / rho) * (alpha / omega);
            ws.p.axpy(-omega, &ws.v, T::one());
            ws.p.axpy(T::one(), &ws.r, beta);

            apply!(self.preconditioner, ws.p_hat, ws.p, PreconditionerError);
            apply!(self.operator, ws.v, ws.p_hat, OperatorError);

            let r_hat_v = ws.r_hat.dot(&ws.v);
            if r_hat_v == T::zero() {
                return Err(BiCgStabError {
                    output,
                    kind: Breakdown { quantity: "r_hat . v" },
                });
            }
            alpha = rho_next / r_hat_v;

            // s = r - alpha v
            ws.s.copy_from(&ws.r);
            ws.s.axpy(-alpha, &ws.v, T::one());
            output.num_iterations += 1;

            let s_norm = ws.s.norm();
            if s_norm <= target {
                x.axpy(alpha, &ws.p_hat, T::one());
                ws.r.copy_from(&ws.s);
                output.residual_norm = s_norm;
                break;
            }

            apply!(self.preconditioner, ws.s_hat, ws.s, PreconditionerError);
            apply!(self.operator, ws.t, ws.s_hat, OperatorError);

            let t_t = ws.t.dot(&ws.t);
            if t_t == T::zero() {
                return Err(BiCgStabError {
                    output,
                    kind: Breakdown { quantity: "t . t" },
                });
            }
            omega = ws.t.dot(&ws.s) / t_t;

            x.axpy(alpha, &ws.p_hat, T::one());
            x.axpy(omega, &ws.s_hat, T::one());

            // r = s - omega t
            ws.r.copy_from(&ws.s);
            ws.r.axpy(-omega, &ws.t, T::one());
            output.residual_norm = ws.r.norm();

            if omega == T::zero() && output.residual_norm > target {
                return Err(BiCgStabError {
                    output,
                    kind: Breakdown { quantity: "omega" },
                });
            }
            rho = rho_next;
        }

        Ok(output)
    }
}
