use crate::timestepping::TimeStepFailure;
use crate::Real;
use nalgebra::{DMatrix, DVector};
use numeric_literals::replace_float_literals;

/// A one-step method in the (A, B, d) form.
///
/// Stage `r = 1, ..., s` solves
///
/// ```text
/// Σ_{j=0}^{r} a_rj m(u_j, t + d_j Δt) + Δt b_rj s(u_j, t + d_j Δt) = 0
/// ```
///
/// for `u_r`, where `u_0` is the old solution, `m` the temporal and `s` the spatial operator.
/// Row `r - 1` of `A` and `B` holds the coefficients of stage `r`. The new solution is
/// `Σ_j w_j u_j`.
#[derive(Debug, Clone, PartialEq)]
pub struct OneStepScheme<T: Real> {
    name: String,
    order: usize,
    a: DMatrix<T>,
    b: DMatrix<T>,
    d: DVector<T>,
    w: DVector<T>,
}

impl<T: Real> OneStepScheme<T> {
    /// Creates a scheme from its coefficients, validating their shape and structure.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn new(
        name: impl Into<String>,
        order: usize,
        a: DMatrix<T>,
        b: DMatrix<T>,
        d: DVector<T>,
        w: DVector<T>,
    ) -> Result<Self, TimeStepFailure<T>> {
        let invalid = |reason: String| Err(TimeStepFailure::InvalidScheme { reason });
        let s = a.nrows();
        if s == 0 {
            return invalid("scheme has no stages".to_string());
        }
        if a.shape() != (s, s + 1) || b.shape() != (s, s + 1) {
            return invalid(format!(
                "A and B must be {}x{} matrices, got {:?} and {:?}",
                s,
                s + 1,
                a.shape(),
                b.shape()
            ));
        }
        if d.len() != s + 1 || w.len() != s + 1 {
            return invalid(format!(
                "d and w must have length {}, got {} and {}",
                s + 1,
                d.len(),
                w.len()
            ));
        }
        for r in 1..=s {
            for j in r + 1..=s {
                if a[(r - 1, j)] != T::zero() || b[(r - 1, j)] != T::zero() {
                    return invalid(format!("stage {} couples to the later stage {}", r, j));
                }
            }
            if a[(r - 1, r)] == T::zero() {
                return invalid(format!("stage {} has a vanishing temporal coefficient", r));
            }
        }
        if (w.sum() - 1.0).abs() > 1e-12 {
            return invalid(format!("output weights sum to {} instead of 1", w.sum()));
        }

        Ok(Self {
            name: name.into(),
            order,
            a,
            b,
            d,
            w,
        })
    }

    fn builtin(name: &str, order: usize, a: DMatrix<T>, b: DMatrix<T>, d: DVector<T>) -> Self {
        let mut w = DVector::zeros(d.len());
        w[d.len() - 1] = T::one();
        Self::new(name, order, a, b, d, w).expect("Built-in schemes are valid")
    }

    /// Implicit (backward) Euler, order 1.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn implicit_euler() -> Self {
        Self::builtin(
            "implicit Euler",
            1,
            DMatrix::from_row_slice(1, 2, &[-1.0, 1.0]),
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            DVector::from_column_slice(&[0.0, 1.0]),
        )
    }

    /// Explicit (forward) Euler, order 1. Each step solves a mass system.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn explicit_euler() -> Self {
        Self::builtin(
            "explicit Euler",
            1,
            DMatrix::from_row_slice(1, 2, &[-1.0, 1.0]),
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DVector::from_column_slice(&[0.0, 1.0]),
        )
    }

    /// The one-step θ method. Second order for `θ = 1/2`, first order otherwise.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn one_step_theta(theta: T) -> Self {
        let order = if theta == 0.5 { 2 } else { 1 };
        Self::builtin(
            "one-step theta",
            order,
            DMatrix::from_row_slice(1, 2, &[-1.0, 1.0]),
            DMatrix::from_row_slice(1, 2, &[1.0 - theta, theta]),
            DVector::from_column_slice(&[0.0, 1.0]),
        )
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn crank_nicolson() -> Self {
        Self {
            name: "Crank-Nicolson".to_string(),
            ..Self::one_step_theta(0.5)
        }
    }

    /// Alexander's strongly S-stable two-stage DIRK scheme of order 2.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn alexander2() -> Self {
        let alpha = 1.0 - T::sqrt(2.0) / 2.0;
        Self::builtin(
            "Alexander (2 stages)",
            2,
            DMatrix::from_row_slice(2, 3, &[-1.0, 1.0, 0.0, -1.0, 0.0, 1.0]),
            DMatrix::from_row_slice(2, 3, &[0.0, alpha, 0.0, 0.0, 1.0 - alpha, alpha]),
            DVector::from_column_slice(&[0.0, alpha, 1.0]),
        )
    }

    /// Alexander's strongly S-stable three-stage DIRK scheme of order 3.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn alexander3() -> Self {
        let alpha = 0.435866521508459;
        let tau2 = (1.0 + alpha) / 2.0;
        let b1 = -(6.0 * alpha * alpha - 16.0 * alpha + 1.0) / 4.0;
        let b2 = (6.0 * alpha * alpha - 20.0 * alpha + 5.0) / 4.0;
        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(3, 4, &[
            -1.0, 1.0, 0.0, 0.0,
            -1.0, 0.0, 1.0, 0.0,
            -1.0, 0.0, 0.0, 1.0,
        ]);
        #[rustfmt::skip]
        let b = DMatrix::from_row_slice(3, 4, &[
            0.0, alpha, 0.0, 0.0,
            0.0, tau2 - alpha, alpha, 0.0,
            0.0, b1, b2, alpha,
        ]);
        Self::builtin(
            "Alexander (3 stages)",
            3,
            a,
            b,
            DVector::from_column_slice(&[0.0, alpha, tau2, 1.0]),
        )
    }

    /// The fractional-step θ scheme, three chained θ-like substeps of order 2.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn fractional_step_theta() -> Self {
        let theta = 1.0 - T::sqrt(2.0) / 2.0;
        let theta_prime = 1.0 - 2.0 * theta;
        let alpha = theta_prime / (1.0 - theta);
        let beta = 1.0 - alpha;
        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(3, 4, &[
            -1.0, 1.0, 0.0, 0.0,
            0.0, -1.0, 1.0, 0.0,
            0.0, 0.0, -1.0, 1.0,
        ]);
        #[rustfmt::skip]
        let b = DMatrix::from_row_slice(3, 4, &[
            theta * beta, theta * alpha, 0.0, 0.0,
            0.0, theta_prime * alpha, theta_prime * beta, 0.0,
            0.0, 0.0, theta * beta, theta * alpha,
        ]);
        Self::builtin(
            "fractional-step theta",
            2,
            a,
            b,
            DVector::from_column_slice(&[0.0, theta, 1.0 - theta, 1.0]),
        )
    }

    /// Converts the Butcher tableau `(A, b, c)` of a diagonally implicit Runge-Kutta method.
    ///
    /// Stage `i` of the tableau becomes stage `i + 1` of the scheme. If the tableau is not
    /// stiffly accurate (the last row of `A` differs from `b`, or `c_s ≠ 1`), an explicit
    /// completion stage evaluating `u_0 + Δt Σ b_j k_j` is appended.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn from_butcher_tableau(
        name: impl Into<String>,
        order: usize,
        a: &DMatrix<T>,
        b: &DVector<T>,
        c: &DVector<T>,
    ) -> Result<Self, TimeStepFailure<T>> {
        let s = a.nrows();
        if !a.is_square() || b.len() != s || c.len() != s || s == 0 {
            return Err(TimeStepFailure::InvalidScheme {
                reason: format!(
                    "Butcher tableau has A of shape {:?}, b of length {} and c of length {}",
                    a.shape(),
                    b.len(),
                    c.len()
                ),
            });
        }
        let stiffly_accurate = c[s - 1] == 1.0 && a.row(s - 1).transpose() == *b;
        let stages = if stiffly_accurate { s } else { s + 1 };

        let mut scheme_a = DMatrix::zeros(stages, stages + 1);
        let mut scheme_b = DMatrix::zeros(stages, stages + 1);
        let mut d = DVector::zeros(stages + 1);
        for i in 0..s {
            scheme_a[(i, 0)] = -1.0;
            scheme_a[(i, i + 1)] = 1.0;
            for j in 0..s {
                scheme_b[(i, j + 1)] = a[(i, j)];
            }
            d[i + 1] = c[i];
        }
        if !stiffly_accurate {
            scheme_a[(s, 0)] = -1.0;
            scheme_a[(s, s + 1)] = 1.0;
            for j in 0..s {
                scheme_b[(s, j + 1)] = b[j];
            }
            d[s + 1] = 1.0;
        }
        let mut w = DVector::zeros(stages + 1);
        w[stages] = 1.0;
        Self::new(name, order, scheme_a, scheme_b, d, w)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_stages(&self) -> usize {
        self.a.nrows()
    }

    /// Temporal coefficient `a_rj` of stage `r` (1-based) for stage solution `j`.
    pub fn a(&self, r: usize, j: usize) -> T {
        self.a[(r - 1, j)]
    }

    /// Spatial coefficient `b_rj` of stage `r` (1-based) for stage solution `j`.
    pub fn b(&self, r: usize, j: usize) -> T {
        self.b[(r - 1, j)]
    }

    /// Relative time `d_j` of stage solution `j`.
    pub fn d(&self, j: usize) -> T {
        self.d[j]
    }

    /// Output weight `w_j` of stage solution `j`.
    pub fn w(&self, j: usize) -> T {
        self.w[j]
    }
}
