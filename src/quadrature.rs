//! Quadrature rules on the reference cells.
//!
//! All rules integrate over the reference domains used by [`crate::element`]: the unit interval
//! `[0, 1]` for edges, the unit square `[0, 1]^2` and the triangle with vertices `(0, 0)`,
//! `(1, 0)`, `(0, 1)`.
use crate::mesh::CellType;
use crate::Real;
use nalgebra::{convert, Point2};
use std::f64::consts::PI;

/// A quadrature rule for a 2D reference cell.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule<T: Real> {
    pub weights: Vec<T>,
    pub points: Vec<Point2<T>>,
}

impl<T: Real> QuadratureRule<T> {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Approximates the integral of `f` over the reference cell.
    pub fn integrate(&self, mut f: impl FnMut(&Point2<T>) -> T) -> T {
        self.weights
            .iter()
            .zip(&self.points)
            .fold(T::zero(), |acc, (&w, xi)| acc + w * f(xi))
    }
}

/// Gauss–Legendre nodes and weights on `[-1, 1]`, in increasing order.
fn gauss_legendre_f64(num_points: usize) -> (Vec<f64>, Vec<f64>) {
    let n = num_points;
    let mut points = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..(n + 1) / 2 {
        // Initial guess from the asymptotic distribution of the roots of P_n
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            // Evaluate P_n(x) and P_{n-1}(x) by the three-term recurrence
            let (mut p0, mut p1) = (1.0, x);
            for k in 2..=n {
                let p2 = ((2 * k - 1) as f64 * x * p1 - (k - 1) as f64 * p0) / k as f64;
                p0 = p1;
                p1 = p2;
            }
            let (p_n, p_prev) = if n == 1 { (x, 1.0) } else { (p1, p0) };
            dp = n as f64 * (x * p_n - p_prev) / (x * x - 1.0);
            let dx = p_n / dp;
            x -= dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        points[i] = -x;
        points[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    (weights, points)
}

/// Gauss–Legendre rule with `num_points` points on `[0, 1]` as `(weights, points)`.
///
/// Integrates polynomials of degree `2 * num_points - 1` exactly.
pub fn gauss<T: Real>(num_points: usize) -> (Vec<T>, Vec<T>) {
    assert!(num_points > 0, "Gauss rule needs at least one point");
    let (weights, points) = gauss_legendre_f64(num_points);
    let weights = weights.into_iter().map(|w| convert(0.5 * w)).collect();
    let points = points.into_iter().map(|x| convert(0.5 * (x + 1.0))).collect();
    (weights, points)
}

fn points_for_order(order: usize) -> usize {
    order / 2 + 1
}

/// Edge rule on `[0, 1]` exact for polynomials of the given order.
pub fn edge_quadrature<T: Real>(order: usize) -> (Vec<T>, Vec<T>) {
    gauss(points_for_order(order))
}

/// Tensor-product Gauss rule on the unit square.
pub fn quadrilateral_quadrature<T: Real>(order: usize) -> QuadratureRule<T> {
    let (w1d, x1d) = gauss::<T>(points_for_order(order));
    let mut weights = Vec::with_capacity(w1d.len() * w1d.len());
    let mut points = Vec::with_capacity(w1d.len() * w1d.len());
    for (&w_j, &y) in w1d.iter().zip(&x1d) {
        for (&w_i, &x) in w1d.iter().zip(&x1d) {
            weights.push(w_i * w_j);
            points.push(Point2::new(x, y));
        }
    }
    QuadratureRule { weights, points }
}

/// Collapsed (Duffy) Gauss rule on the reference triangle.
///
/// The square `[0, 1]^2` is mapped onto the triangle by `(u, v) -> (u, v (1 - u))`, whose
/// Jacobian determinant `1 - u` raises the polynomial degree in `u` by one.
pub fn triangle_quadrature<T: Real>(order: usize) -> QuadratureRule<T> {
    let (w1d, x1d) = gauss::<T>(points_for_order(order + 1));
    let mut weights = Vec::with_capacity(w1d.len() * w1d.len());
    let mut points = Vec::with_capacity(w1d.len() * w1d.len());
    for (&w_u, &u) in w1d.iter().zip(&x1d) {
        for (&w_v, &v) in w1d.iter().zip(&x1d) {
            let one_minus_u = T::one() - u;
            weights.push(w_u * w_v * one_minus_u);
            points.push(Point2::new(u, v * one_minus_u));
        }
    }
    QuadratureRule { weights, points }
}

/// Selects a rule for the reference cell of `cell_type` that is exact for polynomials of the
/// given total order (tensor order on quadrilaterals).
pub fn quadrature_for<T: Real>(cell_type: CellType, order: usize) -> QuadratureRule<T> {
    match cell_type {
        CellType::Triangle => triangle_quadrature(order),
        CellType::Quadrilateral => quadrilateral_quadrature(order),
    }
}
