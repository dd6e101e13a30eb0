use gridfem::mesh::CellType;
use gridfem::quadrature::{edge_quadrature, gauss, quadrature_for, quadrilateral_quadrature, triangle_quadrature};
use matrixcompare::assert_scalar_eq;

/// Integral of `x^a y^b` over the reference triangle: `a! b! / (a + b + 2)!`.
fn triangle_monomial_integral(a: i32, b: i32) -> f64 {
    let factorial = |n: i32| (1..=n).map(f64::from).product::<f64>();
    factorial(a) * factorial(b) / factorial(a + b + 2)
}

#[test]
fn gauss_weights_sum_to_interval_length() {
    for n in 1..8 {
        let (weights, points) = gauss::<f64>(n);
        assert_eq!(weights.len(), n);
        assert_scalar_eq!(weights.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
        assert!(points.iter().all(|&x| x > 0.0 && x < 1.0));
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn edge_quadrature_integrates_polynomials_exactly() {
    for order in 0..10 {
        let (weights, points) = edge_quadrature::<f64>(order);
        for degree in 0..=order {
            let integral: f64 = weights
                .iter()
                .zip(&points)
                .map(|(w, x)| w * x.powi(degree as i32))
                .sum();
            assert_scalar_eq!(integral, 1.0 / (degree as f64 + 1.0), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn quadrilateral_quadrature_integrates_tensor_polynomials_exactly() {
    for order in 0..8 {
        let rule = quadrilateral_quadrature::<f64>(order);
        for a in 0..=order as i32 {
            for b in 0..=order as i32 {
                let integral = rule.integrate(|xi| xi.x.powi(a) * xi.y.powi(b));
                let expected = 1.0 / ((a + 1) * (b + 1)) as f64;
                assert_scalar_eq!(integral, expected, comp = abs, tol = 1e-13);
            }
        }
    }
}

#[test]
fn triangle_quadrature_integrates_polynomials_exactly() {
    for order in 0..8 {
        let rule = triangle_quadrature::<f64>(order);
        assert!(rule.points.iter().all(|xi| xi.x >= 0.0 && xi.y >= 0.0 && xi.x + xi.y <= 1.0));
        for a in 0..=order as i32 {
            for b in 0..=(order as i32 - a) {
                let integral = rule.integrate(|xi| xi.x.powi(a) * xi.y.powi(b));
                assert_scalar_eq!(integral, triangle_monomial_integral(a, b), comp = abs, tol = 1e-13);
            }
        }
    }
}

#[test]
fn quadrature_for_selects_reference_cell() {
    let tri = quadrature_for::<f64>(CellType::Triangle, 2);
    let quad = quadrature_for::<f64>(CellType::Quadrilateral, 2);
    assert!(!tri.is_empty());
    assert_scalar_eq!(tri.weights.iter().sum::<f64>(), 0.5, comp = abs, tol = 1e-14);
    assert_scalar_eq!(quad.weights.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
    assert_eq!(tri.len(), tri.points.len());
}
