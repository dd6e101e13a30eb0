/// Numerical differentiation
pub mod calculus;
/// Damped Newton method for sparse nonlinear systems
pub mod newton;
