use nalgebra::RealField;

pub use nalgebra;

/// Scalar type used by all generic `gridfem` routines.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
