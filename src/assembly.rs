//! Residual and Jacobian assembly.
//!
//! Problem-specific weak forms are expressed as [`LocalOperator`](local::LocalOperator)s that
//! work on one cell (or boundary face) at a time. The [`GridOperator`](global::GridOperator)
//! traverses the leaf view, gathers local coefficients, calls the local operator and scatters
//! the local contributions through the constraint transformation into global vectors and CSR
//! matrices.
use thiserror::Error;

pub mod buffers;
pub mod global;
pub mod local;
pub mod operators;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("local operator failed on cell {cell}: {report}")]
    LocalOperator { cell: usize, report: eyre::Report },
    #[error("local operator failed on local edge {edge} of boundary cell {cell}: {report}")]
    Boundary {
        cell: usize,
        edge: usize,
        report: eyre::Report,
    },
    #[error("cell {cell} has degenerate geometry")]
    DegenerateGeometry { cell: usize },
    #[error("matrix sparsity pattern lacks the entry ({row}, {col})")]
    PatternMismatch { row: usize, col: usize },
    #[error("vector or matrix has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid sparsity pattern: {0}")]
    InvalidPattern(String),
}
