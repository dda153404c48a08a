//! BridgeError: Unified error type for crossgrid-bridge public APIs
//!
//! Every fallible operation in the crate returns this error. Validation failures
//! are raised before any native resource is allocated; native failures are raised
//! only after every handle acquired by the failing operation has been released.
//!
//! Lifecycle violations (use after release, double release) have no variant: the
//! handle types in [`crate::native::handle`] make them unrepresentable.

use thiserror::Error;

/// Unified error type for crossgrid-bridge operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// An edge or cell references a point index outside the point array.
    #[error("{what} {item} references point {index}, but only {len} points exist")]
    DanglingIndex {
        what: &'static str,
        item: usize,
        index: usize,
        len: usize,
    },
    /// A cell has fewer than three points.
    #[error("cell {cell} has {len} points (at least 3 required)")]
    DegenerateCell { cell: usize, len: usize },
    /// An edge connects a point to itself.
    #[error("{what} edge {edge} connects point {point} to itself")]
    DegenerateEdge {
        what: &'static str,
        edge: usize,
        point: usize,
    },
    /// An explicit mesh edge list differs from the edges its cells derive.
    #[error("mesh edge {edge} differs from the cell-derived edges ({actual} given, {expected} derived)")]
    EdgeMismatch {
        edge: usize,
        expected: usize,
        actual: usize,
    },
    /// A coordinate is NaN or infinite.
    #[error("point {point} has a non-finite coordinate")]
    NonFiniteCoordinate { point: usize },
    /// A flat buffer does not have the length implied by its declared counts.
    #[error("{what}: expected {expected} entries, got {actual}")]
    BufferLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A count or index does not fit the native `int` type.
    #[error("{what} value {value} does not fit the native index type")]
    IndexOverflow { what: &'static str, value: usize },
    /// A native output buffer holds a negative count or index.
    #[error("native {what} contains invalid value {value}")]
    NegativeIndex { what: &'static str, value: i64 },
    /// A serialized exchange buffer could not be parsed.
    #[error("malformed exchange buffer: {0}")]
    MalformedBuffer(String),
    /// The geometric tolerance is negative or not finite.
    #[error("invalid tolerance {0} (must be finite and non-negative)")]
    InvalidTolerance(f64),
    /// Configuration rejected by [`crate::config::BridgeConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Boundary-layer options failed validation.
    #[error("boundary layer option {entry}: {reason}")]
    InvalidLayerOptions { entry: usize, reason: String },
    /// A native constructor returned the null sentinel.
    #[error("native constructor `{entry}` returned null")]
    NativeConstruct { entry: &'static str },
    /// The native operation returned the null sentinel without a cancellation request.
    #[error("native operation `{operation}` failed")]
    NativeFailure { operation: &'static str },
    /// The worker context running a native call panicked.
    #[error("worker running `{operation}` panicked")]
    WorkerPanicked { operation: &'static str },
}
