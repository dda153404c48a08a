//! Structural checks for [`Mesh`](crate::geometry::Mesh) and
//! [`Contour`](crate::geometry::Contour).
//!
//! Every public constructor and deserializer runs `validate_invariants`, so a
//! value holding a dangling index, a degenerate edge or a non-finite coordinate
//! never reaches the codec. Crate-internal constructors that already checked
//! their inputs only call `debug_assert_invariants`.

use crate::bridge_error::BridgeError;

/// Index and coordinate checks run before geometry is packed for the engine.
pub trait DebugInvariants {
    /// Panics on a violation in debug builds or with `check-invariants`.
    fn debug_assert_invariants(&self);
    /// First violation found, as the error the public constructors return.
    fn validate_invariants(&self) -> Result<(), BridgeError>;
}

/// Panics with `[invariants] <context>: <error>` if `$expr` is an `Err` and
/// checks are compiled in.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": geometry rejected: {}"), e);
        }
    };
}

#[cfg(all(test, debug_assertions))]
mod tests {
    use crate::geometry::{Contour, ContourEdge, Point2};

    #[test]
    #[should_panic(expected = "[invariants] Contour: geometry rejected")]
    fn unchecked_parts_panic_in_debug() {
        let _ = Contour::from_validated_parts(vec![Point2::ORIGIN], vec![ContourEdge::new(0, 1, 0)]);
    }
}
