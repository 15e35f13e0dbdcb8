use crate::coupling_error::CouplingError;

/// Trait for validating data structure invariants.
///
/// Implemented by the incremental QR factorization (orthonormal `Q`, upper
/// triangular `R`), the quasi-Newton history (columns of `V`, `W` and `Q R`
/// in sync) and by meshes (edge/triangle references in range).
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), CouplingError>;
}

/// Helper macro to run a fallible check and panic on error when invariant
/// checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
