//! Result codes shared by every call that crosses the native boundary.
//!
//! The discriminants are part of the wire contract with the native core and
//! must never change.

use std::fmt;

use thiserror::Error;

/// Result code returned by every native-core operation.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MojoResult {
    Ok = 0,
    Cancelled = -1,
    Unknown = -2,
    InvalidArgument = -3,
    DeadlineExceeded = -4,
    NotFound = -5,
    AlreadyExists = -6,
    PermissionDenied = -7,
    ResourceExhausted = -8,
    FailedPrecondition = -9,
    Aborted = -10,
    OutOfRange = -11,
    Unimplemented = -12,
    Internal = -13,
    Unavailable = -14,
    DataLoss = -15,
    Busy = -16,
    ShouldWait = -17,
}

impl MojoResult {
    /// Map a raw code from the native side. Codes we do not know become `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Ok,
            -1 => Self::Cancelled,
            -3 => Self::InvalidArgument,
            -4 => Self::DeadlineExceeded,
            -5 => Self::NotFound,
            -6 => Self::AlreadyExists,
            -7 => Self::PermissionDenied,
            -8 => Self::ResourceExhausted,
            -9 => Self::FailedPrecondition,
            -10 => Self::Aborted,
            -11 => Self::OutOfRange,
            -12 => Self::Unimplemented,
            -13 => Self::Internal,
            -14 => Self::Unavailable,
            -15 => Self::DataLoss,
            -16 => Self::Busy,
            -17 => Self::ShouldWait,
            _ => Self::Unknown,
        }
    }

    #[inline]
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Convert into a `Result`, attaching the code to the error on failure.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(MojoError(self))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Busy => "BUSY",
            Self::ShouldWait => "SHOULD_WAIT",
        }
    }
}

impl fmt::Display for MojoResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.as_raw())
    }
}

/// A non-OK [`MojoResult`] lifted into an error value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("mojo call failed: {0}")]
pub struct MojoError(MojoResult);

impl MojoError {
    /// Build an error from a code. `Ok` is mapped to `Unknown` so an error
    /// value never claims success.
    pub fn new(result: MojoResult) -> Self {
        if result.is_ok() {
            Self(MojoResult::Unknown)
        } else {
            Self(result)
        }
    }

    #[inline]
    pub fn result(&self) -> MojoResult {
        self.0
    }

    /// SHOULD_WAIT and BUSY: wait for a signal or for the other operation, then retry.
    pub fn is_transient(&self) -> bool {
        matches!(self.0, MojoResult::ShouldWait | MojoResult::Busy)
    }

    /// RESOURCE_EXHAUSTED: the caller's buffer or a system limit was too small.
    pub fn is_resource(&self) -> bool {
        self.0 == MojoResult::ResourceExhausted
    }

    /// The handle or its peer can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.0,
            MojoResult::InvalidArgument | MojoResult::FailedPrecondition
        )
    }
}

impl From<MojoResult> for MojoError {
    fn from(result: MojoResult) -> Self {
        Self::new(result)
    }
}

/// Shorthand for fallible calls in this crate.
pub type Result<T> = std::result::Result<T, MojoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_stable() {
        assert_eq!(MojoResult::Ok.as_raw(), 0);
        assert_eq!(MojoResult::Cancelled.as_raw(), -1);
        assert_eq!(MojoResult::InvalidArgument.as_raw(), -3);
        assert_eq!(MojoResult::ResourceExhausted.as_raw(), -8);
        assert_eq!(MojoResult::FailedPrecondition.as_raw(), -9);
        assert_eq!(MojoResult::Busy.as_raw(), -16);
        assert_eq!(MojoResult::ShouldWait.as_raw(), -17);
    }

    #[test]
    fn test_from_raw_covers_every_code() {
        for raw in -17..=0 {
            assert_eq!(MojoResult::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(MojoResult::from_raw(42), MojoResult::Unknown);
        assert_eq!(MojoResult::from_raw(-18), MojoResult::Unknown);
    }

    #[test]
    fn test_into_result_polarity() {
        assert!(MojoResult::Ok.into_result().is_ok());
        let err = MojoResult::ShouldWait.into_result().unwrap_err();
        assert_eq!(err.result(), MojoResult::ShouldWait);
        assert!(err.is_transient());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_error_never_claims_ok() {
        assert_eq!(MojoError::new(MojoResult::Ok).result(), MojoResult::Unknown);
    }

    #[test]
    fn test_error_display_names_code() {
        let err = MojoError::new(MojoResult::FailedPrecondition);
        assert_eq!(err.to_string(), "mojo call failed: FAILED_PRECONDITION (-9)");
        assert!(err.is_terminal());
    }
}
