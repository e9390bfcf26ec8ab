//! Exceptions thrown by generated code.

use std::fmt;

use crate::error::DslError;

/// Kinds of exceptions generated code can throw through the host's `throw`
/// callback.  The discriminant is the code passed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ExceptionKind {
    InvalidEscapeSequence = 0,
    FailedUnittestCheck = 1,
    OutOfBounds = 2,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 3] = [
        ExceptionKind::InvalidEscapeSequence,
        ExceptionKind::FailedUnittestCheck,
        ExceptionKind::OutOfBounds,
    ];

    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::InvalidEscapeSequence => "invalid escape sequence",
            ExceptionKind::FailedUnittestCheck => "failed unittest check",
            ExceptionKind::OutOfBounds => "out of bounds",
        }
    }
}

impl TryFrom<u64> for ExceptionKind {
    type Error = DslError;

    fn try_from(code: u64) -> Result<Self, DslError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or(DslError::UnknownExceptionKind(code))
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for kind in ExceptionKind::ALL {
            assert_eq!(ExceptionKind::try_from(kind.code()).unwrap(), kind);
        }
        assert!(matches!(
            ExceptionKind::try_from(99),
            Err(DslError::UnknownExceptionKind(99))
        ));
    }

    #[test]
    fn display_uses_name() {
        assert_eq!(ExceptionKind::OutOfBounds.to_string(), "out of bounds");
    }
}
