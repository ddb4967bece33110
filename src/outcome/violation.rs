//! Violation values and their kinds.

use std::fmt;

use crate::Error;

/// Explicit discriminant of a [`Violation`], used to select its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Plain text message.
    Message,
    Transport,
    Serialization,
    InvalidPayload,
    Timeout,
    Cancelled,
    Closed,
    Config,
    InvalidOutcome,
    /// Raised by a violation handler.
    Raised,
    /// No handler could be resolved.
    Unresolved,
    /// An error type from outside this crate.
    Foreign,
}

impl From<&Error> for ViolationKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::Transport(_) => ViolationKind::Transport,
            Error::Serialization(_) => ViolationKind::Serialization,
            Error::InvalidPayload(_) => ViolationKind::InvalidPayload,
            Error::Timeout => ViolationKind::Timeout,
            Error::Cancelled => ViolationKind::Cancelled,
            Error::Closed => ViolationKind::Closed,
            Error::MissingConfig(_) | Error::ConfigConflict(_) => ViolationKind::Config,
            Error::InvalidOutcome(_) => ViolationKind::InvalidOutcome,
            Error::Violation { .. } => ViolationKind::Raised,
            Error::UnresolvedViolation(_) => ViolationKind::Unresolved,
        }
    }
}

/// A fault carried by an [`Outcome`](crate::Outcome) instead of a value.
#[derive(Debug)]
pub enum Violation {
    Message(String),
    Error(Error),
    Foreign(Box<dyn std::error::Error + Send + Sync>),
}

impl Violation {
    /// Wrap an error type from outside this crate.
    pub fn foreign<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Violation::Foreign(Box::new(err))
    }

    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::Message(_) => ViolationKind::Message,
            Violation::Error(err) => ViolationKind::from(err),
            Violation::Foreign(_) => ViolationKind::Foreign,
        }
    }

    /// The wrapped crate error, if any.
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Violation::Error(err) => Some(err),
            _ => None,
        }
    }

    /// `true` for crate errors and foreign errors; `false` for messages.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Violation::Message(_))
    }

    /// Convert into a crate error, keeping crate errors as they are.
    pub fn into_error(self) -> Error {
        match self {
            Violation::Error(err) => err,
            other => Error::Violation {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }

    /// Violations are considered equal when kind and rendered text match.
    pub(crate) fn same_as(&self, other: &Violation) -> bool {
        self.kind() == other.kind() && self.to_string() == other.to_string()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Message(msg) => f.write_str(msg),
            Violation::Error(err) => write!(f, "{err}"),
            Violation::Foreign(err) => write!(f, "{err}"),
        }
    }
}

impl From<Error> for Violation {
    fn from(err: Error) -> Self {
        Violation::Error(err)
    }
}

impl From<String> for Violation {
    fn from(msg: String) -> Self {
        Violation::Message(msg)
    }
}

impl From<&str> for Violation {
    fn from(msg: &str) -> Self {
        Violation::Message(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_kinds() {
        // ---
        assert_eq!(Violation::from("boom").kind(), ViolationKind::Message);
        assert_eq!(Violation::from(Error::Timeout).kind(), ViolationKind::Timeout);
        assert_eq!(
            Violation::from(Error::MissingConfig("uri".into())).kind(),
            ViolationKind::Config
        );

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Violation::foreign(io).kind(), ViolationKind::Foreign);
    }

    #[test]
    fn test_into_error_keeps_crate_errors() {
        // ---
        assert!(matches!(
            Violation::from(Error::Cancelled).into_error(),
            Error::Cancelled
        ));

        match Violation::from("bad input").into_error() {
            Error::Violation { kind, message } => {
                assert_eq!(kind, ViolationKind::Message);
                assert_eq!(message, "bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_same_as() {
        // ---
        assert!(Violation::from("a").same_as(&Violation::from("a")));
        assert!(!Violation::from("a").same_as(&Violation::from("b")));
        assert!(!Violation::from("connection closed").same_as(&Violation::from(Error::Closed)));
    }
}
