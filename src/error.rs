use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

use crate::fault::ErrorPattern;
use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum OnvifError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("capacity reached: {0}")]
    AlreadyAtCapacity(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("authorization failed")]
    AuthorizationFailed,

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("parse float error: {0}")]
    ParseFloat(#[from] ParseFloatError),
}

impl OnvifError {
    /// Maps the error onto the fault pattern used when it reaches a SOAP client.
    pub fn pattern(&self) -> ErrorPattern {
        match self {
            OnvifError::InvalidInput(msg) if msg.starts_with("missing") => {
                ErrorPattern::MissingParameter
            }
            OnvifError::InvalidInput(_) | OnvifError::ParseInt(_) | OnvifError::ParseFloat(_) => {
                ErrorPattern::InvalidParameter
            }
            OnvifError::NotFound(_) => ErrorPattern::NotFound,
            OnvifError::UnsupportedAction(_) | OnvifError::NotSupported(_) => {
                ErrorPattern::NotSupported
            }
            OnvifError::AlreadyExists(_)
            | OnvifError::AlreadyAtCapacity(_)
            | OnvifError::InvalidTransition(_) => ErrorPattern::ValidationFailed,
            OnvifError::AuthenticationFailed => ErrorPattern::AuthenticationFailed,
            OnvifError::AuthorizationFailed => ErrorPattern::AuthorizationFailed,
            OnvifError::Platform(PlatformError::InvalidArgument(_)) => {
                ErrorPattern::InvalidParameter
            }
            OnvifError::AllocationFailure(_)
            | OnvifError::Internal(_)
            | OnvifError::Codec(_)
            | OnvifError::Protocol(_)
            | OnvifError::Platform(_)
            | OnvifError::Config(_)
            | OnvifError::Io(_) => ErrorPattern::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, OnvifError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_sender_patterns() {
        assert_eq!(
            OnvifError::NotFound("Preset9".into()).pattern(),
            ErrorPattern::NotFound
        );
        assert_eq!(
            OnvifError::UnsupportedAction("Foo".into()).pattern(),
            ErrorPattern::NotSupported
        );
        assert_eq!(
            OnvifError::AlreadyAtCapacity("presets".into()).pattern(),
            ErrorPattern::ValidationFailed
        );
        assert_eq!(
            OnvifError::InvalidInput("missing parameter 'ProfileToken'".into()).pattern(),
            ErrorPattern::MissingParameter
        );
        let parse = "x".parse::<i32>().unwrap_err();
        assert_eq!(OnvifError::from(parse).pattern(), ErrorPattern::InvalidParameter);
    }

    #[test]
    fn test_server_errors_map_to_internal() {
        assert_eq!(
            OnvifError::Codec("bad".into()).pattern(),
            ErrorPattern::InternalError
        );
        assert_eq!(
            OnvifError::Platform(PlatformError::Busy).pattern(),
            ErrorPattern::InternalError
        );
        assert_eq!(
            OnvifError::Platform(PlatformError::InvalidArgument("speed".into())).pattern(),
            ErrorPattern::InvalidParameter
        );
    }
}
