use std::fmt;

use crate::{OnvifError, Result};

/// SOAP 1.2 fault code families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoapFaultCode {
    /// The client sent something the device could not accept
    Sender,
    /// The device failed while processing a valid request
    Receiver,
}

impl SoapFaultCode {
    /// Qualified value used inside `<soap:Value>`.
    pub fn as_qualified(&self) -> &'static str {
        match self {
            SoapFaultCode::Sender => "soap:Sender",
            SoapFaultCode::Receiver => "soap:Receiver",
        }
    }
}

impl fmt::Display for SoapFaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_qualified())
    }
}

/// Fixed set of failure classes every component reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPattern {
    ValidationFailed,
    NotFound,
    NotSupported,
    InternalError,
    InvalidParameter,
    MissingParameter,
    AuthenticationFailed,
    AuthorizationFailed,
}

impl ErrorPattern {
    pub const ALL: [ErrorPattern; 8] = [
        ErrorPattern::ValidationFailed,
        ErrorPattern::NotFound,
        ErrorPattern::NotSupported,
        ErrorPattern::InternalError,
        ErrorPattern::InvalidParameter,
        ErrorPattern::MissingParameter,
        ErrorPattern::AuthenticationFailed,
        ErrorPattern::AuthorizationFailed,
    ];

    /// Stable numeric code, also used as the index into per-pattern statistics.
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorPattern::ValidationFailed => "ValidationFailed",
            ErrorPattern::NotFound => "NotFound",
            ErrorPattern::NotSupported => "NotSupported",
            ErrorPattern::InternalError => "InternalError",
            ErrorPattern::InvalidParameter => "InvalidParameter",
            ErrorPattern::MissingParameter => "MissingParameter",
            ErrorPattern::AuthenticationFailed => "AuthenticationFailed",
            ErrorPattern::AuthorizationFailed => "AuthorizationFailed",
        }
    }

    pub fn default_message(&self) -> &'static str {
        lookup(*self).map(|def| def.message).unwrap_or("")
    }

    pub fn soap_fault_code(&self) -> SoapFaultCode {
        lookup(*self)
            .map(|def| def.fault_code)
            .unwrap_or(SoapFaultCode::Receiver)
    }
}

impl TryFrom<i32> for ErrorPattern {
    type Error = OnvifError;

    fn try_from(code: i32) -> Result<Self> {
        ErrorPattern::ALL
            .iter()
            .copied()
            .find(|p| p.code() == code)
            .ok_or_else(|| OnvifError::NotFound(format!("error pattern {}", code)))
    }
}

impl fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct PatternDefinition {
    pattern: ErrorPattern,
    message: &'static str,
    fault_code: SoapFaultCode,
}

const PATTERN_TABLE: [PatternDefinition; 8] = [
    PatternDefinition {
        pattern: ErrorPattern::ValidationFailed,
        message: "Validation failed",
        fault_code: SoapFaultCode::Sender,
    },
    PatternDefinition {
        pattern: ErrorPattern::NotFound,
        message: "Resource not found",
        fault_code: SoapFaultCode::Sender,
    },
    PatternDefinition {
        pattern: ErrorPattern::NotSupported,
        message: "Operation not supported",
        fault_code: SoapFaultCode::Sender,
    },
    PatternDefinition {
        pattern: ErrorPattern::InternalError,
        message: "Internal server error",
        fault_code: SoapFaultCode::Receiver,
    },
    PatternDefinition {
        pattern: ErrorPattern::InvalidParameter,
        message: "Invalid parameter",
        fault_code: SoapFaultCode::Sender,
    },
    PatternDefinition {
        pattern: ErrorPattern::MissingParameter,
        message: "Missing required parameter",
        fault_code: SoapFaultCode::Sender,
    },
    PatternDefinition {
        pattern: ErrorPattern::AuthenticationFailed,
        message: "Authentication failed",
        fault_code: SoapFaultCode::Sender,
    },
    PatternDefinition {
        pattern: ErrorPattern::AuthorizationFailed,
        message: "Authorization failed",
        fault_code: SoapFaultCode::Sender,
    },
];

fn lookup(pattern: ErrorPattern) -> Option<&'static PatternDefinition> {
    PATTERN_TABLE.iter().find(|def| def.pattern == pattern)
}

/// Wire-ready description of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResult {
    pub error_code: i32,
    pub error_message: String,
    pub soap_fault_code: SoapFaultCode,
    pub soap_fault_string: String,
}

/// Builds the result for `pattern`, letting `custom_message` replace the default text.
pub fn create_result_from_pattern(
    pattern: ErrorPattern,
    custom_message: Option<&str>,
) -> Result<ErrorResult> {
    let def = lookup(pattern)
        .ok_or_else(|| OnvifError::NotFound(format!("error pattern {}", pattern.name())))?;

    let message = custom_message.unwrap_or(def.message).to_string();
    Ok(ErrorResult {
        error_code: pattern.code(),
        soap_fault_string: message.clone(),
        error_message: message,
        soap_fault_code: def.fault_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_resolves() {
        for pattern in ErrorPattern::ALL {
            let result = create_result_from_pattern(pattern, None).unwrap();
            assert!(!result.error_message.is_empty(), "{} has no message", pattern);
            assert_eq!(result.error_code, pattern.code());
            let expected = if pattern == ErrorPattern::InternalError {
                SoapFaultCode::Receiver
            } else {
                SoapFaultCode::Sender
            };
            assert_eq!(result.soap_fault_code, expected);
        }
    }

    #[test]
    fn test_custom_message_overrides_default() {
        let result =
            create_result_from_pattern(ErrorPattern::NotFound, Some("No such preset")).unwrap();
        assert_eq!(result.error_message, "No such preset");
        assert_eq!(result.soap_fault_string, "No such preset");

        let result = create_result_from_pattern(ErrorPattern::NotFound, None).unwrap();
        assert_eq!(result.error_message, "Resource not found");
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        assert_eq!(
            ErrorPattern::try_from(3).unwrap(),
            ErrorPattern::InternalError
        );
        assert!(matches!(
            ErrorPattern::try_from(42),
            Err(OnvifError::NotFound(_))
        ));
        assert!(ErrorPattern::try_from(-1).is_err());
    }
}
