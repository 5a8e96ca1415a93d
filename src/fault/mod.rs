//! Error taxonomy and SOAP fault translation.
//!
//! Every failure that reaches a SOAP client passes through [`FaultTranslator`],
//! so a fault always looks the same on the wire: HTTP 200, a SOAP 1.2
//! envelope and a `Sender`/`Receiver` code chosen by [`ErrorPattern`].

mod pattern;
mod translator;

pub use pattern::{create_result_from_pattern, ErrorPattern, ErrorResult, SoapFaultCode};
pub use translator::{create_summary, ErrorCallback, ErrorContext, FaultTranslator, Outcome};
