//! SOAP codec context: parsing requests, rendering responses and faults.

mod context;
mod envelope;
mod parse;

pub use context::{ContextPool, PooledContext, SoapContext, DEFAULT_OUTPUT_CAPACITY};
pub use envelope::{
    fault_envelope, response_envelope, xml_escape, NS_DEVICE, NS_IMAGING, NS_MEDIA, NS_PTZ,
    NS_SCHEMA, NS_SOAP_ENV,
};
pub use parse::{extract_action, parse_document, SoapRequest, XmlElement};
