use quick_xml::escape::escape;

use crate::fault::SoapFaultCode;

pub const NS_SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";
pub const NS_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const NS_MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const NS_PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const NS_IMAGING: &str = "http://www.onvif.org/ver20/imaging/wsdl";

/// XML-escapes text content or attribute values.
pub fn xml_escape(text: &str) -> String {
    escape(text).into_owned()
}

/// Wraps `inner` in `<prefix:ActionResponse>` inside a SOAP 1.2 envelope.
pub fn response_envelope(prefix: &str, namespace: &str, action: &str, inner: &str) -> String {
    let mut out = String::with_capacity(inner.len() + 512);
    write_response(&mut out, prefix, namespace, action, inner);
    out
}

pub(crate) fn write_response(
    out: &mut String,
    prefix: &str,
    namespace: &str,
    action: &str,
    inner: &str,
) {
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str(&format!(
        r#"<soap:Envelope xmlns:soap="{}" xmlns:tt="{}" xmlns:{}="{}">"#,
        NS_SOAP_ENV, NS_SCHEMA, prefix, namespace
    ));
    out.push_str("<soap:Body>");
    if inner.is_empty() {
        out.push_str(&format!("<{}:{}Response/>", prefix, action));
    } else {
        out.push_str(&format!("<{}:{}Response>", prefix, action));
        out.push_str(inner);
        out.push_str(&format!("</{}:{}Response>", prefix, action));
    }
    out.push_str("</soap:Body></soap:Envelope>");
}

/// SOAP 1.2 fault envelope.
pub fn fault_envelope(code: SoapFaultCode, reason: &str, detail: Option<&str>) -> String {
    let mut out = String::with_capacity(512);
    write_fault(&mut out, code, reason, detail);
    out
}

pub(crate) fn write_fault(
    out: &mut String,
    code: SoapFaultCode,
    reason: &str,
    detail: Option<&str>,
) {
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str(&format!(r#"<soap:Envelope xmlns:soap="{}">"#, NS_SOAP_ENV));
    out.push_str("<soap:Body><soap:Fault>");
    out.push_str(&format!(
        "<soap:Code><soap:Value>{}</soap:Value></soap:Code>",
        code.as_qualified()
    ));
    out.push_str(&format!(
        r#"<soap:Reason><soap:Text xml:lang="en">{}</soap:Text></soap:Reason>"#,
        xml_escape(reason)
    ));
    if let Some(detail) = detail {
        out.push_str(&format!(
            "<soap:Detail><soap:Text>{}</soap:Text></soap:Detail>",
            xml_escape(detail)
        ));
    }
    out.push_str("</soap:Fault></soap:Body></soap:Envelope>");
}
