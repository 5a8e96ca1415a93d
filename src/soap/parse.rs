use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{OnvifError, Result};

const MAX_DEPTH: usize = 64;

/// Element of a parsed request, addressed by local name only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(e: &BytesStart<'_>) -> Result<Self> {
        let local_name = e.local_name();
        let name = String::from_utf8_lossy(local_name.as_ref()).to_string();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| OnvifError::Codec(format!("bad attribute: {}", e)))?;
            let key_local = attr.key.local_name();
            let key = String::from_utf8_lossy(key_local.as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| OnvifError::Codec(format!("bad attribute value: {}", e)))?;
            attributes.push((key, value.to_string()));
        }
        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first descendant called `name`.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Text of the child `name`, if present and non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text()).filter(|t| !t.is_empty())
    }

    pub fn attribute_f32(&self, name: &str) -> Result<Option<f32>> {
        match self.attribute(name) {
            Some(v) => Ok(Some(v.trim().parse::<f32>()?)),
            None => Ok(None),
        }
    }
}

/// Parses a document into an element tree.
pub fn parse_document(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(OnvifError::Codec("document nested too deeply".into()));
                }
                stack.push(XmlElement::from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let element = XmlElement::from_start(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        root.get_or_insert(element);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(current) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| OnvifError::Codec(format!("bad text: {}", e)))?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| OnvifError::Codec("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        if root.is_some() {
                            return Err(OnvifError::Codec("multiple root elements".into()));
                        }
                        root = Some(element);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(OnvifError::Codec(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(OnvifError::Codec("unexpected end of document".into()));
    }
    root.ok_or_else(|| OnvifError::Codec("empty document".into()))
}

/// Local name of the first element inside `Body`, without building a tree.
pub fn extract_action(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_body = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local_name = e.local_name();
                let name = String::from_utf8_lossy(local_name.as_ref()).to_string();
                if in_body {
                    return Some(name);
                }
                if name == "Body" {
                    in_body = true;
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Body" {
                    return None;
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Parsed SOAP request: the envelope with convenient access to header and body.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    envelope: XmlElement,
}

impl SoapRequest {
    pub fn parse(xml: &str) -> Result<Self> {
        let envelope = parse_document(xml)?;
        if envelope.name != "Envelope" {
            return Err(OnvifError::Codec(format!(
                "expected Envelope, found {}",
                envelope.name
            )));
        }
        if envelope.child("Body").is_none() {
            return Err(OnvifError::Codec("envelope has no Body".into()));
        }
        Ok(Self { envelope })
    }

    pub fn header(&self) -> Option<&XmlElement> {
        self.envelope.child("Header")
    }

    pub fn body(&self) -> &XmlElement {
        // Presence of Body is checked in parse.
        self.envelope
            .child("Body")
            .unwrap_or(&self.envelope)
    }

    /// The operation element, i.e. the first child of `Body`.
    pub fn operation(&self) -> Option<&XmlElement> {
        self.body().children.first()
    }

    pub fn action(&self) -> Option<&str> {
        self.operation().map(|op| op.name.as_str())
    }

    /// Text of a direct child of the operation element.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.operation().and_then(|op| op.child_text(name))
    }

    /// Like [`param`](Self::param) but absent values are an error.
    pub fn required_param(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| OnvifError::InvalidInput(format!("missing parameter '{}'", name)))
    }

    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.operation().and_then(|op| op.find(name))
    }
}
