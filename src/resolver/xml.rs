//! Minimal namespace-aware element tree built on `quick-xml` events.

use std::collections::BTreeMap;
use std::fmt;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ResolveError;

pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub namespace: String,
    pub local: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Cache key in `namespace#localName` form.
    pub fn key(&self) -> String {
        format!("{}#{}", self.namespace, self.local)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// One XML element with its in-scope namespace bindings.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub local_name: String,
    pub namespace: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
    /// prefix -> namespace URI; the empty prefix is the default namespace.
    pub namespaces: BTreeMap<String, String>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is(&self, local_name: &str) -> bool {
        self.local_name == local_name
    }

    pub fn children_named<'a>(
        &'a self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.local_name == local_name)
    }

    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name == local_name)
    }

    /// All descendants (depth-first, document order) with the given local name.
    pub fn descendants<'a>(&'a self, local_name: &str, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.local_name == local_name {
                out.push(child);
            }
            child.descendants(local_name, out);
        }
    }

    /// Resolve a `prefix:local` attribute value against this element's scope.
    ///
    /// Unprefixed values take the default namespace. Unknown prefixes resolve
    /// to an empty namespace so lookups can fall back to the local name.
    pub fn resolve_qname(&self, value: &str) -> QualifiedName {
        let value = value.trim();
        match value.split_once(':') {
            Some((prefix, local)) => QualifiedName::new(
                self.namespaces.get(prefix).cloned().unwrap_or_default(),
                local,
            ),
            None => QualifiedName::new(
                self.namespaces.get("").cloned().unwrap_or_default(),
                value,
            ),
        }
    }

    /// Text of the first `annotation/documentation` child, trimmed.
    pub fn documentation(&self) -> Option<String> {
        let doc = self.child("annotation")?.child("documentation")?;
        let text = doc.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Parse an XML document into its root element.
pub fn parse_document(document: &str, text: &str) -> Result<XmlElement, ResolveError> {
    let invalid = |message: String| ResolveError::InvalidXml {
        document: document.to_string(),
        message,
    };

    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let scope = stack.last().map(|e| &e.namespaces);
                let element = open_element(&start, scope).map_err(invalid)?;
                stack.push(element);
            }
            Ok(Event::Empty(start)) => {
                let scope = stack.last().map(|e| &e.namespaces);
                let element = open_element(&start, scope).map_err(invalid)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| invalid("unbalanced closing tag".to_string()))?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(text)) => {
                if let Some(current) = stack.last_mut() {
                    let unescaped = text.unescape().map_err(|e| invalid(e.to_string()))?;
                    current.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(invalid(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(invalid("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| invalid("document has no root element".to_string()))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn open_element(
    start: &BytesStart<'_>,
    scope: Option<&BTreeMap<String, String>>,
) -> Result<XmlElement, String> {
    let mut namespaces = scope.cloned().unwrap_or_default();
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| e.to_string())?
            .into_owned();

        if key == "xmlns" {
            namespaces.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespaces.insert(prefix.to_string(), value);
        } else {
            attributes.push((key, value));
        }
    }

    let qualified = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (prefix, local_name) = match qualified.split_once(':') {
        Some((prefix, local)) => (prefix.to_string(), local.to_string()),
        None => (String::new(), qualified),
    };
    let namespace = namespaces.get(&prefix).cloned().unwrap_or_default();

    Ok(XmlElement {
        local_name,
        namespace,
        attributes,
        children: Vec::new(),
        text: String::new(),
        namespaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_with_namespaces() {
        let xml = r#"<?xml version="1.0"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/" xmlns:tns="urn:pets"
                  targetNamespace="urn:pets">
  <wsdl:message name="GetPet"><wsdl:part name="id" type="xsd:int"/></wsdl:message>
</wsdl:definitions>"#;
        let root = parse_document("pets.wsdl", xml).unwrap();
        assert!(root.is("definitions"));
        assert_eq!(root.namespace, "http://schemas.xmlsoap.org/wsdl/");
        assert_eq!(root.attr("targetNamespace"), Some("urn:pets"));

        let message = root.child("message").unwrap();
        assert_eq!(message.attr("name"), Some("GetPet"));
        let part = message.child("part").unwrap();
        assert_eq!(part.resolve_qname("tns:Pet"), QualifiedName::new("urn:pets", "Pet"));
    }

    #[test]
    fn default_namespace_applies_to_unprefixed_qnames() {
        let xml = r#"<schema xmlns="http://www.w3.org/2001/XMLSchema"><element name="a" type="string"/></schema>"#;
        let root = parse_document("a.xsd", xml).unwrap();
        let element = root.child("element").unwrap();
        assert_eq!(
            element.resolve_qname("string"),
            QualifiedName::new(XSD_NAMESPACE, "string")
        );
    }

    #[test]
    fn collects_documentation_text() {
        let xml = r#"<element name="a"><annotation><documentation> Pet id </documentation></annotation></element>"#;
        let root = parse_document("a.xsd", xml).unwrap();
        assert_eq!(root.documentation().as_deref(), Some("Pet id"));
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(parse_document("bad.xml", "<a><b></a>").is_err());
        assert!(parse_document("empty.xml", "").is_err());
    }

    #[test]
    fn descendants_in_document_order() {
        let xml = r#"<a><import location="1"/><b><import location="2"/></b></a>"#;
        let root = parse_document("x", xml).unwrap();
        let mut found = Vec::new();
        root.descendants("import", &mut found);
        let locations: Vec<_> = found.iter().filter_map(|e| e.attr("location")).collect();
        assert_eq!(locations, vec!["1", "2"]);
    }
}
