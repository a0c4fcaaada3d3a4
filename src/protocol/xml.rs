//! Minimal XML inspection: the root element of a document and a few text
//! extractions used to recognise SOAP and XML-RPC calls.
//!
//! This is not a validating parser. A document counts as well formed enough
//! when a root start tag can be read after the prolog and the matching end tag
//! (or a self-closing root) is present.

use regex::Regex;
use std::sync::OnceLock;

pub const SOAP_11_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlRoot {
    pub prefix: Option<String>,
    pub local_name: String,
    /// Namespace bound to the root's prefix (or the default namespace).
    pub namespace: Option<String>,
}

impl XmlRoot {
    pub fn is_soap_envelope(&self) -> bool {
        self.local_name == "Envelope"
            && matches!(
                self.namespace.as_deref(),
                Some(SOAP_11_NAMESPACE) | Some(SOAP_12_NAMESPACE)
            )
    }
}

fn xmlns_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"xmlns(?::([A-Za-z_][\w.-]*))?\s*=\s*["']([^"']*)["']"#)
            .expect("valid xmlns pattern")
    })
}

fn method_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<methodName>\s*([^<]+?)\s*</methodName>").expect("valid methodName pattern")
    })
}

fn soap_body_child_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(?:[\w.-]+:)?Body\b[^>]*>\s*(?:<!--.*?-->\s*)*<(?:[\w.-]+:)?([A-Za-z_][\w.-]*)")
            .expect("valid SOAP body pattern")
    })
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// Reads the root element of `text`, skipping BOM, XML declaration, processing
/// instructions, comments and a DOCTYPE.
pub fn root_element(text: &str) -> Option<XmlRoot> {
    let mut rest = text.trim_start_matches('\u{feff}').trim_start();

    loop {
        if rest.starts_with("<?") {
            let end = rest.find("?>")?;
            rest = rest[end + 2..].trim_start();
        } else if rest.starts_with("<!--") {
            let end = rest.find("-->")?;
            rest = rest[end + 3..].trim_start();
        } else if rest.starts_with("<!") {
            let end = rest.find('>')?;
            rest = rest[end + 1..].trim_start();
        } else if let Some(tag) = rest.strip_prefix('<') {
            return parse_start_tag(tag);
        } else {
            return None;
        }
    }
}

fn parse_start_tag(tag: &str) -> Option<XmlRoot> {
    let name_len = tag
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());
    let qname = &tag[..name_len];
    let mut chars = qname.chars();
    if !chars.next().is_some_and(is_name_start) || !chars.all(is_name_char) {
        return None;
    }

    let close = tag.find('>')?;
    let attributes = &tag[name_len..close];
    let self_closing = attributes.trim_end().ends_with('/');
    if !self_closing && !tag[close..].contains(&format!("</{}", qname)) {
        return None;
    }

    let (prefix, local_name) = match qname.split_once(':') {
        Some((p, l)) if !p.is_empty() && !l.is_empty() => (Some(p.to_string()), l.to_string()),
        Some(_) => return None,
        None => (None, qname.to_string()),
    };

    let namespace = xmlns_pattern()
        .captures_iter(attributes)
        .find(|c| c.get(1).map(|m| m.as_str()) == prefix.as_deref())
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().to_string());

    Some(XmlRoot {
        prefix,
        local_name,
        namespace,
    })
}

/// Text of the first `<methodName>` element, as used by XML-RPC calls.
pub fn xml_rpc_method_name(text: &str) -> Option<String> {
    method_name_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Local name of the first child element of a SOAP `Body`.
pub fn soap_body_operation(text: &str) -> Option<String> {
    soap_body_child_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_REQUEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!-- generated -->
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:m="urn:stock">
  <soap:Body>
    <m:GetStockPrice><m:StockName>ACME</m:StockName></m:GetStockPrice>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn reads_prefixed_root_with_namespace() {
        let root = root_element(SOAP_REQUEST).unwrap();
        assert_eq!(root.prefix.as_deref(), Some("soap"));
        assert_eq!(root.local_name, "Envelope");
        assert_eq!(root.namespace.as_deref(), Some(SOAP_11_NAMESPACE));
        assert!(root.is_soap_envelope());
        assert_eq!(soap_body_operation(SOAP_REQUEST).as_deref(), Some("GetStockPrice"));
    }

    #[test]
    fn envelope_outside_soap_namespace_is_not_soap() {
        let root = root_element(r#"<Envelope xmlns="urn:mail"><to/></Envelope>"#).unwrap();
        assert_eq!(root.namespace.as_deref(), Some("urn:mail"));
        assert!(!root.is_soap_envelope());
    }

    #[test]
    fn reads_xml_rpc_method_name() {
        let body = "<?xml version=\"1.0\"?>\n<!DOCTYPE methodCall>\n<methodCall><methodName> examples.getStateName </methodName><params/></methodCall>";
        let root = root_element(body).unwrap();
        assert_eq!(root.local_name, "methodCall");
        assert_eq!(xml_rpc_method_name(body).as_deref(), Some("examples.getStateName"));
    }

    #[test]
    fn rejects_unterminated_or_non_xml_text() {
        assert_eq!(root_element("<methodCall><methodName>x</methodName>"), None);
        assert_eq!(root_element("<1bad></1bad>"), None);
        assert_eq!(root_element("plain text"), None);
        assert_eq!(root_element("<?xml version=\"1.0\""), None);
        assert!(root_element("<empty/>").is_some());
    }
}
