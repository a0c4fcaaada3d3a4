//! Classification of exchanges into REST or an RPC sub-protocol.
//!
//! Detection is a fixed precedence table of pure predicates over a
//! [`SniffInput`]; the first predicate that matches wins and anything left
//! unmatched is REST.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::trace;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::types::{Confidence, Protocol, ProtocolClassification};
use super::xml;
use crate::data_capture::{decode_body, BodyDecoding, CapturedExchange, Headers, QueryParams};

/// Borrowed view of everything the detectors look at.
#[derive(Debug, Clone, Copy)]
pub struct SniffInput<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a QueryParams,
    pub headers: &'a Headers,
    pub raw_body: &'a [u8],
    pub body: &'a BodyDecoding,
    pub status_code: Option<u16>,
    pub response_headers: Option<&'a Headers>,
    pub response_body: Option<&'a BodyDecoding>,
}

impl<'a> SniffInput<'a> {
    pub fn from_exchange(
        exchange: &'a CapturedExchange,
        body: &'a BodyDecoding,
        response_body: Option<&'a BodyDecoding>,
    ) -> Self {
        Self {
            method: &exchange.method,
            path: &exchange.path,
            query: &exchange.query,
            headers: &exchange.headers,
            raw_body: &exchange.body,
            body,
            status_code: exchange.status_code(),
            response_headers: exchange.response.as_ref().map(|r| &r.headers),
            response_body,
        }
    }

    fn content_type(&self) -> String {
        self.headers
            .content_type()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn path_only(&self) -> &str {
        self.path.split_once('?').map(|(p, _)| p).unwrap_or(self.path)
    }

    fn has_query_param(&self, name: &str) -> bool {
        if self.query.contains_key(name) {
            return true;
        }
        self.path
            .split_once('?')
            .map(|(_, qs)| {
                qs.split('&')
                    .any(|pair| pair.split_once('=').map(|(k, _)| k).unwrap_or(pair) == name)
            })
            .unwrap_or(false)
    }

    /// Request header first, then the response header.
    fn header_anywhere(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get(name)
            .or_else(|| self.response_headers.and_then(|h| h.get(name)))
    }
}

type Detector = fn(&SniffInput) -> Option<ProtocolClassification>;

/// Precedence order; first match wins.
pub const DETECTORS: &[(&str, Detector)] = &[
    ("grpc_web", detect_grpc_web),
    ("json_rpc", detect_json_rpc),
    ("graphql", detect_graphql),
    ("graphql_ws", detect_graphql_ws),
    ("soap", detect_soap),
    ("xml_rpc", detect_xml_rpc),
    ("socket_io", detect_socket_io),
];

/// Classifies a sniff view; never returns [`Protocol::Unknown`].
pub fn classify_input(input: &SniffInput) -> ProtocolClassification {
    for (name, detector) in DETECTORS {
        if let Some(classification) = detector(input) {
            trace!("{} {} matched {}", input.method, input.path, name);
            return classification;
        }
    }
    ProtocolClassification::rest()
}

/// Decodes the bodies of `exchange` and classifies it.
pub fn classify(exchange: &CapturedExchange) -> ProtocolClassification {
    let body = decode_body(
        &exchange.body,
        exchange.body_decoded.as_deref(),
        exchange.headers.content_type(),
    );
    let response_body = exchange
        .response
        .as_ref()
        .map(|r| decode_body(&r.body, r.body_decoded.as_deref(), r.headers.content_type()));
    classify_input(&SniffInput::from_exchange(exchange, &body, response_body.as_ref()))
}

fn detect_grpc_web(input: &SniffInput) -> Option<ProtocolClassification> {
    let ct = input.content_type();
    if !ct.starts_with("application/grpc-web") {
        return None;
    }
    let frame_ok = if ct.starts_with("application/grpc-web-text") {
        STANDARD
            .decode(input.raw_body.trim_ascii())
            .map(|bytes| has_grpc_frame(&bytes))
            .unwrap_or(false)
    } else {
        has_grpc_frame(input.raw_body)
    };
    Some(ProtocolClassification::new(
        Protocol::GrpcWeb,
        Confidence::from_signals(true, frame_ok),
        grpc_method(input.path_only()),
    ))
}

/// Length-prefixed message: flag byte, big-endian u32 length, payload.
pub fn has_grpc_frame(bytes: &[u8]) -> bool {
    if bytes.len() < 5 || !matches!(bytes[0], 0x00 | 0x01 | 0x80 | 0x81) {
        return false;
    }
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    bytes.len() >= 5 + len
}

/// `/pkg.Service/Method` -> `pkg.Service/Method`.
pub fn grpc_method(path: &str) -> Option<String> {
    let trimmed = path.trim_matches('/');
    let (service, method) = trimmed.rsplit_once('/')?;
    if service.is_empty() || method.is_empty() || !service.contains('.') {
        return None;
    }
    Some(format!("{}/{}", service, method))
}

fn json_rpc_method(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if !object.contains_key("jsonrpc") {
        return None;
    }
    object.get("method")?.as_str()
}

fn detect_json_rpc(input: &SniffInput) -> Option<ProtocolClassification> {
    let body = input.body.json()?;
    let header = input.content_type().contains("json");
    match body {
        Value::Object(_) => {
            let method = json_rpc_method(body)?;
            Some(ProtocolClassification::new(
                Protocol::JsonRpc,
                Confidence::from_signals(header, true),
                Some(method.to_string()),
            ))
        }
        Value::Array(elements) if !elements.is_empty() => {
            let methods: Option<Vec<&str>> = elements.iter().map(json_rpc_method).collect();
            let methods = methods?;
            Some(ProtocolClassification {
                protocol: Protocol::JsonRpc,
                confidence: Confidence::from_signals(header, true),
                rpc_method: methods.first().map(|m| m.to_string()),
                batch: true,
            })
        }
        _ => None,
    }
}

fn graphql_operation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:query|mutation|subscription)\s+([_A-Za-z][_0-9A-Za-z]*)")
            .expect("valid graphql operation pattern")
    })
}

/// First named operation in a GraphQL document.
pub fn graphql_operation_name(query: &str) -> Option<String> {
    graphql_operation_regex()
        .captures(query)
        .map(|c| c[1].to_string())
}

fn detect_graphql(input: &SniffInput) -> Option<ProtocolClassification> {
    if !input.method.eq_ignore_ascii_case("POST") {
        return None;
    }
    let object = input.body.json()?.as_object()?;
    let document = object
        .get("query")
        .or_else(|| object.get("mutation"))?
        .as_str()?;
    let header = input.content_type().contains("json") || input.path_only().ends_with("/graphql");
    let rpc_method = graphql_operation_name(document).or_else(|| {
        object
            .get("operationName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });
    Some(ProtocolClassification::new(
        Protocol::Graphql,
        Confidence::from_signals(header, true),
        rpc_method,
    ))
}

fn detect_graphql_ws(input: &SniffInput) -> Option<ProtocolClassification> {
    let upgrade = input
        .headers
        .get("Upgrade")
        .is_some_and(|u| u.eq_ignore_ascii_case("websocket"))
        || input.status_code == Some(101);
    if !upgrade {
        return None;
    }
    let subprotocol = input.header_anywhere("Sec-WebSocket-Protocol")?;
    let graphql = subprotocol
        .split(',')
        .map(str::trim)
        .any(|p| p.eq_ignore_ascii_case("graphql-ws") || p.eq_ignore_ascii_case("graphql-transport-ws"));
    if !graphql {
        return None;
    }
    let message_type = input
        .body
        .json()
        .and_then(|v| v.get("type"))
        .and_then(Value::as_str);
    let body = matches!(message_type, Some("connection_init" | "subscribe" | "start"));
    let rpc_method = input
        .body
        .json()
        .and_then(|v| v.pointer("/payload/query"))
        .and_then(Value::as_str)
        .and_then(graphql_operation_name);
    Some(ProtocolClassification::new(
        Protocol::GraphqlWs,
        Confidence::from_signals(true, body),
        rpc_method,
    ))
}

/// Operation named by a SOAPAction header or a SOAP 1.2 `action` parameter.
pub fn soap_action_operation(action: &str) -> Option<String> {
    let action = action.trim().trim_matches('"').trim();
    let operation = match action.rsplit_once('#') {
        Some((_, op)) => op,
        None => action.rsplit('/').next().unwrap_or(action),
    };
    if operation.is_empty() {
        None
    } else {
        Some(operation.to_string())
    }
}

fn content_type_action(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("action="))
}

fn detect_soap(input: &SniffInput) -> Option<ProtocolClassification> {
    let text = match input.body {
        BodyDecoding::Xml(text) => text.as_str(),
        _ => return None,
    };
    let root = xml::root_element(text)?;
    if !root.is_soap_envelope() {
        return None;
    }
    let ct = input.content_type();
    let soap_action = input.headers.get("SOAPAction");
    let header = soap_action.is_some() || ct.contains("application/soap+xml");
    let rpc_method = soap_action
        .and_then(soap_action_operation)
        .or_else(|| {
            input
                .headers
                .content_type()
                .and_then(content_type_action)
                .and_then(soap_action_operation)
        })
        .or_else(|| xml::soap_body_operation(text));
    Some(ProtocolClassification::new(
        Protocol::Soap,
        Confidence::from_signals(header, true),
        rpc_method,
    ))
}

fn detect_xml_rpc(input: &SniffInput) -> Option<ProtocolClassification> {
    let text = match input.body {
        BodyDecoding::Xml(text) => text.as_str(),
        _ => return None,
    };
    let root = xml::root_element(text)?;
    if root.local_name != "methodCall" {
        return None;
    }
    let header = input.content_type().contains("xml") || input.path_only().ends_with("/RPC2");
    Some(ProtocolClassification::new(
        Protocol::XmlRpc,
        Confidence::from_signals(header, true),
        xml::xml_rpc_method_name(text),
    ))
}

/// First Engine.IO packet of a payload, without an EIO3 `<length>:` prefix.
pub fn first_engine_io_packet(payload: &str) -> Option<&str> {
    static LENGTH_PREFIX: OnceLock<Regex> = OnceLock::new();
    let prefix = LENGTH_PREFIX.get_or_init(|| Regex::new(r"^\d+:").expect("valid length prefix pattern"));

    let first = payload.trim_start().split('\u{1e}').next()?;
    let packet = match prefix.find(first) {
        Some(m) => &first[m.end()..],
        None => first,
    };
    match packet.chars().next() {
        Some('0'..='6') => Some(packet),
        _ => None,
    }
}

/// Event name and arguments of a `42[...]` Socket.IO event packet, with an
/// optional namespace and ack id.
pub fn socket_io_event(packet: &str) -> Option<(String, Vec<Value>)> {
    let rest = packet.strip_prefix("42")?;
    let rest = if rest.starts_with('/') {
        rest.split_once(',').map(|(_, r)| r)?
    } else {
        rest
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut items = match serde_json::from_str::<Value>(rest).ok()? {
        Value::Array(items) => items,
        _ => return None,
    };
    if items.is_empty() {
        return None;
    }
    let name = items.remove(0).as_str()?.to_string();
    Some((name, items))
}

/// Payload carrying the Socket.IO traffic: the request body, or the response
/// body for polling GETs.
pub fn socket_io_payload<'a>(input: &SniffInput<'a>) -> Option<std::borrow::Cow<'a, str>> {
    if let Some(text) = input.body.text() {
        if !text.trim().is_empty() {
            return Some(text);
        }
    }
    if input.method.eq_ignore_ascii_case("GET") {
        return input.response_body.and_then(BodyDecoding::text);
    }
    None
}

fn detect_socket_io(input: &SniffInput) -> Option<ProtocolClassification> {
    if !input.path_only().starts_with("/socket.io/") {
        return None;
    }
    let payload = socket_io_payload(input)?;
    let packet = first_engine_io_packet(&payload)?;
    let rpc_method = socket_io_event(packet).map(|(name, _)| name);
    Some(ProtocolClassification::new(
        Protocol::SocketIo,
        Confidence::from_signals(input.has_query_param("EIO"), true),
        rpc_method,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::CapturedResponse;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn exchange(method: &str, path: &str) -> CapturedExchange {
        CapturedExchange::new("x1", Utc.timestamp_opt(1_700_000_000, 0).unwrap(), method, "api.local", path)
    }

    #[test]
    fn json_rpc_single_and_batch() {
        let single = exchange("POST", "/rpc").with_json_body(&json!({"jsonrpc": "2.0", "method": "getUser", "id": 7}));
        let c = classify(&single);
        assert_eq!(c.protocol, Protocol::JsonRpc);
        assert_eq!(c.rpc_method.as_deref(), Some("getUser"));
        assert!(!c.batch);
        assert_eq!(c.confidence, Confidence::High);

        let batch = exchange("POST", "/rpc").with_json_body(&json!([
            {"jsonrpc": "2.0", "method": "getUser", "id": 1},
            {"jsonrpc": "2.0", "method": "notify"}
        ]));
        let c = classify(&batch);
        assert_eq!(c.protocol, Protocol::JsonRpc);
        assert!(c.batch);
        assert_eq!(c.rpc_method.as_deref(), Some("getUser"));
    }

    #[test]
    fn json_rpc_without_content_type_is_medium() {
        let ex = exchange("POST", "/rpc").with_body(r#"{"jsonrpc":"2.0","method":"ping"}"#);
        assert_eq!(classify(&ex).confidence, Confidence::Medium);
    }

    #[test]
    fn mixed_array_is_not_json_rpc() {
        let ex = exchange("POST", "/bulk").with_json_body(&json!([{"jsonrpc": "2.0", "method": "a"}, {"x": 1}]));
        assert_eq!(classify(&ex).protocol, Protocol::Rest);
    }

    #[test]
    fn graphql_names_operation() {
        let ex = exchange("POST", "/graphql").with_json_body(&json!({
            "query": "query GetUser($id: ID!) { user(id: $id) { name } }",
            "variables": {"id": "1"}
        }));
        let c = classify(&ex);
        assert_eq!(c.protocol, Protocol::Graphql);
        assert_eq!(c.rpc_method.as_deref(), Some("GetUser"));

        let anonymous = exchange("POST", "/api").with_json_body(&json!({"query": "{ me { id } }", "operationName": "Me"}));
        assert_eq!(classify(&anonymous).rpc_method.as_deref(), Some("Me"));

        let get = exchange("GET", "/graphql").with_json_body(&json!({"query": "{ me { id } }"}));
        assert_eq!(classify(&get).protocol, Protocol::Rest);
    }

    #[test]
    fn graphql_websocket_upgrade() {
        let ex = exchange("GET", "/subscriptions")
            .with_header("Upgrade", "websocket")
            .with_header("Sec-WebSocket-Protocol", "graphql-transport-ws")
            .with_response(CapturedResponse::new(101));
        let c = classify(&ex);
        assert_eq!(c.protocol, Protocol::GraphqlWs);
        assert_eq!(c.confidence, Confidence::Medium);

        let plain_ws = exchange("GET", "/chat").with_header("Upgrade", "websocket");
        assert_eq!(classify(&plain_ws).protocol, Protocol::Rest);
    }

    #[test]
    fn soap_from_action_or_body() {
        let envelope = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><m:GetPrice xmlns:m="urn:x"/></soap:Body></soap:Envelope>"#;
        let with_action = exchange("POST", "/ws")
            .with_header("Content-Type", "text/xml")
            .with_header("SOAPAction", "\"http://example.com/stock#GetQuote\"")
            .with_body(envelope);
        let c = classify(&with_action);
        assert_eq!(c.protocol, Protocol::Soap);
        assert_eq!(c.rpc_method.as_deref(), Some("GetQuote"));
        assert_eq!(c.confidence, Confidence::High);

        let body_only = exchange("POST", "/ws").with_header("Content-Type", "text/xml").with_body(envelope);
        let c = classify(&body_only);
        assert_eq!(c.rpc_method.as_deref(), Some("GetPrice"));
        assert_eq!(c.confidence, Confidence::Medium);
    }

    #[test]
    fn xml_rpc_method_call() {
        let ex = exchange("POST", "/RPC2")
            .with_header("Content-Type", "text/xml")
            .with_body("<?xml version=\"1.0\"?><methodCall><methodName>system.listMethods</methodName><params/></methodCall>");
        let c = classify(&ex);
        assert_eq!(c.protocol, Protocol::XmlRpc);
        assert_eq!(c.rpc_method.as_deref(), Some("system.listMethods"));
    }

    #[test]
    fn grpc_web_frames() {
        let mut frame = vec![0u8, 0, 0, 0, 3];
        frame.extend_from_slice(&[8, 150, 1]);
        let ex = exchange("POST", "/helloworld.Greeter/SayHello")
            .with_header("Content-Type", "application/grpc-web+proto")
            .with_body(frame.clone());
        let c = classify(&ex);
        assert_eq!(c.protocol, Protocol::GrpcWeb);
        assert_eq!(c.rpc_method.as_deref(), Some("helloworld.Greeter/SayHello"));
        assert_eq!(c.confidence, Confidence::High);

        let text = exchange("POST", "/helloworld.Greeter/SayHello")
            .with_header("Content-Type", "application/grpc-web-text")
            .with_body(STANDARD.encode(&frame));
        assert_eq!(classify(&text).confidence, Confidence::High);

        let truncated = exchange("POST", "/x.Y/Z")
            .with_header("Content-Type", "application/grpc-web")
            .with_body(vec![0u8, 0, 0, 0, 9, 1]);
        assert_eq!(classify(&truncated).confidence, Confidence::Medium);
    }

    #[test]
    fn socket_io_events() {
        let ex = exchange("POST", "/socket.io/?EIO=4&transport=polling")
            .with_header("Content-Type", "text/plain;charset=UTF-8")
            .with_body(r#"42["chat message",{"text":"hi"}]"#);
        let c = classify(&ex);
        assert_eq!(c.protocol, Protocol::SocketIo);
        assert_eq!(c.rpc_method.as_deref(), Some("chat message"));
        assert_eq!(c.confidence, Confidence::High);

        let poll = exchange("GET", "/socket.io/")
            .with_response(CapturedResponse::new(200).with_header("Content-Type", "text/plain").with_body("97:0{\"sid\":\"abc\"}"));
        let c = classify(&poll);
        assert_eq!(c.protocol, Protocol::SocketIo);
        assert_eq!(c.rpc_method, None);
        assert_eq!(c.confidence, Confidence::Medium);
    }

    #[test]
    fn socket_io_event_parsing() {
        assert_eq!(
            socket_io_event(r#"42/chat,17["join",{"room":1}]"#),
            Some(("join".to_string(), vec![json!({"room": 1})]))
        );
        assert_eq!(socket_io_event("40"), None);
        assert_eq!(first_engine_io_packet("7oops"), None);
    }

    #[test]
    fn unmatched_is_rest() {
        let ex = exchange("GET", "/users/1").with_response(CapturedResponse::new(200).with_json_body(&json!({"id": 1})));
        assert_eq!(classify(&ex), ProtocolClassification::rest());

        let undecodable = exchange("POST", "/rpc")
            .with_header("Content-Type", "application/json")
            .with_body(vec![0xff, 0xfe]);
        assert_eq!(classify(&undecodable).protocol, Protocol::Rest);
    }

    #[test]
    fn soap_action_parsing() {
        assert_eq!(soap_action_operation("urn:svc/Do").as_deref(), Some("Do"));
        assert_eq!(soap_action_operation("\"\""), None);
        assert_eq!(grpc_method("/pkg.Svc/Call").as_deref(), Some("pkg.Svc/Call"));
        assert_eq!(grpc_method("/users/1"), None);
    }
}
