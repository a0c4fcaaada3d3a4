//! Splits an RPC exchange into the calls it carries and picks the payload
//! parts that feed each group's schemas.

use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::sniffer::{first_engine_io_packet, socket_io_event, socket_io_payload};
use crate::protocol::{Protocol, ProtocolClassification, SniffInput};

/// One RPC invocation found in an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub request: Option<Value>,
    pub response: Option<Value>,
    /// The RPC layer reported an error for this call.
    pub error: bool,
    pub batch: bool,
}

impl RpcCall {
    fn bare(method: String) -> Self {
        Self {
            method,
            request: None,
            response: None,
            error: false,
            batch: false,
        }
    }
}

fn present(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

fn json_rpc_call(request: &Value, response: Option<&Value>, batch: bool) -> Option<RpcCall> {
    let method = request.get("method")?.as_str()?.to_string();
    let error = response.and_then(|r| r.get("error")).is_some_and(|e| !e.is_null());
    let response_part = response.and_then(|r| present(r.get("result")).or_else(|| present(r.get("error"))));
    Some(RpcCall {
        method,
        request: present(request.get("params")),
        response: response_part,
        error,
        batch,
    })
}

fn json_rpc_calls(input: &SniffInput) -> Vec<RpcCall> {
    let response = input.response_body.and_then(|b| b.json());
    match input.body.json() {
        Some(Value::Array(elements)) => {
            let by_id: HashMap<String, &Value> = match response {
                Some(Value::Array(replies)) => replies
                    .iter()
                    .filter_map(|r| r.get("id").filter(|id| !id.is_null()).map(|id| (id.to_string(), r)))
                    .collect(),
                _ => HashMap::new(),
            };
            elements
                .iter()
                .filter_map(|element| {
                    let reply = element
                        .get("id")
                        .filter(|id| !id.is_null())
                        .and_then(|id| by_id.get(&id.to_string()).copied());
                    json_rpc_call(element, reply, true)
                })
                .collect()
        }
        Some(single) => json_rpc_call(single, response, false).into_iter().collect(),
        None => Vec::new(),
    }
}

fn graphql_call(input: &SniffInput, classification: &ProtocolClassification) -> RpcCall {
    let response = input.response_body.and_then(|b| b.json());
    let error = response
        .and_then(|r| r.get("errors"))
        .and_then(Value::as_array)
        .is_some_and(|errors| !errors.is_empty());
    RpcCall {
        method: classification.method_or_anonymous().to_string(),
        request: present(input.body.json().and_then(|b| b.get("variables"))),
        response: present(response.and_then(|r| r.get("data"))),
        error,
        batch: false,
    }
}

fn socket_io_call(input: &SniffInput, classification: &ProtocolClassification) -> RpcCall {
    let event = socket_io_payload(input)
        .and_then(|payload| first_engine_io_packet(&payload).and_then(socket_io_event));
    match event {
        Some((name, args)) => RpcCall {
            request: Some(Value::Array(args)),
            ..RpcCall::bare(name)
        },
        None => RpcCall::bare(classification.method_or_anonymous().to_string()),
    }
}

/// Calls carried by an exchange already classified as RPC.
///
/// JSON-RPC batches yield one call per element, paired with the reply of the
/// same id. SOAP, XML-RPC and gRPC-web calls carry no JSON payload parts.
pub fn extract_calls(input: &SniffInput, classification: &ProtocolClassification) -> Vec<RpcCall> {
    match classification.protocol {
        Protocol::JsonRpc => json_rpc_calls(input),
        Protocol::Graphql => vec![graphql_call(input, classification)],
        Protocol::GraphqlWs => vec![RpcCall {
            request: present(input.body.json().and_then(|b| b.pointer("/payload/variables"))),
            ..RpcCall::bare(classification.method_or_anonymous().to_string())
        }],
        Protocol::SocketIo => vec![socket_io_call(input, classification)],
        Protocol::Soap | Protocol::XmlRpc | Protocol::GrpcWeb => {
            vec![RpcCall::bare(classification.method_or_anonymous().to_string())]
        }
        Protocol::Rest | Protocol::Unknown => Vec::new(),
    }
}
