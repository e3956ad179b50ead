use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;
use crate::message::{Message, Payload};

pub const JSON_RPC_VERSION: &str = "2.0";

/// Internal outcome codes, mapped onto JSON-RPC and HTTP codes at the user-facing edge.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError = 0,
    UserMessageParseError,
    UnsupportedDonIdError,
    InternalHandlerError,
    RequestTimeoutError,
    NodeResponseEncodingError,
    FatalError,
}

const DEFAULT_JSON_RPC_ERROR_CODE: i64 = -32000;
const DEFAULT_HTTP_STATUS: u16 = 500;

const JSON_RPC_ERROR_CODES: [(ErrorCode, i64); 7] = [
    (ErrorCode::NoError, 0),
    (ErrorCode::UserMessageParseError, -32700),
    (ErrorCode::UnsupportedDonIdError, -32602),
    (ErrorCode::InternalHandlerError, -32600),
    (ErrorCode::RequestTimeoutError, -32000),
    (ErrorCode::NodeResponseEncodingError, -32603),
    (ErrorCode::FatalError, -32000),
];

const HTTP_STATUS_CODES: [(ErrorCode, u16); 7] = [
    (ErrorCode::NoError, 200),
    (ErrorCode::UserMessageParseError, 400),
    (ErrorCode::UnsupportedDonIdError, 400),
    (ErrorCode::InternalHandlerError, 400),
    (ErrorCode::RequestTimeoutError, 504),
    (ErrorCode::NodeResponseEncodingError, 500),
    (ErrorCode::FatalError, 500),
];

impl ErrorCode {
    pub fn from_i32(code: i32) -> Option<ErrorCode> {
        JSON_RPC_ERROR_CODES
            .iter()
            .map(|(error_code, _)| *error_code)
            .find(|error_code| *error_code as i32 == code)
    }

    pub fn to_json_rpc_code(self) -> i64 {
        json_rpc_code(self as i32)
    }

    pub fn to_http_status(self) -> u16 {
        http_status(self as i32)
    }
}

/// JSON-RPC error code for a raw `ErrorCode` value; unknown values map to -32000.
pub fn json_rpc_code(code: i32) -> i64 {
    JSON_RPC_ERROR_CODES
        .iter()
        .find(|(error_code, _)| *error_code as i32 == code)
        .map(|(_, json_rpc)| *json_rpc)
        .unwrap_or(DEFAULT_JSON_RPC_ERROR_CODE)
}

/// HTTP status for a raw `ErrorCode` value; unknown values map to 500.
pub fn http_status(code: i32) -> u16 {
    HTTP_STATUS_CODES
        .iter()
        .find(|(error_code, _)| *error_code as i32 == code)
        .map(|(_, status)| *status)
        .unwrap_or(DEFAULT_HTTP_STATUS)
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NoError",
            ErrorCode::UserMessageParseError => "UserMessageParseError",
            ErrorCode::UnsupportedDonIdError => "UnsupportedDONIdError",
            ErrorCode::InternalHandlerError => "InternalHandlerError",
            ErrorCode::RequestTimeoutError => "RequestTimeoutError",
            ErrorCode::NodeResponseEncodingError => "NodeResponseEncodingError",
            ErrorCode::FatalError => "FatalError",
        };
        write!(f, "{}", name)
    }
}

/// Converts messages to and from their wire envelopes.
pub trait Codec: Send + Sync {
    fn decode_request(&self, data: &[u8]) -> crate::Result<Message>;
    fn encode_request(&self, msg: &Message) -> crate::Result<Vec<u8>>;
    fn decode_response(&self, data: &[u8]) -> crate::Result<Message>;
    fn encode_response(&self, msg: &Message) -> crate::Result<Vec<u8>>;
    fn encode_new_error_response(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
        data: Option<Payload>,
    ) -> crate::Result<Vec<u8>>;
}

#[derive(Serialize, Deserialize, Debug)]
struct JsonRpcRequest {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Option<Message>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub data: Payload,
}

/// JSON-RPC 2.0 envelopes whose `params`/`result` carry the whole `Message`.
///
/// The envelope's `id` and `method` are authoritative and overwrite the body's
/// `message_id` and `method` on decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcCodec;

impl Codec for JsonRpcCodec {
    fn decode_request(&self, data: &[u8]) -> crate::Result<Message> {
        let request: JsonRpcRequest = serde_json::from_slice(data)?;
        if request.jsonrpc != JSON_RPC_VERSION {
            return Err(Error::Codec(String::from("incorrect jsonrpc version")));
        }
        if request.method.is_empty() {
            return Err(Error::Codec(String::from("empty method field")));
        }
        let mut msg = request
            .params
            .ok_or_else(|| Error::Codec(String::from("invalid params")))?;
        msg.body.message_id = request.id;
        msg.body.method = request.method;
        Ok(msg)
    }

    fn encode_request(&self, msg: &Message) -> crate::Result<Vec<u8>> {
        let request = JsonRpcRequest {
            jsonrpc: String::from(JSON_RPC_VERSION),
            id: msg.body.message_id.clone(),
            method: msg.body.method.clone(),
            params: Some(msg.clone()),
        };
        Ok(serde_json::to_vec(&request)?)
    }

    fn decode_response(&self, data: &[u8]) -> crate::Result<Message> {
        let response: JsonRpcResponse = serde_json::from_slice(data)?;
        if response.jsonrpc != JSON_RPC_VERSION {
            return Err(Error::Codec(String::from("incorrect jsonrpc version")));
        }
        if let Some(error) = response.error {
            return Err(Error::Codec(format!(
                "received non-empty error field: {} ({})",
                error.message, error.code
            )));
        }
        let mut msg = response
            .result
            .ok_or_else(|| Error::Codec(String::from("invalid result")))?;
        msg.body.message_id = response.id;
        Ok(msg)
    }

    fn encode_response(&self, msg: &Message) -> crate::Result<Vec<u8>> {
        let response = JsonRpcResponse {
            jsonrpc: String::from(JSON_RPC_VERSION),
            id: msg.body.message_id.clone(),
            result: Some(msg.clone()),
            error: None,
        };
        Ok(serde_json::to_vec(&response)?)
    }

    fn encode_new_error_response(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
        data: Option<Payload>,
    ) -> crate::Result<Vec<u8>> {
        let response = JsonRpcResponse {
            jsonrpc: String::from(JSON_RPC_VERSION),
            id: String::from(id),
            result: None,
            error: Some(JsonRpcError {
                code: code.to_json_rpc_code(),
                message: String::from(message),
                data: data.unwrap_or_default(),
            }),
        };
        Ok(serde_json::to_vec(&response)?)
    }
}
