//! JSON-RPC 2.0 envelopes, framed one message per line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

pub mod codes {
  pub const PARSE_ERROR: i64 = -32700;
  pub const INVALID_REQUEST: i64 = -32600;
  pub const METHOD_NOT_FOUND: i64 = -32601;
  pub const INVALID_PARAMS: i64 = -32602;
  pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  pub jsonrpc: String,
  pub method: String,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub params: Value,
  /// Absent for notifications.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<Value>,
}

impl Request {
  pub fn new(method: impl Into<String>, params: Value, id: Option<Value>) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.to_string(),
      method: method.into(),
      params,
      id,
    }
  }

  pub fn is_notification(&self) -> bool {
    self.id.is_none()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
  pub code: i64,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

impl ErrorObject {
  pub fn new(code: i64, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
      data: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub jsonrpc: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorObject>,
  pub id: Value,
}

impl Response {
  pub fn success(id: Value, result: Value) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.to_string(),
      result: Some(result),
      error: None,
      id,
    }
  }

  pub fn failure(id: Value, error: ErrorObject) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.to_string(),
      result: None,
      error: Some(error),
      id,
    }
  }
}

/// Error returned by a method handler. `InvalidParams` maps to -32602,
/// everything else to -32603 unless a code is given explicitly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
  #[error("{0}")]
  InvalidParams(String),
  #[error("{0}")]
  Internal(String),
  #[error("{message}")]
  Custom {
    code: i64,
    message: String,
    data: Option<Value>,
  },
}

impl HandlerError {
  pub fn invalid_params(message: impl Into<String>) -> Self {
    Self::InvalidParams(message.into())
  }

  pub fn internal(message: impl std::fmt::Display) -> Self {
    Self::Internal(message.to_string())
  }

  pub fn to_error_object(&self) -> ErrorObject {
    match self {
      HandlerError::InvalidParams(m) => ErrorObject::new(codes::INVALID_PARAMS, m.clone()),
      HandlerError::Internal(m) => ErrorObject::new(codes::INTERNAL_ERROR, m.clone()),
      HandlerError::Custom {
        code,
        message,
        data,
      } => ErrorObject {
        code: *code,
        message: message.clone(),
        data: data.clone(),
      },
    }
  }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// Deserialize handler params, reporting failures as invalid params.
/// Missing params are treated as an empty object.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, HandlerError> {
  let params = if params.is_null() { json!({}) } else { params };
  serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))
}

/// Parse and validate one inbound line. On failure returns the id to answer
/// with (null when it could not be read) and the error.
pub fn parse_request(line: &str) -> Result<Request, (Value, ErrorObject)> {
  let value: Value = serde_json::from_str(line).map_err(|e| {
    (
      Value::Null,
      ErrorObject::new(codes::PARSE_ERROR, format!("parse error: {e}")),
    )
  })?;
  let invalid = |id: Value, why: &str| {
    (
      id,
      ErrorObject::new(codes::INVALID_REQUEST, format!("invalid request: {why}")),
    )
  };

  let Value::Object(map) = &value else {
    return Err(invalid(Value::Null, "expected an object"));
  };
  let id = map.get("id").cloned();
  let reply_id = id.clone().unwrap_or(Value::Null);
  if let Some(id) = &id
    && !(id.is_string() || id.is_number() || id.is_null())
  {
    return Err(invalid(Value::Null, "id must be a string or number"));
  }
  if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
    return Err(invalid(reply_id, "jsonrpc must be \"2.0\""));
  }
  let Some(method) = map.get("method").and_then(Value::as_str) else {
    return Err(invalid(reply_id, "method is required"));
  };
  Ok(Request {
    jsonrpc: JSONRPC_VERSION.to_string(),
    method: method.to_string(),
    params: map.get("params").cloned().unwrap_or(Value::Null),
    id,
  })
}

/// Serialize a message as one line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
  let mut line = serde_json::to_string(message)?;
  line.push('\n');
  Ok(line)
}
