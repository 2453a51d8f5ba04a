//! Agent wire protocol.
//!
//! Newline-delimited JSON over a Unix stream socket, one request and one
//! response per connection:
//!
//! ```json
//! {"id":"7d0c...","method":"create_network","params":{"containerIps":[...],"hostIfName":"ipv1a2b"}}
//! {"id":"7d0c...","status":"ok","result":{"successful":true,"errorMessage":""}}
//! {"id":"7d0c...","status":"error","code":"unimplemented","message":"delete_network"}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent method names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    CreateNetwork,
    DeleteNetwork,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::CreateNetwork => "create_network",
            Method::DeleteNetwork => "delete_network",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the response with this request
    pub id: String,
    pub method: Method,
    pub params: serde_json::Value,
}

impl Request {
    /// Wrap `params` in an envelope with a fresh id
    pub fn new<P: Serialize>(method: Method, params: &P) -> serde_json::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params: serde_json::to_value(params)?,
        })
    }

    /// Decode the typed params carried by this envelope
    pub fn params<P: DeserializeOwned>(&self) -> serde_json::Result<P> {
        P::deserialize(&self.params)
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

/// Error categories an agent may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unimplemented,
    InvalidArgument,
    Internal,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Internal => "internal",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(code)
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        id: String,
        result: serde_json::Value,
    },
    Error {
        id: String,
        code: ErrorCode,
        message: String,
    },
}

impl Response {
    /// Successful response carrying `result`
    pub fn ok<R: Serialize>(id: impl Into<String>, result: &R) -> serde_json::Result<Self> {
        Ok(Response::Ok {
            id: id.into(),
            result: serde_json::to_value(result)?,
        })
    }

    pub fn error(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            id: id.into(),
            code,
            message: message.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Response::Ok { id, .. } | Response::Error { id, .. } => id,
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}
