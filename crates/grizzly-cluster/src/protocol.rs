//! Wire protocol between a coordinator and its replicas
//!
//! One JSON object per line in each direction; every request gets exactly
//! one response on the same connection.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use grizzly_common::error::{Error, ReplicationError, Result};
use grizzly_storage::{Table, WalEntry};
use grizzly_txn::Proposal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Health check
    Ping,
    Query { text: String },
    Prepare { proposal: Proposal },
    Commit { txn_id: String },
    Abort { txn_id: String },
    /// Apply one shipped WAL entry
    Replicate { entry: WalEntry },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Query { .. } => "query",
            Request::Prepare { .. } => "prepare",
            Request::Commit { .. } => "commit",
            Request::Abort { .. } => "abort",
            Request::Replicate { .. } => "replicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Ack,
    Rows { table: Table },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl ToString) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }

    /// Expect an `Ack`
    pub fn into_ack(self) -> Result<()> {
        match self {
            Response::Ack => Ok(()),
            other => Err(unexpected(other, "ack")),
        }
    }

    /// Expect a `Rows` payload
    pub fn into_table(self) -> Result<Table> {
        match self {
            Response::Rows { table } => Ok(table),
            other => Err(unexpected(other, "rows")),
        }
    }
}

fn unexpected(response: Response, wanted: &str) -> Error {
    let message = match response {
        Response::Error { message } => message,
        other => format!("expected {}, got {:?}", wanted, other),
    };
    ReplicationError::Transport(message).into()
}

/// Serialize a message as one newline-terminated line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}
