//! How a coordinator reaches its nodes

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use grizzly_common::error::{ReplicationError, Result};

use crate::protocol::{decode_line, encode_line, Request, Response};
use crate::server::ParticipantHandler;

/// Request/response channel to a node addressed as `host:port`
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send(&self, address: &str, request: &Request) -> Result<Response>;
}

/// One TCP connection per request, bounded by a timeout
#[derive(Debug, Clone)]
pub struct TcpTransport {
    request_timeout: Duration,
}

impl TcpTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    async fn round_trip(address: &str, request: &Request) -> Result<Response> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| ReplicationError::Unreachable(format!("{} ({})", address, e)))?;
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(encode_line(request)?.as_bytes())
            .await?;

        let mut line = String::new();
        let n = BufReader::new(read_half).read_line(&mut line).await?;
        if n == 0 {
            return Err(
                ReplicationError::Transport(format!("{} closed the connection", address)).into(),
            );
        }
        decode_line(&line)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl NodeTransport for TcpTransport {
    async fn send(&self, address: &str, request: &Request) -> Result<Response> {
        let millis = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout(self.request_timeout, Self::round_trip(address, request))
            .await
            .map_err(|_| ReplicationError::Timeout(millis))?
    }
}

/// Routes requests straight to handlers in the same process
#[derive(Default)]
pub struct InProcessTransport {
    handlers: DashMap<String, Arc<dyn ParticipantHandler>>,
    partitioned: DashSet<String>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: impl Into<String>, handler: Arc<dyn ParticipantHandler>) {
        self.handlers.insert(address.into(), handler);
    }

    /// Make `address` unreachable until [`heal`](Self::heal)
    pub fn partition(&self, address: &str) {
        self.partitioned.insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.partitioned.remove(address);
    }
}

#[async_trait]
impl NodeTransport for InProcessTransport {
    async fn send(&self, address: &str, request: &Request) -> Result<Response> {
        if self.partitioned.contains(address) {
            return Err(ReplicationError::Unreachable(address.to_string()).into());
        }
        let handler = self
            .handlers
            .get(address)
            .map(|h| h.value().clone())
            .ok_or_else(|| ReplicationError::Unreachable(address.to_string()))?;
        Ok(handler.handle(request.clone()).await)
    }
}
