//! TCP server exposing a participant to remote coordinators

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use grizzly_common::error::Result;

use crate::protocol::{decode_line, encode_line, Request, Response};

/// Whatever answers requests on a replica
#[async_trait]
pub trait ParticipantHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}

/// Participant server
pub struct ParticipantServer {
    listener: TcpListener,
}

impl ParticipantServer {
    /// Bind to `addr`; port 0 picks a free port
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server until the task is dropped
    pub async fn run(self, handler: Arc<dyn ParticipantHandler>) -> Result<()> {
        self.run_until(handler, std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves
    pub async fn run_until(
        self,
        handler: Arc<dyn ParticipantHandler>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Participant server listening on {}", addr);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutting down participant server on {}", addr);
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, peer, handler).await {
                                error!("Connection error from {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn ParticipantHandler>,
) -> Result<()> {
    debug!("New coordinator connection from {}", peer);
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_line::<Request>(&line) {
            Ok(request) => {
                debug!("{} request from {}", request.name(), peer);
                handler.handle(request).await
            }
            Err(e) => Response::error(format!("malformed request: {}", e)),
        };
        write_half
            .write_all(encode_line(&response)?.as_bytes())
            .await?;
    }

    debug!("Connection closed from {}", peer);
    Ok(())
}
