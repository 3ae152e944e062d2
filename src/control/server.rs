//! TCP control server

use super::protocol::{parse_command, render_error, render_response};
use super::surface::ControlSurface;
use super::ControlError;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_LINE_LENGTH: usize = 1024;

pub struct ControlServer {
    listener: TcpListener,
    surface: Arc<ControlSurface>,
}

impl ControlServer {
    pub async fn bind(addr: &str, surface: Arc<ControlSurface>) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ControlServer { listener, surface })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Control server listening on {}", addr),
            Err(e) => warn!("Control server listening on unknown address: {}", e),
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let surface = self.surface.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, surface, shutdown).await {
                            debug!(%peer, error = %e, "Control connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept control connection: {}", e);
                }
            }
        }
        info!("Control server stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    surface: Arc<ControlSurface>,
    shutdown: CancellationToken,
) -> Result<(), ControlError> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next() => line,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_command(&line) {
            Ok(command) => match surface.execute(command).await {
                Ok(response) => render_response(&response),
                Err(e) => render_error(&e.to_string()),
            },
            Err(e) => render_error(&e.to_string()),
        };
        lines.send(reply).await?;
    }
}
