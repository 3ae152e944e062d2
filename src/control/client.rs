//! Client side of the control protocol

use super::ControlError;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

pub struct ControlClient {
    lines: Framed<TcpStream, LinesCodec>,
}

impl ControlClient {
    pub async fn connect(addr: &str) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(ControlClient {
            lines: Framed::new(stream, LinesCodec::new()),
        })
    }

    /// Send one command line and return the raw response line
    pub async fn send(&mut self, command: &str) -> Result<String, ControlError> {
        self.lines.send(command).await?;
        match self.lines.next().await {
            Some(line) => Ok(line?),
            None => Err(ControlError::NoResponse),
        }
    }

    /// Like `send`, decoding the response as JSON
    pub async fn request(&mut self, command: &str) -> Result<serde_json::Value, ControlError> {
        let line = self.send(command).await?;
        serde_json::from_str(&line).map_err(|e| ControlError::Codec(e.to_string()))
    }
}
