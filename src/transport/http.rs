//! Server-sent events over HTTP

use super::{frame_stream, ConnectFuture, Transport, TransportError};
use crate::config::{AuthScheme, UpstreamSettings};
use crate::credential::Credential;
use reqwest::header::{ACCEPT, CACHE_CONTROL, COOKIE};
use reqwest::StatusCode;
use tracing::debug;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    auth: AuthScheme,
}

impl HttpTransport {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(HttpTransport {
            client,
            endpoint: settings.endpoint.clone(),
            auth: settings.auth.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn connect(&self, credential: &Credential) -> ConnectFuture {
        let request = self
            .client
            .get(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let request = match &self.auth {
            AuthScheme::Bearer => request.bearer_auth(&credential.token),
            AuthScheme::Cookie { cookie_name } => {
                request.header(COOKIE, format!("{}={}", cookie_name, credential.token))
            }
        };

        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(TransportError::AuthRejected {
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }

            debug!(%endpoint, "Upstream accepted event stream");
            Ok(frame_stream(response.bytes_stream()))
        })
    }
}
