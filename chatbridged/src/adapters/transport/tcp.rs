use crate::domain::session::UserId;
use crate::ports::{BackendStream, BackendTransport, TransportError};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens one plain TCP connection per user to the chat backend.
pub struct TcpBackendTransport {
    host: String,
    port: u16,
}

impl TcpBackendTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl BackendTransport for TcpBackendTransport {
    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&self, user: &UserId) -> Result<BackendStream, TransportError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| TransportError::Connect {
                target: self.describe(),
                source,
            })?;
        stream.set_nodelay(true)?;
        debug!(%user, peer = ?stream.peer_addr().ok(), "backend tcp stream opened");
        let (reader, writer) = stream.into_split();
        Ok(BackendStream::new(reader, writer))
    }
}
