use crate::domain::session::UserId;
use async_trait::async_trait;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub type BackendReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BackendWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of one user's connection to the backend.
pub struct BackendStream {
    pub reader: BackendReader,
    pub writer: BackendWriter,
}

impl BackendStream {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("backend stream error: {0}")]
    Io(#[from] io::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Human-readable target, used in logs and `/status`.
    fn describe(&self) -> String;

    async fn open(&self, user: &UserId) -> Result<BackendStream, TransportError>;
}
