use crate::domain::session::UserId;
use crate::ports::{BackendStream, BackendTransport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Backend end of a loopback connection.
pub struct LoopbackPeer {
    pub user: UserId,
    pub stream: DuplexStream,
}

/// In-process transport: each open creates a duplex pipe and hands the far
/// end to whoever plays the backend.
pub struct LoopbackTransport {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    opened: AtomicUsize,
    refusing: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            peers,
            opened: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
        };
        (transport, accepted)
    }

    /// Number of streams opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Make subsequent opens fail as if the backend were down.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendTransport for LoopbackTransport {
    fn describe(&self) -> String {
        "loopback".to_string()
    }

    async fn open(&self, user: &UserId) -> Result<BackendStream, TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("loopback refusing".into()));
        }
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.peers
            .send(LoopbackPeer {
                user: user.clone(),
                stream: remote,
            })
            .map_err(|_| TransportError::Unavailable("loopback backend gone".into()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = tokio::io::split(local);
        Ok(BackendStream::new(reader, writer))
    }
}
