mod loopback;
mod tcp;

pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use tcp::TcpBackendTransport;
