pub mod framing_port;
pub mod transport_port;

pub use framing_port::{Completion, Reply, ReplyFraming, ReplyRequest};
pub use transport_port::{BackendStream, BackendTransport, TransportError};
