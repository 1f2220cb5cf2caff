pub mod framing;
pub mod transport;
