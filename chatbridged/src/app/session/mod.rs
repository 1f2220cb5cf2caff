mod connection;
mod handle;
mod registry;

pub use handle::Session;
pub use registry::SessionRegistry;
