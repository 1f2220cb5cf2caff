pub mod aggregate;
pub mod buffer;
pub mod events;
pub mod value_object;

pub use aggregate::{BackendSession, CloseReason, SessionStatus};
pub use buffer::ReplyInbox;
pub use events::{SessionDomainEvent, SessionEventEnvelope};
pub use value_object::{SessionError, SessionId, UserId};
