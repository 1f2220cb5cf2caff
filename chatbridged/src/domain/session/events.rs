use super::aggregate::CloseReason;
use super::value_object::{SessionId, UserId};
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionDomainEvent {
    Opened,
    Connected,
    Closed { reason: CloseReason },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEventEnvelope {
    pub session_id: SessionId,
    pub user: UserId,
    pub occurred_at: DateTime<Utc>,
    pub event: SessionDomainEvent,
}

impl SessionEventEnvelope {
    pub fn new(session_id: SessionId, user: UserId, event: SessionDomainEvent) -> Self {
        Self {
            session_id,
            user,
            occurred_at: Utc::now(),
            event,
        }
    }
}
