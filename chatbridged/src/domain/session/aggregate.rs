use super::events::{SessionDomainEvent, SessionEventEnvelope};
use super::value_object::{SessionId, UserId};
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Closed => "closed",
        }
    }

    /// A session is reusable until its connection has terminated.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionStatus::Closed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Logout or process shutdown.
    Detached,
    /// The backend closed its end of the stream.
    RemoteClosed,
    /// Connect or io failure on the stream.
    TransportFailure(String),
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Detached => "detached",
            CloseReason::RemoteClosed => "remote_closed",
            CloseReason::TransportFailure(_) => "transport_failure",
        }
    }
}

/// Lifecycle of one backend connection owned by a web user.
#[derive(Clone, Debug)]
pub struct BackendSession {
    id: SessionId,
    user: UserId,
    status: SessionStatus,
    opened_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
}

impl BackendSession {
    pub fn open(user: UserId) -> (Self, SessionEventEnvelope) {
        let id = SessionId::new();
        let session = Self {
            id,
            user: user.clone(),
            status: SessionStatus::Connecting,
            opened_at: Utc::now(),
            connected_at: None,
        };
        let event = SessionEventEnvelope::new(id, user, SessionDomainEvent::Opened);
        (session, event)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn mark_connected(&mut self) -> Result<SessionEventEnvelope, String> {
        match self.status {
            SessionStatus::Connecting => {
                self.status = SessionStatus::Connected;
                self.connected_at = Some(Utc::now());
                Ok(self.envelope(SessionDomainEvent::Connected))
            }
            SessionStatus::Connected => Err("session already connected".into()),
            SessionStatus::Closed => Err("session already closed".into()),
        }
    }

    /// Closing is terminal; a second close reports `None`.
    pub fn close(&mut self, reason: CloseReason) -> Option<SessionEventEnvelope> {
        if self.status == SessionStatus::Closed {
            return None;
        }
        self.status = SessionStatus::Closed;
        Some(self.envelope(SessionDomainEvent::Closed { reason }))
    }

    fn envelope(&self, event: SessionDomainEvent) -> SessionEventEnvelope {
        SessionEventEnvelope::new(self.id, self.user.clone(), event)
    }
}
