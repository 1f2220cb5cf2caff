use crate::domain::protocol::LINE_TERMINATOR;
use crate::domain::session::{
    BackendSession, CloseReason, ReplyInbox, SessionEventEnvelope, SessionId, SessionStatus,
    UserId,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Carried from one admitted request to the next.
#[derive(Debug)]
pub struct Turn {
    menu_pending: bool,
}

impl Turn {
    /// Whether the backend still owes the menu that closes its last reply.
    /// True for a fresh session, which has the greeting and menu ahead.
    pub fn menu_pending(&self) -> bool {
        self.menu_pending
    }

    pub fn set_menu_pending(&mut self, pending: bool) {
        self.menu_pending = pending;
    }
}

/// Live handle to one user's backend connection.
///
/// Lines are queued to the connection task, bytes read by that task land in
/// the inbox. `admit` hands out the session's single command slot.
pub struct Session {
    state: Mutex<BackendSession>,
    inbox: ReplyInbox,
    outbound: mpsc::UnboundedSender<String>,
    admission: tokio::sync::Mutex<Turn>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    detached: AtomicBool,
}

pub(crate) struct SessionChannels {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub shutdown: oneshot::Receiver<()>,
}

impl Session {
    pub(crate) fn open(user: UserId) -> (Self, SessionChannels, SessionEventEnvelope) {
        let (state, opened) = BackendSession::open(user);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = Self {
            state: Mutex::new(state),
            inbox: ReplyInbox::new(),
            outbound: outbound_tx,
            admission: tokio::sync::Mutex::new(Turn { menu_pending: true }),
            shutdown: Mutex::new(Some(shutdown_tx)),
            detached: AtomicBool::new(false),
        };
        let channels = SessionChannels {
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        (session, channels, opened)
    }

    pub fn id(&self) -> SessionId {
        self.state().id()
    }

    pub fn user(&self) -> UserId {
        self.state().user().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.state().opened_at()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.state().connected_at()
    }

    pub fn inbox(&self) -> &ReplyInbox {
        &self.inbox
    }

    /// Queue lines for the backend in order, each with the line terminator.
    ///
    /// Never waits and never fails: a dead connection simply drops them and
    /// the caller's next reply wait comes back empty.
    pub fn write_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let framed = format!("{}{}", line.as_ref(), LINE_TERMINATOR);
            if self.outbound.send(framed).is_err() {
                debug!(session_id = %self.id(), "dropping line for finished connection");
            }
        }
    }

    /// Wait for exclusive use of the session. Requests are admitted in the
    /// order they asked.
    pub async fn admit(&self) -> tokio::sync::MutexGuard<'_, Turn> {
        self.admission.lock().await
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_connected(&self) -> Option<SessionEventEnvelope> {
        self.state().mark_connected().ok()
    }

    pub(crate) fn mark_closed(&self, reason: CloseReason) -> Option<SessionEventEnvelope> {
        self.state().close(reason)
    }

    /// Silence close reporting, then stop the connection task. Returns the
    /// close event when this call is the one that closed the session.
    pub(crate) fn detach(&self) -> Option<SessionEventEnvelope> {
        self.detached.store(true, Ordering::SeqCst);
        let stop = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        self.mark_closed(CloseReason::Detached)
    }

    fn state(&self) -> MutexGuard<'_, BackendSession> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionDomainEvent;

    #[tokio::test]
    async fn write_lines_appends_terminators_in_order() {
        let (session, mut channels, _) = Session::open(UserId::new("ana").unwrap());
        session.write_lines(["1", "luis", "hola"]);
        let mut written = Vec::new();
        while let Ok(line) = channels.outbound.try_recv() {
            written.push(line);
        }
        assert_eq!(written, vec!["1\n", "luis\n", "hola\n"]);
    }

    #[tokio::test]
    async fn detach_fires_shutdown_once() {
        let (session, mut channels, _) = Session::open(UserId::new("ana").unwrap());
        let closed = session.detach().expect("first detach closes");
        assert_eq!(
            closed.event,
            SessionDomainEvent::Closed {
                reason: CloseReason::Detached
            }
        );
        assert!(channels.shutdown.try_recv().is_ok());
        assert!(session.detach().is_none());
        assert!(session.is_detached());
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn admission_is_exclusive() {
        let (session, _channels, _) = Session::open(UserId::new("ana").unwrap());
        let first = session.admit().await;
        assert!(session.admission.try_lock().is_err());
        drop(first);
        assert!(session.admission.try_lock().is_ok());
    }

    #[tokio::test]
    async fn turn_state_survives_between_admissions() {
        let (session, _channels, _) = Session::open(UserId::new("ana").unwrap());
        {
            let mut turn = session.admit().await;
            assert!(turn.menu_pending());
            turn.set_menu_pending(false);
        }
        assert!(!session.admit().await.menu_pending());
    }
}
