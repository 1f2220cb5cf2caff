use super::connection::drive_connection;
use super::handle::Session;
use crate::domain::session::{
    SessionDomainEvent, SessionError, SessionEventEnvelope, UserId,
};
use crate::ports::BackendTransport;
use crate::telemetry::BridgeMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

/// Maps each web user to exactly one live backend session.
///
/// Sessions are opened lazily by [`SessionRegistry::resolve`], reused while
/// live, and dropped from the map when their connection ends or they are
/// removed explicitly.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    transport: Arc<dyn BackendTransport>,
    sessions: RwLock<HashMap<UserId, Arc<Session>>>,
    events: broadcast::Sender<SessionEventEnvelope>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn BackendTransport>, metrics: Option<Arc<BridgeMetrics>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                sessions: RwLock::new(HashMap::new()),
                events,
                metrics,
            }),
        }
    }

    pub fn backend_target(&self) -> String {
        self.inner.transport.describe()
    }

    /// Lifecycle events for every session this registry manages.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEventEnvelope> {
        self.inner.events.subscribe()
    }

    /// Return the live session for `user`, opening one if needed.
    ///
    /// Opening does not wait for the backend: the connection task connects,
    /// writes the login line and starts buffering replies on its own. Lines
    /// written before the connection is up are queued behind the login line.
    pub async fn resolve(&self, user: &str) -> Result<Arc<Session>, SessionError> {
        let user = UserId::new(user)?;
        let mut sessions = self.inner.sessions.write().await;
        if let Some(existing) = sessions.get(&user) {
            if existing.status().is_live() {
                return Ok(existing.clone());
            }
        }

        let (session, channels, opened) = Session::open(user.clone());
        let session = Arc::new(session);
        if let Some(stale) = sessions.insert(user, session.clone()) {
            debug!(user = %stale.user(), session_id = %stale.id(), "replacing closed session");
        }
        drop(sessions);

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_session_opened();
        }
        self.inner.publish(opened);

        tokio::spawn(drive_connection(
            Arc::downgrade(&self.inner),
            self.inner.transport.clone(),
            session.clone(),
            channels,
        ));
        Ok(session)
    }

    /// Tear down the session for `user`. Returns whether one existed.
    pub async fn remove(&self, user: &UserId) -> bool {
        let removed = self.inner.sessions.write().await.remove(user);
        match removed {
            Some(session) => {
                self.inner.detach(&session);
                info!(%user, session_id = %session.id(), "backend session removed");
                true
            }
            None => {
                debug!(%user, "no backend session to remove");
                false
            }
        }
    }

    /// Users with a registered session, excluding `user`, sorted.
    ///
    /// This is the bridge's own view; users connected to the backend through
    /// other clients are not included.
    pub async fn list_others(&self, user: &UserId) -> Vec<UserId> {
        let sessions = self.inner.sessions.read().await;
        let mut others: Vec<UserId> = sessions
            .keys()
            .filter(|candidate| *candidate != user)
            .cloned()
            .collect();
        others.sort();
        others
    }

    pub async fn get(&self, user: &UserId) -> Option<Arc<Session>> {
        self.inner.sessions.read().await.get(user).cloned()
    }

    /// Registered sessions, ordered by user.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> =
            self.inner.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|session| session.user());
        sessions
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Detach every session. Used on process shutdown.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<Arc<Session>> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            self.inner.detach(session);
        }
        if !drained.is_empty() {
            info!(sessions = drained.len(), "backend sessions closed for shutdown");
        }
        drained.len()
    }
}

impl RegistryInner {
    pub(crate) fn publish(&self, event: SessionEventEnvelope) {
        if let SessionDomainEvent::Closed { reason } = &event.event {
            if let Some(metrics) = &self.metrics {
                metrics.record_session_closed(reason.as_str());
            }
        }
        debug!(user = %event.user, session_id = %event.session_id, event = ?event.event, "session event");
        let _ = self.events.send(event);
    }

    pub(crate) fn record_transport_error(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transport_error();
        }
    }

    /// Drop `session` from the map unless a newer session took its place.
    pub(crate) async fn forget(&self, session: &Session) {
        let user = session.user();
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(&user)
            .is_some_and(|current| current.id() == session.id())
        {
            sessions.remove(&user);
        }
    }

    fn detach(&self, session: &Session) {
        if let Some(event) = session.detach() {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::transport::{LoopbackPeer, LoopbackTransport};
    use crate::domain::session::{CloseReason, SessionStatus};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn registry() -> (
        SessionRegistry,
        Arc<LoopbackTransport>,
        mpsc::UnboundedReceiver<LoopbackPeer>,
    ) {
        let (transport, peers) = LoopbackTransport::new();
        let transport = Arc::new(transport);
        (SessionRegistry::new(transport.clone(), None), transport, peers)
    }

    async fn next_peer(peers: &mut mpsc::UnboundedReceiver<LoopbackPeer>) -> LoopbackPeer {
        timeout(Duration::from_secs(2), peers.recv())
            .await
            .expect("peer within timeout")
            .expect("transport alive")
    }

    async fn wait_for_close(
        events: &mut broadcast::Receiver<SessionEventEnvelope>,
    ) -> SessionEventEnvelope {
        loop {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("event within timeout")
                .expect("event channel open");
            if matches!(event.event, SessionDomainEvent::Closed { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn resolve_reuses_live_session() {
        let (registry, transport, mut peers) = registry();
        let first = registry.resolve("ana").await.unwrap();
        let second = registry.resolve("ana").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let peer = next_peer(&mut peers).await;
        let mut lines = BufReader::new(peer.stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ana"));
        assert_eq!(transport.opened(), 1);
        assert!(peers.try_recv().is_err());
        assert_eq!(first.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn blank_identifier_opens_nothing() {
        let (registry, transport, _peers) = registry();
        for blank in ["", "   ", "\t\n"] {
            let err = registry.resolve(blank).await.err();
            assert_eq!(err, Some(SessionError::InvalidIdentifier));
        }
        tokio::task::yield_now().await;
        assert_eq!(transport.opened(), 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn queued_lines_follow_login_line() {
        let (registry, _transport, mut peers) = registry();
        let session = registry.resolve("ana").await.unwrap();
        session.write_lines(["1", "luis", "hola"]);

        let peer = next_peer(&mut peers).await;
        let mut lines = BufReader::new(peer.stream).lines();
        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(lines.next_line().await.unwrap().unwrap());
        }
        assert_eq!(received, vec!["ana", "1", "luis", "hola"]);
    }

    #[tokio::test]
    async fn backend_output_lands_in_inbox() {
        let (registry, _transport, mut peers) = registry();
        let session = registry.resolve("ana").await.unwrap();
        let mut peer = next_peer(&mut peers).await;
        peer.stream.write_all(b"MENU:\n").await.unwrap();

        timeout(Duration::from_secs(2), async {
            while !session.inbox().matches(|text| text.contains("MENU")) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("inbox filled");
    }

    #[tokio::test]
    async fn remove_destroys_transport_once() {
        let (registry, _transport, mut peers) = registry();
        let ana = UserId::new("ana").unwrap();
        let sol = UserId::new("sol").unwrap();
        assert!(!registry.remove(&ana).await);

        registry.resolve("ana").await.unwrap();
        registry.resolve("sol").await.unwrap();
        let first = next_peer(&mut peers).await;
        let second = next_peer(&mut peers).await;
        let (mut ana_peer, _sol_peer) = if first.user == ana {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(registry.list_others(&sol).await, vec![ana.clone()]);

        let mut events = registry.subscribe();
        assert!(registry.remove(&ana).await);
        let closed = wait_for_close(&mut events).await;
        assert_eq!(
            closed.event,
            SessionDomainEvent::Closed {
                reason: CloseReason::Detached
            }
        );

        let mut rest = Vec::new();
        timeout(Duration::from_secs(2), ana_peer.stream.read_to_end(&mut rest))
            .await
            .expect("stream shut down")
            .unwrap();
        assert_eq!(rest, b"ana\n");

        assert!(!registry.remove(&ana).await);
        assert!(registry.list_others(&sol).await.is_empty());
    }

    #[tokio::test]
    async fn remote_close_unregisters_session() {
        let (registry, transport, mut peers) = registry();
        let mut events = registry.subscribe();
        let first = registry.resolve("ana").await.unwrap();
        let peer = next_peer(&mut peers).await;
        drop(peer);

        let closed = wait_for_close(&mut events).await;
        assert_eq!(
            closed.event,
            SessionDomainEvent::Closed {
                reason: CloseReason::RemoteClosed
            }
        );
        assert_eq!(closed.session_id, first.id());
        assert!(registry.is_empty().await);

        let second = registry.resolve("ana").await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test]
    async fn failed_connect_is_reported_as_event() {
        let (registry, transport, _peers) = registry();
        transport.set_refusing(true);
        let mut events = registry.subscribe();
        let session = registry.resolve("ana").await.unwrap();

        let closed = wait_for_close(&mut events).await;
        assert!(matches!(
            closed.event,
            SessionDomainEvent::Closed {
                reason: CloseReason::TransportFailure(_)
            }
        ));
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(registry.get(&UserId::new("ana").unwrap()).await.is_none());

        // writes against the dead session are dropped silently
        session.write_lines(["1"]);
    }

    #[tokio::test]
    async fn list_others_excludes_caller_and_sorts() {
        let (registry, _transport, _peers) = registry();
        for user in ["sol", "ana", "luis"] {
            registry.resolve(user).await.unwrap();
        }
        let others = registry.list_others(&UserId::new("luis").unwrap()).await;
        let names: Vec<&str> = others.iter().map(UserId::as_str).collect();
        assert_eq!(names, vec!["ana", "sol"]);
    }

    #[tokio::test]
    async fn shutdown_detaches_everything() {
        let (registry, _transport, _peers) = registry();
        let ana = registry.resolve("ana").await.unwrap();
        registry.resolve("sol").await.unwrap();
        assert_eq!(registry.shutdown().await, 2);
        assert!(registry.is_empty().await);
        assert!(ana.is_detached());
    }
}
