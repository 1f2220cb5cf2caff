use crate::app::session::{Session, SessionRegistry};
use crate::domain::protocol::{
    markers, parse_group_list, BackendCommand, ReplyMarkers, WaitCeiling, LOGIN_GREETING,
    READY_PROMPT,
};
use crate::domain::session::{SessionError, UserId};
use crate::ports::{Completion, Reply, ReplyFraming, ReplyRequest};
use crate::telemetry::BridgeMetrics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("username is required")]
    InvalidIdentifier,
}

impl From<SessionError> for BridgeError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidIdentifier => BridgeError::InvalidIdentifier,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Intervals for reply waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyTimings {
    pub quiet: Duration,
    pub max: Duration,
    pub group_list_max: Duration,
}

impl Default for ReplyTimings {
    fn default() -> Self {
        Self {
            quiet: Duration::from_millis(400),
            max: Duration::from_millis(8000),
            group_list_max: Duration::from_millis(5000),
        }
    }
}

impl ReplyTimings {
    fn ceiling(&self, ceiling: WaitCeiling) -> Duration {
        match ceiling {
            WaitCeiling::Standard => self.max,
            WaitCeiling::GroupList => self.group_list_max,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupListing {
    pub groups: Vec<String>,
    pub reply: Reply,
}

/// Turns HTTP intents into backend command lines and collects the replies.
///
/// Each composite operation runs while holding the session's admission
/// slot, so concurrent requests for one user never share reply text.
pub struct BridgeService<F: ReplyFraming> {
    registry: SessionRegistry,
    framing: Arc<F>,
    timings: ReplyTimings,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl<F: ReplyFraming> BridgeService<F> {
    pub fn new(
        registry: SessionRegistry,
        framing: Arc<F>,
        timings: ReplyTimings,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            registry,
            framing,
            timings,
            metrics,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn timings(&self) -> ReplyTimings {
        self.timings
    }

    /// Write lines to the session as-is. Never waits for the backend.
    pub fn send<I, S>(&self, session: &Session, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        session.write_lines(lines);
    }

    /// Wait for `markers` (or quiescence, or `max`) and drain the session's
    /// buffered text.
    pub async fn await_reply(
        &self,
        session: &Session,
        operation: &str,
        markers: ReplyMarkers,
        max: Duration,
    ) -> Reply {
        let request = ReplyRequest::new(markers, self.timings.quiet, max);
        let reply = self.framing.await_reply(session.inbox(), request).await;
        debug!(
            user = %session.user(),
            operation,
            completion = %reply.completion,
            elapsed_ms = reply.elapsed.as_millis() as u64,
            bytes = reply.text.len(),
            "backend reply collected"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_reply(
                operation,
                reply.completion.as_str(),
                reply.elapsed.as_secs_f64() * 1000.0,
            );
        }
        reply
    }

    /// Open (or reuse) the user's session and collect the greeting.
    pub async fn login(&self, user: &str) -> BridgeResult<Reply> {
        let session = self.registry.resolve(user).await?;
        let mut turn = session.admit().await;
        let reply = self
            .await_reply(&session, "login", LOGIN_GREETING, self.timings.max)
            .await;
        turn.set_menu_pending(menu_still_owed(&reply));
        Ok(reply)
    }

    /// Run one backend command for `user`: wait for the menu when the
    /// command needs it or the last reply ended before it, write the
    /// command's lines, collect its reply.
    ///
    /// Commands that write immediately first discard whatever text is
    /// already buffered, so their completion markers only see their own
    /// reply.
    pub async fn execute(&self, user: &str, command: BackendCommand) -> BridgeResult<Reply> {
        let session = self.registry.resolve(user).await?;
        let mut turn = session.admit().await;
        if command.awaits_ready_prompt() || turn.menu_pending() {
            self.await_reply(&session, "ready", READY_PROMPT, self.timings.max)
                .await;
        } else {
            let stale = session.inbox().drain();
            if !stale.is_empty() {
                debug!(
                    user = %session.user(),
                    operation = command.name(),
                    bytes = stale.len(),
                    "discarding unsolicited backend text"
                );
            }
        }
        self.send(&session, command.lines());
        let max = self.timings.ceiling(command.wait_ceiling());
        let reply = self
            .await_reply(&session, command.name(), command.completion(), max)
            .await;
        turn.set_menu_pending(menu_still_owed(&reply));
        Ok(reply)
    }

    pub async fn list_groups(&self, user: &str) -> BridgeResult<GroupListing> {
        let reply = self.execute(user, BackendCommand::ListGroups).await?;
        Ok(GroupListing {
            groups: parse_group_list(&reply.text),
            reply,
        })
    }

    /// Other users with a session on this bridge.
    pub async fn connected_users(&self, user: &str) -> BridgeResult<Vec<UserId>> {
        let user = UserId::new(user)?;
        Ok(self.registry.list_others(&user).await)
    }

    /// Close the user's session. Returns whether one existed.
    pub async fn logout(&self, user: &str) -> BridgeResult<bool> {
        let user = UserId::new(user)?;
        Ok(self.registry.remove(&user).await)
    }
}

/// A reply that matched before the backend printed its menu leaves that
/// menu in flight.
fn menu_still_owed(reply: &Reply) -> bool {
    reply.completion == Completion::Matched && !reply.text.contains(markers::MENU)
}
