use crate::domain::session::ReplyInbox;
use crate::ports::{Completion, Reply, ReplyFraming, ReplyRequest};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Polls the inbox on a fixed tick and ends the wait on the first of:
/// a marker match, a tick with no new bytes once `quiet` has elapsed, or
/// `max` elapsing. Always resolves within `max` plus one tick.
#[derive(Clone, Copy, Debug)]
pub struct QuiescenceFraming {
    tick: Duration,
}

impl QuiescenceFraming {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl Default for QuiescenceFraming {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

#[async_trait]
impl ReplyFraming for QuiescenceFraming {
    async fn await_reply(&self, inbox: &ReplyInbox, request: ReplyRequest) -> Reply {
        let started = Instant::now();
        let mut last_seen = inbox.received();
        loop {
            sleep(self.tick).await;
            let elapsed = started.elapsed();
            let seen = inbox.received();
            let grown = seen != last_seen;
            last_seen = seen;

            let completion = if inbox.matches(|text| request.markers.matches(text)) {
                Some(Completion::Matched)
            } else if !grown && elapsed > request.quiet {
                Some(Completion::Quiet)
            } else if elapsed > request.max {
                Some(Completion::Deadline)
            } else {
                None
            };

            if let Some(completion) = completion {
                return Reply {
                    text: inbox.drain(),
                    completion,
                    elapsed,
                };
            }
        }
    }
}
