use crate::domain::protocol::ReplyMarkers;
use crate::domain::session::ReplyInbox;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// One wait for backend output.
#[derive(Clone, Copy, Debug)]
pub struct ReplyRequest {
    pub markers: ReplyMarkers,
    pub quiet: Duration,
    pub max: Duration,
}

impl ReplyRequest {
    pub fn new(markers: ReplyMarkers, quiet: Duration, max: Duration) -> Self {
        Self {
            markers,
            quiet,
            max,
        }
    }
}

/// Why a wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// A marker was found in the buffered text.
    Matched,
    /// Nothing arrived for a tick after the quiet interval elapsed.
    Quiet,
    /// The hard ceiling elapsed.
    Deadline,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Matched => "matched",
            Completion::Quiet => "quiet",
            Completion::Deadline => "deadline",
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub completion: Completion,
    pub elapsed: Duration,
}

/// Decides when text accumulated in an inbox forms a complete reply.
///
/// Every implementation drains the whole inbox into the returned reply.
#[async_trait]
pub trait ReplyFraming: Send + Sync {
    async fn await_reply(&self, inbox: &ReplyInbox, request: ReplyRequest) -> Reply;
}
