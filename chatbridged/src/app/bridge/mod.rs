mod service;

pub use service::{BridgeError, BridgeResult, BridgeService, ReplyTimings};
