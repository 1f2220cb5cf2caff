use std::sync::{Mutex, MutexGuard};

/// Text received from the backend since the last drain.
///
/// Bytes are decoded incrementally: an incomplete UTF-8 sequence at the end
/// of a chunk is held back until the rest arrives, invalid bytes decode to
/// U+FFFD. `received` counts every byte ever appended and never goes back,
/// so growth can be observed across drains.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    text: String,
    partial: Vec<u8>,
    received: u64,
}

impl ReplyBuffer {
    pub fn append(&mut self, chunk: &[u8]) {
        self.received += chunk.len() as u64;
        self.partial.extend_from_slice(chunk);
        let mut pending = std::mem::take(&mut self.partial);
        let mut rest: &[u8] = &pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    self.text
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }
        let keep = rest.len();
        let start = pending.len() - keep;
        pending.drain(..start);
        self.partial = pending;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Take everything decoded so far, leaving the buffer empty.
    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

/// Shared handle to a session's [`ReplyBuffer`].
///
/// The connection task appends, the request currently admitted to the
/// session inspects and drains.
#[derive(Debug, Default)]
pub struct ReplyInbox {
    inner: Mutex<ReplyBuffer>,
}

impl ReplyInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &[u8]) {
        self.lock().append(chunk);
    }

    pub fn received(&self) -> u64 {
        self.lock().received()
    }

    pub fn matches(&self, predicate: impl FnOnce(&str) -> bool) -> bool {
        predicate(self.lock().text())
    }

    pub fn drain(&self) -> String {
        self.lock().drain()
    }

    pub fn snapshot(&self) -> String {
        self.lock().text().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, ReplyBuffer> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
