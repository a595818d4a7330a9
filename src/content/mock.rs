use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ContentPayload, Source};
use crate::error::CoreError;
use crate::tile::TileNode;

/// Which `CoreError` variant `MockSource::fail_next_as` injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Transient,
    Permanent,
    Invariant,
    Aborted,
}

impl FailKind {
    fn into_error(self, uri: &str) -> CoreError {
        match self {
            FailKind::Transient => CoreError::Transient(format!("mock failure for {uri}")),
            FailKind::Permanent => CoreError::Permanent(format!("mock failure for {uri}")),
            FailKind::Invariant => CoreError::Invariant(format!("mock failure for {uri}")),
            FailKind::Aborted => CoreError::Aborted(format!("mock failure for {uri}")),
        }
    }
}

/// Test double for `Source`. Returns a canned payload per call, can inject
/// a fixed async delay to exercise queue ordering/cancellation, and records
/// every URI it was asked to fetch so tests can assert on call counts and
/// dedup behavior.
pub struct MockSource {
    payload: ContentPayload,
    delay: std::time::Duration,
    fail_next: AtomicUsize,
    fail_kind: Mutex<FailKind>,
    requests: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(payload: ContentPayload) -> Self {
        MockSource {
            payload,
            delay: std::time::Duration::ZERO,
            fail_next: AtomicUsize::new(0),
            fail_kind: Mutex::new(FailKind::Transient),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes the next `n` calls to `get_data` return a transient error,
    /// for exercising `RequestQueue` retry/backoff behavior.
    pub fn fail_next(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Like `fail_next`, but injects `kind` instead of always `Transient` —
    /// for exercising the `Permanent`/`Invariant`/`Aborted` arms of the
    /// content-load error handling in `traversal::common::request_content`.
    pub fn fail_next_as(self, n: usize, kind: FailKind) -> Self {
        *self.fail_kind.lock().unwrap() = kind;
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    pub fn requested_uris(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Source for MockSource {
    async fn get_data(&self, node: &TileNode) -> Result<ContentPayload, CoreError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let uri = node.content_uri.clone().unwrap_or_default();
        self.requests.lock().unwrap().push(uri.clone());

        let mut remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            remaining -= 1;
            self.fail_next.store(remaining, Ordering::SeqCst);
            let kind = *self.fail_kind.lock().unwrap();
            return Err(kind.into_error(&uri));
        }

        Ok(self.payload.clone())
    }
}
