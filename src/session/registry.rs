//! Correlation of outbound request ids with their callbacks.
//!
//! Entries form an ordered list, not a map: the same id may be registered
//! more than once and one `resolve` fires every matching entry, oldest
//! first. Nothing expires on its own; entries live until a response with
//! their id is dispatched or the owner calls [`CorrelationRegistry::clear`].

use crate::error::{ResponseError, Result, WaError};

use super::Response;

/// What a callback receives: the typed result or the server error
pub type ResponseResult = std::result::Result<Response, ResponseError>;

/// Callback fired once with the outcome and the originating request id
pub type ResponseCallback = Box<dyn FnOnce(ResponseResult, &str) + Send>;

/// One outstanding request
pub struct PendingRequest {
    id: String,
    callback: ResponseCallback,
}

impl PendingRequest {
    /// Request id
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Ordered registry of pending requests plus the id counter
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    entries: Vec<PendingRequest>,
    counter: u64,
}

impl CorrelationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `id`; duplicates are kept
    pub fn register(&mut self, id: impl Into<String>, callback: ResponseCallback) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(WaError::InvalidRequest(
                "callback registered without a request id".to_string(),
            ));
        }
        self.entries.push(PendingRequest { id, callback });
        Ok(())
    }

    /// Fire and remove every entry registered under `id`, in registration
    /// order. Returns how many callbacks ran (0 means the response was
    /// unmatched and dropped).
    pub fn resolve(&mut self, id: &str, outcome: ResponseResult) -> usize {
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.id == id);
        self.entries = rest;

        if matched.is_empty() {
            tracing::trace!("No pending request for id {}", id);
        }

        let count = matched.len();
        for entry in matched {
            (entry.callback)(outcome.clone(), id);
        }
        count
    }

    /// Mint a fresh id: `prefix-<unix seconds>-<counter>`
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!(
            "{}-{}-{}",
            prefix,
            crate::protocol::unix_timestamp(),
            self.counter
        )
    }

    /// Ids minted so far
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Whether any entry waits on `id`
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Outstanding entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of outstanding entries, oldest first
    pub fn pending_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(PendingRequest::id)
    }

    /// Drop every outstanding entry without firing it
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
