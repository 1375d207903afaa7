//! Events pushed from the engine to the UI.
//!
//! The engine never waits on the UI. It emits into an [`EventSink`] and moves on. The desktop
//! shell bridges the sink to its own event bus, the CLI and tests use a tokio channel.

use crate::errors::EngineError;
use crate::path_ref::PathRef;
use crate::search::QueryError;
use crate::write_operations::TransferMode;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgressEvent {
    pub operation_id: String,
    pub mode: TransferMode,
    /// Name of the item that just finished (not the full path).
    pub current_item: Option<String>,
    pub items_done: usize,
    pub items_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCompleteEvent {
    pub operation_id: String,
    pub mode: TransferMode,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshEvent {
    pub folder: PathRef,
    pub include_hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    /// Why the refreshed listing couldn't be fetched. The UI keeps showing the old one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchProgressEvent {
    pub search_id: String,
    pub scanned: usize,
    pub matched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCompleteEvent {
    pub search_id: String,
    pub scanned: usize,
    pub matched: usize,
    pub cancelled: bool,
}

/// A search that never started because its query didn't parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFailedEvent {
    pub search_id: String,
    pub error: EngineError,
    /// Set when the query itself was the problem, so the UI can underline the span.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_error: Option<QueryError>,
}

// ============================================================================
// Event enum and sinks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum EngineEvent {
    TransferProgress(TransferProgressEvent),
    TransferComplete(TransferCompleteEvent),
    /// A background refresh replaced the cached listing.
    RefreshComplete(RefreshEvent),
    /// A background refresh failed or timed out.
    RefreshStale(RefreshEvent),
    /// A background refresh was dropped because the user navigated away.
    RefreshCancelled(RefreshEvent),
    SearchProgress(SearchProgressEvent),
    SearchComplete(SearchCompleteEvent),
    SearchFailed(SearchFailedEvent),
}

impl EngineEvent {
    /// Event name as the UI subscribes to it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransferProgress(_) => "transfer-progress",
            Self::TransferComplete(_) => "transfer-complete",
            Self::RefreshComplete(_) => "refresh-complete",
            Self::RefreshStale(_) => "refresh-stale",
            Self::RefreshCancelled(_) => "refresh-cancelled",
            Self::SearchProgress(_) => "search-progress",
            Self::SearchComplete(_) => "search-complete",
            Self::SearchFailed(_) => "search-failed",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for UnboundedSender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        // A closed receiver means nobody is listening anymore; dropping the event is fine
        let _ = self.send(event);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_name_tag() {
        let event = EngineEvent::SearchProgress(SearchProgressEvent {
            search_id: "s1".to_string(),
            scanned: 10,
            matched: 2,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["searchId"], "s1");
    }

    #[test]
    fn test_channel_sink_delivers_and_ignores_closed_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event = EngineEvent::RefreshCancelled(RefreshEvent {
            folder: PathRef::cloud("r", "a"),
            include_hidden: false,
            entry_count: None,
            error: None,
        });
        tx.emit(event.clone());
        assert_eq!(rx.try_recv().unwrap(), event);
        drop(rx);
        tx.emit(event);
    }
}
