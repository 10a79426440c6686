//! In-flight request bookkeeping for one page session.

use dashmap::DashMap;

use crate::commands::ResponseEvent;

#[derive(Clone, Debug, Default)]
struct PendingRequest {
    url: String,
    resource_type: String,
    status: Option<i64>,
    mime_type: String,
}

/// Correlates `requestWillBeSent`, `responseReceived` and `loadingFinished` by request id.
#[derive(Default)]
pub(crate) struct RequestRegistry {
    pending: DashMap<String, PendingRequest>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(&self, request_id: &str, url: &str, resource_type: Option<&str>) {
        let mut entry = self.pending.entry(request_id.to_string()).or_default();
        entry.url = url.to_string();
        if let Some(kind) = resource_type {
            entry.resource_type = kind.to_string();
        }
    }

    pub fn on_response(
        &self,
        request_id: &str,
        url: &str,
        resource_type: Option<&str>,
        status: i64,
        mime_type: &str,
    ) {
        let mut entry = self.pending.entry(request_id.to_string()).or_default();
        if entry.url.is_empty() {
            entry.url = url.to_string();
        }
        if let Some(kind) = resource_type {
            entry.resource_type = kind.to_string();
        }
        entry.status = Some(status);
        entry.mime_type = mime_type.to_string();
    }

    /// Removes the request; yields an event only when a response was seen for it.
    pub fn on_finished(&self, request_id: &str) -> Option<ResponseEvent> {
        let (request_id, pending) = self.pending.remove(request_id)?;
        let status = pending.status?;
        Some(ResponseEvent {
            request_id,
            url: pending.url,
            resource_type: pending.resource_type,
            status,
            mime_type: pending.mime_type,
        })
    }

    pub fn on_failed(&self, request_id: &str) {
        self.pending.remove(request_id);
    }

    pub fn clear(&self) {
        self.pending.clear();
    }
}
