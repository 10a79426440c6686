//! Parameter and event types exposed by the page driver.

use serde::{Deserialize, Serialize};

/// Lifecycle milestone a navigation waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationWait {
    Load,
    DomContentLoaded,
    /// No more than two connections for at least 500 ms.
    NetworkIdle,
}

impl NavigationWait {
    pub(crate) fn lifecycle_name(&self) -> &'static str {
        match self {
            NavigationWait::Load => "load",
            NavigationWait::DomContentLoaded => "DOMContentLoaded",
            NavigationWait::NetworkIdle => "networkAlmostIdle",
        }
    }
}

/// Element state polled by `wait_for_selector`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorState {
    Attached,
    Visible,
    Hidden,
}

/// Viewport point resolved for an element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

/// A finished network response observed on a page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub request_id: String,
    pub url: String,
    /// CDP resource type, e.g. `XHR`, `Fetch`, `Document`, `Image`.
    pub resource_type: String,
    pub status: i64,
    pub mime_type: String,
}

impl ResponseEvent {
    pub fn is_data_fetch(&self) -> bool {
        matches!(self.resource_type.as_str(), "XHR" | "Fetch")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct LifecycleEvent {
    pub frame_id: String,
    pub loader_id: String,
    pub name: String,
}
