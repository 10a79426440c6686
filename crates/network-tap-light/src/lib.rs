//! Per-page network activity tap.
//!
//! The tap keeps request counters per page and derives a "network idle" signal: no more than
//! [`TapConfig::idle_inflight`] requests in flight for at least [`TapConfig::quiet_window_ms`].
//! The [`capture`] module layers a cancellable response-capture race on top of any broadcast stream.

pub mod capture;
pub mod config;

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

pub use crate::config::TapConfig;

/// Identifier of a page whose traffic the tap observes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TapError {
    #[error("page not enabled")]
    PageNotEnabled,
}

/// Network events understood by the tap.
#[derive(Clone, Copy, Debug)]
pub enum TapEvent {
    RequestWillBeSent,
    ResponseReceived { status: i64 },
    LoadingFinished,
    LoadingFailed,
}

/// Point-in-time counters for one page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkSnapshot {
    pub requests: u64,
    pub res2xx: u64,
    pub res4xx: u64,
    pub res5xx: u64,
    pub inflight: u64,
    pub idle: bool,
}

#[derive(Debug)]
struct Counters {
    snapshot: NetworkSnapshot,
    /// Start of the current stretch at or under the in-flight threshold.
    calm_since: Option<Instant>,
}

impl Counters {
    fn new() -> Self {
        Self {
            snapshot: NetworkSnapshot::default(),
            calm_since: Some(Instant::now()),
        }
    }

    fn register(&mut self, event: TapEvent, config: &TapConfig) {
        let counts = &mut self.snapshot;
        match event {
            TapEvent::RequestWillBeSent => {
                counts.requests += 1;
                counts.inflight += 1;
            }
            TapEvent::ResponseReceived { status } => match status {
                200..=299 => counts.res2xx += 1,
                400..=499 => counts.res4xx += 1,
                500..=599 => counts.res5xx += 1,
                _ => {}
            },
            TapEvent::LoadingFinished | TapEvent::LoadingFailed => {
                counts.inflight = counts.inflight.saturating_sub(1);
            }
        }

        if counts.inflight > config.idle_inflight {
            self.calm_since = None;
        } else if self.calm_since.is_none() {
            self.calm_since = Some(Instant::now());
        }
    }

    fn idle(&self, config: &TapConfig) -> bool {
        self.calm_since
            .map(|since| since.elapsed() >= Duration::from_millis(config.quiet_window_ms))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct NetworkTapLight {
    pages: DashMap<PageId, Counters>,
    config: TapConfig,
}

impl NetworkTapLight {
    pub fn new(config: TapConfig) -> Self {
        Self {
            pages: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Starts tracking `page`; re-enabling keeps the existing counters.
    pub fn enable(&self, page: PageId) {
        self.pages.entry(page).or_insert_with(Counters::new);
    }

    pub fn disable(&self, page: PageId) -> Result<(), TapError> {
        self.pages
            .remove(&page)
            .map(|_| ())
            .ok_or(TapError::PageNotEnabled)
    }

    pub fn ingest(&self, page: PageId, event: TapEvent) -> Result<(), TapError> {
        let mut counters = self.pages.get_mut(&page).ok_or(TapError::PageNotEnabled)?;
        counters.register(event, &self.config);
        trace!(target: "network-tap", ?event, inflight = counters.snapshot.inflight, "ingested");
        Ok(())
    }

    pub fn is_idle(&self, page: PageId) -> Result<bool, TapError> {
        self.pages
            .get(&page)
            .map(|counters| counters.idle(&self.config))
            .ok_or(TapError::PageNotEnabled)
    }

    pub fn snapshot(&self, page: PageId) -> Option<NetworkSnapshot> {
        self.pages.get(&page).map(|counters| NetworkSnapshot {
            idle: counters.idle(&self.config),
            ..counters.snapshot.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn tap() -> (NetworkTapLight, PageId) {
        let tap = NetworkTapLight::default();
        let page = PageId::new();
        tap.enable(page);
        (tap, page)
    }

    #[tokio::test(start_paused = true)]
    async fn idle_needs_a_full_quiet_window() {
        let (tap, page) = tap();
        assert!(!tap.is_idle(page).unwrap());
        advance(Duration::from_millis(500)).await;
        assert!(tap.is_idle(page).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn two_inflight_requests_still_count_as_idle() {
        let (tap, page) = tap();
        tap.ingest(page, TapEvent::RequestWillBeSent).unwrap();
        tap.ingest(page, TapEvent::RequestWillBeSent).unwrap();
        advance(Duration::from_millis(600)).await;
        assert!(tap.is_idle(page).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_page_restarts_the_quiet_window() {
        let (tap, page) = tap();
        for _ in 0..3 {
            tap.ingest(page, TapEvent::RequestWillBeSent).unwrap();
        }
        advance(Duration::from_secs(2)).await;
        assert!(!tap.is_idle(page).unwrap());

        tap.ingest(page, TapEvent::LoadingFinished).unwrap();
        advance(Duration::from_millis(499)).await;
        assert!(!tap.is_idle(page).unwrap());
        advance(Duration::from_millis(1)).await;
        assert!(tap.is_idle(page).unwrap());
        assert_eq!(tap.snapshot(page).unwrap().inflight, 2);
    }

    #[test]
    fn unknown_page_is_rejected() {
        let tap = NetworkTapLight::default();
        assert_eq!(
            tap.ingest(PageId::new(), TapEvent::LoadingFailed),
            Err(TapError::PageNotEnabled)
        );
    }
}
