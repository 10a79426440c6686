//! Session-level operations fanned out across the three storefronts.
//!
//! Each target runs in its own task. A target's failure becomes a status value on its own stream and
//! never rejects the join, so the aggregate always settles with one result per target.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{PageDriver, ResponseEvent};
use futures::future::join_all;
use network_tap_light::capture::ResponseCapture;
use serde_json::Value;
use tracing::{debug, info, warn};

use cartscout_core_types::{CartOutcome, LocationResult, ProductRecord, SearchStatus, Target};

use crate::errors::{ScoutError, ScoutResult};
use crate::metrics;
use crate::registry::{SessionId, SessionRegistry};
use crate::targets::{TargetAdapter, TargetSet};

/// Receives per-target progress while a search runs.
pub trait ProgressSink: Send + Sync {
    /// Called once the guards pass, before any target starts.
    fn search_started(&self, term: &str);

    fn target_progress(
        &self,
        target: Target,
        status: SearchStatus,
        message: &str,
        has_products: bool,
    );
}

#[derive(Clone, Copy, Debug)]
pub struct SearchTimings {
    /// How long the structured payload may take to show up, counted from before navigation.
    pub payload_deadline: Duration,
    /// Pause before the second DOM extraction attempt.
    pub dom_retry_delay: Duration,
}

impl Default for SearchTimings {
    fn default() -> Self {
        Self {
            payload_deadline: Duration::from_secs(30),
            dom_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetResult {
    pub status: SearchStatus,
    pub products: Vec<ProductRecord>,
}

impl TargetResult {
    fn settled(status: SearchStatus) -> Self {
        Self {
            status,
            products: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SearchOutcome {
    pub results: BTreeMap<Target, TargetResult>,
}

impl SearchOutcome {
    pub fn total(&self) -> usize {
        self.results.values().map(|r| r.products.len()).sum()
    }

    pub fn count(&self, target: Target) -> usize {
        self.results
            .get(&target)
            .map(|r| r.products.len())
            .unwrap_or(0)
    }

    pub fn into_products(self) -> BTreeMap<Target, Vec<ProductRecord>> {
        self.results
            .into_iter()
            .map(|(target, result)| (target, result.products))
            .collect()
    }
}

pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    targets: TargetSet,
    timings: SearchTimings,
}

impl Orchestrator {
    pub fn new(registry: Arc<SessionRegistry>, targets: TargetSet, timings: SearchTimings) -> Self {
        Self {
            registry,
            targets,
            timings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Acquires a browser for every target. Every launch is allowed to settle, and on any failure the
    /// ones that came up are released before the first error is returned.
    pub async fn initialize(&self, session: SessionId) -> ScoutResult<()> {
        self.registry.create(session);
        let pool = self.registry.pool();
        let launched = join_all(
            Target::ALL
                .into_iter()
                .map(|target| pool.acquire(session, target)),
        )
        .await;

        match launched.into_iter().find_map(Result::err) {
            None => {
                self.registry.mark_initialized(session);
                info!(target: "orchestrator", %session, "browsers initialized");
                Ok(())
            }
            Some(err) => {
                warn!(target: "orchestrator", %session, %err, "initialization failed; releasing");
                let released = pool.release_all(session).await;
                debug!(target: "orchestrator", %session, released, "started browsers released");
                Err(err)
            }
        }
    }

    /// Sets the locality on `subset` (all targets when `None`). Other targets keep their status.
    pub async fn set_location(
        &self,
        session: SessionId,
        location: &str,
        subset: Option<&[Target]>,
    ) -> ScoutResult<Vec<LocationResult>> {
        let snapshot = self.registry.get(session)?;
        let targets: Vec<Target> = subset.map(<[Target]>::to_vec).unwrap_or_else(|| Target::ALL.to_vec());

        let tasks = targets.iter().map(|&target| {
            let page = snapshot.contexts.get(&target).cloned();
            let adapter = self.targets.get(target);
            let location = location.to_string();
            tokio::spawn(async move {
                let (Some(page), Some(adapter)) = (page, adapter) else {
                    return LocationResult::failed(target, "Browser not available");
                };
                match adapter.set_location(page.as_ref(), &location).await {
                    Some(title) => LocationResult::confirmed(target, title),
                    None => LocationResult {
                        service: target,
                        success: false,
                        title: None,
                        error: None,
                    },
                }
            })
        });

        let results: Vec<LocationResult> = join_all(tasks)
            .await
            .into_iter()
            .zip(&targets)
            .map(|(joined, &target)| {
                joined.unwrap_or_else(|err| LocationResult::failed(target, err.to_string()))
            })
            .collect();

        for result in &results {
            self.registry.mark_location_status(
                session,
                result.service,
                result.success,
                result.title.clone(),
            );
        }
        info!(
            target: "orchestrator",
            %session,
            confirmed = results.iter().filter(|r| r.success).count(),
            requested = results.len(),
            "location pass finished"
        );
        Ok(results)
    }

    /// Runs the search on every target concurrently and waits for all of them to settle.
    pub async fn search(
        &self,
        session: SessionId,
        term: &str,
        sink: Arc<dyn ProgressSink>,
    ) -> ScoutResult<SearchOutcome> {
        let snapshot = self.registry.get(session)?;
        if !snapshot.any_confirmed() {
            return Err(ScoutError::NoLocation);
        }
        sink.search_started(term);

        let tasks = Target::ALL.into_iter().map(|target| {
            let run = TargetRun {
                target,
                adapter: self.targets.get(target),
                page: snapshot.contexts.get(&target).cloned(),
                confirmed: snapshot.is_confirmed(target),
                term: term.to_string(),
                sink: sink.clone(),
                timings: self.timings,
            };
            tokio::spawn(run.execute())
        });

        let mut outcome = SearchOutcome::default();
        for (joined, target) in join_all(tasks).await.into_iter().zip(Target::ALL) {
            let result = joined.unwrap_or_else(|err| {
                warn!(target: "orchestrator", %target, %err, "search task aborted");
                sink.target_progress(
                    target,
                    SearchStatus::Error,
                    &format!("Failed to get product data: {err}"),
                    false,
                );
                TargetResult::settled(SearchStatus::Error)
            });
            metrics::record_search(target, result.status);
            outcome.results.insert(target, result);
        }
        info!(target: "orchestrator", %session, term, total = outcome.total(), "search settled");
        Ok(outcome)
    }

    pub async fn add_to_cart(
        &self,
        session: SessionId,
        target: Target,
        product_id: &str,
    ) -> ScoutResult<CartOutcome> {
        let snapshot = self.registry.get(session)?;
        let (Some(page), Some(adapter)) = (snapshot.contexts.get(&target), self.targets.get(target))
        else {
            return Ok(CartOutcome::Failed("browser not available".into()));
        };
        Ok(adapter.add_to_cart(page.as_ref(), product_id).await)
    }
}

/// One target's search, from `loading` to a terminal status.
struct TargetRun {
    target: Target,
    adapter: Option<Arc<dyn TargetAdapter>>,
    page: Option<Arc<dyn PageDriver>>,
    confirmed: bool,
    term: String,
    sink: Arc<dyn ProgressSink>,
    timings: SearchTimings,
}

impl TargetRun {
    fn emit(&self, status: SearchStatus, message: &str, has_products: bool) {
        debug!(target: "orchestrator", target = %self.target, status = status.as_str(), "progress");
        self.sink
            .target_progress(self.target, status, message, has_products);
    }

    fn finish(&self, status: SearchStatus, message: &str) -> TargetResult {
        self.emit(status, message, false);
        TargetResult::settled(status)
    }

    async fn execute(self) -> TargetResult {
        let target = self.target;
        if !self.confirmed {
            return self.finish(SearchStatus::Skipped, &format!("Location not set for {target}."));
        }
        let (Some(adapter), Some(page)) = (self.adapter.clone(), self.page.clone()) else {
            return self.finish(
                SearchStatus::Error,
                &format!("Browser not available for {target}."),
            );
        };

        self.emit(SearchStatus::Loading, &format!("Searching on {target}..."), false);
        let capture = {
            let page = page.clone();
            let adapter = adapter.clone();
            ResponseCapture::spawn(
                page.subscribe_responses(),
                self.timings.payload_deadline,
                move |event: ResponseEvent| {
                    let page = page.clone();
                    let adapter = adapter.clone();
                    async move {
                        if !event.is_data_fetch() {
                            return None;
                        }
                        let body = page.response_body(&event.request_id).await.ok()?;
                        let payload: Value = serde_json::from_str(&body).ok()?;
                        adapter
                            .matches_payload(&event.url, &payload)
                            .then_some(payload)
                    }
                },
            )
        };

        self.emit(
            SearchStatus::Navigating,
            &format!("Navigating to {target} search..."),
            false,
        );
        if !adapter.navigate_to_search(page.as_ref(), &self.term).await {
            capture.cancel();
            return self.finish(
                SearchStatus::Error,
                &format!("Failed to navigate to {target} search page."),
            );
        }

        self.emit(
            SearchStatus::LoadingContent,
            &format!("Waiting for {target} content to load..."),
            false,
        );
        let content_ready = adapter.ensure_content_loaded(page.as_ref()).await;
        debug!(target: "orchestrator", %target, content_ready, "content check finished");

        self.emit(
            SearchStatus::Extracting,
            &format!("Extracting {target} products..."),
            false,
        );
        let payload = capture.outcome().await.captured();
        if payload.is_none() {
            debug!(target: "orchestrator", %target, "no structured payload; falling back to the page");
        }
        let mut products = adapter
            .extract_product_information(page.as_ref(), payload.as_ref())
            .await;

        if products.is_empty() {
            tokio::time::sleep(self.timings.dom_retry_delay).await;
            match adapter.extract_from_dom(page.as_ref()).await {
                Ok(retried) => products = retried,
                Err(err) => {
                    return self.finish(
                        SearchStatus::Error,
                        &format!("Failed to get product data: {err}"),
                    );
                }
            }
        }

        if products.is_empty() {
            return self.finish(SearchStatus::Empty, &format!("No products found on {target}."));
        }
        self.emit(
            SearchStatus::Success,
            &format!("Found {} products on {target}.", products.len()),
            true,
        );
        TargetResult {
            status: SearchStatus::Success,
            products,
        }
    }
}
