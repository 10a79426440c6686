//! Browser contexts keyed by (session, target).
//!
//! Every session owns one isolated browser per target. The pool launches them on demand through a
//! [`ContextLauncher`], hands out the same page on repeated acquires and closes them on release.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::{CdpConfig, PageDriver, PageSession};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use stealth::{EvasionControl, EvasionRuntime};
use tracing::{debug, info, warn};

use cartscout_core_types::Target;

use crate::errors::{ScoutError, ScoutResult};
use crate::metrics;
use crate::registry::SessionId;
use crate::targets;

/// Launches one browser page per target.
#[async_trait]
pub trait ContextLauncher: Send + Sync {
    async fn launch(&self, target: Target) -> ScoutResult<Arc<dyn PageDriver>>;

    async fn dispose(&self, page: Arc<dyn PageDriver>) {
        if let Err(err) = page.close().await {
            warn!(target: "pool", %err, "closing page failed");
        }
    }
}

/// Launches Chromium via CDP and applies the evasion profile for the target's origin.
pub struct ChromeLauncher {
    base: CdpConfig,
    evasion: Arc<EvasionRuntime>,
}

impl ChromeLauncher {
    pub fn new(base: CdpConfig, evasion: Arc<EvasionRuntime>) -> Self {
        Self { base, evasion }
    }
}

#[async_trait]
impl ContextLauncher for ChromeLauncher {
    async fn launch(&self, target: Target) -> ScoutResult<Arc<dyn PageDriver>> {
        let session = PageSession::launch(self.base.clone())
            .await
            .map_err(|source| ScoutError::Launch { target, source })?;

        let origin = targets::descriptor_for(target).home_url;
        match self.evasion.apply_profile(&session, origin).await {
            Ok(profile) => {
                debug!(target: "pool", %target, ?profile, "evasion profile applied");
                Ok(Arc::new(session))
            }
            Err(source) => {
                if let Err(err) = session.close().await {
                    warn!(target: "pool", %target, %err, "closing half-prepared browser failed");
                }
                Err(ScoutError::Evasion { target, source })
            }
        }
    }

    async fn dispose(&self, page: Arc<dyn PageDriver>) {
        let id = page.id();
        if let Err(err) = page.close().await {
            warn!(target: "pool", %err, "closing browser failed");
        }
        self.evasion.release(id);
    }
}

pub struct ContextPool {
    launcher: Arc<dyn ContextLauncher>,
    contexts: DashMap<(SessionId, Target), Arc<dyn PageDriver>>,
}

impl ContextPool {
    pub fn new(launcher: Arc<dyn ContextLauncher>) -> Self {
        Self {
            launcher,
            contexts: DashMap::new(),
        }
    }

    /// Returns the live context for the pair, launching one when absent or dead.
    pub async fn acquire(&self, session: SessionId, target: Target) -> ScoutResult<Arc<dyn PageDriver>> {
        if let Some(existing) = self.get(session, target) {
            if existing.is_alive() {
                return Ok(existing);
            }
            warn!(target: "pool", %session, %target, "browser went away; relaunching");
            self.evict(session, target, existing).await;
        }

        info!(target: "pool", %session, %target, "launching browser");
        let page = self.launcher.launch(target).await?;
        let raced = match self.contexts.entry((session, target)) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(page.clone());
                None
            }
        };
        match raced {
            None => {
                metrics::context_launched();
                Ok(page)
            }
            Some(existing) => {
                debug!(target: "pool", %session, %target, "lost launch race; discarding duplicate");
                self.launcher.dispose(page).await;
                Ok(existing)
            }
        }
    }

    /// Drops `stale` from the pool unless another acquire already replaced it.
    async fn evict(&self, session: SessionId, target: Target, stale: Arc<dyn PageDriver>) {
        let stale_id = stale.id();
        if self
            .contexts
            .remove_if(&(session, target), |_, held| held.id() == stale_id)
            .is_some()
        {
            metrics::context_released();
        }
        self.launcher.dispose(stale).await;
    }

    pub fn get(&self, session: SessionId, target: Target) -> Option<Arc<dyn PageDriver>> {
        self.contexts
            .get(&(session, target))
            .map(|entry| entry.value().clone())
    }

    pub fn contexts(&self, session: SessionId) -> HashMap<Target, Arc<dyn PageDriver>> {
        self.contexts
            .iter()
            .filter(|entry| entry.key().0 == session)
            .map(|entry| (entry.key().1, entry.value().clone()))
            .collect()
    }

    /// No-op when nothing is held for the pair.
    pub async fn release(&self, session: SessionId, target: Target) -> bool {
        let Some((_, page)) = self.contexts.remove(&(session, target)) else {
            return false;
        };
        self.launcher.dispose(page).await;
        metrics::context_released();
        info!(target: "pool", %session, %target, "browser released");
        true
    }

    /// Releases every context of the session; returns how many were held.
    pub async fn release_all(&self, session: SessionId) -> usize {
        let held: Vec<Target> = self
            .contexts
            .iter()
            .filter(|entry| entry.key().0 == session)
            .map(|entry| entry.key().1)
            .collect();
        let released = join_all(held.into_iter().map(|target| self.release(session, target))).await;
        released.into_iter().filter(|done| *done).count()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
