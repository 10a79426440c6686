//! Evasion profiles for automated pages.
//!
//! A profile masks the usual automation tells (user agent, viewport, navigator patches) and is
//! applied exactly once per page, right after the page is attached. Site policies pick the profile
//! and the interaction tempo for an origin; tempo advice is deterministic per plan and operation.

pub mod config;
pub mod scripts;

use crate::config::{EvasionProfile, ProfileBundle, SitePolicyFile, TempoPlan};
use async_trait::async_trait;
use cdp_adapter::{ids::PageId, AdapterError, PageDriver};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Identifier for one application of a profile.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

/// Tempo advice returned to higher layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoAdvice {
    pub delay_ms: u64,
}

impl TempoAdvice {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Clone, Debug, Error)]
pub enum StealthError {
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    #[error("cdp I/O failure: {0}")]
    CdpIo(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Emulation surface a profile is written to.
#[async_trait]
pub trait ProfileSink: Send + Sync {
    fn page_id(&self) -> PageId;
    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<(), AdapterError>;
    async fn set_timezone(&self, timezone: &str) -> Result<(), AdapterError>;
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), AdapterError>;
    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError>;
}

#[async_trait]
impl<T: PageDriver> ProfileSink for T {
    fn page_id(&self) -> PageId {
        self.id()
    }

    async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<(), AdapterError> {
        PageDriver::set_user_agent(self, user_agent, accept_language, platform).await
    }

    async fn set_timezone(&self, timezone: &str) -> Result<(), AdapterError> {
        PageDriver::set_timezone(self, timezone).await
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), AdapterError> {
        PageDriver::set_viewport(self, width, height).await
    }

    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError> {
        PageDriver::add_init_script(self, source).await
    }
}

#[async_trait]
pub trait EvasionControl: Send + Sync {
    /// Applies the origin's profile to the page. A page that already has one keeps it.
    async fn apply_profile(
        &self,
        sink: &dyn ProfileSink,
        origin: &str,
    ) -> Result<ProfileId, StealthError>;
    fn tempo_advice(&self, origin: &str, op: &str) -> TempoAdvice;
    /// Drops bookkeeping for a closed page.
    fn release(&self, page: PageId);
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppliedProfile {
    pub profile_id: ProfileId,
    pub profile_name: String,
    pub user_agent: String,
    pub tempo: String,
}

#[derive(Clone, Debug)]
struct ResolvedPolicyChoice {
    profile: String,
    tempo: String,
}

pub struct EvasionRuntime {
    applied: DashMap<PageId, AppliedProfile>,
    profiles: RwLock<HashMap<String, EvasionProfile>>,
    tempos: RwLock<HashMap<String, TempoPlan>>,
    policy: RwLock<Option<SitePolicyFile>>,
}

impl Default for EvasionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl EvasionRuntime {
    /// Runtime loaded with [`ProfileBundle::builtin`].
    pub fn new() -> Self {
        let runtime = Self::empty();
        runtime.load_bundle(ProfileBundle::builtin());
        runtime
    }

    pub fn empty() -> Self {
        Self {
            applied: DashMap::new(),
            profiles: RwLock::new(HashMap::new()),
            tempos: RwLock::new(HashMap::new()),
            policy: RwLock::new(None),
        }
    }

    pub fn load_bundle(&self, bundle: ProfileBundle) {
        let ProfileBundle {
            profiles: profile_defs,
            tempos: tempo_defs,
            policy,
        } = bundle;

        {
            let mut profiles = self.profiles.write();
            profiles.clear();
            for profile in profile_defs {
                profiles.insert(profile.name.clone(), profile);
            }
        }
        {
            let mut tempos = self.tempos.write();
            tempos.clear();
            for tempo in tempo_defs {
                tempos.insert(tempo.name.clone(), tempo);
            }
        }
        *self.policy.write() = policy;
    }

    pub fn applied_profile_for(&self, page: PageId) -> Option<AppliedProfile> {
        self.applied.get(&page).map(|entry| entry.value().clone())
    }

    fn resolve_policy(&self, origin: &str) -> Option<ResolvedPolicyChoice> {
        let policy_guard = self.policy.read();
        let policy = policy_guard.as_ref()?;
        let mut choice = ResolvedPolicyChoice {
            profile: policy.defaults.profile.clone(),
            tempo: policy.defaults.tempo.clone(),
        };
        let mut best_len = 0usize;
        for entry in &policy.sites {
            if pattern_matches(&entry.match_pattern, origin) {
                let len = entry.match_pattern.len();
                if len >= best_len {
                    if let Some(profile) = &entry.profile {
                        choice.profile = profile.clone();
                    }
                    if let Some(tempo) = &entry.tempo {
                        choice.tempo = tempo.clone();
                    }
                    best_len = len;
                }
            }
        }
        Some(choice)
    }

    fn choose_profile(&self, origin: &str) -> Result<(EvasionProfile, String), StealthError> {
        let choice = self.resolve_policy(origin);
        let profiles = self.profiles.read();
        let profile = choice
            .as_ref()
            .and_then(|c| profiles.get(&c.profile))
            .or_else(|| {
                let mut names: Vec<&String> = profiles.keys().collect();
                names.sort();
                names.first().and_then(|name| profiles.get(*name))
            })
            .cloned()
            .ok_or_else(|| StealthError::PolicyDenied(format!("no profile loaded for {origin}")))?;
        let tempo = choice
            .map(|c| c.tempo)
            .unwrap_or_else(|| TempoPlan::default().name);
        Ok((profile, tempo))
    }

    fn tempo_plan_for(&self, origin: &str) -> TempoPlan {
        let desired = self.resolve_policy(origin).map(|c| c.tempo);
        let tempos = self.tempos.read();
        desired
            .and_then(|name| tempos.get(&name).cloned())
            .unwrap_or_default()
    }

    async fn inject_profile(
        sink: &dyn ProfileSink,
        profile: &EvasionProfile,
        user_agent: &str,
    ) -> Result<(), StealthError> {
        if !user_agent.is_empty() {
            sink.set_user_agent(
                user_agent,
                profile.accept_language.as_deref(),
                profile.platform.as_deref(),
            )
            .await
            .map_err(map_adapter_error)?;
        }

        if let Some(timezone) = &profile.timezone {
            sink.set_timezone(timezone)
                .await
                .map_err(map_adapter_error)?;
        }

        if let Some(viewport) = &profile.viewport {
            sink.set_viewport(viewport.width, viewport.height)
                .await
                .map_err(map_adapter_error)?;
        }

        for script in scripts::init_scripts(&profile.patches, &profile.languages(), profile.viewport)
        {
            sink.add_init_script(&script)
                .await
                .map_err(map_adapter_error)?;
        }

        Ok(())
    }

    fn pick_user_agent(profile: &EvasionProfile) -> String {
        let mut pool: Vec<&String> = vec![&profile.user_agent];
        pool.extend(profile.alternate_user_agents.iter());
        pool.choose(&mut rand::thread_rng())
            .map(|ua| ua.to_string())
            .unwrap_or_default()
    }

    fn advice_from_plan(plan: &TempoPlan, op: &str) -> TempoAdvice {
        let op_trimmed = op.trim();
        let normalized = if op_trimmed.is_empty() {
            "click".to_string()
        } else {
            op_trimmed.to_ascii_lowercase()
        };

        let seed = Self::tempo_seed(plan, &normalized);
        let mut rng = StdRng::seed_from_u64(seed);

        let (base, jitter) = match normalized.as_str() {
            "click" | "mouse.click" => (plan.mouse.pre_delay_ms, plan.mouse.jitter_ms),
            "type" | "typing" | "keyboard.type" => {
                (plan.typing.per_char_ms, plan.typing.jitter_ms)
            }
            _ => (0, 0),
        };
        let jitter = if jitter > 0 {
            rng.gen_range(0..=jitter)
        } else {
            0
        };
        TempoAdvice {
            delay_ms: base + jitter,
        }
    }

    fn tempo_seed(plan: &TempoPlan, op: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        plan.name.hash(&mut hasher);
        op.hash(&mut hasher);
        if let Some(seed) = plan.seed {
            seed.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[async_trait]
impl EvasionControl for EvasionRuntime {
    async fn apply_profile(
        &self,
        sink: &dyn ProfileSink,
        origin: &str,
    ) -> Result<ProfileId, StealthError> {
        let page = sink.page_id();
        if let Some(existing) = self.applied.get(&page) {
            return Ok(existing.profile_id);
        }

        let (profile, tempo) = self.choose_profile(origin)?;
        let user_agent = Self::pick_user_agent(&profile);
        Self::inject_profile(sink, &profile, &user_agent).await?;

        let applied = AppliedProfile {
            profile_id: ProfileId::new(),
            profile_name: profile.name.clone(),
            user_agent,
            tempo,
        };
        let profile_id = applied.profile_id;
        debug!(
            target: "stealth",
            ?page,
            profile = %applied.profile_name,
            tempo = %applied.tempo,
            "evasion profile applied"
        );
        self.applied.insert(page, applied);
        Ok(profile_id)
    }

    fn tempo_advice(&self, origin: &str, op: &str) -> TempoAdvice {
        let plan = self.tempo_plan_for(origin);
        Self::advice_from_plan(&plan, op)
    }

    fn release(&self, page: PageId) {
        self.applied.remove(&page);
    }
}

fn pattern_matches(pattern: &str, origin: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(idx) = pattern.find('*') {
        let prefix = &pattern[..idx];
        let suffix = &pattern[idx + 1..];
        return origin.starts_with(prefix) && origin.ends_with(suffix);
    }
    origin == pattern
}

fn map_adapter_error(err: AdapterError) -> StealthError {
    let mut hint = err.hint.clone().unwrap_or_default();
    if hint.is_empty() {
        hint = format!("cdp error {:?}", err.kind);
    }
    StealthError::CdpIo(hint)
}
