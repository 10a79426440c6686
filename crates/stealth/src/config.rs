//! Configuration and policy definitions for evasion profiles and tempo plans.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::scripts::PatchSet;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize profile bundle: {0}")]
    Deserialize(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileBundle {
    pub profiles: Vec<EvasionProfile>,
    #[serde(default)]
    pub tempos: Vec<TempoPlan>,
    pub policy: Option<SitePolicyFile>,
}

impl ProfileBundle {
    /// Desktop Chrome profile used when no bundle file is configured.
    pub fn builtin() -> Self {
        let profile = EvasionProfile {
            name: "desktop_chrome".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
            alternate_user_agents: vec![
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0".into(),
            ],
            accept_language: Some("en-US,en;q=0.9".into()),
            platform: None,
            timezone: None,
            viewport: Some(Viewport {
                width: 1396,
                height: 632,
            }),
            patches: PatchSet::default(),
        };

        let brisk = TempoPlan {
            name: "brisk".into(),
            mouse: MouseTempoPlan {
                pre_delay_ms: 0,
                jitter_ms: 0,
            },
            typing: TypingTempoPlan {
                per_char_ms: 0,
                jitter_ms: 0,
            },
            seed: None,
        };
        let deliberate = TempoPlan {
            name: "deliberate".into(),
            mouse: MouseTempoPlan::default(),
            typing: TypingTempoPlan {
                per_char_ms: 100,
                jitter_ms: 0,
            },
            seed: None,
        };

        Self {
            profiles: vec![profile],
            tempos: vec![brisk, deliberate],
            policy: Some(SitePolicyFile {
                version: 1,
                defaults: SitePolicy {
                    profile: "desktop_chrome".into(),
                    tempo: "brisk".into(),
                },
                sites: vec![SitePolicyEntry {
                    match_pattern: "https://www.zeptonow.com/*".into(),
                    profile: None,
                    tempo: Some("deliberate".into()),
                }],
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvasionProfile {
    pub name: String,
    pub user_agent: String,
    /// Rotated with `user_agent`; one is picked per page.
    #[serde(default)]
    pub alternate_user_agents: Vec<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub patches: PatchSet,
}

impl EvasionProfile {
    /// Languages advertised through `navigator.languages`, derived from the accept-language header.
    pub fn languages(&self) -> Vec<String> {
        let Some(header) = self.accept_language.as_deref() else {
            return vec!["en-US".into(), "en".into()];
        };
        header
            .split(',')
            .filter_map(|part| part.split(';').next())
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SitePolicyFile {
    pub version: u32,
    pub defaults: SitePolicy,
    #[serde(default)]
    pub sites: Vec<SitePolicyEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SitePolicy {
    pub profile: String,
    pub tempo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SitePolicyEntry {
    pub match_pattern: String,
    pub profile: Option<String>,
    pub tempo: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TempoPlan {
    pub name: String,
    #[serde(default)]
    pub mouse: MouseTempoPlan,
    #[serde(default)]
    pub typing: TypingTempoPlan,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TempoPlan {
    fn default() -> Self {
        Self {
            name: "default".into(),
            mouse: MouseTempoPlan::default(),
            typing: TypingTempoPlan::default(),
            seed: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MouseTempoPlan {
    #[serde(default = "MouseTempoPlan::default_pre_delay_ms")]
    pub pre_delay_ms: u64,
    #[serde(default = "MouseTempoPlan::default_jitter_ms")]
    pub jitter_ms: u64,
}

impl MouseTempoPlan {
    fn default_pre_delay_ms() -> u64 {
        120
    }

    fn default_jitter_ms() -> u64 {
        80
    }
}

impl Default for MouseTempoPlan {
    fn default() -> Self {
        Self {
            pre_delay_ms: Self::default_pre_delay_ms(),
            jitter_ms: Self::default_jitter_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypingTempoPlan {
    #[serde(default = "TypingTempoPlan::default_per_char_ms")]
    pub per_char_ms: u64,
    #[serde(default = "TypingTempoPlan::default_jitter_ms")]
    pub jitter_ms: u64,
}

impl TypingTempoPlan {
    fn default_per_char_ms() -> u64 {
        140
    }

    fn default_jitter_ms() -> u64 {
        60
    }
}

impl Default for TypingTempoPlan {
    fn default() -> Self {
        Self {
            per_char_ms: Self::default_per_char_ms(),
            jitter_ms: Self::default_jitter_ms(),
        }
    }
}

pub fn load_bundle_from_reader<R: Read>(mut reader: R) -> Result<ProfileBundle, ConfigError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_bundle_str(&buf)
}

pub fn load_bundle_from_path(path: impl AsRef<Path>) -> Result<ProfileBundle, ConfigError> {
    let file = File::open(path.as_ref())?;
    load_bundle_from_reader(file)
}

pub fn parse_bundle_str(raw: &str) -> Result<ProfileBundle, ConfigError> {
    match serde_json::from_str(raw) {
        Ok(bundle) => Ok(bundle),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ConfigError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_bundle_with_defaults() {
        let raw = r#"
profiles:
  - name: lean
    user_agent: "Mozilla/5.0 Test"
    accept_language: "en-IN, hi;q=0.8"
    patches:
      canvas_noise: false
tempos:
  - name: slow
    typing:
      per_char_ms: 250
policy:
  version: 1
  defaults:
    profile: lean
    tempo: slow
"#;
        let bundle = parse_bundle_str(raw).expect("yaml bundle");
        let profile = &bundle.profiles[0];
        assert_eq!(profile.languages(), vec!["en-IN", "hi"]);
        assert!(!profile.patches.canvas_noise);
        assert!(profile.patches.webdriver);
        assert_eq!(bundle.tempos[0].typing.per_char_ms, 250);
        assert_eq!(bundle.tempos[0].typing.jitter_ms, 60);
        assert!(bundle.policy.expect("policy").sites.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_bundle_str("profiles: [unterminated"),
            Err(ConfigError::Deserialize(_))
        ));
    }
}
