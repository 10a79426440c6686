//! Configuration management module
//!
//! [`ScoutConfig`] is layered: built-in defaults, an optional YAML file, the environment, then CLI
//! flags. Each layer only overrides what it sets.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cdp_adapter::{detect_chrome_executable, CdpConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::orchestrator::SearchTimings;

const PRODUCTION_FLAGS: &[&str] = &[
    "--disable-accelerated-2d-canvas",
    "--no-zygote",
    "--disable-gpu",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub disable_sandbox: bool,
    pub extra_args: Vec<String>,
    pub launch_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            disable_sandbox: false,
            extra_args: Vec::new(),
            launch_timeout_ms: 20_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub payload_deadline_ms: u64,
    pub dom_retry_delay_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let timings = SearchTimings::default();
        Self {
            payload_deadline_ms: timings.payload_deadline.as_millis() as u64,
            dom_retry_delay_ms: timings.dom_retry_delay.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthSettings {
    /// YAML or JSON profile bundle replacing the built-in desktop profile.
    pub profile_bundle: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    pub port: u16,
    pub frontend_url: String,
    pub environment: Environment,
    /// Falls back to `./public` in production and `../public` otherwise.
    pub static_dir: Option<PathBuf>,
    pub browser: BrowserSettings,
    pub search: SearchSettings,
    pub stealth: StealthSettings,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            frontend_url: "http://localhost:5173".to_string(),
            environment: Environment::Development,
            static_dir: None,
            browser: BrowserSettings::default(),
            search: SearchSettings::default(),
            stealth: StealthSettings::default(),
        }
    }
}

/// Overrides coming from command-line flags.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub headless: Option<bool>,
    pub static_dir: Option<PathBuf>,
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn falsy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

impl ScoutConfig {
    /// Reads the YAML file when it exists; defaults otherwise.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ScoutConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// `--config`, else `config/cartscout.yaml`, else the user config directory.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = PathBuf::from("config/cartscout.yaml");
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir().map(|dir| dir.join("cartscout").join("config.yaml"))
    }

    pub fn load(explicit: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Applies the recognized environment variables through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("HEADLESS") {
            self.browser.headless = !falsy(&value);
        }
        if let Some(value) = lookup("CHROME_PATH").filter(|v| !v.trim().is_empty()) {
            self.browser.executable = Some(PathBuf::from(value.trim()));
        }
        if let Some(value) = lookup("DISABLE_SANDBOX") {
            self.browser.disable_sandbox = truthy(&value);
        }
        if let Some(value) = lookup("FRONTEND_URL").filter(|v| !v.trim().is_empty()) {
            self.frontend_url = value.trim().to_string();
        }
        if let Some(value) = lookup("PORT") {
            self.port = value
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got {value:?}"))?;
        }
        if let Some(value) = lookup("APP_ENV") {
            match Environment::parse(&value) {
                Some(environment) => self.environment = environment,
                None => warn!(%value, "unrecognized APP_ENV; keeping {}", self.environment.as_str()),
            }
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(headless) = cli.headless {
            self.browser.headless = headless;
        }
        if let Some(dir) = &cli.static_dir {
            self.static_dir = Some(dir.clone());
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn static_root(&self) -> PathBuf {
        match &self.static_dir {
            Some(dir) => dir.clone(),
            None if self.is_production() => PathBuf::from("public"),
            None => PathBuf::from("../public"),
        }
    }

    pub fn timings(&self) -> SearchTimings {
        SearchTimings {
            payload_deadline: Duration::from_millis(self.search.payload_deadline_ms),
            dom_retry_delay: Duration::from_millis(self.search.dom_retry_delay_ms),
        }
    }

    /// Extra Chromium flags on top of the adapter's baseline set.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = self.browser.extra_args.clone();
        if self.is_production() {
            for flag in PRODUCTION_FLAGS {
                if !args.iter().any(|a| a == flag) {
                    args.push((*flag).to_string());
                }
            }
        }
        args
    }

    pub fn cdp_config(&self) -> CdpConfig {
        let executable = self
            .browser
            .executable
            .clone()
            .or_else(detect_chrome_executable)
            .unwrap_or_default();
        CdpConfig {
            executable,
            headless: self.browser.headless,
            no_sandbox: self.browser.disable_sandbox,
            extra_args: self.launch_args(),
            launch_timeout_ms: self.browser.launch_timeout_ms,
            ..CdpConfig::default()
        }
    }
}

/// Loads `config/local.env` into the process environment without overriding existing variables.
pub fn load_local_env_overrides() {
    let path = Path::new("config/local.env");
    if !path.exists() {
        return;
    }

    match fs::read_to_string(path) {
        Ok(contents) => {
            for (idx, raw_line) in contents.lines().enumerate() {
                let Some((key, value)) = parse_env_line(raw_line) else {
                    if !raw_line.trim().is_empty() && !raw_line.trim().starts_with('#') {
                        warn!(line = idx + 1, "invalid local.env entry; skipping");
                    }
                    continue;
                };
                if env::var(&key).is_ok() {
                    continue;
                }
                env::set_var(key, value);
            }
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

fn parse_env_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unescape_value(value.trim())))
}

fn unescape_value(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_layer_overrides_defaults() {
        let mut config = ScoutConfig::default();
        config
            .apply_env_from(lookup(&[
                ("HEADLESS", "off"),
                ("DISABLE_SANDBOX", "1"),
                ("PORT", "8080"),
                ("FRONTEND_URL", "https://cart.example"),
                ("APP_ENV", "production"),
            ]))
            .unwrap();
        assert!(!config.browser.headless);
        assert!(config.browser.disable_sandbox);
        assert_eq!(config.port, 8080);
        assert_eq!(config.frontend_url, "https://cart.example");
        assert_eq!(config.static_root(), PathBuf::from("public"));
        assert!(config.launch_args().contains(&"--no-zygote".to_string()));
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut config = ScoutConfig::default();
        assert!(config.apply_env_from(lookup(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn yaml_then_cli_layers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port: 7000\nbrowser:\n  headless: false\n  extra_args: [\"--lang=en-IN\"]\nsearch:\n  payload_deadline_ms: 12000"
        )
        .unwrap();

        let mut config = ScoutConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.frontend_url, "http://localhost:5173");
        assert_eq!(config.timings().payload_deadline, Duration::from_secs(12));
        assert_eq!(config.timings().dom_retry_delay, Duration::from_secs(1));
        assert_eq!(config.launch_args(), vec!["--lang=en-IN".to_string()]);
        assert_eq!(config.static_root(), PathBuf::from("../public"));

        config.apply_cli(&CliOverrides {
            port: Some(9000),
            headless: Some(true),
            static_dir: Some(PathBuf::from("dist")),
        });
        assert_eq!(config.port, 9000);
        assert!(config.browser.headless);
        assert_eq!(config.static_root(), PathBuf::from("dist"));
    }

    #[test]
    fn env_file_lines_are_unquoted() {
        assert_eq!(
            parse_env_line(r#"CHROME_PATH="/opt/google chrome""#),
            Some(("CHROME_PATH".into(), "/opt/google chrome".into()))
        );
        assert_eq!(parse_env_line("# comment"), None);
        assert_eq!(parse_env_line("novalue"), None);
    }
}
