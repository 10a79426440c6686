//! Chromium DevTools Protocol adapter for CartScout.
//!
//! The crate launches (or connects to) one Chromium process per [`transport::ChromiumTransport`],
//! multiplexes CDP commands and events over a single websocket, and exposes a single attached page
//! through the [`page::PageDriver`] trait. Network activity for the page is fed into
//! `network-tap-light` so navigation can wait for idleness and callers can race on responses.

pub mod commands;
pub mod metrics;
pub mod page;
mod registry;
pub mod transport;
mod util;

pub use commands::{NavigationWait, ResponseEvent, SelectorState};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use page::{PageDriver, PageSession};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

use std::{env, path::PathBuf};
use which::which;

pub mod ids {
    /// Page identifiers are shared with the network tap so events need no translation.
    pub use network_tap_light::PageId;
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
    pub enum AdapterErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("navigation failed")]
        NavFailed,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("browser launch failed")]
        LaunchFailed,
        #[error("target element not found")]
        TargetNotFound,
        #[error("script evaluation failed")]
        Script,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{env, path::PathBuf};

    /// Configuration for launching one browser process.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        /// Profile directory; a throwaway directory is created per launch when unset.
        pub user_data_dir: Option<PathBuf>,
        pub headless: bool,
        pub no_sandbox: bool,
        pub extra_args: Vec<String>,
        pub window_size: (u32, u32),
        pub default_deadline_ms: u64,
        pub launch_timeout_ms: u64,
        pub heartbeat_interval_ms: u64,
        pub websocket_url: Option<String>,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: detect_chrome_executable().unwrap_or_default(),
                user_data_dir: None,
                headless: resolve_headless_default(),
                no_sandbox: env_flag("DISABLE_SANDBOX"),
                extra_args: Vec::new(),
                window_size: (1396, 632),
                default_deadline_ms: 30_000,
                launch_timeout_ms: 20_000,
                heartbeat_interval_ms: 15_000,
                websocket_url: None,
            }
        }
    }

    fn resolve_headless_default() -> bool {
        // "0", "false", "no", "off" mean headful
        match env::var("HEADLESS") {
            Ok(value) => {
                let lower = value.trim().to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn env_flag(key: &str) -> bool {
        env::var(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

const CHROME_NAMES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
];

const INSTALL_PATHS: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// Resolves the browser binary: `CHROME_PATH`, then `PATH` lookups, then well-known install paths.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    let explicit = env::var("CHROME_PATH").ok();
    resolve_chrome(explicit.as_deref(), |name| which(name).ok(), INSTALL_PATHS)
}

fn resolve_chrome(
    explicit: Option<&str>,
    lookup: impl Fn(&str) -> Option<PathBuf>,
    install_paths: &[&str],
) -> Option<PathBuf> {
    let explicit = explicit
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from);
    if let Some(path) = explicit.filter(|path| path.exists()) {
        return Some(path);
    }
    CHROME_NAMES
        .iter()
        .find_map(|name| lookup(*name))
        .or_else(|| {
            install_paths
                .iter()
                .map(|path| PathBuf::from(*path))
                .find(|path| path.exists())
        })
}

#[cfg(test)]
mod tests {
    use super::{config::CdpConfig, resolve_chrome};
    use serial_test::serial;
    use std::path::PathBuf;
    use std::{env, fs};
    use tempfile::tempdir;

    fn nothing_on_path(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn explicit_path_wins_when_it_exists() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("chrome-for-testing");
        fs::write(&exe, b"").unwrap();
        let found = resolve_chrome(
            Some(&format!("  {}  ", exe.display())),
            |_| Some(PathBuf::from("/somewhere/else")),
            &[],
        );
        assert_eq!(found, Some(exe));
    }

    #[test]
    fn missing_explicit_path_falls_back_to_lookup_order() {
        let found = resolve_chrome(
            Some("/definitely/not/here"),
            |name| (name == "chromium").then(|| PathBuf::from("/opt/bin/chromium")),
            &[],
        );
        assert_eq!(found, Some(PathBuf::from("/opt/bin/chromium")));
    }

    #[test]
    fn install_paths_are_the_last_resort() {
        let dir = tempdir().unwrap();
        let installed = dir.path().join("chromium");
        fs::write(&installed, b"").unwrap();
        let missing = dir.path().join("absent");
        let paths = [missing.to_str().unwrap(), installed.to_str().unwrap()];
        assert_eq!(resolve_chrome(None, nothing_on_path, &paths), Some(installed));
        assert_eq!(resolve_chrome(Some(""), nothing_on_path, &[]), None);
    }

    #[test]
    #[serial(chrome_env)]
    fn headless_follows_the_environment() {
        let original = env::var("HEADLESS").ok();
        env::set_var("HEADLESS", "off");
        assert!(!CdpConfig::default().headless);
        env::set_var("HEADLESS", "1");
        assert!(CdpConfig::default().headless);
        match original {
            Some(value) => env::set_var("HEADLESS", value),
            None => env::remove_var("HEADLESS"),
        }
    }
}
