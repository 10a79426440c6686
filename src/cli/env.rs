use std::path::PathBuf;

use clap::Parser;

use crate::config::CliOverrides;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Port for the HTTP and WebSocket server
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the built frontend
    #[arg(long, value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// Show browser windows instead of running headless
    #[arg(long, conflicts_with = "headless")]
    pub headful: bool,

    /// Force headless browsers regardless of HEADLESS
    #[arg(long)]
    pub headless: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl CliArgs {
    pub fn overrides(&self) -> CliOverrides {
        let headless = match (self.headless, self.headful) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        CliOverrides {
            port: self.port,
            headless,
            static_dir: self.static_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headful_flag_turns_headless_off() {
        let args = CliArgs::parse_from(["cartscout", "--headful", "--port", "8080"]);
        let overrides = args.overrides();
        assert_eq!(overrides.headless, Some(false));
        assert_eq!(overrides.port, Some(8080));
    }

    #[test]
    fn no_browser_flag_leaves_environment_in_charge() {
        let args = CliArgs::parse_from(["cartscout"]);
        assert_eq!(args.overrides().headless, None);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn headless_and_headful_conflict() {
        assert!(CliArgs::try_parse_from(["cartscout", "--headless", "--headful"]).is_err());
    }
}
