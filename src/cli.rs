use std::env;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fluxgauge")]
#[command(about = "Poll InfluxDB queries and expose their latest values as metrics", long_about = None)]
pub struct Cli {
    /// Path to the YAML config
    #[arg(short, long, env = "FLUXGAUGE_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Poll every configured metric until interrupted
    Run {
        /// Print each metric update as a JSON line on stdout
        #[arg(long)]
        print_updates: bool,
    },

    /// Connect once, run every query once and report
    Check,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Run { print_updates: false })
    }

    pub fn config_path(&self) -> PathBuf {
        resolve_config_path(self.config.as_deref(), env::var("HOME").ok().as_deref())
    }
}

/// Explicit path, then `$HOME/.fluxgauge/config.yaml` when it exists, then
/// `fluxgauge.yaml` in the working directory.
pub fn resolve_config_path(explicit: Option<&Path>, home: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Some(home) = home {
        let candidate = Path::new(home).join(".fluxgauge").join("config.yaml");
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from("fluxgauge.yaml")
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::parse_from(["fluxgauge"]);
        assert_eq!(cli.command(), Command::Run { print_updates: false });
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_check_with_config() {
        let cli = Cli::parse_from(["fluxgauge", "check", "--config", "/tmp/f.yaml"]);
        assert_eq!(cli.command(), Command::Check);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/f.yaml")));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_config_path(Some(Path::new("custom.yaml")), Some("/home/nobody"));
        assert_eq!(path, PathBuf::from("custom.yaml"));
    }

    #[test]
    fn home_config_used_when_present() {
        let home = tempfile::tempdir().expect("tempdir");
        let dir = home.path().join(".fluxgauge");
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("config.yaml"), "connections: []\n").expect("write");

        let home_str = home.path().to_str().expect("utf8");
        assert_eq!(
            resolve_config_path(None, Some(home_str)),
            dir.join("config.yaml")
        );
    }

    #[test]
    fn falls_back_to_working_directory() {
        let home = tempfile::tempdir().expect("tempdir");
        let home_str = home.path().to_str().expect("utf8");
        assert_eq!(
            resolve_config_path(None, Some(home_str)),
            PathBuf::from("fluxgauge.yaml")
        );
        assert_eq!(resolve_config_path(None, None), PathBuf::from("fluxgauge.yaml"));
    }
}
