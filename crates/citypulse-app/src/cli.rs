//! CLI argument definitions for the CityPulse server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// CityPulse - a conversational local-search assistant for Sydney.
#[derive(Parser, Debug)]
#[command(name = "citypulse", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory holding the session database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Priority: --config flag > CITYPULSE_CONFIG env var > ~/.citypulse/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(|k| std::env::var(k).ok())
    }

    fn resolve_config_path_with<F>(&self, env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env("CITYPULSE_CONFIG") {
            return PathBuf::from(p);
        }
        match env("HOME") {
            Some(home) => PathBuf::from(home).join(".citypulse").join("config.toml"),
            None => PathBuf::from("config.toml"),
        }
    }

    /// Priority: --port flag > config value (already env-overridden).
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.port.unwrap_or(config_port)
    }

    /// `Some` only when --data-dir was given.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// `Some` only when --log-level was given.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("citypulse").chain(args.iter().copied()))
    }

    #[test]
    fn test_no_args() {
        let args = parse(&[]);
        assert!(args.config.is_none());
        assert_eq!(args.resolve_port(8080), 8080);
        assert!(args.resolve_data_dir().is_none());
        assert!(args.resolve_log_level().is_none());
    }

    #[test]
    fn test_flags_override() {
        let args = parse(&["--port", "9001", "-d", "/tmp/cp", "--log-level", "debug"]);
        assert_eq!(args.resolve_port(8080), 9001);
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/tmp/cp"));
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
    }

    #[test]
    fn test_config_path_priority() {
        let args = parse(&["-c", "/etc/citypulse.toml"]);
        assert_eq!(
            args.resolve_config_path_with(|_| Some("/ignored".to_string())),
            PathBuf::from("/etc/citypulse.toml")
        );

        let args = parse(&[]);
        let env = |k: &str| match k {
            "CITYPULSE_CONFIG" => Some("/srv/cp.toml".to_string()),
            _ => None,
        };
        assert_eq!(args.resolve_config_path_with(env), PathBuf::from("/srv/cp.toml"));

        let env = |k: &str| (k == "HOME").then(|| "/home/ana".to_string());
        assert_eq!(
            args.resolve_config_path_with(env),
            PathBuf::from("/home/ana/.citypulse/config.toml")
        );
        assert_eq!(args.resolve_config_path_with(|_| None), PathBuf::from("config.toml"));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/cp"), PathBuf::from("/var/lib/cp"));
    }
}
