use clap::{ArgAction, Parser, Subcommand, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Harness configuration. Every field is optional so layers can merge.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    /// extension library to load
    pub extension: Option<PathBuf>,
    /// report the duration of every foreign call
    pub timed: Option<bool>,
    /// how long `listen` waits for callbacks
    pub listen_secs: Option<u64>,
}

impl Config {
    pub fn timed(&self) -> bool {
        self.timed.unwrap_or(false)
    }

    pub fn listen_secs(&self) -> u64 {
        self.listen_secs.unwrap_or(5)
    }
}

/// CLI. Option fields layer over YAML.
#[derive(Debug, Parser, Clone)]
#[command(name = "rvext", version, about = "Load and exercise RVExtension libraries")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, short = 'c', value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Extension library (.dll/.so)
    #[arg(long, short = 'e', value_hint = ValueHint::FilePath)]
    pub extension: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Enable debug log level
    #[arg(long, short = 'v', alias = "verbose", action = ArgAction::SetTrue)]
    pub debug: bool,
    /// Report the time each extension call took
    #[arg(long, short = 't', action = ArgAction::SetTrue)]
    pub timed: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Read the target machine from a library header without loading it
    Machine {
        #[arg(value_hint = ValueHint::FilePath)]
        path: Option<PathBuf>,
    },
    /// Print the extension version
    Version,
    /// Call RVExtension
    Call {
        input: String,
    },
    /// Call RVExtensionArgs
    Args {
        function: String,
        args: Vec<String>,
    },
    /// Register a callback and log what the extension sends
    Listen {
        /// Seconds to wait for callbacks
        #[arg(long)]
        secs: Option<u64>,
        /// RVExtension input to send after registering
        #[arg(long)]
        call: Option<String>,
    },
}

/// Parse the command line, then build the effective config.
pub fn load() -> Result<(Cli, Config), ConfigError> {
    let cli = Cli::parse();
    let cfg = load_with(&cli)?;
    Ok((cli, cfg))
}

/// Layer defaults, YAML and CLI overrides, then validate.
pub fn load_with(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

/// Pretty YAML of effective config (nice for debugging)
pub fn dump(cfg: &Config) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(cfg)?)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/rvext/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/rvext/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/rvext.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["rvext.yaml", "config/rvext.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()    { dst.log_level = src.log_level; }
    if src.extension.is_some()    { dst.extension = src.extension; }
    if src.timed.is_some()        { dst.timed = src.timed; }
    if src.listen_secs.is_some()  { dst.listen_secs = src.listen_secs; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()  { cfg.log_level = cli.log_level.clone(); }
    if cli.debug                { cfg.log_level = Some("debug".to_string()); }
    if cli.extension.is_some()  { cfg.extension = cli.extension.clone(); }
    if cli.timed                { cfg.timed = Some(true); }
    if let Some(Command::Listen { secs: Some(secs), .. }) = cli.command.as_ref() {
        cfg.listen_secs = Some(*secs);
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(level) = cfg.log_level.as_deref() {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of {}",
                LOG_LEVELS.join("|")
            )));
        }
    }
    if cfg.listen_secs == Some(0) {
        return Err(ConfigError::Validation("listen_secs must be > 0".into()));
    }
    Ok(())
}
