//! Load config from file and environment.

use std::path::PathBuf;

use anyhow::Context;
use printbot_core::PublicKey;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/printbot/config.toml or /etc/printbot/config.toml.
/// Env overrides: PRINTBOT_LISTEN_PORT, PRINTBOT_SNAPSHOT, PRINTBOT_SPOOL_DIR,
/// PRINTBOT_PRINT_COMMAND, PRINTBOT_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Display name announced to peers.
    #[serde(default = "default_name")]
    pub name: String,
    /// TCP port peers connect to (default 33446).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub bootstrap: BootstrapNode,
    /// Session snapshot file (default printbot.data).
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Where received files are kept (default ./spool).
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// File name suffix that gets printed (default .gcode).
    #[serde(default = "default_accepted_suffix")]
    pub accepted_suffix: String,
    #[serde(default)]
    pub print: PrintCommand,
    /// Control loop period in milliseconds (default 10).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Tell requesters when the print command failed to run.
    #[serde(default)]
    pub report_failures: bool,
    /// Log filter used when RUST_LOG is unset (default printbot=info).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// The node we bootstrap into the network through.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapNode {
    #[serde(default = "default_bootstrap_host")]
    pub host: String,
    #[serde(default = "default_bootstrap_port")]
    pub port: u16,
    /// Hex public key the node must present.
    #[serde(default = "default_bootstrap_key")]
    pub public_key: String,
}

/// The external print command. The spooled file's absolute path is appended to `args`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrintCommand {
    #[serde(default = "default_print_program")]
    pub program: String,
    #[serde(default = "default_print_args")]
    pub args: Vec<String>,
    /// Environment variable naming the working directory for the command.
    #[serde(default = "default_workdir_env")]
    pub workdir_env: String,
    /// Working directory; the spool directory when unset.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

fn default_name() -> String {
    "PrintBot".to_string()
}
fn default_listen_port() -> u16 {
    33446
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("printbot.data")
}
fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}
fn default_accepted_suffix() -> String {
    ".gcode".to_string()
}
fn default_tick_ms() -> u64 {
    10
}
fn default_log_level() -> String {
    "printbot=info".to_string()
}
fn default_bootstrap_host() -> String {
    "192.210.149.121".to_string()
}
fn default_bootstrap_port() -> u16 {
    33445
}
fn default_bootstrap_key() -> String {
    "F404ABAA1C99A9D37D61AB54898F56793E1DEF8BD46B1038B9D822E8460FAB67".to_string()
}
fn default_print_program() -> String {
    "printcore".to_string()
}
fn default_print_args() -> Vec<String> {
    vec!["/dev/ttyUSB0".to_string()]
}
fn default_workdir_env() -> String {
    "PRINTBOT_WORKDIR".to_string()
}

impl Default for BootstrapNode {
    fn default() -> Self {
        Self {
            host: default_bootstrap_host(),
            port: default_bootstrap_port(),
            public_key: default_bootstrap_key(),
        }
    }
}

impl BootstrapNode {
    pub fn key(&self) -> anyhow::Result<PublicKey> {
        PublicKey::from_hex(&self.public_key)
            .with_context(|| format!("bootstrap public_key {:?} is not 64 hex digits", self.public_key))
    }
}

impl Default for PrintCommand {
    fn default() -> Self {
        Self {
            program: default_print_program(),
            args: default_print_args(),
            workdir_env: default_workdir_env(),
            workdir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_port: default_listen_port(),
            bootstrap: BootstrapNode::default(),
            snapshot_path: default_snapshot_path(),
            spool_dir: default_spool_dir(),
            accepted_suffix: default_accepted_suffix(),
            print: PrintCommand::default(),
            tick_ms: default_tick_ms(),
            report_failures: false,
            log_level: default_log_level(),
        }
    }
}

/// Load config: default, then the first config file found, then env vars.
/// A config file that exists but does not parse is an error.
pub fn load() -> anyhow::Result<Config> {
    let mut c = match load_file()? {
        Some(c) => c,
        None => Config::default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok())?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
    if let Some(s) = var("PRINTBOT_LISTEN_PORT") {
        c.listen_port = s
            .parse()
            .with_context(|| format!("PRINTBOT_LISTEN_PORT={s} is not a port"))?;
    }
    if let Some(s) = var("PRINTBOT_SNAPSHOT") {
        c.snapshot_path = PathBuf::from(s);
    }
    if let Some(s) = var("PRINTBOT_SPOOL_DIR") {
        c.spool_dir = PathBuf::from(s);
    }
    if let Some(s) = var("PRINTBOT_PRINT_COMMAND") {
        c.print.program = s;
    }
    if let Some(s) = var("PRINTBOT_LOG") {
        c.log_level = s;
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/printbot/config.toml"));
    }
    out.push(PathBuf::from("/etc/printbot/config.toml"));
    out
}

fn load_file() -> anyhow::Result<Option<Config>> {
    for p in config_paths() {
        if p.exists() {
            let s = std::fs::read_to_string(&p)
                .with_context(|| format!("reading {}", p.display()))?;
            let c = parse(&s).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(Some(c));
        }
    }
    Ok(None)
}

fn parse(s: &str) -> anyhow::Result<Config> {
    Ok(toml::from_str::<Config>(s)?)
}
