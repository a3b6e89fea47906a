use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

const ENV_PREFIX: &str = "SPEED_DASHBOARD";

#[derive(Debug, Parser)]
#[command(
    name = "speed-dashboard",
    about = "Web dashboard for internet speed monitoring logs",
    version,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with SPEED_DASHBOARD__ prefix (e.g., SPEED_DASHBOARD__SERVER__PORT)
    2. .env file in the current directory
    3. Config file with -c option (TOML)

Examples:
    # Serve the dashboard on the default port
    speed-dashboard

    # Print summary statistics for a different log directory
    speed-dashboard --log-dir /var/log/speed-cli stats"#
)]
pub struct AppArgs {
    /// Path to the configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Override the speed log directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Serve the dashboard and JSON API (default)
    Serve,
    /// Print summary statistics as JSON and exit
    Stats,
    /// Run one speed test through the monitor script and print the result
    Trigger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logs: LogSettings,
    #[serde(default)]
    pub trigger: TriggerSettings,
    /// Prometheus exporter address; metrics are not exported when unset
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 6432,
        }
    }
}

impl ServerSettings {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Directory the monitor script writes its CSV logs into
    pub dir: PathBuf,
    /// File name glob inside `dir`
    pub pattern: String,
    /// Number of records served by `/api/data`; 168 is a week of hourly tests
    pub window: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/internet_logs"),
            pattern: "speed_log_*.csv".to_string(),
            window: 168,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub timeout_secs: u64,
    /// Candidate monitor script locations, in priority order
    pub scripts: Vec<PathBuf>,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 180,
            scripts: vec![
                PathBuf::from("/opt/homebrew/bin/internet_monitor.sh"),
                PathBuf::from("/usr/local/bin/internet_monitor.sh"),
                PathBuf::from("~/.local/bin/internet_monitor.sh"),
            ],
        }
    }
}

impl TriggerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerSettings::default(),
            logs: LogSettings::default(),
            trigger: TriggerSettings::default(),
            metrics_addr: None,
        }
    }
}

impl Settings {
    /// Build settings from the optional config file, `.env`, environment and
    /// command line overrides, in increasing priority.
    pub fn new(args: &AppArgs) -> Result<Self> {
        // NOTE: a missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::load(args, environment())
    }

    fn load(args: &AppArgs, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = &args.config {
            builder = builder.add_source(File::with_name(&file.to_string_lossy()).required(false));
        }

        let mut settings: Settings = builder
            .add_source(env)
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if let Some(port) = args.port {
            settings.server.port = port;
        }
        if let Some(dir) = &args.log_dir {
            settings.logs.dir = dir.clone();
        }

        settings.expand_paths();
        validate(&settings)?;

        Ok(settings)
    }

    /// Resolve a leading `~` in every configured path.
    pub fn expand_paths(&mut self) {
        self.logs.dir = expand_home(&self.logs.dir);
        self.trigger.scripts = self.trigger.scripts.iter().map(|p| expand_home(p)).collect();
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tListen: {}\n\
             \tLog Dir: {}\n\
             \tLog Pattern: {}\n\
             \tWindow: {}\n\
             \tTrigger Timeout: {}s\n\
             }}",
            self.log_level,
            self.server.addr(),
            self.logs.dir.display(),
            self.logs.pattern,
            self.logs.window,
            self.trigger.timeout_secs,
        )
    }
}

pub fn validate(settings: &Settings) -> Result<()> {
    if settings.server.port == 0 {
        bail!("Server port must be greater than 0");
    }

    if settings.logs.pattern.trim().is_empty() {
        bail!("Log file pattern cannot be empty");
    }

    if settings.logs.window == 0 {
        bail!("Log window must be greater than 0");
    }

    if settings.trigger.timeout_secs == 0 {
        bail!("Trigger timeout must be greater than 0");
    }

    if settings.trigger.scripts.is_empty() {
        bail!("At least one monitor script candidate is required");
    }

    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        bail!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level,
            valid_log_levels
        );
    }

    Ok(())
}

/// `SPEED_DASHBOARD__<SECTION>__<KEY>` variables; `trigger.scripts` is a
/// comma separated list.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("trigger.scripts")
        .try_parsing(true)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
