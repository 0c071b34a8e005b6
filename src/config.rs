use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub template: TemplateConfig,
    pub logging: LoggingConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

/// Parent directory of the `storage/` tree (databases, vectors, knowledge,
/// feedback, audit). See spec.md §6 "Persisted state layout".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub base_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { base_dir: "./data".to_string() }
    }
}

impl DatabaseConfig {
    pub fn storage_dir(&self) -> PathBuf {
        Path::new(&self.base_dir).join("storage")
    }

    pub fn main_db_path(&self) -> PathBuf {
        self.storage_dir().join("databases").join("main.db")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.storage_dir().join("vectors")
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.storage_dir().join("knowledge").join("knowledge.json")
    }

    pub fn feedback_db_path(&self) -> PathBuf {
        self.storage_dir().join("feedback").join("feedback.db")
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.storage_dir().join("audit").join("audit.db")
    }
}

/// `BRAIN_URL`/`INTELLIGENCE_URL` endpoints and timing knobs for the external
/// chat-completions contract (spec.md §6 "External LLM contract").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub brain_url: String,
    pub intelligence_url: String,
    pub temperature_classifier: f64,
    pub temperature_synthesis: f64,
    pub timeout_classifier_secs: u64,
    pub timeout_synthesis_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            brain_url: "http://localhost:8090".to_string(),
            intelligence_url: "http://localhost:8080".to_string(),
            temperature_classifier: 0.1,
            temperature_synthesis: 0.7,
            timeout_classifier_secs: 30,
            timeout_synthesis_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub name: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self { name: "generic".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

/// `AUDIT_*` env vars from spec.md §6, mirroring
/// `shared/config/audit_config.py::AuditConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days: i64,
    pub debug: bool,
    pub secret_key: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 2555,
            debug: false,
            secret_key: "default-secret-change-in-production".to_string(),
        }
    }
}

/// Command line arguments for configuration overrides.
#[derive(Parser, Debug, Clone)]
#[command(name = "intelligence-server")]
#[command(version, about = "Business-data intelligence service")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Base directory holding storage/ (overrides config file)
    #[arg(long, value_name = "DIR")]
    pub database_dir: Option<String>,

    /// Brain LLM base URL (overrides config file / BRAIN_URL)
    #[arg(long, value_name = "URL")]
    pub brain_url: Option<String>,

    /// Logging level (overrides config file)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables:
    /// - `APP_SERVER_HOST`, `APP_SERVER_PORT`, `APP_DATABASE_DIR`, `APP_LOG_LEVEL`
    /// - `INTELLIGENCE_URL`, `BRAIN_URL`, `INTELLIGENCE_TEMPLATE`
    /// - `AUDIT_ENABLED`, `AUDIT_RETENTION_DAYS`, `AUDIT_DEBUG`, `AUDIT_SECRET_KEY`
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }
        if let Ok(dir) = std::env::var("APP_DATABASE_DIR") {
            self.database.base_dir = dir;
            tracing::info!("Override database.base_dir from env");
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(url) = std::env::var("BRAIN_URL") {
            self.llm.brain_url = url;
            tracing::info!("Override llm.brain_url from env BRAIN_URL");
        }
        if let Ok(url) = std::env::var("INTELLIGENCE_URL") {
            self.llm.intelligence_url = url;
            tracing::info!("Override llm.intelligence_url from env INTELLIGENCE_URL");
        }
        if let Ok(name) = std::env::var("INTELLIGENCE_TEMPLATE") {
            self.template.name = name;
            tracing::info!("Override template.name from env INTELLIGENCE_TEMPLATE");
        }

        if let Ok(enabled) = std::env::var("AUDIT_ENABLED")
            && let Ok(val) = parse_bool(&enabled)
        {
            self.audit.enabled = val;
            tracing::info!("Override audit.enabled from env AUDIT_ENABLED: {}", val);
        }
        if let Ok(days) = std::env::var("AUDIT_RETENTION_DAYS") {
            match parse_days_to_i64(&days) {
                Ok(val) => {
                    self.audit.retention_days = val;
                    tracing::info!("Override audit.retention_days from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid AUDIT_RETENTION_DAYS '{}': {} (keep {})",
                    days,
                    e,
                    self.audit.retention_days
                ),
            }
        }
        if let Ok(debug) = std::env::var("AUDIT_DEBUG")
            && let Ok(val) = parse_bool(&debug)
        {
            self.audit.debug = val;
            tracing::info!("Override audit.debug from env AUDIT_DEBUG: {}", val);
        }
        if let Ok(key) = std::env::var("AUDIT_SECRET_KEY") {
            self.audit.secret_key = key;
            tracing::info!("Override audit.secret_key from env AUDIT_SECRET_KEY");
        }
    }

    /// Apply command line argument overrides (highest priority).
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }
        if let Some(port) = args.port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }
        if let Some(dir) = &args.database_dir {
            self.database.base_dir = dir.clone();
            tracing::info!("Override database.base_dir from CLI");
        }
        if let Some(url) = &args.brain_url {
            self.llm.brain_url = url.clone();
            tracing::info!("Override llm.brain_url from CLI");
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.audit.secret_key == "default-secret-change-in-production" {
            tracing::warn!("Using the default audit secret key.");
            tracing::warn!("Set AUDIT_SECRET_KEY before relying on export signatures.");
        }

        if self.server.port == 0 {
            anyhow::bail!("server.port cannot be 0");
        }
        if self.database.base_dir.is_empty() {
            anyhow::bail!("database.base_dir cannot be empty");
        }
        if self.audit.retention_days <= 0 {
            anyhow::bail!("audit.retention_days must be > 0");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature_classifier)
            || !(0.0..=2.0).contains(&self.llm.temperature_synthesis)
        {
            anyhow::bail!("llm temperatures must be within [0.0, 2.0]");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

fn parse_bool(input: &str) -> Result<bool, String> {
    match input.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("not a boolean: {other}")),
    }
}

fn parse_days_to_i64(input: &str) -> Result<i64, String> {
    if let Ok(val) = input.parse::<i64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: i64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "d" | "day" | "days" => Ok(n),
        "w" | "week" | "weeks" => Ok(n * 7),
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn deserialize_days_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = i64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of days or a string like '2555d' or '365w'")
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i64)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audit.retention_days, 2555);
    }

    #[test]
    fn parses_day_strings() {
        assert_eq!(parse_days_to_i64("90").unwrap(), 90);
        assert_eq!(parse_days_to_i64("2w").unwrap(), 14);
        assert_eq!(parse_days_to_i64("2555d").unwrap(), 2555);
        assert!(parse_days_to_i64("nonsense").is_err());
    }
}
