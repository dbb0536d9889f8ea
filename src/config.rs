//! TOML configuration for NetPulse.
//!
//! Layered like every other PacketParamedic binary: an explicit path from the
//! `NETPULSE_CONFIG` environment variable, then `/etc/netpulse/netpulse.toml`,
//! then compiled-in defaults. Every section may be omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "NETPULSE_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/netpulse/netpulse.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetpulseConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetpulseConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded netpulse configuration");
        Ok(config)
    }

    /// Environment override, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "NETPULSE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub pool_size: u32,
    /// Upper bound on any single database call (seconds).
    pub query_timeout_secs: u64,
}

impl StorageConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/netpulse.db"),
            pool_size: 8,
            query_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// History used to learn the hour-of-week baseline.
    pub baseline_weeks: u32,
    /// Recent rollups compared against the baseline on each detection pass.
    pub detection_window_minutes: u32,
    /// Closed anomalies scanned for recurring patterns.
    pub pattern_weeks: u32,
    pub min_pattern_occurrences: u32,
    /// Baseline buckets with fewer rollups are never used for detection.
    pub min_baseline_samples: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            baseline_weeks: 4,
            detection_window_minutes: 10,
            pattern_weeks: 4,
            min_pattern_occurrences: 3,
            min_baseline_samples: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Minimum gap between two firings of the same alert rule.
    pub cooldown_minutes: u32,
    /// Per-notification bound for webhook, Discord and SMTP delivery.
    pub notify_timeout_secs: u64,
}

impl AlertsConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
            notify_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// SMTP
// ---------------------------------------------------------------------------

/// Outbound mail relay for the email channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS. Otherwise STARTTLS is used whenever the server offers it.
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            secure: false,
            username: None,
            password: None,
            from: "netpulse@localhost".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Cron expressions (`sec min hour day-of-month month day-of-week`), UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub baseline_compute: String,
    pub anomaly_detect: String,
    pub pattern_detect: String,
    pub alert_evaluate: String,
    pub rollup_refresh: String,
    /// Raw measurements re-aggregated by each rollup refresh.
    pub rollup_lookback_minutes: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            baseline_compute: "0 0 * * * *".to_string(),
            anomaly_detect: "0 */5 * * * *".to_string(),
            pattern_detect: "0 0 0 * * Sun".to_string(),
            alert_evaluate: "0 * * * * *".to_string(),
            rollup_refresh: "30 * * * * *".to_string(),
            rollup_lookback_minutes: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = NetpulseConfig::default();

        assert_eq!(cfg.storage.db_path, PathBuf::from("data/netpulse.db"));
        assert_eq!(cfg.storage.query_timeout(), Duration::from_secs(10));

        assert_eq!(cfg.detection.baseline_weeks, 4);
        assert_eq!(cfg.detection.detection_window_minutes, 10);
        assert_eq!(cfg.detection.min_pattern_occurrences, 3);
        assert_eq!(cfg.detection.min_baseline_samples, 4);

        assert_eq!(cfg.alerts.cooldown(), chrono::Duration::minutes(30));
        assert_eq!(cfg.alerts.notify_timeout(), Duration::from_secs(10));

        assert_eq!(cfg.smtp.host, "localhost");
        assert_eq!(cfg.smtp.port, 587);
        assert!(!cfg.smtp.secure);
        assert_eq!(cfg.smtp.from, "netpulse@localhost");

        assert_eq!(cfg.jobs.anomaly_detect, "0 */5 * * * *");
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_default_cron_expressions_parse() {
        use std::str::FromStr;
        let jobs = JobsConfig::default();
        for expr in [
            &jobs.baseline_compute,
            &jobs.anomaly_detect,
            &jobs.pattern_detect,
            &jobs.alert_evaluate,
            &jobs.rollup_refresh,
        ] {
            assert!(cron::Schedule::from_str(expr).is_ok(), "bad cron: {expr}");
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[alerts]
cooldown_minutes = 5

[smtp]
host = "mail.example.net"
secure = true
username = "netpulse"
"#;
        let cfg: NetpulseConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.alerts.cooldown_minutes, 5);
        assert_eq!(cfg.alerts.notify_timeout_secs, 10);
        assert_eq!(cfg.smtp.host, "mail.example.net");
        assert!(cfg.smtp.secure);
        assert_eq!(cfg.smtp.username.as_deref(), Some("netpulse"));
        assert_eq!(cfg.smtp.port, 587);
        assert_eq!(cfg.detection.baseline_weeks, 4);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: NetpulseConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.storage.pool_size, StorageConfig::default().pool_size);
        assert_eq!(cfg.jobs.pattern_detect, "0 0 0 * * Sun");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[storage]\ndb_path = \"/var/lib/netpulse/np.db\"\n\n[logging]\njson = true"
        )
        .unwrap();

        let cfg = NetpulseConfig::load(file.path()).unwrap();
        assert_eq!(cfg.storage.db_path, PathBuf::from("/var/lib/netpulse/np.db"));
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[alerts]\ncooldown_minutes = \"soon\"").unwrap();
        assert!(NetpulseConfig::load(file.path()).is_err());
    }
}
