//! Application state
//!
//! Configuration from the environment and the components shared with HTTP handlers

use crate::error::{Error, Result};
use crate::occupancy_estimator::DetectorClient;
use crate::polling_orchestrator::{PollingConfig, PollingOrchestrator};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// JSON camera list, re-read every cycle
    pub camera_list_file: PathBuf,
    pub cadence_sec: u64,
    pub fetch_timeout_sec: u64,
    pub retry_limit: u32,
    pub retry_delay_sec: u64,
    /// 0 disables escalation
    pub escalation_threshold: u32,
    pub cooldown_sec: u64,
    /// `None` when `DAILY_REBOOT_HOUR=off`
    pub daily_reboot_hour: Option<u32>,
    pub reboot_timezone: Tz,
    pub empty_list_backoff_sec: u64,
    pub max_concurrent_polls: usize,
    /// InfluxDB v2 base URL
    pub influxdb_url: String,
    pub influxdb_org: String,
    pub influxdb_bucket: String,
    pub influxdb_token: String,
    /// Person detector base URL
    pub detector_url: String,
    pub detector_class: String,
    pub detector_min_confidence: f32,
    /// Query string appended to a camera address for the reboot command
    pub reboot_query: String,
    pub alert_webhook_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub status_api_enabled: bool,
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset and blank keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let retry_limit: u32 = parse_or(&get, "RETRY_LIMIT", 3)?;
        if retry_limit < 1 {
            return Err(Error::Config("RETRY_LIMIT must be at least 1".to_string()));
        }

        let max_concurrent_polls: usize = parse_or(&get, "MAX_CONCURRENT_POLLS", 32)?;
        if max_concurrent_polls < 1 {
            return Err(Error::Config(
                "MAX_CONCURRENT_POLLS must be at least 1".to_string(),
            ));
        }

        let cadence_sec: u64 = parse_or(&get, "CADENCE_SECONDS", 5)?;
        if cadence_sec == 0 {
            return Err(Error::Config("CADENCE_SECONDS must be positive".to_string()));
        }

        let fetch_timeout_sec: u64 = parse_or(&get, "FETCH_TIMEOUT_SECONDS", 5)?;
        if fetch_timeout_sec == 0 {
            return Err(Error::Config(
                "FETCH_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }

        let daily_reboot_hour = match get("DAILY_REBOOT_HOUR") {
            None => Some(3),
            Some(v) if v.eq_ignore_ascii_case("off") => None,
            Some(v) => {
                let hour: u32 = v.parse().map_err(|_| {
                    Error::Config(format!("DAILY_REBOOT_HOUR: invalid value '{}'", v))
                })?;
                if hour > 23 {
                    return Err(Error::Config(format!(
                        "DAILY_REBOOT_HOUR must be 0-23 or off, got {}",
                        hour
                    )));
                }
                Some(hour)
            }
        };

        let reboot_timezone = match get("REBOOT_TIMEZONE") {
            None => chrono_tz::Asia::Tokyo,
            Some(v) => Tz::from_str(&v)
                .map_err(|_| Error::Config(format!("REBOOT_TIMEZONE: unknown zone '{}'", v)))?,
        };

        let detector_min_confidence: f32 = parse_or(&get, "DETECTOR_MIN_CONFIDENCE", 0.0)?;
        if !(0.0..=1.0).contains(&detector_min_confidence) {
            return Err(Error::Config(
                "DETECTOR_MIN_CONFIDENCE must be within 0.0-1.0".to_string(),
            ));
        }

        Ok(Self {
            camera_list_file: get("CAMERA_LIST_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cameras.json")),
            cadence_sec,
            fetch_timeout_sec,
            retry_limit,
            retry_delay_sec: parse_or(&get, "RETRY_DELAY_SECONDS", 1)?,
            escalation_threshold: parse_or(&get, "ESCALATION_THRESHOLD", 20)?,
            cooldown_sec: parse_or(&get, "COOLDOWN_SECONDS", 300)?,
            daily_reboot_hour,
            reboot_timezone,
            empty_list_backoff_sec: parse_or(&get, "EMPTY_LIST_BACKOFF_SECONDS", 60)?,
            max_concurrent_polls,
            influxdb_url: get("INFLUXDB_URL")
                .unwrap_or_else(|| "http://localhost:8086".to_string()),
            influxdb_org: required(&get, "INFLUXDB_ORG")?,
            influxdb_bucket: required(&get, "INFLUXDB_BUCKET")?,
            influxdb_token: required(&get, "INFLUXDB_TOKEN")?,
            detector_url: get("DETECTOR_URL")
                .unwrap_or_else(|| "http://localhost:9000".to_string()),
            detector_class: get("DETECTOR_CLASS").unwrap_or_else(|| "person".to_string()),
            detector_min_confidence,
            reboot_query: get("REBOOT_QUERY").unwrap_or_else(|| "action=reboot".to_string()),
            alert_webhook_url: get("ALERT_WEBHOOK_URL"),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            status_api_enabled: parse_bool_or(&get, "STATUS_API_ENABLED", true)?,
        })
    }

    /// Tunables for the polling loop
    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            cadence: Duration::from_secs(self.cadence_sec),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_sec),
            retry_limit: self.retry_limit,
            retry_delay: Duration::from_secs(self.retry_delay_sec),
            escalation_threshold: self.escalation_threshold,
            cooldown: Duration::from_secs(self.cooldown_sec),
            daily_reboot_hour: self.daily_reboot_hour,
            reboot_timezone: self.reboot_timezone,
            empty_list_backoff: Duration::from_secs(self.empty_list_backoff_sec),
            max_concurrent_polls: self.max_concurrent_polls,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("{}: invalid value '{}'", key, v))),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("{}: invalid boolean '{}'", key, v))),
        },
    }
}

fn required<G>(get: &G, key: &str) -> Result<String>
where
    G: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| Error::Config(format!("{} is required", key)))
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// PollingOrchestrator (camera polling)
    pub polling: Arc<PollingOrchestrator>,
    /// Person detector, probed by the health check
    pub detector: Arc<DetectorClient>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(polling: Arc<PollingOrchestrator>, detector: Arc<DetectorClient>) -> Self {
        Self {
            polling,
            detector,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_sec(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut env: HashMap<String, String> = HashMap::from([
            ("INFLUXDB_ORG".to_string(), "office".to_string()),
            ("INFLUXDB_BUCKET".to_string(), "occupancy".to_string()),
            ("INFLUXDB_TOKEN".to_string(), "secret".to_string()),
        ]);
        for (k, v) in pairs {
            env.insert(k.to_string(), v.to_string());
        }
        move |key| env.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.camera_list_file, PathBuf::from("cameras.json"));
        assert_eq!(config.cadence_sec, 5);
        assert_eq!(config.fetch_timeout_sec, 5);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.retry_delay_sec, 1);
        assert_eq!(config.escalation_threshold, 20);
        assert_eq!(config.cooldown_sec, 300);
        assert_eq!(config.daily_reboot_hour, Some(3));
        assert_eq!(config.reboot_timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(config.empty_list_backoff_sec, 60);
        assert_eq!(config.max_concurrent_polls, 32);
        assert_eq!(config.detector_class, "person");
        assert_eq!(config.reboot_query, "action=reboot");
        assert!(config.alert_webhook_url.is_none());
        assert_eq!(config.port, 8080);
        assert!(config.status_api_enabled);

        let polling = config.polling_config();
        assert_eq!(polling.cadence, Duration::from_secs(5));
        assert_eq!(polling.cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CADENCE_SECONDS", "10"),
            ("RETRY_LIMIT", "1"),
            ("ESCALATION_THRESHOLD", "0"),
            ("DAILY_REBOOT_HOUR", "off"),
            ("REBOOT_TIMEZONE", "Europe/Berlin"),
            ("ALERT_WEBHOOK_URL", "http://hooks.local/x"),
            ("STATUS_API_ENABLED", "false"),
            ("PORT", " 9090 "),
        ]))
        .unwrap();

        assert_eq!(config.cadence_sec, 10);
        assert_eq!(config.retry_limit, 1);
        assert_eq!(config.escalation_threshold, 0);
        assert_eq!(config.daily_reboot_hour, None);
        assert_eq!(config.reboot_timezone, chrono_tz::Europe::Berlin);
        assert_eq!(
            config.alert_webhook_url.as_deref(),
            Some("http://hooks.local/x")
        );
        assert!(!config.status_api_enabled);
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn test_blank_value_uses_default() {
        let config = AppConfig::from_lookup(lookup(&[("COOLDOWN_SECONDS", "  ")])).unwrap();
        assert_eq!(config.cooldown_sec, 300);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (key, value) in [
            ("RETRY_LIMIT", "0"),
            ("RETRY_LIMIT", "three"),
            ("CADENCE_SECONDS", "0"),
            ("DAILY_REBOOT_HOUR", "24"),
            ("REBOOT_TIMEZONE", "Mars/Olympus"),
            ("MAX_CONCURRENT_POLLS", "0"),
            ("DETECTOR_MIN_CONFIDENCE", "1.5"),
            ("STATUS_API_ENABLED", "maybe"),
        ] {
            let result = AppConfig::from_lookup(lookup(&[(key, value)]));
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_influx_credentials_required() {
        let result = AppConfig::from_lookup(|key| match key {
            "INFLUXDB_ORG" => Some("office".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("INFLUXDB_BUCKET")));
    }
}
