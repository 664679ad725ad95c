//! Environment configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_SCANNER_KEYWORD: &str = "malicious";
const DEFAULT_CLAMD_ADDRESS: &str = "localhost:3310";
const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CORRELATION_WINDOW_MINUTES: i64 = 15;
const DEFAULT_CORRELATION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CORRELATION_MAX_PAGES: usize = 5;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

// CloudTrail keeps 90 days of event history
const MAX_CORRELATION_WINDOW_MINUTES: i64 = 90 * 24 * 60;
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerBackend {
    /// Flags keys containing a marker substring.
    Keyword,
    ClamAv,
}

impl FromStr for ScannerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(ScannerBackend::Keyword),
            "clamav" => Ok(ScannerBackend::ClamAv),
            other => Err(ConfigError::Invalid {
                name: "SCANNER_BACKEND",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upload_queue_url: String,
    pub alert_destination_email: String,
    pub alert_source_email: String,
    pub scanner_backend: ScannerBackend,
    pub scanner_keyword: String,
    pub scanner_secret_id: Option<String>,
    pub clamd_address: String,
    pub scan_timeout: Duration,
    pub correlation_window: chrono::Duration,
    pub correlation_timeout: Duration,
    pub correlation_max_pages: usize,
    pub run_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub use_path_style_buckets: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source; empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let scanner_backend = match get("SCANNER_BACKEND") {
            Some(value) => value.parse()?,
            None => ScannerBackend::Keyword,
        };

        let window_minutes: i64 = parse_or(
            get("CORRELATION_WINDOW_MINUTES"),
            "CORRELATION_WINDOW_MINUTES",
            DEFAULT_CORRELATION_WINDOW_MINUTES,
        )?;
        let correlation_window = (1..=MAX_CORRELATION_WINDOW_MINUTES)
            .contains(&window_minutes)
            .then(|| chrono::TimeDelta::try_minutes(window_minutes))
            .flatten()
            .ok_or_else(|| ConfigError::Invalid {
                name: "CORRELATION_WINDOW_MINUTES",
                value: window_minutes.to_string(),
            })?;

        let run_timeout = match get("RUN_TIMEOUT_SECONDS") {
            Some(value) => Some(timeout_value(&value, "RUN_TIMEOUT_SECONDS")?),
            None => None,
        };

        let timeout_or = |name: &'static str, default: u64| match get(name) {
            Some(value) => timeout_value(&value, name),
            None => Ok(Duration::from_secs(default)),
        };

        Ok(Config {
            upload_queue_url: required("UPLOAD_QUEUE_URL")?,
            alert_destination_email: required("ALERT_DESTINATION_EMAIL")?,
            alert_source_email: required("ALERT_SOURCE_EMAIL")?,
            scanner_backend,
            scanner_keyword: get("SCANNER_KEYWORD")
                .unwrap_or_else(|| DEFAULT_SCANNER_KEYWORD.to_string()),
            scanner_secret_id: get("SCANNER_SECRET_ID"),
            clamd_address: get("CLAMD_ADDRESS")
                .unwrap_or_else(|| DEFAULT_CLAMD_ADDRESS.to_string()),
            scan_timeout: timeout_or("SCAN_TIMEOUT_SECONDS", DEFAULT_SCAN_TIMEOUT_SECS)?,
            correlation_window,
            correlation_timeout: timeout_or(
                "CORRELATION_TIMEOUT_SECONDS",
                DEFAULT_CORRELATION_TIMEOUT_SECS,
            )?,
            correlation_max_pages: parse_or(
                get("CORRELATION_MAX_PAGES"),
                "CORRELATION_MAX_PAGES",
                DEFAULT_CORRELATION_MAX_PAGES,
            )?,
            run_timeout,
            poll_interval: timeout_or("POLL_INTERVAL_SECONDS", DEFAULT_POLL_INTERVAL_SECS)?,
            use_path_style_buckets: get("USE_PATH_STYLE_BUCKETS")
                .map(|value| value.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }
}

/// Whole seconds, at most one day.
fn timeout_value(value: &str, name: &'static str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_value(value, name)?;
    if secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_value<T: FromStr>(value: &str, name: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => parse_value(&value, name),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("UPLOAD_QUEUE_URL", "https://sqs.eu-north-1.amazonaws.com/123/uploads"),
        ("ALERT_DESTINATION_EMAIL", "security@example.com"),
        ("ALERT_SOURCE_EMAIL", "alerts@example.com"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.scanner_backend, ScannerBackend::Keyword);
        assert_eq!(config.scanner_keyword, "malicious");
        assert_eq!(config.scanner_secret_id, None);
        assert_eq!(config.clamd_address, "localhost:3310");
        assert_eq!(config.scan_timeout, Duration::from_secs(60));
        assert_eq!(config.correlation_window, chrono::Duration::minutes(15));
        assert_eq!(config.correlation_timeout, Duration::from_secs(10));
        assert_eq!(config.correlation_max_pages, 5);
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(!config.use_path_style_buckets);
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("SCANNER_BACKEND", "ClamAV"),
            ("SCANNER_SECRET_ID", "scanner/clamd"),
            ("CORRELATION_WINDOW_MINUTES", "30"),
            ("RUN_TIMEOUT_SECONDS", "120"),
            ("USE_PATH_STYLE_BUCKETS", "TRUE"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.scanner_backend, ScannerBackend::ClamAv);
        assert_eq!(config.scanner_secret_id.as_deref(), Some("scanner/clamd"));
        assert_eq!(config.correlation_window, chrono::Duration::minutes(30));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(120)));
        assert!(config.use_path_style_buckets);
    }

    #[test]
    fn test_missing_and_invalid() {
        let result = Config::from_lookup(lookup(&REQUIRED[..2]));
        assert!(matches!(result, Err(ConfigError::Missing("ALERT_SOURCE_EMAIL"))));

        let mut vars = REQUIRED.to_vec();
        vars.push(("SCAN_TIMEOUT_SECONDS", "soon"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "SCAN_TIMEOUT_SECONDS", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("SCANNER_BACKEND", "virustotal"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "SCANNER_BACKEND", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("CORRELATION_WINDOW_MINUTES", "0"));
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        for (name, value) in [
            ("RUN_TIMEOUT_SECONDS", "18446744073709551615"),
            ("RUN_TIMEOUT_SECONDS", "86401"),
            ("SCAN_TIMEOUT_SECONDS", "999999999"),
            ("CORRELATION_TIMEOUT_SECONDS", "100000"),
            ("CORRELATION_WINDOW_MINUTES", "9223372036854775807"),
            ("CORRELATION_WINDOW_MINUTES", "150000000000000"),
            ("CORRELATION_WINDOW_MINUTES", "129601"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((name, value));
            let result = Config::from_lookup(lookup(&vars));
            assert!(
                matches!(result, Err(ConfigError::Invalid { name: n, .. }) if n == name),
                "{}={} should be rejected",
                name,
                value
            );
        }

        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("RUN_TIMEOUT_SECONDS", "86400"),
            ("CORRELATION_WINDOW_MINUTES", "129600"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.run_timeout, Some(Duration::from_secs(86400)));
        assert_eq!(config.correlation_window, chrono::Duration::days(90));
    }
}
