//! Campaign settings, fixed before dispatch starts.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Identification sent in the `X-Mailer` header unless overridden.
pub const DEFAULT_MAILER: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Messages buffered between the generator and the workers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Who the campaign is sent as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// How hard a worker tries to open its transport.
///
/// Applies both to the first connection, where running out of attempts
/// stops the campaign, and to reconnects after a failed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialPolicy {
    /// Default: 3
    #[serde(default = "defaults::attempts")]
    pub attempts: u32,

    /// Pause between attempts in milliseconds.
    ///
    /// Default: 1000
    #[serde(default = "defaults::interval_ms")]
    pub interval_ms: u64,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::attempts(),
            interval_ms: defaults::interval_ms(),
        }
    }
}

impl DialPolicy {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

mod defaults {
    pub const fn attempts() -> u32 {
        3
    }

    pub const fn interval_ms() -> u64 {
        1000
    }
}

/// Everything that stays the same for every message of a campaign.
///
/// Built once, validated, then shared read-only between the generator and
/// the workers.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub text_template: String,
    pub html_template: String,
    /// Exposed to templates under `Params`
    pub params: Map<String, Value>,
    pub subject: String,
    pub sender: Sender,
    /// Messages per second
    pub rate: f64,
    pub workers: usize,
    pub channel_capacity: usize,
    pub dry_run: bool,
    /// Where dry-run messages are written
    pub output_dir: PathBuf,
    /// Fail rendering on undefined template variables instead of printing
    /// nothing
    pub strict_templates: bool,
    /// `X-Mailer` header value
    pub mailer: String,
    pub dial: DialPolicy,
}

impl CampaignConfig {
    /// A configuration with the stock rate, worker and channel settings.
    pub fn new(
        sender: Sender,
        subject: impl Into<String>,
        text_template: impl Into<String>,
        html_template: impl Into<String>,
    ) -> Self {
        Self {
            text_template: text_template.into(),
            html_template: html_template.into(),
            params: Map::new(),
            subject: subject.into(),
            sender,
            rate: 25.0,
            workers: 2,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            dry_run: false,
            output_dir: PathBuf::from("./"),
            strict_templates: false,
            mailer: DEFAULT_MAILER.to_string(),
            dial: DialPolicy::default(),
        }
    }

    /// # Errors
    ///
    /// Returns the first setting that would prevent the campaign from
    /// running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A rate so low its interval overflows `Duration` is as unusable as zero
        if !self.rate.is_finite()
            || self.rate <= 0.0
            || Duration::try_from_secs_f64(1.0 / self.rate).is_err()
        {
            return Err(ConfigError::InvalidRate(self.rate));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::NoChannelCapacity);
        }
        if self.dial.attempts == 0 {
            return Err(ConfigError::NoDialAttempts);
        }
        if self.sender.email.trim().is_empty() {
            return Err(ConfigError::MissingSender);
        }
        if self.dry_run && !self.output_dir.is_dir() {
            return Err(ConfigError::OutputDir(self.output_dir.clone()));
        }
        Ok(())
    }

    /// Spacing between two generated messages. Rates rejected by
    /// [`Self::validate`] saturate instead of panicking.
    pub fn send_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.rate)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_nanos(1))
    }
}

/// Parse the campaign parameters document, which must be a JSON object.
///
/// # Errors
///
/// Returns an error if the document is not valid JSON or not an object.
pub fn parse_params(json: &str) -> Result<Map<String, Value>, ConfigError> {
    match serde_json::from_str(json).map_err(|e| ConfigError::Params(e.to_string()))? {
        Value::Object(params) => Ok(params),
        other => Err(ConfigError::Params(format!(
            "expected an object, found {}",
            kind(&other)
        ))),
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> CampaignConfig {
        CampaignConfig::new(
            Sender {
                email: "news@example.com".to_string(),
                name: "News".to_string(),
            },
            "Subject",
            "text",
            "<p>html</p>",
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel_capacity, 10);
        assert_eq!(config.dial, DialPolicy { attempts: 3, interval_ms: 1000 });
        assert!(config.mailer.starts_with("courier/"));
    }

    #[test]
    fn test_rejects_bad_rates() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-30, f64::MIN_POSITIVE / 4.0] {
            let config = CampaignConfig { rate, ..config() };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidRate(_))));
        }
    }

    #[test]
    fn test_rejects_empty_pool_and_channel() {
        let no_workers = CampaignConfig { workers: 0, ..config() };
        assert!(matches!(no_workers.validate(), Err(ConfigError::NoWorkers)));

        let no_capacity = CampaignConfig {
            channel_capacity: 0,
            ..config()
        };
        assert!(matches!(
            no_capacity.validate(),
            Err(ConfigError::NoChannelCapacity)
        ));
    }

    #[test]
    fn test_rejects_missing_sender() {
        let mut config = config();
        config.sender.email = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSender)));
    }

    #[test]
    fn test_dry_run_needs_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.dry_run = true;
        config.output_dir = dir.path().join("missing");
        assert!(matches!(config.validate(), Err(ConfigError::OutputDir(_))));

        config.output_dir = dir.path().to_path_buf();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_send_interval() {
        let four = CampaignConfig { rate: 4.0, ..config() };
        assert_eq!(four.send_interval(), Duration::from_millis(250));

        let huge = CampaignConfig {
            rate: f64::MAX,
            ..config()
        };
        assert!(huge.send_interval() > Duration::ZERO);

        let tiny = CampaignConfig { rate: 1e-30, ..config() };
        assert_eq!(tiny.send_interval(), Duration::MAX);

        let slow = CampaignConfig { rate: 0.5, ..config() };
        assert!(slow.validate().is_ok());
        assert_eq!(slow.send_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(r#"{"Campaign": "spring", "Year": 2024}"#).unwrap();
        assert_eq!(params["Campaign"], "spring");
        assert_eq!(params["Year"], 2024);

        assert!(matches!(parse_params("[1, 2]"), Err(ConfigError::Params(_))));
        assert!(matches!(parse_params("{"), Err(ConfigError::Params(_))));
    }

    #[test]
    fn test_dial_policy_defaults_from_partial_config() {
        let policy: DialPolicy = serde_json::from_str(r#"{"attempts": 5}"#).unwrap();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.interval(), Duration::from_secs(1));
    }
}
