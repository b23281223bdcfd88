//! Settings from a RON file, overridden by command line flags.
//!
//! ```ron
//! (
//!     smtp: (
//!         url: Some("smtps://mail.example.com"),
//!         username: Some("news"),
//!         timeouts: (connect_secs: 10),
//!     ),
//!     campaign: (
//!         subject: "Issue 7",
//!         from_email: "news@example.com",
//!         html_template: Some("issue.html"),
//!         txt_template: Some("issue.txt"),
//!         rate: 10.0,
//!     ),
//!     log: (console: true),
//! )
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use courier_common::logging::LogConfig;
use courier_dispatch::DialPolicy;
use courier_smtp::ClientTimeouts;
use serde::Deserialize;

use crate::cli::Cli;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Settings file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "./courier.config.ron";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub smtp: SmtpSettings,
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    /// `smtp://host[:port]` or `smtps://host[:port]`
    #[serde(default)]
    pub url: Option<String>,
    /// Takes precedence over credentials in the url
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub timeouts: ClientTimeouts,
    #[serde(default)]
    pub dial: DialPolicy,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            helo_name: defaults::helo_name(),
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
            dial: DialPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignSettings {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub html_template: Option<PathBuf>,
    #[serde(default)]
    pub txt_template: Option<PathBuf>,
    #[serde(default = "defaults::params")]
    pub params: PathBuf,
    #[serde(default = "defaults::list")]
    pub list: PathBuf,
    #[serde(default = "defaults::workers")]
    pub workers: usize,
    #[serde(default = "defaults::rate")]
    pub rate: f64,
    #[serde(default = "defaults::channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "defaults::out")]
    pub out: PathBuf,
    #[serde(default)]
    pub failures: Option<PathBuf>,
    #[serde(default)]
    pub strict: bool,
    /// `X-Mailer` header value
    #[serde(default)]
    pub mailer: Option<String>,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            subject: String::new(),
            from_email: String::new(),
            from_name: String::new(),
            html_template: None,
            txt_template: None,
            params: defaults::params(),
            list: defaults::list(),
            workers: defaults::workers(),
            rate: defaults::rate(),
            channel_capacity: defaults::channel_capacity(),
            dry_run: false,
            out: defaults::out(),
            failures: None,
            strict: false,
            mailer: None,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn helo_name() -> String {
        "localhost".to_string()
    }

    pub fn params() -> PathBuf {
        PathBuf::from("params.json")
    }

    pub fn list() -> PathBuf {
        PathBuf::from("list.json")
    }

    pub const fn workers() -> usize {
        2
    }

    pub const fn rate() -> f64 {
        25.0
    }

    pub const fn channel_capacity() -> usize {
        courier_dispatch::config::DEFAULT_CHANNEL_CAPACITY
    }

    pub fn out() -> PathBuf {
        PathBuf::from("./")
    }
}

impl Settings {
    /// Parse settings from RON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document isn't valid settings.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Load the settings file, if there is one.
    ///
    /// Precedence:
    /// 1. `explicit`, usually from `--config`
    /// 2. `COURIER_CONFIG` environment variable
    /// 3. `./courier.config.ron`
    ///
    /// With none of these present the built-in defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if a named file doesn't exist or can't be parsed.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = find_config_file(explicit, std::env::var(CONFIG_ENV).ok())? else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_ron(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Apply command line overrides.
    #[must_use]
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        let smtp = &mut self.smtp;
        if cli.url.is_some() {
            smtp.url.clone_from(&cli.url);
        }
        if cli.user.is_some() {
            smtp.username.clone_from(&cli.user);
        }
        if cli.pass.is_some() {
            smtp.password.clone_from(&cli.pass);
        }

        let campaign = &mut self.campaign;
        set(&mut campaign.subject, cli.subject.as_ref());
        set(&mut campaign.from_email, cli.from_email.as_ref());
        set(&mut campaign.from_name, cli.from_name.as_ref());
        if cli.html_template.is_some() {
            campaign.html_template.clone_from(&cli.html_template);
        }
        if cli.txt_template.is_some() {
            campaign.txt_template.clone_from(&cli.txt_template);
        }
        set(&mut campaign.params, cli.params.as_ref());
        set(&mut campaign.list, cli.list.as_ref());
        set(&mut campaign.workers, cli.workers.as_ref());
        set(&mut campaign.rate, cli.rate.as_ref());
        set(&mut campaign.channel_capacity, cli.channel_capacity.as_ref());
        set(&mut campaign.out, cli.out.as_ref());
        if cli.failures.is_some() {
            campaign.failures.clone_from(&cli.failures);
        }
        campaign.dry_run |= cli.dry_run;
        campaign.strict |= cli.strict;

        if cli.log.is_some() {
            self.log.file.clone_from(&cli.log);
        }
        // Dry runs always echo to the console
        self.log.console |= cli.stdout || self.campaign.dry_run;

        self
    }
}

fn find_config_file(
    explicit: Option<&Path>,
    from_env: Option<String>,
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        anyhow::ensure!(
            path.exists(),
            "Settings file {} does not exist",
            path.display()
        );
        return Ok(Some(path.to_path_buf()));
    }

    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        anyhow::ensure!(
            path.exists(),
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
        return Ok(Some(path));
    }

    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    Ok(default.exists().then_some(default))
}
