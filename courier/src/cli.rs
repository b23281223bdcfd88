use std::path::PathBuf;

use clap::Parser;

/// Send an email campaign to every recipient in a list
///
/// Every option can also be set in a RON settings file; options given on the
/// command line win.
#[derive(Parser, Debug, Default)]
#[command(name = "courier")]
#[command(about = "Send a rate limited email campaign", long_about = None)]
#[command(version)]
pub struct Cli {
    /// RON settings file [default: $COURIER_CONFIG, then ./courier.config.ron]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SMTP server url, smtp://host[:port] or smtps://host[:port]
    #[arg(long)]
    pub url: Option<String>,

    /// SMTP username
    #[arg(long)]
    pub user: Option<String>,

    /// SMTP password
    #[arg(long, env = "COURIER_SMTP_PASSWORD", hide_env_values = true)]
    pub pass: Option<String>,

    /// Campaign subject
    #[arg(long)]
    pub subject: Option<String>,

    /// Sender address
    #[arg(long)]
    pub from_email: Option<String>,

    /// Sender name
    #[arg(long)]
    pub from_name: Option<String>,

    /// Path to the HTML email template
    #[arg(long)]
    pub html_template: Option<PathBuf>,

    /// Path to the text email template
    #[arg(long)]
    pub txt_template: Option<PathBuf>,

    /// Path to the JSON file with common params [default: params.json]
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// Number of workers sending emails [default: 2]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Path to the JSON file with the recipient list [default: list.json]
    #[arg(long)]
    pub list: Option<PathBuf>,

    /// Emails per second [default: 25]
    #[arg(long)]
    pub rate: Option<f64>,

    /// Write messages to --out instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for dry run results [default: ./]
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Path to the log file [default: courier.log]
    #[arg(short = 'l', long = "log")]
    pub log: Option<PathBuf>,

    /// Log to stdout as well as the log file
    #[arg(long)]
    pub stdout: bool,

    /// Write recipients that weren't reached to this JSON file
    #[arg(long)]
    pub failures: Option<PathBuf>,

    /// Messages buffered between rendering and sending [default: 10]
    #[arg(long)]
    pub channel_capacity: Option<usize>,

    /// Fail on undefined template variables
    #[arg(long)]
    pub strict: bool,
}
