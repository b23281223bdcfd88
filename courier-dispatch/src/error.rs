//! Typed errors for the dispatch engine.
//!
//! The categories mirror how far a failure reaches:
//! - [`ConfigError`]: the campaign never starts
//! - [`RenderError`]: production stops, messages already queued still go out
//! - [`TransportError`]: one message is lost, the campaign carries on

use std::path::PathBuf;

use courier_smtp::ClientError;
use thiserror::Error;

use crate::campaign::CampaignReport;

/// Invalid campaign settings or inputs, detected before anything is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Send rate must be a positive number of messages per second, got {0}")]
    InvalidRate(f64),

    #[error("At least one worker is required")]
    NoWorkers,

    #[error("Channel capacity must be at least 1")]
    NoChannelCapacity,

    #[error("Dial attempts must be at least 1")]
    NoDialAttempts,

    #[error("Sender address is empty")]
    MissingSender,

    #[error("Dry-run output directory {0} does not exist")]
    OutputDir(PathBuf),

    #[error("Unable to compile {name} template: {source}")]
    Template {
        name: &'static str,
        #[source]
        source: minijinja::Error,
    },

    #[error("Unable to parse recipient list: {0}")]
    RecipientList(#[source] serde_json::Error),

    #[error("Recipient #{position} is invalid: {reason}")]
    InvalidRecipient { position: usize, reason: String },

    #[error("Unable to parse campaign parameters: {0}")]
    Params(String),
}

/// A recipient whose message could not be produced.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unable to build context for recipient #{position} <{email}>: {source}")]
    Context {
        position: usize,
        email: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to render {template} for recipient #{position} <{email}>: {source}")]
    Template {
        template: &'static str,
        position: usize,
        email: String,
        #[source]
        source: minijinja::Error,
    },
}

impl RenderError {
    /// Position of the offending recipient in the list, starting at 0.
    pub const fn position(&self) -> usize {
        match self {
            Self::Context { position, .. } | Self::Template { position, .. } => *position,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unable to connect: {0}")]
    Connect(#[source] ClientError),

    #[error("Unable to send: {0}")]
    Send(#[source] ClientError),

    #[error("Unable to compose message: {0}")]
    Compose(#[source] ClientError),

    #[error("Unable to close connection: {0}")]
    Close(#[source] ClientError),

    #[error("Unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recipient address {0:?} cannot be used as a file name")]
    InvalidRecipientPath(String),

    #[error("No open connection")]
    NotConnected,
}

impl TransportError {
    /// The server refused the message for now, a later campaign may get it through.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connect(e) | Self::Send(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Worker {worker} could not connect after {attempts} attempts: {source}")]
    Startup {
        worker: usize,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Campaign aborted: {source}")]
    Aborted {
        #[source]
        source: RenderError,
        report: Box<CampaignReport>,
    },

    #[error("Dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
