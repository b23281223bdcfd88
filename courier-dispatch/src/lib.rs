//! The courier dispatch engine.
//!
//! A [`Campaign`] renders one message per recipient and hands it to a fixed
//! pool of workers through a bounded channel, no faster than the configured
//! rate. Each worker owns a [`Transport`]; a failed send costs that one
//! message and a reconnect, never the campaign.

pub mod campaign;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod message;
pub mod pool;
pub mod recipient;
pub mod render;
pub mod tracker;
pub mod transport;

pub use campaign::{Campaign, CampaignReport};
pub use config::{CampaignConfig, DialPolicy, Sender, parse_params};
pub use error::{CampaignError, ConfigError, RenderError, TransportError};
pub use message::{QueuedMessage, RenderedMessage};
pub use pool::FailedDelivery;
pub use recipient::{RecipientRecord, parse_recipients};
pub use render::Renderer;
pub use tracker::{CompletionTracker, TrackerSnapshot};
pub use transport::{Connector, DryRunConnector, SmtpConnector, Transport, TransportSelection};
