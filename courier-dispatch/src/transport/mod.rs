//! Mail transports.
//!
//! A worker holds one [`Transport`] for as long as it works, and asks its
//! [`Connector`] for a fresh one whenever the old one breaks. The pool
//! never knows which kind it is talking to.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use courier_common::internal;
use courier_smtp::SessionConfig;

use crate::{config::DialPolicy, error::TransportError, message::RenderedMessage};

mod dry_run;
mod smtp;

pub use dry_run::{DryRunConnector, DryRunTransport};
pub use smtp::{SmtpConnector, SmtpTransport};

/// An open channel for delivering messages.
#[async_trait]
pub trait Transport: Send {
    /// Deliver one message.
    async fn send(&mut self, message: &RenderedMessage) -> Result<(), TransportError>;

    /// Release the underlying connection. The transport must not be used
    /// afterwards.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Short description for logs, e.g. the server address.
    fn describe(&self) -> String;
}

/// Where a campaign's messages go. Fixed for the lifetime of a campaign.
#[derive(Debug, Clone)]
pub enum TransportSelection {
    Smtp(SessionConfig),
    /// Write messages into this directory instead of sending them
    DryRun(PathBuf),
}

impl TransportSelection {
    pub fn connector(self) -> Arc<dyn Connector> {
        match self {
            Self::Smtp(config) => Arc::new(SmtpConnector::new(config)),
            Self::DryRun(output_dir) => Arc::new(DryRunConnector::new(output_dir)),
        }
    }
}

/// Connect, retrying according to `policy`.
///
/// # Errors
///
/// Returns the last connection error once every attempt has failed.
pub async fn dial(
    connector: &dyn Connector,
    policy: &DialPolicy,
    worker: usize,
) -> Result<Box<dyn Transport>, TransportError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match connector.connect().await {
            Ok(transport) => {
                internal!(
                    level = DEBUG,
                    "Worker {worker} connected to {} (attempt {attempt}/{attempts})",
                    connector.describe()
                );
                return Ok(transport);
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    worker,
                    attempt,
                    server = %connector.describe(),
                    "Connection failed, retrying in {:?}: {e}",
                    policy.interval()
                );
                tokio::time::sleep(policy.interval()).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    struct Null;

    #[async_trait]
    impl Transport for Null {
        async fn send(&mut self, _message: &RenderedMessage) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for Flaky {
        async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TransportError::NotConnected)
            } else {
                Ok(Box::new(Null))
            }
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn policy(attempts: u32) -> DialPolicy {
        DialPolicy {
            attempts,
            interval_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_dial_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = Flaky {
            failures: 2,
            calls: Arc::clone(&calls),
        };

        assert!(dial(&connector, &policy(3), 0).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dial_gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = Flaky {
            failures: 10,
            calls: Arc::clone(&calls),
        };

        assert!(matches!(
            dial(&connector, &policy(3), 0).await,
            Err(TransportError::NotConnected)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dial_makes_at_least_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = Flaky {
            failures: 0,
            calls: Arc::clone(&calls),
        };

        assert!(dial(&connector, &policy(0), 0).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
