//! Delivery through an SMTP submission server.

use async_trait::async_trait;
use courier_smtp::{SessionConfig, SmtpSession};

use super::{Connector, Transport};
use crate::{error::TransportError, message::RenderedMessage};

#[derive(Debug, Clone)]
pub struct SmtpConnector {
    config: SessionConfig,
}

impl SmtpConnector {
    pub const fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let session = SmtpSession::open(&self.config)
            .await
            .map_err(TransportError::Connect)?;

        Ok(Box::new(SmtpTransport {
            session: Some(session),
        }))
    }

    fn describe(&self) -> String {
        self.config.url.to_string()
    }
}

pub struct SmtpTransport {
    session: Option<SmtpSession>,
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&mut self, message: &RenderedMessage) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        let content = message.to_mime().map_err(TransportError::Compose)?;

        session
            .send(&message.from.address, &message.to.address, &content)
            .await
            .map_err(TransportError::Send)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.session.take() {
            Some(session) => session.close().await.map_err(TransportError::Close),
            None => Ok(()),
        }
    }
}
