//! A transport that writes each message to `<output dir>/<recipient email>`
//! instead of sending it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use courier_common::internal;

use super::{Connector, Transport};
use crate::{error::TransportError, message::RenderedMessage};

#[derive(Debug, Clone)]
pub struct DryRunConnector {
    output_dir: PathBuf,
}

impl DryRunConnector {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Connector for DryRunConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(DryRunTransport::new(self.output_dir.clone())))
    }

    fn describe(&self) -> String {
        format!("dry-run output {}", self.output_dir.display())
    }
}

#[derive(Debug)]
pub struct DryRunTransport {
    output_dir: PathBuf,
}

impl DryRunTransport {
    pub const fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// The file a message for `email` is written to.
    ///
    /// # Errors
    ///
    /// Returns an error if the address would escape the output directory.
    pub fn path_for(&self, email: &str) -> Result<PathBuf, TransportError> {
        let unsafe_name = email.is_empty()
            || email.contains(['/', '\\', '\0'])
            || email.contains("..")
            || Path::new(email).is_absolute();

        if unsafe_name {
            return Err(TransportError::InvalidRecipientPath(email.to_string()));
        }

        Ok(self.output_dir.join(email))
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn send(&mut self, message: &RenderedMessage) -> Result<(), TransportError> {
        let path = self.path_for(&message.to.address)?;
        let content = message.to_mime().map_err(TransportError::Compose)?;

        tokio::fs::write(&path, content)
            .await
            .map_err(|source| TransportError::Io {
                path: path.clone(),
                source,
            })?;

        internal!(level = DEBUG, "Wrote {}", path.display());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use courier_smtp::Mailbox;

    use super::*;

    fn message(to: &str) -> RenderedMessage {
        RenderedMessage {
            to: Mailbox::new(to),
            from: Mailbox::new("news@example.com"),
            subject: "Subject".to_string(),
            text: "text body".to_string(),
            html: "<p>html body</p>".to_string(),
            mailer: "courier/test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_writes_message_named_after_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let connector = DryRunConnector::new(dir.path());
        let mut transport = connector.connect().await.unwrap();

        transport.send(&message("ada@example.com")).await.unwrap();
        transport.close().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("ada@example.com")).unwrap();
        let parsed = mailparse::parse_mail(written.as_bytes()).unwrap();
        assert_eq!(parsed.subparts[0].get_body().unwrap(), "text body");
        assert_eq!(parsed.subparts[1].get_body().unwrap(), "<p>html body</p>");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = DryRunTransport::new(dir.path().to_path_buf());

        for email in ["../escape@example.com", "a/b@example.com", "..", ""] {
            assert!(matches!(
                transport.send(&message(email)).await,
                Err(TransportError::InvalidRecipientPath(_))
            ));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = DryRunTransport::new(dir.path().join("missing"));

        assert!(matches!(
            transport.send(&message("ada@example.com")).await,
            Err(TransportError::Io { .. })
        ));
    }
}
