//! Messages as they travel from the generator to the workers.

use courier_smtp::{ClientError, Mailbox, MessageBuilder};

/// A fully rendered message for one recipient.
///
/// Produced by the generator and consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub to: Mailbox,
    pub from: Mailbox,
    pub subject: String,
    pub text: String,
    pub html: String,
    /// `X-Mailer` header value
    pub mailer: String,
}

impl RenderedMessage {
    /// The message as it goes over the wire: `multipart/alternative` with the
    /// text part first.
    ///
    /// # Errors
    ///
    /// Returns an error if the message can't be assembled.
    pub fn to_mime(&self) -> Result<String, ClientError> {
        MessageBuilder::new()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(&self.subject)
            .header("X-Mailer", &self.mailer)
            .text(&self.text)
            .html(&self.html)
            .build()
    }
}

/// A rendered message and where its recipient sits in the list.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub position: usize,
    pub message: RenderedMessage,
}
