use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that isn't an SMTP reply
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// A reply code other than the one the exchange needed
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The message could not be assembled
    #[error("Invalid message: {0}")]
    BuilderError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// A 4xx reply, worth trying again later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
