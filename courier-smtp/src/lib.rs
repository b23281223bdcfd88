//! SMTP submission for courier.
//!
//! - [`client`]: a low level SMTP client over plain TCP or TLS
//! - [`session`]: an authenticated, ready-to-send connection built on the client
//! - [`url`]: parsing of `smtp://` and `smtps://` connection descriptors

pub mod client;
pub mod session;
pub mod timeouts;
pub mod url;

pub use client::{ClientError, Mailbox, MessageBuilder, Response, SmtpClient};
pub use session::{Credentials, SessionConfig, SmtpSession};
pub use timeouts::ClientTimeouts;
pub use self::url::{Security, SmtpUrl, UrlError};
