//! SMTP client used to submit campaign messages.
//!
//! The client speaks just enough of RFC 5321 to hand a message to a
//! submission server:
//!
//! - Plain TCP and implicit TLS connections
//! - STARTTLS upgrade
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - Dot-stuffed DATA transfer
//!
//! ```no_run
//! use courier_smtp::{ClientTimeouts, client::SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client =
//!     SmtpClient::connect("localhost:2525", "localhost", ClientTimeouts::default()).await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data("Subject: Test\r\n\r\nHello World").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::{Mailbox, MessageBuilder, encode_header_text};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
