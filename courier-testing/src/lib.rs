//! Test doubles shared by the courier crates.

pub mod mock_server;

pub use mock_server::{MockSmtpServer, MockSmtpServerBuilder, ReceivedMessage, SmtpCommand};
