//! The command/reply loop underneath [`crate::SmtpSession`].

use std::{future::Future, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::{incoming, outgoing};
use tokio::net::TcpStream;

use super::{
    connection::ClientConnection,
    error::{ClientError, Result},
    response::Response,
};
use crate::timeouts::ClientTimeouts;

const BUFFER_SIZE: usize = 8192;

/// Replies larger than this are refused.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

async fn within<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ClientError::Timeout(format!("{operation} after {limit:?}")))?
}

/// Escape lines beginning with `.` so they survive the DATA terminator
/// (RFC 5321 section 4.5.2).
pub(crate) fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 16);
    for line in data.split_inclusive('\n') {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }
    out
}

/// One connection to a submission server. Every exchange is bounded by
/// [`ClientTimeouts`].
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
    timeouts: ClientTimeouts,
}

impl SmtpClient {
    fn with_connection(
        connection: ClientConnection,
        server_domain: String,
        timeouts: ClientTimeouts,
    ) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
            timeouts,
        }
    }

    /// Connects over plain TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or times out.
    pub async fn connect(
        addr: &str,
        server_domain: impl Into<String>,
        timeouts: ClientTimeouts,
    ) -> Result<Self> {
        let stream = within(timeouts.connect(), "connect", async {
            Ok(TcpStream::connect(addr).await?)
        })
        .await?;

        Ok(Self::with_connection(
            ClientConnection::Plain(stream),
            server_domain.into(),
            timeouts,
        ))
    }

    /// Connects and performs the TLS handshake before any SMTP traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails or times out.
    pub async fn connect_tls(
        addr: &str,
        server_domain: impl Into<String>,
        accept_invalid_certs: bool,
        timeouts: ClientTimeouts,
    ) -> Result<Self> {
        let server_domain = server_domain.into();
        let connection = within(timeouts.connect(), "TLS connect", async {
            let stream = TcpStream::connect(addr).await?;
            ClientConnection::tls(stream, &server_domain, accept_invalid_certs).await
        })
        .await?;

        let mut client = Self::with_connection(connection, server_domain, timeouts);
        client.accept_invalid_certs = accept_invalid_certs;
        Ok(client)
    }

    /// Sets whether to accept invalid TLS certificates on STARTTLS.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Whether the connection is currently encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    /// Wait for the banner. The caller decides whether its code is acceptable.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        let limit = self.timeouts.command();
        within(limit, "greeting", self.read_response()).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data)
            .await
    }

    /// Sends a command line and reads the response. `shown` is what gets
    /// logged in place of the raw command.
    async fn exchange(&mut self, command: &str, shown: &str) -> Result<Response> {
        outgoing!("{shown}");
        let limit = self.timeouts.command();
        within(limit, shown, async {
            self.write(format!("{command}\r\n").as_bytes()).await?;
            self.read_response().await
        })
        .await
    }

    /// Send `command` verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, timeout or an unparseable reply.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.exchange(command, command).await
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the dot-stuffed message data followed by the end-of-data marker.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or the reply doesn't arrive in time.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let mut payload = dot_stuff(data);
        if !payload.ends_with("\r\n") {
            if payload.ends_with('\n') {
                payload.pop();
            }
            payload.push_str("\r\n");
        }
        payload.push_str(".\r\n");

        outgoing!("<{} bytes of message data>", payload.len());
        let limit = self.timeouts.data();
        within(limit, "message data", async {
            self.write(payload.as_bytes()).await?;
            self.read_response().await
        })
        .await
    }

    /// Authenticates with `AUTH PLAIN` (RFC 4616).
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        self.exchange(&format!("AUTH PLAIN {token}"), "AUTH PLAIN <redacted>")
            .await
    }

    /// Authenticates with `AUTH LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails. A server refusing either
    /// prompt is returned as a normal response for the caller to inspect.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let response = self.command("AUTH LOGIN").await?;
        if !response.is_intermediate() {
            return Ok(response);
        }

        let response = self
            .exchange(&STANDARD.encode(username), "<username>")
            .await?;
        if !response.is_intermediate() {
            return Ok(response);
        }

        self.exchange(&STANDARD.encode(password), "<password>")
            .await
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// Sends QUIT and drops the connection.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn quit(&mut self) -> Result<Response> {
        outgoing!("QUIT");
        let limit = self.timeouts.quit();
        let response = within(limit, "QUIT", async {
            self.write(b"QUIT\r\n").await?;
            self.read_response().await
        })
        .await;
        self.connection = None;
        response
    }

    /// Upgrade the connection in place if the server agrees.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange or the handshake fails. A refused
    /// STARTTLS is returned as a normal response.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            let limit = self.timeouts.connect();
            let upgraded = within(
                limit,
                "TLS upgrade",
                connection.upgrade_to_tls(&self.server_domain, self.accept_invalid_certs),
            )
            .await?;
            self.connection = Some(upgraded);
            // Anything buffered before the handshake is no longer trustworthy
            self.buffer_pos = 0;
        }

        Ok(response)
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_stuffing() {
        assert_eq!(dot_stuff("hello\r\n.\r\nworld"), "hello\r\n..\r\nworld");
        assert_eq!(dot_stuff(".leading"), "..leading");
        assert_eq!(dot_stuff("no dots here\r\n"), "no dots here\r\n");
    }
}
