//! Mock SMTP server for exercising submission paths
//!
//! The server can:
//! - Simulate success, permanent and temporary failures per command
//! - Require `AUTH PLAIN` or `AUTH LOGIN` credentials
//! - Reject individual recipients
//! - Drop connections after a number of accepted messages
//! - Record every command and every accepted message
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_testing::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_auth("news", "secret")
//!     .with_rejected_recipient("bounce@example.com")
//!     .build()
//!     .await?;
//!
//! // Point a client at server.addr(), then inspect server.messages()
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashSet,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A command as the server understood it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// AUTH with the mechanism name
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    StartTls,
    Other(String),
}

/// A message accepted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub from: String,
    pub to: Vec<String>,
    /// Message content with dot-stuffing removed, CRLF line endings intact
    pub content: String,
}

#[derive(Debug, Clone)]
struct SmtpResponse {
    code: u16,
    message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    capabilities: Vec<String>,
    ehlo_supported: bool,
    mail_from_response: SmtpResponse,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    rejected_recipients: HashSet<String>,
    credentials: Option<(String, String)>,

    // Failure injection
    response_delay: Option<Duration>,
    drop_after_messages: Option<usize>,
    fail_first_messages: usize,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "mock.courier.test ESMTP ready"),
            capabilities: vec!["SIZE 10000".to_string(), "8BITMIME".to_string()],
            ehlo_supported: true,
            mail_from_response: SmtpResponse::new(250, "OK"),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "2.0.0 Queued"),
            rejected_recipients: HashSet::new(),
            credentials: None,
            response_delay: None,
            drop_after_messages: None,
            fail_first_messages: 0,
        }
    }
}

impl MockServerConfig {
    fn ehlo_bytes(&self) -> Vec<u8> {
        let mut lines = vec!["mock.localhost".to_string()];
        lines.extend(self.capabilities.iter().cloned());
        if self.credentials.is_some() {
            lines.push("AUTH PLAIN LOGIN".to_string());
        }

        let mut response = String::new();
        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut response, "250{separator}{line}\r\n");
        }
        response.into_bytes()
    }

    fn check_plain(&self, token: &str) -> bool {
        let Some((user, pass)) = &self.credentials else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(token.trim()) else {
            return false;
        };
        decoded == format!("\0{user}\0{pass}").into_bytes()
    }

    fn check_login(&self, user: &str, pass: &str) -> bool {
        let decode = |value: &str| {
            STANDARD
                .decode(value.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        };
        matches!(
            (&self.credentials, decode(user), decode(pass)),
            (Some((u, p)), Some(user), Some(pass)) if *u == user && *p == pass
        )
    }
}

#[derive(Default)]
struct Shared {
    commands: RwLock<Vec<SmtpCommand>>,
    messages: RwLock<Vec<ReceivedMessage>>,
    connections: AtomicUsize,
    data_transfers: AtomicUsize,
}

/// An SMTP submission server on an ephemeral localhost port.
///
/// Stops accepting connections when dropped.
pub struct MockSmtpServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// An `smtp://` url pointing at this server
    #[must_use]
    pub fn url(&self) -> String {
        format!("smtp://{}", self.addr)
    }

    /// Every command seen so far, across all connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.shared.commands.read().await.clone()
    }

    /// Messages that got a 250 after DATA
    pub async fn messages(&self) -> Vec<ReceivedMessage> {
        self.shared.messages.read().await.clone()
    }

    /// Number of connections accepted so far
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        shared: Arc<Shared>,
    ) -> Result<(), BoxError> {
        let (reader, mut writer) = stream.split();
        let mut session = Session {
            reader: BufReader::new(reader),
            config: &config,
            shared: &shared,
            from: None,
            to: Vec::new(),
            authenticated: config.credentials.is_none(),
            accepted: 0,
        };

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        session.run(&mut writer).await
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Session<'a, R> {
    reader: R,
    config: &'a MockServerConfig,
    shared: &'a Shared,
    from: Option<String>,
    to: Vec<String>,
    authenticated: bool,
    accepted: usize,
}

impl<R: AsyncBufRead + Unpin + Send> Session<'_, R> {
    async fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        let mut line = String::new();
        let Ok(read) = timeout(Duration::from_secs(10), self.reader.read_line(&mut line)).await
        else {
            return Ok(None);
        };
        if read? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    async fn reply<W: AsyncWrite + Unpin + Send>(
        &self,
        writer: &mut W,
        bytes: &[u8],
    ) -> Result<(), BoxError> {
        if let Some(delay) = self.config.response_delay {
            tokio::time::sleep(delay).await;
        }
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn record(&self, command: SmtpCommand) {
        self.shared.commands.write().await.push(command);
    }

    #[allow(clippy::too_many_lines)]
    async fn run<W: AsyncWrite + Unpin + Send>(&mut self, writer: &mut W) -> Result<(), BoxError> {
        let config = self.config;

        while let Some(line) = self.read_line().await? {
            let cmd_line = line.trim_end_matches(['\r', '\n']);
            tracing::debug!(command = %cmd_line, "Mock SMTP server received");

            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line, ""));
            let argument = argument.to_string();

            let response = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    self.record(SmtpCommand::Ehlo(argument)).await;
                    if config.ehlo_supported {
                        config.ehlo_bytes()
                    } else {
                        SmtpResponse::new(502, "Command not implemented").to_bytes()
                    }
                }
                "HELO" => {
                    self.record(SmtpCommand::Helo(argument)).await;
                    SmtpResponse::new(250, "Hello").to_bytes()
                }
                "AUTH" => {
                    let (mechanism, initial) =
                        argument.split_once(' ').unwrap_or((argument.as_str(), ""));
                    let mechanism = mechanism.to_ascii_uppercase();
                    self.record(SmtpCommand::Auth(mechanism.clone())).await;

                    let accepted = match mechanism.as_str() {
                        "PLAIN" => config.check_plain(initial),
                        "LOGIN" => {
                            self.reply(writer, b"334 VXNlcm5hbWU6\r\n").await?;
                            let Some(user) = self.read_line().await? else {
                                return Ok(());
                            };
                            self.reply(writer, b"334 UGFzc3dvcmQ6\r\n").await?;
                            let Some(pass) = self.read_line().await? else {
                                return Ok(());
                            };
                            config.check_login(&user, &pass)
                        }
                        _ => false,
                    };

                    self.authenticated = accepted;
                    if accepted {
                        SmtpResponse::new(235, "Authentication successful").to_bytes()
                    } else {
                        SmtpResponse::new(535, "Authentication credentials invalid").to_bytes()
                    }
                }
                "MAIL" => {
                    self.record(SmtpCommand::MailFrom(argument.clone())).await;
                    if self.authenticated {
                        self.from = Some(strip_path(&argument));
                        self.to.clear();
                        config.mail_from_response.to_bytes()
                    } else {
                        SmtpResponse::new(530, "Authentication required").to_bytes()
                    }
                }
                "RCPT" => {
                    self.record(SmtpCommand::RcptTo(argument.clone())).await;
                    let recipient = strip_path(&argument);
                    if self.from.is_none() {
                        SmtpResponse::new(503, "Bad sequence of commands").to_bytes()
                    } else if config.rejected_recipients.contains(&recipient) {
                        SmtpResponse::new(550, "User unknown").to_bytes()
                    } else {
                        self.to.push(recipient);
                        SmtpResponse::new(250, "OK").to_bytes()
                    }
                }
                "DATA" => {
                    self.record(SmtpCommand::Data).await;
                    if self.to.is_empty() {
                        SmtpResponse::new(503, "No valid recipients").to_bytes()
                    } else if config.data_response.code == 354 {
                        self.reply(writer, &config.data_response.to_bytes()).await?;
                        let Some(content) = self.read_content().await? else {
                            return Ok(());
                        };
                        let response = self.finish_message(content).await;
                        self.reply(writer, &response).await?;

                        if config
                            .drop_after_messages
                            .is_some_and(|limit| self.accepted >= limit)
                        {
                            return Ok(());
                        }
                        continue;
                    } else {
                        config.data_response.to_bytes()
                    }
                }
                "RSET" => {
                    self.record(SmtpCommand::Rset).await;
                    self.from = None;
                    self.to.clear();
                    SmtpResponse::new(250, "OK").to_bytes()
                }
                "NOOP" => SmtpResponse::new(250, "OK").to_bytes(),
                "QUIT" => {
                    self.record(SmtpCommand::Quit).await;
                    self.reply(writer, &SmtpResponse::new(221, "Bye").to_bytes())
                        .await?;
                    return Ok(());
                }
                "STARTTLS" => {
                    self.record(SmtpCommand::StartTls).await;
                    SmtpResponse::new(502, "Command not implemented").to_bytes()
                }
                _ => {
                    self.record(SmtpCommand::Other(cmd_line.to_string())).await;
                    SmtpResponse::new(500, "Unknown command").to_bytes()
                }
            };

            self.reply(writer, &response).await?;
        }

        Ok(())
    }

    /// Read message content up to the lone `.`, undoing dot-stuffing.
    async fn read_content(&mut self) -> Result<Option<String>, BoxError> {
        let mut content = String::new();
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            if line.trim_end_matches(['\r', '\n']) == "." {
                return Ok(Some(content));
            }
            content.push_str(line.strip_prefix('.').unwrap_or(&line));
        }
    }

    async fn finish_message(&mut self, content: String) -> Vec<u8> {
        let transfer = self.shared.data_transfers.fetch_add(1, Ordering::Relaxed);
        let from = self.from.take().unwrap_or_default();
        let to = std::mem::take(&mut self.to);

        if transfer < self.config.fail_first_messages {
            return SmtpResponse::new(451, "Temporary failure, try again later").to_bytes();
        }
        if self.config.data_end_response.code != 250 {
            return self.config.data_end_response.to_bytes();
        }

        self.accepted += 1;
        self.shared
            .messages
            .write()
            .await
            .push(ReceivedMessage { from, to, content });
        self.config.data_end_response.to_bytes()
    }
}

/// `FROM:<a@b> SIZE=10` -> `a@b`
fn strip_path(argument: &str) -> String {
    let path = argument
        .split_once(':')
        .map_or(argument, |(_, path)| path)
        .trim();
    let path = path.split_whitespace().next().unwrap_or_default();
    path.trim_start_matches('<').trim_end_matches('>').to_string()
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Extensions advertised after the EHLO greeting line
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Answer EHLO with 502 so clients have to fall back to HELO
    #[must_use]
    pub const fn without_ehlo(mut self) -> Self {
        self.config.ehlo_supported = false;
        self
    }

    /// Require authentication with these credentials before MAIL FROM
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Reply to the end-of-data marker
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Answer RCPT TO for this address with 550
    #[must_use]
    pub fn with_rejected_recipient(mut self, address: impl Into<String>) -> Self {
        self.config.rejected_recipients.insert(address.into());
        self
    }

    /// Sleep before every reply
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Close each connection after it has accepted this many messages
    #[must_use]
    pub const fn with_drop_after_messages(mut self, count: usize) -> Self {
        self.config.drop_after_messages = Some(count);
        self
    }

    /// Answer the first `count` message transfers, across all connections,
    /// with a 451
    #[must_use]
    pub const fn with_failed_messages(mut self, count: usize) -> Self {
        self.config.fail_first_messages = count;
        self
    }

    /// Bind and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if no localhost port can be bound.
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let shared = Arc::new(Shared::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let server_shared = Arc::clone(&shared);
        let server_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            while !server_shutdown.load(Ordering::Relaxed) {
                // Accept with a timeout so the shutdown flag is noticed
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    server_shared.connections.fetch_add(1, Ordering::Relaxed);
                    let config = Arc::clone(&config);
                    let shared = Arc::clone(&server_shared);

                    tokio::spawn(async move {
                        if let Err(e) = MockSmtpServer::handle_client(stream, config, shared).await
                        {
                            tracing::debug!("Mock SMTP session ended with an error: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            shared,
            shutdown,
        })
    }
}
