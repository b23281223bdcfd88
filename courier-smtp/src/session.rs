//! A connected, greeted and (optionally) authenticated submission session.

use courier_common::internal;

use crate::{
    client::{ClientError, Response, Result, SmtpClient},
    timeouts::ClientTimeouts,
    url::{Security, SmtpUrl},
};

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open a session against a submission server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: SmtpUrl,
    pub credentials: Option<Credentials>,
    /// Name announced in EHLO/HELO
    pub helo_name: String,
    pub accept_invalid_certs: bool,
    pub timeouts: ClientTimeouts,
}

impl SessionConfig {
    pub fn new(url: SmtpUrl) -> Self {
        let credentials = url.username.clone().map(|username| Credentials {
            username,
            password: url.password.clone().unwrap_or_default(),
        });

        Self {
            url,
            credentials,
            helo_name: "localhost".to_string(),
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }
}

/// An open SMTP session that can submit any number of messages.
pub struct SmtpSession {
    client: SmtpClient,
    host: String,
}

impl SmtpSession {
    /// Connects, greets the server, negotiates TLS and authenticates.
    ///
    /// # Errors
    ///
    /// Returns an error if any step of the handshake fails, or if
    /// credentials would have to be sent over an unencrypted connection to
    /// a remote host.
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let url = &config.url;
        let mut client = match url.security {
            Security::Implicit => {
                SmtpClient::connect_tls(
                    &url.address(),
                    url.host.clone(),
                    config.accept_invalid_certs,
                    config.timeouts.clone(),
                )
                .await?
            }
            Security::Opportunistic => {
                SmtpClient::connect(&url.address(), url.host.clone(), config.timeouts.clone())
                    .await?
                    .accept_invalid_certs(config.accept_invalid_certs)
            }
        };

        client.read_greeting().await?.expect(&[220])?;

        let mut capabilities = greet(&mut client, &config.helo_name).await?;

        if !client.is_tls() && capabilities.supports("STARTTLS") {
            client.starttls().await?.expect(&[220])?;
            internal!(level = DEBUG, "Upgraded connection to {} via STARTTLS", url.host);
            capabilities = greet(&mut client, &config.helo_name).await?;
        }

        if let Some(credentials) = &config.credentials {
            if !client.is_tls() && !url.is_local() {
                return Err(ClientError::AuthError(format!(
                    "Refusing to send credentials to {} over an unencrypted connection",
                    url.host
                )));
            }
            authenticate(&mut client, &capabilities, credentials).await?;
        }

        internal!(level = DEBUG, "SMTP session to {} ready", url.address());

        Ok(Self {
            client,
            host: url.host.clone(),
        })
    }

    /// Submits one message.
    ///
    /// On failure the session attempts an `RSET` so it can be reused, but
    /// callers should treat it as suspect.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects any step of the transaction.
    pub async fn send(&mut self, from: &str, to: &str, content: &str) -> Result<()> {
        let result = self.transaction(from, to, content).await;
        if let Err(ref e) = result
            && !matches!(e, ClientError::ConnectionClosed | ClientError::Io(_))
        {
            let _ = self.client.rset().await;
        }
        result
    }

    async fn transaction(&mut self, from: &str, to: &str, content: &str) -> Result<()> {
        self.client.mail_from(from).await?.expect(&[250])?;
        self.client.rcpt_to(to).await?.expect(&[250, 251])?;
        self.client.data().await?.expect(&[354])?;
        self.client.send_data(content).await?.expect(&[250])?;
        Ok(())
    }

    /// Ends the session with QUIT.
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT exchange fails. The connection is dropped
    /// either way.
    pub async fn close(mut self) -> Result<()> {
        internal!(level = DEBUG, "Closing SMTP session to {}", self.host);
        self.client.quit().await?.expect(&[221])?;
        Ok(())
    }

    pub fn is_tls(&self) -> bool {
        self.client.is_tls()
    }
}

/// EHLO, falling back to HELO for servers that predate ESMTP.
async fn greet(client: &mut SmtpClient, helo_name: &str) -> Result<Response> {
    let response = client.ehlo(helo_name).await?;
    if response.is_success() {
        return Ok(response);
    }

    client.helo(helo_name).await?.expect(&[250])
}

async fn authenticate(
    client: &mut SmtpClient,
    capabilities: &Response,
    credentials: &Credentials,
) -> Result<()> {
    let mechanisms = capabilities.auth_mechanisms();
    let response = if mechanisms.iter().any(|m| m == "PLAIN") {
        client
            .auth_plain(&credentials.username, &credentials.password)
            .await?
    } else if mechanisms.iter().any(|m| m == "LOGIN") {
        client
            .auth_login(&credentials.username, &credentials.password)
            .await?
    } else {
        return Err(ClientError::AuthError(
            "Server offers neither AUTH PLAIN nor AUTH LOGIN".to_string(),
        ));
    };

    if response.code == 235 {
        Ok(())
    } else {
        Err(ClientError::AuthError(format!(
            "{} {}",
            response.code,
            response.message()
        )))
    }
}
