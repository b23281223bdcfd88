//! MIME message builder for campaign mail.

use std::fmt::{self, Write as _};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::error::{ClientError, Result};

/// Maximum length of a body line once base64 encoded (RFC 2045 section 6.8).
const BASE64_LINE: usize = 76;

/// Bytes of raw header text per encoded-word, keeping each word under the
/// 75 character limit from RFC 2047.
const ENCODED_WORD_CHUNK: usize = 45;

/// A display name and address pair, as used in `From` and `To` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: (!name.trim().is_empty()).then_some(name),
            address: address.into(),
        }
    }

    /// The part of the address after the `@`, if any.
    pub fn domain(&self) -> Option<&str> {
        self.address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            None => write!(f, "<{}>", self.address),
            Some(name) if is_plain(name) => {
                let quoted = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{quoted}\" <{}>", self.address)
            }
            Some(name) => write!(f, "{} <{}>", encode_header_text(name), self.address),
        }
    }
}

fn is_plain(text: &str) -> bool {
    text.bytes().all(|b| (0x20..0x7f).contains(&b))
}

/// Encode header text so it is safe to place on a header line.
///
/// Printable ASCII is returned untouched. Anything else, including CR and
/// LF, is carried as one or more RFC 2047 `B` encoded-words.
pub fn encode_header_text(text: &str) -> String {
    if is_plain(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, ch) in text.char_indices() {
        let next = index + ch.len_utf8();
        if next - start > ENCODED_WORD_CHUNK {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    if start < end {
        words.push(&text[start..end]);
    }

    words
        .into_iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Base64 encode `data`, wrapping lines at 76 characters.
fn base64_body(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    for (index, ch) in encoded.chars().enumerate() {
        if index > 0 && index % BASE64_LINE == 0 {
            wrapped.push_str("\r\n");
        }
        wrapped.push(ch);
    }
    wrapped.push_str("\r\n");
    wrapped
}

fn valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (0x21..0x7f).contains(&b) && b != b':')
}

/// Builder for `multipart/alternative` messages carrying a plain text and an
/// HTML rendering of the same content.
///
/// # Examples
///
/// ```
/// use courier_smtp::client::{Mailbox, MessageBuilder};
///
/// let message = MessageBuilder::new()
///     .from(Mailbox::with_name("Newsletter", "news@example.com"))
///     .to(Mailbox::new("reader@example.com"))
///     .subject("Hello")
///     .text("Hello there")
///     .html("<p>Hello there</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("multipart/alternative"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Vec<Mailbox>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
    boundary: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, mailbox: Mailbox) -> Self {
        self.from = Some(mailbox);
        self
    }

    #[must_use]
    pub fn to(mut self, mailbox: Mailbox) -> Self {
        self.to.push(mailbox);
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds an extra header. Values are encoded the same way as the subject.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    /// Overrides the `Date` header, which otherwise uses the build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the generated `Message-ID`. The value is used without the
    /// surrounding angle brackets.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Builds the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no sender, no recipient, no body, or a
    /// custom header name is not a valid field name.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Message has no sender".to_string()))?;
        if self.to.is_empty() {
            return Err(ClientError::BuilderError(
                "Message has no recipients".to_string(),
            ));
        }
        if let Some((name, _)) = self.headers.iter().find(|(name, _)| !valid_header_name(name)) {
            return Err(ClientError::BuilderError(format!(
                "Invalid header name {name:?}"
            )));
        }

        let message_id = self.message_id.unwrap_or_else(|| {
            format!("{}@{}", Ulid::new(), from.domain().unwrap_or("localhost"))
        });
        let date = self.date.unwrap_or_else(Utc::now);

        let mut message = String::with_capacity(2048);
        let mut header = |name: &str, value: &str| {
            let _ = write!(message, "{name}: {value}\r\n");
        };

        header("From", &from.to_string());
        header(
            "To",
            &self
                .to
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        );
        if let Some(subject) = &self.subject {
            header("Subject", &encode_header_text(subject));
        }
        header("Date", &date.to_rfc2822());
        header("Message-ID", &format!("<{message_id}>"));
        for (name, value) in &self.headers {
            header(name, &encode_header_text(value));
        }
        header("MIME-Version", "1.0");

        match (self.text, self.html) {
            (Some(text), Some(html)) => {
                let boundary = self
                    .boundary
                    .unwrap_or_else(|| format!("courier-{}", Ulid::new()));
                let _ = write!(
                    message,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                );
                for (content_type, body) in [("text/plain", text), ("text/html", html)] {
                    let _ = write!(message, "--{boundary}\r\n");
                    write_part(&mut message, content_type, &body);
                }
                let _ = write!(message, "--{boundary}--\r\n");
            }
            (Some(text), None) => write_part(&mut message, "text/plain", &text),
            (None, Some(html)) => write_part(&mut message, "text/html", &html),
            (None, None) => {
                return Err(ClientError::BuilderError("Message has no body".to_string()));
            }
        }

        Ok(message)
    }
}

fn write_part(message: &mut String, content_type: &str, body: &str) {
    let _ = write!(
        message,
        "Content-Type: {content_type}; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
        base64_body(body.as_bytes())
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;
    use mailparse::MailHeaderMap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> MessageBuilder {
        MessageBuilder::new()
            .from(Mailbox::with_name("The Listing", "news@example.com"))
            .to(Mailbox::new("reader@example.org"))
            .subject("Weekly update")
            .text("Hello reader")
            .html("<p>Hello reader</p>")
    }

    #[test]
    fn test_multipart_alternative_structure() {
        let raw = sample().build().unwrap();
        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();

        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
        assert_eq!(parsed.subparts[0].get_body().unwrap(), "Hello reader");
        assert_eq!(parsed.subparts[1].ctype.mimetype, "text/html");
        assert_eq!(parsed.subparts[1].get_body().unwrap(), "<p>Hello reader</p>");
    }

    #[test]
    fn test_standard_headers() {
        let date = Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap();
        let raw = sample()
            .date(date)
            .message_id("fixed@example.com")
            .header("X-Mailer", "courier/test")
            .build()
            .unwrap();
        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();
        let headers = parsed.get_headers();

        assert_eq!(
            headers.get_first_value("From").unwrap(),
            "\"The Listing\" <news@example.com>"
        );
        assert_eq!(
            headers.get_first_value("To").unwrap(),
            "<reader@example.org>"
        );
        assert_eq!(
            headers.get_first_value("Subject").unwrap(),
            "Weekly update"
        );
        assert_eq!(
            headers.get_first_value("Date").unwrap(),
            "Fri, 15 Mar 2024 12:30:00 +0000"
        );
        assert_eq!(
            headers.get_first_value("Message-ID").unwrap(),
            "<fixed@example.com>"
        );
        assert_eq!(
            headers.get_first_value("X-Mailer").unwrap(),
            "courier/test"
        );
        assert!(raw.contains("\r\nMIME-Version: 1.0\r\n"));
    }

    #[test]
    fn test_generated_message_id_uses_sender_domain() {
        let raw = sample().build().unwrap();
        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();
        let id = parsed.get_headers().get_first_value("Message-ID").unwrap();

        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let raw = sample().subject("Привет, мир").build().unwrap();
        assert!(raw.contains("Subject: =?UTF-8?B?"));

        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();
        assert_eq!(
            parsed.get_headers().get_first_value("Subject").unwrap(),
            "Привет, мир"
        );
    }

    #[test]
    fn test_header_injection_is_neutralised() {
        let raw = sample()
            .subject("Hi\r\nBcc: victim@example.net")
            .build()
            .unwrap();

        assert!(!raw.contains("\r\nBcc:"));
        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();
        assert!(parsed.get_headers().get_first_value("Bcc").is_none());
    }

    #[test]
    fn test_long_header_text_splits_into_words() {
        let text = "é".repeat(100);
        let encoded = encode_header_text(&text);

        let words: Vec<_> = encoded.split("\r\n ").collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|word| word.len() <= 75));

        let decoded: String = words
            .iter()
            .map(|word| {
                let payload = word
                    .strip_prefix("=?UTF-8?B?")
                    .and_then(|w| w.strip_suffix("?="))
                    .unwrap();
                String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap()
            })
            .collect();
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_body_lines_are_wrapped() {
        let raw = sample().boundary("b1").text("a".repeat(500)).build().unwrap();
        assert!(raw.lines().all(|line| line.len() <= 78));

        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();
        assert_eq!(parsed.subparts[0].get_body().unwrap(), "a".repeat(500));
    }

    #[test]
    fn test_single_part_message() {
        let raw = MessageBuilder::new()
            .from(Mailbox::new("news@example.com"))
            .to(Mailbox::new("reader@example.org"))
            .text("plain only")
            .build()
            .unwrap();
        let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();

        assert_eq!(parsed.ctype.mimetype, "text/plain");
        assert_eq!(parsed.get_body().unwrap(), "plain only");
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        assert!(matches!(
            MessageBuilder::new().to(Mailbox::new("a@b")).text("x").build(),
            Err(ClientError::BuilderError(_))
        ));
        assert!(matches!(
            MessageBuilder::new().from(Mailbox::new("a@b")).text("x").build(),
            Err(ClientError::BuilderError(_))
        ));
        assert!(matches!(
            MessageBuilder::new()
                .from(Mailbox::new("a@b"))
                .to(Mailbox::new("c@d"))
                .build(),
            Err(ClientError::BuilderError(_))
        ));
        assert!(matches!(
            sample().header("Bad Name", "x").build(),
            Err(ClientError::BuilderError(_))
        ));
    }

    #[test]
    fn test_mailbox_display() {
        assert_eq!(Mailbox::new("a@example.com").to_string(), "<a@example.com>");
        assert_eq!(
            Mailbox::with_name("Say \"hi\"", "a@example.com").to_string(),
            "\"Say \\\"hi\\\"\" <a@example.com>"
        );
        assert_eq!(Mailbox::with_name("  ", "a@example.com").name, None);
        assert!(
            Mailbox::with_name("Zoë", "a@example.com")
                .to_string()
                .starts_with("=?UTF-8?B?")
        );
    }
}
