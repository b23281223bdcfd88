//! Replies read back from the submission server.

use super::error::{ClientError, Result};

/// One `NNN-text` or `NNN text` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for continuation lines (`250-...`)
    pub is_last: bool,
    pub message: String,
}

/// A reply, with continuation lines collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Text of every line, status code stripped
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text, one line per reply line.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, the server wants more input
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Turn the response into an error unless its code is one of `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SmtpError`] carrying the server's code and text.
    pub fn expect(self, expected: &[u16]) -> Result<Self> {
        if expected.contains(&self.code) {
            Ok(self)
        } else {
            Err(ClientError::SmtpError {
                code: self.code,
                message: self.message(),
            })
        }
    }

    /// The EHLO keywords advertised by the server.
    ///
    /// The first line of an EHLO response is the server's greeting name, every
    /// following line is an extension.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().skip(1).map(String::as_str)
    }

    /// Whether an EHLO response advertises `keyword` (case-insensitive).
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions().any(|ext| {
            ext.split_whitespace()
                .next()
                .is_some_and(|k| k.eq_ignore_ascii_case(keyword))
        })
    }

    /// The SASL mechanisms listed on the `AUTH` line of an EHLO response.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.extensions()
            .filter_map(|ext| {
                let mut words = ext.split_whitespace();
                words
                    .next()
                    .filter(|k| k.eq_ignore_ascii_case("AUTH"))
                    .map(|_| words.map(str::to_ascii_uppercase).collect::<Vec<_>>())
            })
            .flatten()
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`ClientError::ParseError`] unless the line starts with a
    /// three digit code followed by a space, a dash or nothing.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status code in '{line}'")))?;

        let rest = &line[3..];
        let (is_last, message) = match rest.chars().next() {
            None => (true, ""),
            Some(' ') => (true, &rest[1..]),
            Some('-') => (false, &rest[1..]),
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Unexpected '{c}' after status code"
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: message.to_string(),
        })
    }

    /// Take one reply off the front of `buffer`, returning it with the
    /// number of bytes it used. `None` means more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed lines, or continuation lines whose
    /// code differs from the first.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(std::str::from_utf8(raw)?)?;
            match code {
                Some(first) if first != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {first}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
