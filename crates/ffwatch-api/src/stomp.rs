//! STOMP 1.2 text-frame codec.
//!
//! The push channel speaks STOMP over whichever socket is active, so the
//! codec knows nothing about WebSockets or long polling: it turns a
//! [`Frame`] into a `String` and back.
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```

use std::fmt;

use crate::error::Error;

/// STOMP frame commands used by the console push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED frames carry raw header values (no escaping).
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Frame ────────────────────────────────────────────────────────────

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header (builder style).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header. Repeated headers resolve to the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    // ── Constructors for the frames the client sends ─────────────────

    pub fn connect(host: &str, heart_beat: (u64, u64)) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    // ── Codec ────────────────────────────────────────────────────────

    /// Encode to wire text, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame from wire text.
    ///
    /// Returns `Ok(None)` for heart-beat payloads (only EOLs).
    pub fn decode(text: &str) -> Result<Option<Self>, Error> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() || text == "\0" {
            return Ok(None);
        }

        let (command_line, rest) = text
            .split_once('\n')
            .ok_or_else(|| Error::Protocol("frame has no header section".into()))?;
        let command_line = command_line.trim_end_matches('\r');
        let command = Command::parse(command_line)
            .ok_or_else(|| Error::Protocol(format!("unknown command '{command_line}'")))?;

        let mut headers = Vec::new();
        let mut rest = rest;
        loop {
            let (line, tail) = rest
                .split_once('\n')
                .ok_or_else(|| Error::Protocol("unterminated header section".into()))?;
            rest = tail;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::Protocol(format!("malformed header '{line}'")))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        let frame = Self {
            command,
            headers,
            body: String::new(),
        };
        let body = match frame.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
            Some(len) if len <= rest.len() && rest.is_char_boundary(len) => &rest[..len],
            _ => rest.split('\0').next().unwrap_or_default(),
        };

        Ok(Some(Self {
            body: body.to_owned(),
            ..frame
        }))
    }
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(Error::Protocol(format!("invalid header escape '\\{other}'")));
            }
            None => return Err(Error::Protocol("dangling escape in header".into())),
        }
    }
    Ok(out)
}
