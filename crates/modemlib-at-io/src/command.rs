//! Commands submitted to the engine and the responses they resolve with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;

use crate::descriptor::{Builtin, CommandPatterns};
use crate::protocol;

/// One AT command.
///
/// `name` keys the descriptor's per-command pattern table (e.g. `"CREG?"`,
/// `"COPS=?"`); `wire` is the text written to the device without the line
/// ending. Patterns attached with [`with_patterns`](Self::with_patterns)
/// take precedence over the descriptor's.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    wire: String,
    payload: Option<Vec<u8>>,
    timeout: Option<Duration>,
    patterns: Option<Arc<CommandPatterns>>,
    solicits: Option<Builtin>,
    solicited_signal: Option<String>,
}

impl Command {
    pub fn new(name: &str, wire: &str) -> Self {
        Command {
            name: name.to_string(),
            wire: wire.to_string(),
            payload: None,
            timeout: None,
            patterns: None,
            solicits: None,
            solicited_signal: None,
        }
    }

    /// Make this a split command: `payload` is written once the device
    /// shows its prompt, followed by Ctrl-Z.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_patterns(mut self, patterns: Arc<CommandPatterns>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// The response to this command contains lines that would otherwise
    /// match `builtin`; suppress that rule while the command is outstanding.
    pub fn soliciting(mut self, builtin: Builtin) -> Self {
        self.solicits = Some(builtin);
        self
    }

    /// The response is made of the vendor signal `raw_name` (e.g. a query
    /// answered with `^SYSINFO:`); keep those lines for the response while
    /// the command is outstanding, even when the signal is mapped.
    pub fn soliciting_signal(mut self, raw_name: &str) -> Self {
        self.solicited_signal = Some(raw_name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire(&self) -> &str {
        &self.wire
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn patterns(&self) -> Option<&CommandPatterns> {
        self.patterns.as_deref()
    }

    pub fn solicits(&self) -> Option<Builtin> {
        self.solicits
    }

    pub fn solicited_signal(&self) -> Option<&str> {
        self.solicited_signal.as_deref()
    }

    /// Bytes written on dispatch.
    pub fn encode(&self, line_ending: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire.len() + line_ending.len());
        out.extend_from_slice(self.wire.as_bytes());
        out.extend_from_slice(line_ending);
        out
    }
}

/// Captures from one match of an extract pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    named: HashMap<String, String>,
    positional: Vec<Option<String>>,
}

impl Captured {
    pub(crate) fn from_captures(re: &Regex, caps: &regex::bytes::Captures<'_>) -> Self {
        let positional = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| protocol::to_text(m.as_bytes())))
            .collect();
        let named = re
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), protocol::to_text(m.as_bytes())))
            })
            .collect();
        Captured { named, positional }
    }

    /// Value of a named group, if it participated in the match.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Value of the `index`th group (0 = first group, not the whole match).
    pub fn at(&self, index: usize) -> Option<&str> {
        self.positional.get(index)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }
}

/// The successful result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// One row per extract-pattern match, possibly empty.
    Matches(Vec<Captured>),
    /// Cleaned response body for commands without an extract pattern.
    Text(String),
}

impl Response {
    /// Extracted rows, empty for [`Response::Text`].
    pub fn rows(&self) -> &[Captured] {
        match self {
            Response::Matches(rows) => rows,
            Response::Text(_) => &[],
        }
    }

    pub fn first(&self) -> Option<&Captured> {
        self.rows().first()
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Response::Text(text) => Some(text),
            Response::Matches(_) => None,
        }
    }
}
