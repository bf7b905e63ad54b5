//! Notification demultiplexer.
//!
//! Classifies unsolicited text in a byte buffer into [`Notification`]s using
//! the device's [`DeviceDescriptor`]. Every recognised span is removed from
//! the buffer exactly once; unrecognised bytes stay in place for the engine
//! (they may be a partial line or part of a command response).
//!
//! Rule order: ignore patterns are stripped first. Of the remaining rules,
//! the match starting earliest in the buffer wins, so notifications come
//! out in arrival order; rules matching at the same offset are ranked
//! async > new-SMS > debug > registration > incoming call.

use std::ops::Range;
use std::sync::Arc;

use regex::bytes::{Captures, Regex};
use tracing::{debug, trace, warn};

use modemlib_core::events::{Notification, SignalValue};
use modemlib_core::types::RegStatus;

use crate::descriptor::{Builtin, DeviceDescriptor};
use crate::protocol;

/// A notification rule that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Async,
    Builtin(Builtin),
}

/// Spans an outstanding command claims as part of its own response.
///
/// The default claims nothing, which is the idle behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Claims<'a> {
    /// Built-in rule whose matches may belong to the response.
    pub builtin: Option<Builtin>,
    /// When set, a claimed built-in span stays only if this pattern (the
    /// command's extract pattern) matches it; other matches are published.
    pub response: Option<&'a Regex>,
    /// Raw vendor signal name the response is made of.
    pub signal: Option<&'a str>,
    /// Leave async spans with no signal mapping in place.
    pub unmapped_signals: bool,
}

/// Stateless classifier over a shared descriptor.
#[derive(Debug, Clone)]
pub struct Demultiplexer {
    descriptor: Arc<DeviceDescriptor>,
}

impl Demultiplexer {
    pub fn new(descriptor: Arc<DeviceDescriptor>) -> Self {
        Demultiplexer { descriptor }
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    /// Consume every recognised notification in `buf`.
    ///
    /// Returns notifications in buffer order; spans that are recognised but
    /// carry nothing to publish (debug noise, unmapped vendor signals) are
    /// consumed silently.
    pub fn process(&self, buf: &mut Vec<u8>) -> Vec<Notification> {
        self.process_pending(buf, &Claims::default())
    }

    /// Like [`process`](Self::process), but spans the outstanding command
    /// claims for its own response are left in `buf`.
    pub fn process_pending(&self, buf: &mut Vec<u8>, claims: &Claims<'_>) -> Vec<Notification> {
        let mut out = Vec::new();
        let mut from = 0;

        loop {
            self.strip_ignored(buf, from);

            let Some((rule, span)) = self.earliest_match(buf, from) else {
                break;
            };

            if self.is_claimed(rule, &buf[span.clone()], claims) {
                trace!(
                    ?rule,
                    data = %String::from_utf8_lossy(&buf[span.clone()]).escape_debug(),
                    "left for the pending response"
                );
                from = span.end;
                continue;
            }

            if let Some(notification) = self.classify(rule, &buf[span.clone()]) {
                debug!(?rule, ?notification, "notification");
                out.push(notification);
            }
            buf.drain(span);
        }

        out
    }

    fn strip_ignored(&self, buf: &mut Vec<u8>, from: usize) {
        let mut stripped = true;
        while stripped {
            stripped = false;
            for re in self.descriptor.ignore_patterns() {
                let Some(range) = re
                    .find_at(buf, from)
                    .filter(|m| !m.is_empty())
                    .map(|m| m.range())
                else {
                    continue;
                };
                debug!(
                    data = %String::from_utf8_lossy(&buf[range.clone()]).escape_debug(),
                    "ignored unsolicited output"
                );
                buf.drain(range);
                stripped = true;
            }
        }
    }

    fn rules(&self) -> impl Iterator<Item = (Rule, &Regex)> {
        let async_rule = self.descriptor.async_pattern().map(|re| (Rule::Async, re));
        let builtins = Builtin::PRIORITY
            .into_iter()
            .filter_map(move |b| self.descriptor.builtin(b).map(|re| (Rule::Builtin(b), re)));
        async_rule.into_iter().chain(builtins)
    }

    fn earliest_match(&self, buf: &[u8], from: usize) -> Option<(Rule, Range<usize>)> {
        let mut best: Option<(Rule, Range<usize>)> = None;
        for (rule, re) in self.rules() {
            let Some(m) = re.find_at(buf, from).filter(|m| !m.is_empty()) else {
                continue;
            };
            // Rules are visited in priority order, so only a strictly
            // earlier start displaces the current best.
            if best.as_ref().is_none_or(|(_, span)| m.start() < span.start) {
                best = Some((rule, m.range()));
            }
        }
        best
    }

    fn is_claimed(&self, rule: Rule, span: &[u8], claims: &Claims<'_>) -> bool {
        match rule {
            Rule::Builtin(b) if claims.builtin == Some(b) => {
                claims.response.is_none_or(|re| re.is_match(span))
            }
            Rule::Builtin(_) => false,
            Rule::Async => {
                let name = self
                    .descriptor
                    .async_pattern()
                    .and_then(|re| re.captures(span))
                    .and_then(|caps| group(&caps, "name"));
                match name {
                    Some(name) => {
                        claims.signal == Some(name.as_str())
                            || (claims.unmapped_signals && self.descriptor.signal(&name).is_none())
                    }
                    None => false,
                }
            }
        }
    }

    fn classify(&self, rule: Rule, span: &[u8]) -> Option<Notification> {
        let re = match rule {
            Rule::Async => self.descriptor.async_pattern()?,
            Rule::Builtin(b) => self.descriptor.builtin(b)?,
        };
        let caps = re.captures(span)?;

        match rule {
            Rule::Async => self.vendor_signal(&caps),
            Rule::Builtin(Builtin::NewSms) => {
                let folder = group(&caps, "folder").unwrap_or_default();
                let index = group(&caps, "index")?;
                match index.parse::<u32>() {
                    Ok(index) => Some(Notification::NewSmsArrived { index, folder }),
                    Err(e) => {
                        warn!(index = %index, error = %e, "bad +CMTI index, dropping");
                        None
                    }
                }
            }
            Rule::Builtin(Builtin::DebugNoise) => {
                debug!(
                    data = %String::from_utf8_lossy(span).escape_debug(),
                    "device debug output"
                );
                None
            }
            Rule::Builtin(Builtin::RegStatus) => {
                let raw = group(&caps, "status")?;
                let status = raw.parse::<u8>().ok().and_then(RegStatus::from_code);
                match status {
                    Some(status) => Some(Notification::NetworkRegStatus {
                        status,
                        operator_code: group(&caps, "lac"),
                        operator_name: group(&caps, "ci"),
                    }),
                    None => {
                        warn!(status = %raw, "unknown +CREG status, dropping");
                        None
                    }
                }
            }
            Rule::Builtin(Builtin::IncomingCall) => Some(Notification::IncomingCall),
        }
    }

    fn vendor_signal(&self, caps: &Captures<'_>) -> Option<Notification> {
        let name = group(caps, "name")?;
        let raw = group(caps, "value").unwrap_or_default();

        let Some(mapping) = self.descriptor.signal(&name) else {
            debug!(signal = %name, value = %raw, "unmapped vendor signal");
            return None;
        };

        let value = match (mapping.transform)(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(signal = %name, error = %e, "signal transform failed, using raw value");
                SignalValue::Text(raw)
            }
        };

        Some(Notification::VendorSignal {
            name: mapping.logical.clone(),
            value,
        })
    }
}

fn group(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name).map(|m| protocol::to_text(m.as_bytes()))
}
