//! Sans-IO AT protocol engine.
//!
//! The engine turns a raw byte stream into command results and
//! notifications. It never touches the transport: [`Engine::dispatch`]
//! returns the bytes to write, [`Engine::feed`] returns the notifications
//! to publish plus any bytes to write (a split command's payload), and the
//! IO task in [`crate::io`] performs the actual reads and writes.
//!
//! # States
//!
//! - **Idle**: received bytes accumulate in the idle buffer and are handed
//!   to the [`Demultiplexer`]. Unrecognised residue stays buffered.
//! - **Waiting**: exactly one command is outstanding. Received bytes go to
//!   the wait buffer, which is checked in order for notifications, the
//!   command's end pattern, the device error pattern and the split prompt.
//!
//! At most one command is ever Waiting; [`Engine::dispatch`] panics if
//! called while a command is outstanding.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use modemlib_core::error::{Error, Result};
use modemlib_core::events::Notification;

use crate::command::{Captured, Command, Response};
use crate::demux::{Claims, Demultiplexer};
use crate::descriptor::DeviceDescriptor;
use crate::protocol::{self, CTRL_Z};

/// Default cap on either buffer before it is cleared.
pub const MAX_BUF: usize = 8192;

/// Where a command's result is delivered.
pub type ReplySender = oneshot::Sender<Result<Response>>;

/// Side effects requested by the engine.
#[derive(Debug, Default, PartialEq)]
pub struct EngineOutput {
    /// Notifications to publish, in arrival order.
    pub notifications: Vec<Notification>,
    /// Bytes to write to the transport, in order.
    pub writes: Vec<Vec<u8>>,
}

struct Pending {
    command: Command,
    /// Exact bytes written on dispatch, for literal echo stripping.
    sent: Vec<u8>,
    reply: ReplySender,
    deadline: Instant,
    payload_sent: bool,
}

enum State {
    Idle,
    Waiting(Box<Pending>),
}

/// The protocol engine for one device session.
pub struct Engine {
    descriptor: Arc<DeviceDescriptor>,
    demux: Demultiplexer,
    idle_buf: Vec<u8>,
    wait_buf: Vec<u8>,
    state: State,
    max_buf: usize,
}

impl Engine {
    pub fn new(descriptor: Arc<DeviceDescriptor>) -> Self {
        Self::with_max_buf(descriptor, MAX_BUF)
    }

    pub fn with_max_buf(descriptor: Arc<DeviceDescriptor>, max_buf: usize) -> Self {
        Engine {
            demux: Demultiplexer::new(Arc::clone(&descriptor)),
            descriptor,
            idle_buf: Vec::new(),
            wait_buf: Vec::new(),
            state: State::Idle,
            max_buf,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Deadline of the outstanding command, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Idle => None,
            State::Waiting(p) => Some(p.deadline),
        }
    }

    /// Name of the outstanding command, if any.
    pub fn current_command(&self) -> Option<&str> {
        match &self.state {
            State::Idle => None,
            State::Waiting(p) => Some(p.command.name()),
        }
    }

    /// Bytes received while idle that matched nothing yet.
    pub fn idle_residue(&self) -> &[u8] {
        &self.idle_buf
    }

    /// Start `command` and return the bytes to write.
    ///
    /// Complete unrecognised lines left in the idle buffer are discarded; a
    /// trailing partial line carries over into the wait buffer so a
    /// notification split across the dispatch is still recognised.
    ///
    /// # Panics
    ///
    /// Panics if a command is already outstanding.
    pub fn dispatch(&mut self, command: Command, reply: ReplySender, now: Instant) -> Vec<u8> {
        assert!(
            self.is_idle(),
            "dispatch of {} while {} is outstanding",
            command.name(),
            self.current_command().unwrap_or_default()
        );

        self.wait_buf = take_partial_line(&mut self.idle_buf);

        let timeout = command
            .timeout()
            .or_else(|| command.patterns().and_then(|p| p.timeout()))
            .unwrap_or_else(|| self.descriptor.timeout_for(command.name()));
        let sent = command.encode(self.descriptor.line_ending());

        debug!(
            command = command.name(),
            timeout_ms = timeout.as_millis() as u64,
            "dispatching"
        );

        self.state = State::Waiting(Box::new(Pending {
            command,
            sent: sent.clone(),
            reply,
            deadline: now + timeout,
            payload_sent: false,
        }));
        sent
    }

    /// Process received bytes.
    pub fn feed(&mut self, data: &[u8]) -> EngineOutput {
        let mut out = EngineOutput::default();
        if data.is_empty() {
            return out;
        }

        if self.is_idle() {
            append_bounded(&mut self.idle_buf, data, self.max_buf, "idle");
            self.process_idle(&mut out);
        } else {
            append_bounded(&mut self.wait_buf, data, self.max_buf, "wait");
            self.process_waiting(&mut out);
        }
        out
    }

    /// Fail the outstanding command with a timeout if `now` is past its
    /// deadline. Returns whether a command expired.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired = matches!(&self.state, State::Waiting(p) if now >= p.deadline);
        if !expired {
            return false;
        }
        let name = self.current_command().unwrap_or_default().to_string();
        if !self.wait_buf.is_empty() {
            warn!(
                command = %name,
                data = %String::from_utf8_lossy(&self.wait_buf).escape_debug(),
                "discarding partial response after timeout"
            );
        }
        self.wait_buf.clear();
        self.resolve(Err(Error::Timeout { command: name }));
        true
    }

    /// Fail the outstanding command with `error` (transport write failure,
    /// task shutdown). No-op when idle.
    pub fn fail_current(&mut self, error: Error) {
        if self.is_idle() {
            return;
        }
        self.wait_buf.clear();
        self.resolve(Err(error));
    }

    fn process_idle(&mut self, out: &mut EngineOutput) {
        out.notifications
            .extend(self.demux.process(&mut self.idle_buf));
        if !self.idle_buf.is_empty() {
            trace!(
                data = %String::from_utf8_lossy(&self.idle_buf).escape_debug(),
                "unmatched idle residue, awaiting more bytes"
            );
        }
    }

    fn process_waiting(&mut self, out: &mut EngineOutput) {
        let State::Waiting(pending) = &mut self.state else {
            return;
        };

        // Lines the command's extract pattern matches are its own answer;
        // vendor lines with no signal mapping are left for the response text.
        let claims = Claims {
            builtin: pending.command.solicits(),
            response: pending.command.patterns().and_then(|p| p.extract()).or_else(|| {
                self.descriptor
                    .command(pending.command.name())
                    .and_then(|p| p.extract())
            }),
            signal: pending.command.solicited_signal(),
            unmapped_signals: true,
        };
        out.notifications
            .extend(self.demux.process_pending(&mut self.wait_buf, &claims));

        let end = pending
            .command
            .patterns()
            .and_then(|p| p.end())
            .unwrap_or_else(|| self.descriptor.end_pattern_for(pending.command.name()));

        if let Some(m) = end.find(&self.wait_buf) {
            let (start, stop) = (m.start(), m.end());
            let response = self.build_response(start, stop);
            self.finish_span(stop);
            self.resolve(Ok(response));
            self.process_idle(out);
            return;
        }

        if let Some(caps) = self.descriptor.error_pattern().captures(&self.wait_buf) {
            let family = caps.name("family").map(|m| protocol::to_text(m.as_bytes()));
            let detail = caps
                .name("detail")
                .or_else(|| caps.name("bare"))
                .map(|m| protocol::to_text(m.as_bytes()))
                .unwrap_or_else(|| protocol::to_text(protocol::trim_response(&caps[0])));
            let stop = caps.get(0).map_or(self.wait_buf.len(), |m| m.end());
            let error = protocol::classify_device_error(family.as_deref(), &detail);
            debug!(command = pending.command.name(), %error, "device error");
            self.finish_span(stop);
            self.resolve(Err(Error::Device(error)));
            self.process_idle(out);
            return;
        }

        let prompt_end = match pending.command.payload() {
            Some(_) if !pending.payload_sent => self
                .descriptor
                .prompt_pattern()
                .find(&self.wait_buf)
                .map(|m| m.end()),
            _ => None,
        };
        if let (Some(stop), Some(payload)) = (prompt_end, pending.command.payload()) {
            let mut bytes = Vec::with_capacity(payload.len() + 1);
            bytes.extend_from_slice(payload);
            bytes.push(CTRL_Z);
            debug!(
                command = pending.command.name(),
                len = payload.len(),
                "prompt seen, sending payload"
            );
            pending.payload_sent = true;
            self.wait_buf.drain(..stop);
            out.writes.push(bytes);
            return;
        }

        trace!(
            command = pending.command.name(),
            data = %String::from_utf8_lossy(&self.wait_buf).escape_debug(),
            "response incomplete, awaiting more bytes"
        );
    }

    /// Build the response for the span `wait_buf[..stop]` whose end match
    /// starts at `start`.
    fn build_response(&self, start: usize, stop: usize) -> Response {
        let State::Waiting(pending) = &self.state else {
            return Response::Text(String::new());
        };
        let span = &self.wait_buf[..stop];
        let echo_len = self.echo_len(pending, span);
        let body = &span[echo_len.min(start)..start];
        let full = &span[echo_len.min(stop)..];

        let extract = pending.command.patterns().and_then(|p| p.extract()).or_else(|| {
            self.descriptor
                .command(pending.command.name())
                .and_then(|p| p.extract())
        });

        match extract {
            Some(re) => Response::Matches(
                re.captures_iter(full)
                    .map(|caps| Captured::from_captures(re, &caps))
                    .collect(),
            ),
            None => Response::Text(protocol::to_text(protocol::trim_response(body))),
        }
    }

    /// Length of the command echo at the start of `span`, if any.
    fn echo_len(&self, pending: &Pending, span: &[u8]) -> usize {
        let echo = pending.command.patterns().and_then(|p| p.echo()).or_else(|| {
            self.descriptor
                .command(pending.command.name())
                .and_then(|p| p.echo())
        });
        match echo {
            Some(re) => re
                .find(span)
                .filter(|m| m.start() == 0)
                .map_or(0, |m| m.end()),
            None if span.starts_with(&pending.sent) => pending.sent.len(),
            None => 0,
        }
    }

    /// Drop the resolved span and move anything after it to the idle buffer.
    fn finish_span(&mut self, stop: usize) {
        let rest = self.wait_buf.split_off(stop);
        self.wait_buf.clear();
        self.idle_buf.extend_from_slice(&rest);
    }

    fn resolve(&mut self, result: Result<Response>) {
        let State::Waiting(pending) = std::mem::replace(&mut self.state, State::Idle) else {
            return;
        };
        match &result {
            Ok(_) => debug!(command = pending.command.name(), "command complete"),
            Err(e) => debug!(command = pending.command.name(), error = %e, "command failed"),
        }
        if pending.reply.send(result).is_err() {
            debug!(
                command = pending.command.name(),
                "caller dropped before command resolved"
            );
        }
    }
}

fn append_bounded(buf: &mut Vec<u8>, data: &[u8], max: usize, which: &str) {
    buf.extend_from_slice(data);
    if buf.len() > max {
        warn!(buffer = which, len = buf.len(), "buffer overflow, resetting");
        buf.clear();
    }
}

/// Split off a trailing partial line (starting at the last `\r\n`) and
/// discard everything before it.
fn take_partial_line(buf: &mut Vec<u8>) -> Vec<u8> {
    if buf.is_empty() {
        return Vec::new();
    }
    let last_crlf = buf.windows(2).rposition(|w| w == b"\r\n");
    let keep_from = match last_crlf {
        Some(pos) if buf.len() - pos > 2 => pos,
        Some(_) => buf.len(),
        None => 0,
    };
    if keep_from > 0 {
        debug!(
            data = %String::from_utf8_lossy(&buf[..keep_from]).escape_debug(),
            "discarding unrecognised idle output"
        );
    }
    let partial = buf.split_off(keep_from);
    buf.clear();
    partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Builtin, CommandSpec, DescriptorBuilder};
    use modemlib_core::error::DeviceErrorKind;
    use modemlib_core::types::RegStatus;
    use std::time::Duration;

    fn descriptor() -> Arc<DeviceDescriptor> {
        Arc::new(
            DescriptorBuilder::new("test")
                .command(
                    "CREG?",
                    CommandSpec::new().extract(r"\+CREG:\s*(?P<n>\d),(?P<stat>\d)"),
                )
                .command(
                    "COPS=?",
                    CommandSpec::new()
                        .extract(r#"\((?P<stat>\d),"(?P<long>[^"]*)","(?P<short>[^"]*)","(?P<id>\d+)"\)"#)
                        .timeout(Duration::from_secs(300)),
                )
                .command(
                    "CMGS",
                    CommandSpec::new()
                        .end(r"\r\n\+CMGS:\s*\d+\r\n\r\nOK\r\n")
                        .extract(r"\+CMGS:\s*(?P<mr>\d+)"),
                )
                .build()
                .unwrap(),
        )
    }

    fn dispatch(engine: &mut Engine, cmd: Command) -> (Vec<u8>, oneshot::Receiver<Result<Response>>) {
        let (tx, rx) = oneshot::channel();
        let bytes = engine.dispatch(cmd, tx, Instant::now());
        (bytes, rx)
    }

    #[test]
    fn simple_ok_resolves_text() {
        let mut engine = Engine::new(descriptor());
        let (bytes, mut rx) = dispatch(&mut engine, Command::new("CIMI", "AT+CIMI"));
        assert_eq!(bytes, b"AT+CIMI\r");
        assert!(!engine.is_idle());

        let out = engine.feed(b"AT+CIMI\r\r\n214011234567890\r\n\r\nOK\r\n");
        assert!(out.notifications.is_empty());
        assert!(engine.is_idle());
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            Response::Text("214011234567890".into())
        );
    }

    #[test]
    fn chunked_response_waits_for_end() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("CSQ", "AT+CSQ"));
        engine.feed(b"\r\n+CSQ: 1");
        engine.feed(b"7,99\r\n\r\nO");
        assert!(!engine.is_idle());
        assert!(rx.try_recv().is_err());
        engine.feed(b"K\r\n");
        assert!(engine.is_idle());
        assert_eq!(
            rx.try_recv().unwrap().unwrap().text(),
            Some("+CSQ: 17,99")
        );
    }

    #[test]
    fn extract_rows() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("COPS=?", "AT+COPS=?"));
        assert!(engine.deadline().unwrap() > Instant::now() + Duration::from_secs(200));
        engine.feed(
            b"\r\n+COPS: (2,\"Movistar\",\"MOV\",\"21407\"),(1,\"Orange\",\"ORG\",\"21403\"),,(0,1,2)\r\n\r\nOK\r\n",
        );
        let resp = rx.try_recv().unwrap().unwrap();
        assert_eq!(resp.rows().len(), 2);
        assert_eq!(resp.rows()[0].get("id"), Some("21407"));
        assert_eq!(resp.rows()[1].get("long"), Some("Orange"));
    }

    #[test]
    fn cme_error_classified_and_idle() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("CIMI", "AT+CIMI"));
        engine.feed(b"\r\n+CME ERROR: 10\r\n");
        assert!(engine.is_idle());
        assert!(engine.deadline().is_none());
        match rx.try_recv().unwrap() {
            Err(Error::Device(e)) => {
                assert_eq!(e.code, Some(10));
                assert_eq!(e.kind, DeviceErrorKind::SimNotInserted);
            }
            other => panic!("unexpected {other:?}"),
        }
        // A late expiry check finds nothing to time out.
        assert!(!engine.expire(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn bare_error() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("X", "AT+X"));
        engine.feed(b"AT+X\r\r\nERROR\r\n");
        match rx.try_recv().unwrap() {
            Err(Error::Device(e)) => assert_eq!(e.message, "ERROR"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn notification_during_wait_is_published_first() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("CSQ", "AT+CSQ"));
        let out = engine.feed(b"\r\nRING\r\n\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
        assert_eq!(out.notifications, vec![Notification::IncomingCall]);
        assert_eq!(rx.try_recv().unwrap().unwrap().text(), Some("+CSQ: 20,99"));
    }

    #[test]
    fn solicited_builtin_not_stolen() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(
            &mut engine,
            Command::new("CREG?", "AT+CREG?").soliciting(Builtin::RegStatus),
        );
        let out = engine.feed(b"\r\n+CREG: 0,2\r\n\r\nOK\r\n");
        assert!(out.notifications.is_empty());
        let resp = rx.try_recv().unwrap().unwrap();
        assert_eq!(resp.first().unwrap().get("stat"), Some("2"));
    }

    #[test]
    fn trailing_bytes_become_idle_input() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("AT", "AT"));
        let out = engine.feed(b"\r\nOK\r\n\r\n+CREG: 1\r\n");
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(
            out.notifications,
            vec![Notification::NetworkRegStatus {
                status: RegStatus::Home,
                operator_code: None,
                operator_name: None,
            }]
        );
        assert!(engine.idle_residue().is_empty());
    }

    #[test]
    fn prompt_sends_payload_once() {
        let mut engine = Engine::new(descriptor());
        let cmd = Command::new("CMGS", "AT+CMGS=18").with_payload(b"0011000B91".to_vec());
        let (_, mut rx) = dispatch(&mut engine, cmd);

        let out = engine.feed(b"AT+CMGS=18\r");
        assert!(out.writes.is_empty());

        let out = engine.feed(b"\r\n> ");
        assert_eq!(out.writes, vec![b"0011000B91\x1a".to_vec()]);

        // A second prompt-looking sequence does not resend.
        let out = engine.feed(b"\r\n> ");
        assert!(out.writes.is_empty());

        engine.feed(b"\r\n+CMGS: 42\r\n\r\nOK\r\n");
        let resp = rx.try_recv().unwrap().unwrap();
        assert_eq!(resp.first().unwrap().get("mr"), Some("42"));
    }

    #[test]
    fn prompt_without_payload_is_ignored() {
        let mut engine = Engine::new(descriptor());
        let (_, _rx) = dispatch(&mut engine, Command::new("X", "AT+X"));
        let out = engine.feed(b"\r\n> ");
        assert!(out.writes.is_empty());
        assert!(!engine.is_idle());
    }

    #[test]
    fn timeout_expires_and_goes_idle() {
        let mut engine = Engine::new(descriptor());
        let (tx, mut rx) = oneshot::channel();
        let start = Instant::now();
        engine.dispatch(
            Command::new("CSQ", "AT+CSQ").with_timeout(Duration::from_millis(100)),
            tx,
            start,
        );
        engine.feed(b"\r\n+CSQ: ");
        assert!(!engine.expire(start + Duration::from_millis(50)));
        assert!(engine.expire(start + Duration::from_millis(100)));
        assert!(engine.is_idle());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::Timeout { command }) if command == "CSQ"
        ));
    }

    #[test]
    fn fail_current_resolves_once() {
        let mut engine = Engine::new(descriptor());
        let (_, mut rx) = dispatch(&mut engine, Command::new("AT", "AT"));
        engine.fail_current(Error::ConnectionLost);
        assert!(engine.is_idle());
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ConnectionLost)));
        // Idle: nothing to fail.
        engine.fail_current(Error::NotConnected);
    }

    #[test]
    #[should_panic(expected = "outstanding")]
    fn dispatch_while_waiting_panics() {
        let mut engine = Engine::new(descriptor());
        let (_, _rx1) = dispatch(&mut engine, Command::new("A", "AT+A"));
        let (_, _rx2) = dispatch(&mut engine, Command::new("B", "AT+B"));
    }

    #[test]
    fn idle_partial_line_carries_into_wait() {
        let mut engine = Engine::new(descriptor());
        engine.feed(b"\r\nGARBAGE\r\n\r\n+CRE");
        assert_eq!(engine.idle_residue(), b"\r\nGARBAGE\r\n\r\n+CRE");

        let (_, mut rx) = dispatch(&mut engine, Command::new("AT", "AT"));
        assert!(engine.idle_residue().is_empty());
        let out = engine.feed(b"G: 5\r\n\r\nOK\r\n");
        assert_eq!(out.notifications.len(), 1);
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn stale_final_code_not_carried_into_next_command() {
        let mut engine = Engine::new(descriptor());
        engine.feed(b"\r\nOK\r\n");
        let (_, mut rx) = dispatch(&mut engine, Command::new("AT", "AT"));
        assert!(rx.try_recv().is_err());
        assert!(!engine.is_idle());
    }

    #[test]
    fn overflow_resets_buffer() {
        let mut engine = Engine::with_max_buf(descriptor(), 16);
        engine.feed(b"0123456789abcdef0123");
        assert!(engine.idle_residue().is_empty());
    }

    #[test]
    fn dropped_caller_does_not_panic() {
        let mut engine = Engine::new(descriptor());
        let (_, rx) = dispatch(&mut engine, Command::new("AT", "AT"));
        drop(rx);
        engine.feed(b"\r\nOK\r\n");
        assert!(engine.is_idle());
    }
}
