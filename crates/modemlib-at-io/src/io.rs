//! IO task and command queue for one modem.
//!
//! One tokio task owns the transport exclusively. It feeds received bytes to
//! the [`Engine`], publishes notifications on a broadcast channel, and takes
//! queued commands off an mpsc channel, one at a time, only while the
//! engine is Idle. Callers hold a [`ModemIo`] handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use modemlib_core::error::{Error, Result};
use modemlib_core::events::{Notification, NotificationKind};
use modemlib_core::transport::Transport;

use crate::command::{Command, Response};
use crate::descriptor::DeviceDescriptor;
use crate::engine::{Engine, EngineOutput, MAX_BUF};

/// Tuning for the IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Size of a single transport read.
    pub read_chunk: usize,
    /// How long one `receive()` call may block before the loop re-checks
    /// the queue, the deadline and cancellation.
    pub receive_poll: Duration,
    /// Cap on the engine's buffers.
    pub max_buf: usize,
    /// Capacity of the notification broadcast channel.
    pub notification_capacity: usize,
    /// Capacity of the command queue.
    pub queue_capacity: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            read_chunk: 256,
            receive_poll: Duration::from_millis(50),
            max_buf: MAX_BUF,
            notification_capacity: 64,
            queue_capacity: 32,
        }
    }
}

/// A request sent from [`ModemIo`] to the IO task.
pub enum Request {
    /// Run a command and deliver its result.
    Submit {
        command: Command,
        reply: oneshot::Sender<Result<Response>>,
    },
    /// Graceful shutdown after all earlier requests; returns the transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task.
pub struct ModemIo {
    tx: mpsc::Sender<Request>,
    notifications: broadcast::Sender<Notification>,
    descriptor: Arc<DeviceDescriptor>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ModemIo {
    /// Queue a command and wait for its result.
    ///
    /// Commands run strictly in submission order. The engine's per-command
    /// timeout bounds the wait once the command is dispatched.
    pub async fn submit(&self, command: Command) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Submit {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Subscribe to notifications of one kind.
    pub fn subscribe(&self, kind: NotificationKind) -> NotificationStream {
        NotificationStream {
            rx: self.notifications.subscribe(),
            filter: Some(kind),
        }
    }

    /// Subscribe to every notification.
    pub fn subscribe_all(&self) -> NotificationStream {
        NotificationStream {
            rx: self.notifications.subscribe(),
            filter: None,
        }
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    /// Whether the IO task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the IO task immediately. The outstanding command, if any,
    /// fails with [`Error::NotConnected`]; queued commands are dropped.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Shut down the IO task once earlier commands finish and recover the
    /// transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

/// A filtered view of the notification stream.
pub struct NotificationStream {
    rx: broadcast::Receiver<Notification>,
    filter: Option<NotificationKind>,
}

impl NotificationStream {
    /// Next matching notification, or `None` once the IO task is gone.
    ///
    /// A subscriber that falls behind skips the oldest notifications and
    /// carries on.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.filter.is_none_or(|k| n.kind() == k) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task for `transport`, framed by `descriptor`.
pub fn spawn_io_task(
    transport: Box<dyn Transport>,
    descriptor: Arc<DeviceDescriptor>,
    config: IoConfig,
) -> ModemIo {
    let (tx, rx) = mpsc::channel::<Request>(config.queue_capacity.max(1));
    let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
    let cancel = CancellationToken::new();

    let engine = Engine::with_max_buf(Arc::clone(&descriptor), config.max_buf);
    let task = tokio::spawn(io_loop(
        transport,
        engine,
        config,
        notifications.clone(),
        rx,
        cancel.clone(),
    ));

    ModemIo {
        tx,
        notifications,
        descriptor,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// The main IO loop.
///
/// `tokio::select! { biased; }` order:
/// 1. Cancellation
/// 2. Outstanding command deadline
/// 3. Next queued request (only while the engine is Idle)
/// 4. Transport reads
async fn io_loop(
    mut transport: Box<dyn Transport>,
    mut engine: Engine,
    config: IoConfig,
    notifications: broadcast::Sender<Notification>,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; config.read_chunk.max(1)];

    loop {
        let deadline = engine.deadline();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("modem IO task cancelled");
                break;
            }

            _ = sleep_until(deadline), if deadline.is_some() => {
                if engine.expire(Instant::now()) {
                    warn!("command timed out");
                }
            }

            req = rx.recv(), if engine.is_idle() => {
                match req {
                    Some(Request::Submit { command, reply }) => {
                        let bytes = engine.dispatch(command, reply, Instant::now());
                        trace!(data = %String::from_utf8_lossy(&bytes).escape_debug(), "write");
                        if let Err(e) = transport.send(&bytes).await {
                            warn!(error = %e, "failed to write command");
                            engine.fail_current(e);
                        }
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("modem IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("request channel closed, exiting modem IO task");
                        break;
                    }
                }
            }

            result = transport.receive(&mut buf, config.receive_poll) => {
                match result {
                    Ok(n) if n > 0 => {
                        let out = engine.feed(&buf[..n]);
                        if let Err(e) = apply(&mut *transport, &mut engine, &notifications, out).await {
                            warn!(error = %e, "failed to write split payload");
                            engine.fail_current(e);
                        }
                    }
                    Ok(_) | Err(Error::Timeout { .. }) => {}
                    Err(e @ (Error::ConnectionLost | Error::NotConnected)) => {
                        error!(error = %e, "modem connection lost");
                        engine.fail_current(e);
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport read failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    engine.fail_current(Error::NotConnected);
}

/// Publish notifications and perform the writes the engine asked for.
async fn apply(
    transport: &mut dyn Transport,
    engine: &mut Engine,
    notifications: &broadcast::Sender<Notification>,
    out: EngineOutput,
) -> Result<()> {
    for n in out.notifications {
        if notifications.send(n).is_err() {
            trace!("no notification subscribers");
        }
    }
    for bytes in out.writes {
        if engine.is_idle() {
            break;
        }
        transport.send(&bytes).await?;
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Builtin, CommandSpec, DescriptorBuilder};
    use modemlib_core::error::DeviceErrorKind;
    use modemlib_core::types::RegStatus;
    use modemlib_test_harness::MockTransport;

    fn descriptor() -> Arc<DeviceDescriptor> {
        Arc::new(
            DescriptorBuilder::new("test")
                .command(
                    "CREG?",
                    CommandSpec::new().extract(r"\+CREG:\s*(?P<n>\d),(?P<stat>\d)"),
                )
                .command(
                    "CMGS",
                    CommandSpec::new()
                        .end(r"\r\n\+CMGS:\s*\d+\r\n\r\nOK\r\n")
                        .extract(r"\+CMGS:\s*(?P<mr>\d+)"),
                )
                .default_timeout(Duration::from_millis(300))
                .build()
                .unwrap(),
        )
    }

    fn config() -> IoConfig {
        IoConfig {
            receive_poll: Duration::from_millis(5),
            ..IoConfig::default()
        }
    }

    #[tokio::test]
    async fn submit_round_trip() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CIMI\r", b"\r\n214011234567890\r\n\r\nOK\r\n");

        let io = spawn_io_task(Box::new(mock), descriptor(), config());
        let resp = io.submit(Command::new("CIMI", "AT+CIMI")).await.unwrap();
        assert_eq!(resp.text(), Some("214011234567890"));

        let transport = io.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn commands_are_serialised_in_order() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect_chunks(b"AT+A\r", &[b"\r\nO", b"K\r\n"]);
        mock.expect(b"AT+B\r", b"\r\nOK\r\n");
        mock.expect(b"AT+C\r", b"\r\n+CME ERROR: 14\r\n");

        let io = spawn_io_task(Box::new(mock), descriptor(), config());
        let (a, b, c) = tokio::join!(
            io.submit(Command::new("A", "AT+A")),
            io.submit(Command::new("B", "AT+B")),
            io.submit(Command::new("C", "AT+C")),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        match c {
            Err(Error::Device(e)) => assert_eq!(e.kind, DeviceErrorKind::SimBusy),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handle.sent_strings(), vec!["AT+A\r", "AT+B\r", "AT+C\r"]);
    }

    #[tokio::test]
    async fn timeout_then_next_command_runs() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+SLOW\r", b"");
        mock.expect(b"AT\r", b"\r\nOK\r\n");

        let io = spawn_io_task(Box::new(mock), descriptor(), config());
        let err = io
            .submit(Command::new("SLOW", "AT+SLOW").with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref command } if command == "SLOW"));

        assert!(io.submit(Command::new("AT", "AT")).await.is_ok());
    }

    #[tokio::test]
    async fn notifications_are_published() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let io = spawn_io_task(Box::new(mock), descriptor(), config());

        let mut reg = io.subscribe(NotificationKind::NetworkRegStatus);
        let mut all = io.subscribe_all();

        handle.inject(b"\r\nRING\r\n\r\n+CREG: 0,1\r\n");

        let n = tokio::time::timeout(Duration::from_secs(1), reg.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            n,
            Notification::NetworkRegStatus { status: RegStatus::Home, .. }
        ));

        let first = tokio::time::timeout(Duration::from_secs(1), all.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Notification::IncomingCall);
    }

    #[tokio::test]
    async fn split_command_payload_after_prompt() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CMGS=18\r", b"\r\n> ");
        mock.expect(b"0011000B91\x1a", b"\r\n+CMGS: 7\r\n\r\nOK\r\n");

        let io = spawn_io_task(Box::new(mock), descriptor(), config());
        let resp = io
            .submit(Command::new("CMGS", "AT+CMGS=18").with_payload(b"0011000B91".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.first().unwrap().get("mr"), Some("7"));
        assert_eq!(handle.sent_count(b"0011000B91\x1a"), 1);
        assert_eq!(handle.sent_data()[0], b"AT+CMGS=18\r");
    }

    #[tokio::test]
    async fn solicited_creg_reaches_command_not_subscribers() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CREG?\r", b"\r\n+CREG: 0,5\r\n\r\nOK\r\n");

        let io = spawn_io_task(Box::new(mock), descriptor(), config());
        let mut reg = io.subscribe(NotificationKind::NetworkRegStatus);

        let resp = io
            .submit(Command::new("CREG?", "AT+CREG?").soliciting(Builtin::RegStatus))
            .await
            .unwrap();
        assert_eq!(resp.first().unwrap().get("stat"), Some("5"));

        let nothing = tokio::time::timeout(Duration::from_millis(50), reg.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn write_failure_resolves_command() {
        // No expectations: the mock rejects the write.
        let mock = MockTransport::new();
        let io = spawn_io_task(Box::new(mock), descriptor(), config());
        let err = io.submit(Command::new("AT", "AT")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn disconnected_transport_stops_task() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        let io = spawn_io_task(Box::new(mock), descriptor(), config());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!io.is_running());
        let err = io.submit(Command::new("AT", "AT")).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn abort_fails_outstanding_command() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+COPS=?\r", b"");
        let io = Arc::new(spawn_io_task(Box::new(mock), descriptor(), config()));

        let pending = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.submit(Command::new("COPS=?", "AT+COPS=?").with_timeout(Duration::from_secs(300)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        io.abort();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
