//! ModemSession -- a modem with registration and the everyday queries.
//!
//! The session owns the [`ModemIo`] handle and drives the pure
//! [`RegistrationMachine`] against it: each command effect becomes one
//! submitted command, each timer effect one tokio timer, and `+CREG`
//! reports arrive through a notification subscription taken before the
//! first command goes out.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace};

use modemlib_at_io::{Command, ModemIo, NotificationStream, Response};
use modemlib_core::error::{Error, Result};
use modemlib_core::events::{Notification, NotificationKind};
use modemlib_core::helpers::decode_ucs2_hex;
use modemlib_core::transport::Transport;
use modemlib_core::types::{
    Charset, NetworkInfo, Operator, OperatorRef, RegStatus, RegistrationOutcome,
};

use crate::commands::{self, SignalQuality};
use crate::operators::{ImsiProvider, KnownOperators, OperatorDirectory};
use crate::registration::{
    Entry, RegEffect, RegEvent, RegistrationConfig, RegistrationMachine, Reply,
};

type ReplyFuture<'a> = Pin<Box<dyn Future<Output = Reply> + Send + 'a>>;

/// A connected modem.
pub struct ModemSession {
    io: ModemIo,
    config: RegistrationConfig,
    directory: Arc<dyn OperatorDirectory>,
    imsi_provider: Option<Arc<dyn ImsiProvider>>,
}

impl ModemSession {
    /// Wrap a running IO task. Operator names come from [`KnownOperators`]
    /// and the IMSI is read with `AT+CIMI` unless overridden.
    pub fn new(io: ModemIo, config: RegistrationConfig) -> Self {
        ModemSession {
            io,
            config,
            directory: Arc::new(KnownOperators),
            imsi_provider: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn OperatorDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_imsi_provider(mut self, provider: Arc<dyn ImsiProvider>) -> Self {
        self.imsi_provider = Some(provider);
        self
    }

    pub fn io(&self) -> &ModemIo {
        &self.io
    }

    pub fn registration_config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Subscribe to notifications of one kind.
    pub fn subscribe(&self, kind: NotificationKind) -> NotificationStream {
        self.io.subscribe(kind)
    }

    /// Submit an arbitrary command.
    pub async fn submit(&self, command: Command) -> Result<Response> {
        self.io.submit(command).await
    }

    /// Stop the IO task after queued commands and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        self.io.shutdown().await
    }

    // ---------------------------------------------------------------
    // Everyday queries
    // ---------------------------------------------------------------

    /// Turn echo off and enable numeric error codes.
    pub async fn initialize(&self) -> Result<()> {
        self.io.submit(commands::cmd_echo_off()).await?;
        self.io.submit(commands::cmd_enable_error_codes()).await?;
        Ok(())
    }

    pub async fn set_charset(&self, charset: Charset) -> Result<()> {
        self.io.submit(commands::cmd_set_charset(charset)).await?;
        Ok(())
    }

    pub async fn charset(&self) -> Result<Charset> {
        self.query(commands::cmd_read_charset(), commands::parse_charset)
            .await
    }

    pub async fn reg_status(&self) -> Result<RegStatus> {
        self.query(commands::cmd_read_reg_status(), commands::parse_reg_status)
            .await
    }

    pub async fn network_info(&self) -> Result<NetworkInfo> {
        self.query(commands::cmd_read_network_info(), commands::parse_network_info)
            .await
    }

    /// Scan for visible operators. Slow: the device may take minutes.
    pub async fn operators(&self) -> Result<Vec<Operator>> {
        self.query(commands::cmd_list_operators(), commands::parse_operator_list)
            .await
    }

    pub async fn roaming_list(&self) -> Result<Vec<String>> {
        self.query(commands::cmd_read_roaming_list(), commands::parse_roaming_list)
            .await
    }

    /// The IMSI, from the configured provider or `AT+CIMI`.
    pub async fn imsi(&self) -> Result<String> {
        match &self.imsi_provider {
            Some(provider) => provider.imsi().await,
            None => self.io.imsi().await,
        }
    }

    pub async fn signal_quality(&self) -> Result<SignalQuality> {
        self.query(commands::cmd_signal_quality(), commands::parse_signal_quality)
            .await
    }

    /// Send an already-encoded SMS PDU; returns the message reference.
    pub async fn send_sms_pdu(&self, tpdu_len: usize, pdu_hex: &str) -> Result<u8> {
        let cmd = commands::cmd_send_sms_pdu(tpdu_len, pdu_hex)?;
        self.query(cmd, commands::parse_message_reference).await
    }

    async fn query<T>(&self, command: Command, parse: fn(&Response) -> Result<T>) -> Result<T> {
        let resp = self.io.submit(command).await?;
        parse(&resp)
    }

    // ---------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------

    /// Wait for the modem to register, driven by `+CREG`.
    pub async fn register(&self) -> Result<RegistrationOutcome> {
        self.run_registration(Entry::Creg).await
    }

    /// Register by comparing the current operator with the SIM's home
    /// network, searching and roaming if needed.
    pub async fn register_via_network_info(&self) -> Result<RegistrationOutcome> {
        let imsi = self.imsi().await?;
        self.run_registration(Entry::NetInfo { imsi }).await
    }

    async fn run_registration(&self, entry: Entry) -> Result<RegistrationOutcome> {
        let mut reports = self.io.subscribe(NotificationKind::NetworkRegStatus);
        let mut machine = RegistrationMachine::new(self.config.clone());

        let mut in_flight: Option<ReplyFuture<'_>> = None;
        let mut poll: Option<Interval> = None;
        let mut pause: Option<Pin<Box<Sleep>>> = None;
        let mut effects = machine.handle(RegEvent::Start(entry), Instant::now());

        loop {
            for effect in effects.drain(..) {
                match effect {
                    RegEffect::StartPoll(period) => {
                        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        poll = Some(interval);
                    }
                    RegEffect::CancelPoll => poll = None,
                    RegEffect::Sleep(delay) => pause = Some(Box::pin(tokio::time::sleep(delay))),
                    RegEffect::Finish { info, roaming } => {
                        let outcome = self.outcome(info, roaming);
                        info!(
                            operator = %outcome.operator_name,
                            connection = %outcome.connection,
                            roaming,
                            "modem registered"
                        );
                        return Ok(outcome);
                    }
                    RegEffect::Fail(e) => return Err(e),
                    command => in_flight = self.execute(command),
                }
            }

            let deadline = machine.deadline();
            let event = tokio::select! {
                biased;

                reply = next_reply(&mut in_flight) => {
                    in_flight = None;
                    RegEvent::Reply(reply)
                }

                report = reports.recv() => match report {
                    Some(Notification::NetworkRegStatus { status, .. }) => {
                        RegEvent::Notification(status)
                    }
                    Some(other) => {
                        trace!(?other, "ignoring notification");
                        continue;
                    }
                    None => return Err(Error::NotConnected),
                },

                _ = next_tick(&mut poll), if poll.is_some() => RegEvent::PollTick,

                _ = next_wake(&mut pause), if pause.is_some() => {
                    pause = None;
                    RegEvent::SleepDone
                }

                _ = sleep_until(deadline), if deadline.is_some() => RegEvent::Tick,
            };

            effects = machine.handle(event, Instant::now());
        }
    }

    /// Start the command behind a command effect.
    fn execute(&self, effect: RegEffect) -> Option<ReplyFuture<'_>> {
        debug!(?effect, "registration command");
        let fut: ReplyFuture<'_> = match effect {
            RegEffect::SetCharset(charset) => Box::pin(async move {
                Reply::Charset(self.set_charset(charset).await)
            }),
            RegEffect::QueryRegStatus => Box::pin(async move {
                Reply::RegStatus(self.reg_status().await)
            }),
            RegEffect::EnableRegNotifications => Box::pin(async move {
                let result = self
                    .io
                    .submit(commands::cmd_enable_reg_notifications())
                    .await
                    .map(drop);
                Reply::NotificationsArmed(result)
            }),
            RegEffect::QueryNetInfo => Box::pin(async move {
                Reply::NetInfo(self.network_info().await)
            }),
            RegEffect::ListOperators => Box::pin(async move {
                Reply::Operators(self.operators().await)
            }),
            RegEffect::ReadRoamingList => Box::pin(async move {
                Reply::RoamingList(self.roaming_list().await)
            }),
            RegEffect::RegisterWith(id) => Box::pin(async move {
                let result = match commands::cmd_register_with(&id) {
                    Ok(cmd) => self.io.submit(cmd).await.map(drop),
                    Err(e) => Err(e),
                };
                Reply::Registered(result)
            }),
            _ => return None,
        };
        Some(fut)
    }

    fn outcome(&self, info: NetworkInfo, roaming: bool) -> RegistrationOutcome {
        match info.operator {
            OperatorRef::Numeric(id) => RegistrationOutcome {
                operator_name: self.directory.name_for(&id).unwrap_or_else(|| id.clone()),
                operator_id: Some(id),
                connection: info.connection,
                roaming,
            },
            OperatorRef::Alphanumeric(name) => {
                let name = if self.config.restore_charset == Charset::Ucs2 {
                    decode_ucs2_hex(&name).unwrap_or(name)
                } else {
                    name
                };
                RegistrationOutcome {
                    operator_name: name,
                    operator_id: None,
                    connection: info.connection,
                    roaming,
                }
            }
        }
    }
}

async fn next_reply(in_flight: &mut Option<ReplyFuture<'_>>) -> Reply {
    match in_flight {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_wake(pause: &mut Option<Pin<Box<Sleep>>>) {
    match pause {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
