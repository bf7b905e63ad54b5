//! Network registration state machine.
//!
//! [`RegistrationMachine`] is pure: it consumes [`RegEvent`]s and returns
//! the [`RegEffect`]s the caller must carry out. Command effects are issued
//! one at a time; the next is emitted only after the previous one's
//! [`RegEvent::Reply`] has been handled. Timers (the fallback status poll,
//! the delay between network-info retries, the registration deadline) are
//! also owned by the caller and reported back as events.
//!
//! Two entry points:
//!
//! * [`Entry::Creg`]: query `+CREG`, then wait for unsolicited reports
//!   (with a polling fallback) until the modem registers, is denied, or
//!   the deadline passes.
//! * [`Entry::NetInfo`]: compare the current operator against the SIM's
//!   home network, falling back to a manual operator search and then to
//!   the SIM's preferred roaming list.
//!
//! Both finish by restoring the information-rich charset. A successful run
//! then reads the final network info and resolves with it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use modemlib_core::error::{Error, Result};
use modemlib_core::helpers::imsi_prefix;
use modemlib_core::types::{
    Charset, NetworkInfo, Operator, OperatorRef, OperatorStatus, RegStatus,
};

/// Registration tuning.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Interval of the fallback `+CREG?` poll while waiting to register.
    pub poll_interval: Duration,
    /// Time from the first status query after which waiting gives up.
    pub deadline: Duration,
    /// Consecutive "network temporarily unavailable" replies tolerated
    /// when reading network info.
    pub netinfo_attempts: u32,
    /// Pause between network-info retries.
    pub netinfo_retry_delay: Duration,
    /// Leading IMSI digits identifying the home network (MCC+MNC).
    pub imsi_prefix_len: usize,
    /// Charset used while registering; unambiguous for numeric replies.
    pub working_charset: Charset,
    /// Charset restored when registration ends.
    pub restore_charset: Charset,
    /// The device answers `+COPS?` with an operator name even when asked
    /// for the numeric id. A name is then taken as proof of registration.
    pub alphanumeric_operator: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig {
            poll_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(60),
            netinfo_attempts: 3,
            netinfo_retry_delay: Duration::from_secs(2),
            imsi_prefix_len: 5,
            working_charset: Charset::Ira,
            restore_charset: Charset::Ucs2,
            alphanumeric_operator: false,
        }
    }
}

/// Observable registration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegState {
    NotStarted,
    CheckRegistered,
    WaitToRegister,
    ObtainNetInfo,
    SearchOperators,
    InternationalRoaming,
    RegisterWithOperator(String),
    RegistrationFinished,
    RegistrationFailed,
}

/// How registration starts.
#[derive(Debug, Clone)]
pub enum Entry {
    Creg,
    NetInfo { imsi: String },
}

/// Result of the command effect most recently emitted.
#[derive(Debug)]
pub enum Reply {
    Charset(Result<()>),
    RegStatus(Result<RegStatus>),
    NotificationsArmed(Result<()>),
    NetInfo(Result<NetworkInfo>),
    Operators(Result<Vec<Operator>>),
    RoamingList(Result<Vec<String>>),
    Registered(Result<()>),
}

#[derive(Debug)]
pub enum RegEvent {
    Start(Entry),
    Reply(Reply),
    /// Unsolicited `+CREG` report.
    Notification(RegStatus),
    /// The fallback poll timer fired.
    PollTick,
    /// A [`RegEffect::Sleep`] elapsed.
    SleepDone,
    /// Wake-up at [`RegistrationMachine::deadline`].
    Tick,
}

#[derive(Debug)]
pub enum RegEffect {
    SetCharset(Charset),
    QueryRegStatus,
    EnableRegNotifications,
    StartPoll(Duration),
    CancelPoll,
    QueryNetInfo,
    Sleep(Duration),
    ListOperators,
    ReadRoamingList,
    RegisterWith(String),
    /// Terminal success.
    Finish { info: NetworkInfo, roaming: bool },
    /// Terminal failure.
    Fail(Error),
}

impl RegEffect {
    /// Whether this effect is a modem command answered by a [`Reply`].
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            RegEffect::SetCharset(_)
                | RegEffect::QueryRegStatus
                | RegEffect::EnableRegNotifications
                | RegEffect::QueryNetInfo
                | RegEffect::ListOperators
                | RegEffect::ReadRoamingList
                | RegEffect::RegisterWith(_)
        )
    }
}

#[derive(Debug)]
enum Phase {
    NotStarted,
    CheckRegistered,
    WaitToRegister,
    ObtainNetInfo { failures: u32 },
    SearchOperators,
    InternationalRoaming { visible: Vec<Operator> },
    RegisterWithOperator { id: String, roaming: bool },
    /// `restored` flips once the charset reply is in and the final
    /// network-info query is out.
    Finished { roaming: bool, restored: bool },
    Failed { error: Error },
    Resolved { success: bool },
}

/// The registration state machine.
#[derive(Debug)]
pub struct RegistrationMachine {
    config: RegistrationConfig,
    phase: Phase,
    home_prefix: Option<String>,
    deadline: Option<Instant>,
    polling: bool,
    sleeping: bool,
    notifications_armed: bool,
    awaiting_reply: bool,
    queued: VecDeque<RegEffect>,
}

impl RegistrationMachine {
    pub fn new(config: RegistrationConfig) -> Self {
        RegistrationMachine {
            config,
            phase: Phase::NotStarted,
            home_prefix: None,
            deadline: None,
            polling: false,
            sleeping: false,
            notifications_armed: false,
            awaiting_reply: false,
            queued: VecDeque::new(),
        }
    }

    pub fn state(&self) -> RegState {
        match &self.phase {
            Phase::NotStarted => RegState::NotStarted,
            Phase::CheckRegistered => RegState::CheckRegistered,
            Phase::WaitToRegister => RegState::WaitToRegister,
            Phase::ObtainNetInfo { .. } => RegState::ObtainNetInfo,
            Phase::SearchOperators => RegState::SearchOperators,
            Phase::InternationalRoaming { .. } => RegState::InternationalRoaming,
            Phase::RegisterWithOperator { id, .. } => RegState::RegisterWithOperator(id.clone()),
            Phase::Finished { .. } | Phase::Resolved { success: true } => {
                RegState::RegistrationFinished
            }
            Phase::Failed { .. } | Phase::Resolved { success: false } => {
                RegState::RegistrationFailed
            }
        }
    }

    /// Whether a `Finish` or `Fail` effect has been emitted.
    pub fn is_resolved(&self) -> bool {
        matches!(self.phase, Phase::Resolved { .. })
    }

    /// When the caller should deliver [`RegEvent::Tick`], if ever.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::WaitToRegister => self.deadline,
            _ => None,
        }
    }

    /// Feed one event; returns the effects to perform, in order.
    pub fn handle(&mut self, event: RegEvent, now: Instant) -> Vec<RegEffect> {
        let mut out = Vec::new();
        if self.is_resolved() {
            debug!(?event, "registration already resolved, ignoring event");
            return out;
        }

        match event {
            RegEvent::Start(entry) => self.start(entry, now, &mut out),
            RegEvent::Reply(reply) => {
                self.awaiting_reply = false;
                self.on_reply(reply, &mut out);
            }
            RegEvent::Notification(status) => self.on_notification(status, &mut out),
            RegEvent::PollTick => self.on_poll_tick(),
            RegEvent::SleepDone => {
                if std::mem::take(&mut self.sleeping)
                    && matches!(self.phase, Phase::ObtainNetInfo { .. })
                {
                    self.issue(RegEffect::QueryNetInfo);
                }
            }
            RegEvent::Tick => {}
        }

        self.check_deadline(now, &mut out);
        self.flush(&mut out);
        out
    }

    fn issue(&mut self, effect: RegEffect) {
        self.queued.push_back(effect);
    }

    /// Release the next queued command once nothing is outstanding.
    fn flush(&mut self, out: &mut Vec<RegEffect>) {
        if self.awaiting_reply {
            return;
        }
        if let Some(effect) = self.queued.pop_front() {
            self.awaiting_reply = true;
            out.push(effect);
        }
    }

    fn start(&mut self, entry: Entry, now: Instant, out: &mut Vec<RegEffect>) {
        if !matches!(self.phase, Phase::NotStarted) {
            warn!(state = ?self.state(), "registration already started");
            return;
        }

        match entry {
            Entry::Creg => {
                debug!("registration: checking +CREG");
                self.phase = Phase::CheckRegistered;
                self.deadline = Some(now + self.config.deadline);
                self.issue(RegEffect::SetCharset(self.config.working_charset));
            }
            Entry::NetInfo { imsi } => match imsi_prefix(&imsi, self.config.imsi_prefix_len) {
                Some(prefix) => {
                    debug!(home = %prefix, "registration: checking current network");
                    self.home_prefix = Some(prefix);
                    self.phase = Phase::ObtainNetInfo { failures: 0 };
                    self.issue(RegEffect::SetCharset(self.config.working_charset));
                }
                None => self.fail(
                    Error::InvalidParameter(format!("IMSI too short or not numeric: {imsi:?}")),
                    out,
                ),
            },
        }
    }

    fn on_reply(&mut self, reply: Reply, out: &mut Vec<RegEffect>) {
        match reply {
            Reply::Charset(result) => self.on_charset(result, out),
            Reply::RegStatus(result) => match (&self.phase, result) {
                (Phase::CheckRegistered, Ok(status)) => self.on_status(status, out),
                (Phase::CheckRegistered, Err(e)) => self.fail(e, out),
                (Phase::WaitToRegister, Ok(status)) => self.on_status(status, out),
                (Phase::WaitToRegister, Err(e)) => {
                    warn!(error = %e, "registration poll failed, still waiting");
                }
                (_, result) => debug!(?result, "stale +CREG? reply"),
            },
            Reply::NotificationsArmed(result) => {
                if !matches!(self.phase, Phase::WaitToRegister) {
                    debug!(?result, "stale +CREG=1 reply");
                    return;
                }
                if let Err(e) = result {
                    warn!(error = %e, "could not enable +CREG reports, relying on polling");
                }
                if !self.polling {
                    self.polling = true;
                    out.push(RegEffect::StartPoll(self.config.poll_interval));
                }
            }
            Reply::NetInfo(result) => self.on_net_info(result, out),
            Reply::Operators(result) => self.on_operators(result, out),
            Reply::RoamingList(result) => self.on_roaming_list(result, out),
            Reply::Registered(result) => {
                let Phase::RegisterWithOperator { id, roaming } = &self.phase else {
                    debug!(?result, "stale +COPS=1 reply");
                    return;
                };
                let (id, roaming) = (id.clone(), *roaming);
                match result {
                    Ok(()) => {
                        info!(operator = %id, roaming, "registered with operator");
                        self.finish(roaming, out);
                    }
                    Err(e) => self.fail(e, out),
                }
            }
        }
    }

    fn on_charset(&mut self, result: Result<()>, out: &mut Vec<RegEffect>) {
        if let Err(e) = &result {
            warn!(error = %e, "charset switch failed, continuing");
        }

        match &mut self.phase {
            Phase::CheckRegistered => self.issue(RegEffect::QueryRegStatus),
            Phase::ObtainNetInfo { .. } => self.issue(RegEffect::QueryNetInfo),
            Phase::Finished { restored, .. } if !*restored => {
                *restored = true;
                self.issue(RegEffect::QueryNetInfo);
            }
            Phase::Failed { .. } => {
                let phase = std::mem::replace(&mut self.phase, Phase::Resolved { success: false });
                if let Phase::Failed { error } = phase {
                    info!(error = %error, "registration failed");
                    out.push(RegEffect::Fail(error));
                }
            }
            _ => debug!("stale +CSCS reply"),
        }
    }

    fn on_status(&mut self, status: RegStatus, out: &mut Vec<RegEffect>) {
        let initial = matches!(self.phase, Phase::CheckRegistered);
        debug!(%status, initial, "registration status");

        match status {
            RegStatus::Home => self.finish(false, out),
            RegStatus::Roaming => self.finish(true, out),
            RegStatus::Denied => {
                let reason = if initial {
                    "rejected"
                } else {
                    "network rejected the registration attempt"
                };
                self.fail(Error::RegistrationDenied(reason.into()), out);
            }
            RegStatus::Idle | RegStatus::Searching | RegStatus::Unknown => {
                if initial {
                    self.phase = Phase::WaitToRegister;
                    if self.notifications_armed {
                        self.polling = true;
                        out.push(RegEffect::StartPoll(self.config.poll_interval));
                    } else {
                        self.notifications_armed = true;
                        self.issue(RegEffect::EnableRegNotifications);
                    }
                }
            }
        }
    }

    fn on_notification(&mut self, status: RegStatus, out: &mut Vec<RegEffect>) {
        if matches!(self.phase, Phase::WaitToRegister) {
            self.on_status(status, out);
        } else {
            debug!(%status, state = ?self.state(), "+CREG report outside WaitToRegister");
        }
    }

    fn on_poll_tick(&mut self) {
        if self.polling
            && matches!(self.phase, Phase::WaitToRegister)
            && !self.awaiting_reply
            && self.queued.is_empty()
        {
            self.issue(RegEffect::QueryRegStatus);
        }
    }

    fn check_deadline(&mut self, now: Instant, out: &mut Vec<RegEffect>) {
        let expired = self.deadline().is_some_and(|deadline| now >= deadline);
        if expired {
            warn!("no registration before the deadline");
            self.fail(Error::RegistrationTimeout, out);
        }
    }

    fn on_net_info(&mut self, result: Result<NetworkInfo>, out: &mut Vec<RegEffect>) {
        match &mut self.phase {
            Phase::ObtainNetInfo { failures } => match result {
                Ok(info) => match info.operator {
                    OperatorRef::Alphanumeric(name) if self.config.alphanumeric_operator => {
                        debug!(operator = %name, "device reports operator by name");
                        self.finish(false, out);
                    }
                    OperatorRef::Alphanumeric(name) => {
                        debug!(operator = %name, "operator name instead of id, searching");
                        self.phase = Phase::SearchOperators;
                        self.issue(RegEffect::ListOperators);
                    }
                    OperatorRef::Numeric(id) if self.home_prefix.as_deref() == Some(id.as_str()) => {
                        debug!(operator = %id, "on home network");
                        self.finish(false, out);
                    }
                    OperatorRef::Numeric(id) => {
                        debug!(operator = %id, "not on home network, searching");
                        self.phase = Phase::SearchOperators;
                        self.issue(RegEffect::ListOperators);
                    }
                },
                Err(e) if e.is_network_transient() => {
                    *failures += 1;
                    if *failures >= self.config.netinfo_attempts {
                        self.fail(e, out);
                    } else {
                        debug!(failures = *failures, "network not ready, retrying");
                        self.sleeping = true;
                        out.push(RegEffect::Sleep(self.config.netinfo_retry_delay));
                    }
                }
                Err(e) => self.fail(e, out),
            },
            Phase::Finished {
                roaming,
                restored: true,
            } => {
                let roaming = *roaming;
                self.phase = Phase::Resolved {
                    success: result.is_ok(),
                };
                match result {
                    Ok(info) => {
                        info!(
                            operator = ?info.operator,
                            connection = %info.connection,
                            roaming,
                            "registration finished"
                        );
                        out.push(RegEffect::Finish { info, roaming });
                    }
                    Err(e) => {
                        warn!(error = %e, "registered but final network info failed");
                        out.push(RegEffect::Fail(e));
                    }
                }
            }
            _ => debug!(?result, "stale +COPS? reply"),
        }
    }

    fn on_operators(&mut self, result: Result<Vec<Operator>>, out: &mut Vec<RegEffect>) {
        if !matches!(self.phase, Phase::SearchOperators) {
            debug!(?result, "stale +COPS=? reply");
            return;
        }

        let operators = match result {
            Ok(operators) => operators,
            Err(e) => return self.fail(e, out),
        };

        let home = self.home_prefix.as_deref();
        if let Some(op) = operators.iter().find(|op| Some(op.id.as_str()) == home) {
            debug!(operator = %op.id, "home network visible");
            self.register_with(op.id.clone(), false);
            return;
        }

        let visible: Vec<Operator> = operators
            .into_iter()
            .filter(|op| op.status != OperatorStatus::Forbidden)
            .collect();
        debug!(visible = visible.len(), "home network not visible, trying roaming list");
        self.phase = Phase::InternationalRoaming { visible };
        self.issue(RegEffect::ReadRoamingList);
    }

    fn on_roaming_list(&mut self, result: Result<Vec<String>>, out: &mut Vec<RegEffect>) {
        let Phase::InternationalRoaming { visible } = &self.phase else {
            debug!(?result, "stale +CPOL? reply");
            return;
        };

        let preferred = match result {
            Ok(preferred) => preferred,
            Err(e) => return self.fail(e, out),
        };

        let choice = preferred
            .into_iter()
            .find(|id| visible.iter().any(|op| &op.id == id));
        match choice {
            Some(id) => {
                debug!(operator = %id, "roaming onto preferred operator");
                self.register_with(id, true);
            }
            None => self.fail(Error::NoOperatorMatch, out),
        }
    }

    fn register_with(&mut self, id: String, roaming: bool) {
        self.phase = Phase::RegisterWithOperator {
            id: id.clone(),
            roaming,
        };
        self.issue(RegEffect::RegisterWith(id));
    }

    fn stop_polling(&mut self, out: &mut Vec<RegEffect>) {
        if self.polling {
            self.polling = false;
            out.push(RegEffect::CancelPoll);
        }
    }

    fn finish(&mut self, roaming: bool, out: &mut Vec<RegEffect>) {
        self.stop_polling(out);
        self.queued.clear();
        self.phase = Phase::Finished {
            roaming,
            restored: false,
        };
        self.issue(RegEffect::SetCharset(self.config.restore_charset));
    }

    fn fail(&mut self, error: Error, out: &mut Vec<RegEffect>) {
        self.stop_polling(out);
        self.queued.clear();
        self.phase = Phase::Failed { error };
        self.issue(RegEffect::SetCharset(self.config.restore_charset));
    }
}
