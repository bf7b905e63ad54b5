//! 3GPP TS 27.007 command builders and response parsers.
//!
//! Builders are pure functions returning a [`Command`] ready for
//! [`ModemIo::submit`](modemlib_at_io::ModemIo::submit). Command names are
//! the keys the device descriptors use for their per-command patterns, so
//! a builder and its parser only agree when the descriptor was assembled
//! with [`standard_commands`] (every factory in [`crate::models`] is).
//!
//! Parsers take the [`Response`] a command resolved with and turn its
//! extracted rows into typed values.

use std::time::Duration;

use modemlib_at_io::descriptor::{Builtin, CommandSpec, DescriptorBuilder};
use modemlib_at_io::{Captured, Command, Response};
use modemlib_core::error::{Error, Result};
use modemlib_core::types::{
    Charset, ConnectionClass, NetworkInfo, Operator, OperatorRef, OperatorStatus, RegStatus,
};

// ---------------------------------------------------------------
// Command names
// ---------------------------------------------------------------

/// Disable command echo (`ATE0`).
pub const ECHO_OFF: &str = "E0";
/// Numeric extended error reporting (`AT+CMEE=1`).
pub const ERROR_REPORTING: &str = "CMEE=";
/// Select TE character set (`AT+CSCS="..."`).
pub const SET_CHARSET: &str = "CSCS=";
/// Read TE character set (`AT+CSCS?`).
pub const READ_CHARSET: &str = "CSCS?";
/// Read network registration status (`AT+CREG?`).
pub const READ_REG_STATUS: &str = "CREG?";
/// Enable unsolicited registration reports (`AT+CREG=1`).
pub const ENABLE_REG_NOTIFICATIONS: &str = "CREG=";
/// Read the current operator in numeric format (`AT+COPS=3,2;+COPS?`).
pub const READ_NETWORK_INFO: &str = "COPS?";
/// List visible operators (`AT+COPS=?`).
pub const LIST_OPERATORS: &str = "COPS=?";
/// Manual registration with a numeric operator id (`AT+COPS=1,2,"..."`).
pub const REGISTER_WITH: &str = "COPS=1";
/// Read the SIM preferred-operator list (`AT+CPOL?`).
pub const READ_ROAMING_LIST: &str = "CPOL?";
/// Read the IMSI (`AT+CIMI`).
pub const READ_IMSI: &str = "CIMI";
/// Signal quality (`AT+CSQ`).
pub const SIGNAL_QUALITY: &str = "CSQ";
/// Send an SMS in PDU mode (`AT+CMGS=<len>`, then the PDU after `> `).
pub const SEND_SMS_PDU: &str = "CMGS";

/// Operator scans can take minutes on a cold radio.
pub const LIST_OPERATORS_TIMEOUT: Duration = Duration::from_secs(300);

/// Manual registration waits for the network to accept the attach.
pub const REGISTER_WITH_TIMEOUT: Duration = Duration::from_secs(120);

/// `+CMGS` returns once the network acknowledges the message.
pub const SEND_SMS_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------
// Extract patterns
// ---------------------------------------------------------------

const CHARSET_EXTRACT: &str = r#"\+CSCS:\s*"(?P<charset>[^"]+)""#;

// The read reply always carries `<n>,<stat>`; a bare `+CREG: <stat>` is an
// unsolicited report.
const REG_STATUS_EXTRACT: &str = r"\+CREG:\s*(?P<n>\d),\s*(?P<stat>\d)(?:,|\r\n)";

const NETWORK_INFO_EXTRACT: &str =
    r#"\+COPS:\s*(?P<mode>\d)(?:,\s*(?P<format>\d),\s*"(?P<oper>[^"]*)"(?:,\s*(?P<act>\d+))?)?"#;

const OPERATOR_LIST_EXTRACT: &str =
    r#"\((?P<stat>\d),"(?P<long>[^"]*)","(?P<short>[^"]*)","(?P<netid>\d+)"(?:,(?P<act>\d))?\)"#;

const ROAMING_LIST_EXTRACT: &str =
    r#"\+CPOL:\s*(?P<index>\d+),\s*(?P<format>\d),\s*"(?P<oper>[^"]*)""#;

const SIGNAL_QUALITY_EXTRACT: &str = r"\+CSQ:\s*(?P<rssi>\d+),\s*(?P<ber>\d+)";

const SEND_SMS_END: &str = r"\r\n\+CMGS:\s*\d+\r\n\r\nOK\r\n";
const SEND_SMS_EXTRACT: &str = r"\+CMGS:\s*(?P<mr>\d+)";

/// Register the per-command patterns and timeouts for every command in
/// this module.
pub fn standard_commands(builder: DescriptorBuilder) -> DescriptorBuilder {
    builder
        .command(READ_CHARSET, CommandSpec::new().extract(CHARSET_EXTRACT))
        .command(READ_REG_STATUS, CommandSpec::new().extract(REG_STATUS_EXTRACT))
        .command(
            READ_NETWORK_INFO,
            CommandSpec::new().extract(NETWORK_INFO_EXTRACT),
        )
        .command(
            LIST_OPERATORS,
            CommandSpec::new()
                .extract(OPERATOR_LIST_EXTRACT)
                .timeout(LIST_OPERATORS_TIMEOUT),
        )
        .command(
            REGISTER_WITH,
            CommandSpec::new().timeout(REGISTER_WITH_TIMEOUT),
        )
        .command(
            READ_ROAMING_LIST,
            CommandSpec::new().extract(ROAMING_LIST_EXTRACT),
        )
        .command(
            SIGNAL_QUALITY,
            CommandSpec::new().extract(SIGNAL_QUALITY_EXTRACT),
        )
        .command(
            SEND_SMS_PDU,
            CommandSpec::new()
                .end(SEND_SMS_END)
                .extract(SEND_SMS_EXTRACT)
                .timeout(SEND_SMS_TIMEOUT),
        )
}

// ---------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------

/// Build `ATE0`.
pub fn cmd_echo_off() -> Command {
    Command::new(ECHO_OFF, "ATE0")
}

/// Build `AT+CMEE=1` so failures carry a numeric `+CME ERROR` code.
pub fn cmd_enable_error_codes() -> Command {
    Command::new(ERROR_REPORTING, "AT+CMEE=1")
}

/// Build `AT+CSCS="<charset>"`.
pub fn cmd_set_charset(charset: Charset) -> Command {
    Command::new(SET_CHARSET, &format!("AT+CSCS=\"{}\"", charset.as_at_str()))
}

/// Build `AT+CSCS?`.
pub fn cmd_read_charset() -> Command {
    Command::new(READ_CHARSET, "AT+CSCS?")
}

/// Build `AT+CREG?`.
///
/// The response line looks exactly like an unsolicited `+CREG:` report, so
/// the command claims the registration rule while it is outstanding.
pub fn cmd_read_reg_status() -> Command {
    Command::new(READ_REG_STATUS, "AT+CREG?").soliciting(Builtin::RegStatus)
}

/// Build `AT+CREG=1` (unsolicited `+CREG: <stat>` on every change).
pub fn cmd_enable_reg_notifications() -> Command {
    Command::new(ENABLE_REG_NOTIFICATIONS, "AT+CREG=1")
}

/// Build `AT+COPS=3,2;+COPS?`.
///
/// Selects the numeric operator format first so the reply carries the
/// MCC+MNC id rather than a name in whatever charset is active. Some
/// devices ignore the format and answer with a name anyway.
pub fn cmd_read_network_info() -> Command {
    Command::new(READ_NETWORK_INFO, "AT+COPS=3,2;+COPS?")
}

/// Build `AT+COPS=?`.
pub fn cmd_list_operators() -> Command {
    Command::new(LIST_OPERATORS, "AT+COPS=?").with_timeout(LIST_OPERATORS_TIMEOUT)
}

/// Build `AT+COPS=1,2,"<id>"` (manual selection by numeric id).
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] unless `id` is 5 or 6 digits.
pub fn cmd_register_with(id: &str) -> Result<Command> {
    if !(5..=6).contains(&id.len()) || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidParameter(format!(
            "operator id must be 5 or 6 digits, got {id:?}"
        )));
    }
    Ok(Command::new(REGISTER_WITH, &format!("AT+COPS=1,2,\"{id}\"")))
}

/// Build `AT+CPOL?`.
pub fn cmd_read_roaming_list() -> Command {
    Command::new(READ_ROAMING_LIST, "AT+CPOL?")
}

/// Build `AT+CIMI`.
pub fn cmd_read_imsi() -> Command {
    Command::new(READ_IMSI, "AT+CIMI")
}

/// Build `AT+CSQ`.
pub fn cmd_signal_quality() -> Command {
    Command::new(SIGNAL_QUALITY, "AT+CSQ")
}

/// Build the split `AT+CMGS=<tpdu_len>` command carrying an encoded PDU.
///
/// `tpdu_len` is the TPDU length in octets (excluding the SMSC part) and
/// `pdu_hex` the full hex-encoded PDU; both come from the caller's PDU
/// encoder. The PDU is written only after the device shows its `> `
/// prompt.
pub fn cmd_send_sms_pdu(tpdu_len: usize, pdu_hex: &str) -> Result<Command> {
    if pdu_hex.is_empty() || !pdu_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidParameter(
            "PDU must be a non-empty hex string".into(),
        ));
    }
    Ok(
        Command::new(SEND_SMS_PDU, &format!("AT+CMGS={tpdu_len}"))
            .with_payload(pdu_hex.as_bytes().to_vec())
            .with_timeout(SEND_SMS_TIMEOUT),
    )
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Signal strength as reported by `+CSQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// 0-31 (-113 dBm to -51 dBm in 2 dB steps); `None` when unknown (99).
    pub rssi: Option<u8>,
    /// Bit error rate class 0-7; `None` when unknown (99).
    pub ber: Option<u8>,
}

impl SignalQuality {
    /// Received signal strength in dBm.
    pub fn dbm(&self) -> Option<i16> {
        self.rssi.map(|r| -113 + 2 * i16::from(r))
    }
}

fn first_row<'a>(resp: &'a Response, what: &str) -> Result<&'a Captured> {
    resp.first()
        .ok_or_else(|| Error::ParseMismatch(format!("no {what} in response: {resp:?}")))
}

fn field<'a>(row: &'a Captured, name: &str) -> Result<&'a str> {
    row.get(name)
        .ok_or_else(|| Error::ParseMismatch(format!("missing field {name:?}")))
}

fn number<T: std::str::FromStr>(row: &Captured, name: &str) -> Result<T> {
    let raw = field(row, name)?;
    raw.parse::<T>()
        .map_err(|_| Error::ParseMismatch(format!("invalid {name}: {raw:?}")))
}

/// Parse the reply to [`cmd_read_charset`].
pub fn parse_charset(resp: &Response) -> Result<Charset> {
    let row = first_row(resp, "+CSCS")?;
    let raw = field(row, "charset")?;
    raw.parse::<Charset>()
        .map_err(|e| Error::ParseMismatch(e.to_string()))
}

/// Parse the reply to [`cmd_read_reg_status`].
pub fn parse_reg_status(resp: &Response) -> Result<RegStatus> {
    let row = first_row(resp, "+CREG")?;
    let code: u8 = number(row, "stat")?;
    RegStatus::from_code(code)
        .ok_or_else(|| Error::ParseMismatch(format!("unknown registration status {code}")))
}

/// Parse the reply to [`cmd_read_network_info`].
///
/// `+COPS: 0` without an operator means the radio is not attached yet,
/// which is reported as [`Error::NetworkTemporarilyUnavailable`]. An
/// all-digit operator is a numeric id; anything else is a name.
pub fn parse_network_info(resp: &Response) -> Result<NetworkInfo> {
    let row = first_row(resp, "+COPS")?;
    let Some(oper) = row.get("oper").filter(|o| !o.is_empty()) else {
        return Err(Error::NetworkTemporarilyUnavailable);
    };

    let operator = if oper.bytes().all(|b| b.is_ascii_digit()) {
        OperatorRef::Numeric(oper.to_string())
    } else {
        OperatorRef::Alphanumeric(oper.to_string())
    };
    let connection = row
        .get("act")
        .and_then(|a| a.parse::<u8>().ok())
        .map(ConnectionClass::from_act)
        .unwrap_or(ConnectionClass::Unknown);

    Ok(NetworkInfo {
        operator,
        connection,
    })
}

/// Parse the reply to [`cmd_list_operators`], in the order reported.
///
/// An empty scan yields an empty list, not an error.
pub fn parse_operator_list(resp: &Response) -> Result<Vec<Operator>> {
    resp.rows()
        .iter()
        .map(|row| {
            let connection = row
                .get("act")
                .and_then(|a| a.parse::<u8>().ok())
                .map(ConnectionClass::from_act)
                .unwrap_or(ConnectionClass::Unknown);
            Ok(Operator {
                status: OperatorStatus::from_code(number(row, "stat")?),
                long_name: field(row, "long")?.to_string(),
                short_name: field(row, "short")?.to_string(),
                id: field(row, "netid")?.to_string(),
                connection,
            })
        })
        .collect()
}

/// Parse the reply to [`cmd_read_roaming_list`] into numeric operator ids
/// in SIM preference order (ascending index).
///
/// Entries stored in a non-numeric format are skipped.
pub fn parse_roaming_list(resp: &Response) -> Result<Vec<String>> {
    let mut entries = Vec::with_capacity(resp.rows().len());
    for row in resp.rows() {
        let index: u32 = number(row, "index")?;
        let format: u8 = number(row, "format")?;
        if format != 2 {
            continue;
        }
        entries.push((index, field(row, "oper")?.to_string()));
    }
    entries.sort_by_key(|(index, _)| *index);
    Ok(entries.into_iter().map(|(_, id)| id).collect())
}

/// Parse the reply to [`cmd_read_imsi`].
///
/// Accepts a bare IMSI or one prefixed with `+CIMI:`.
pub fn parse_imsi(resp: &Response) -> Result<String> {
    let text = resp
        .text()
        .ok_or_else(|| Error::ParseMismatch("expected a text reply to AT+CIMI".into()))?;
    let imsi = text.trim().trim_start_matches("+CIMI:").trim();
    if !(6..=15).contains(&imsi.len()) || !imsi.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::ParseMismatch(format!("invalid IMSI: {imsi:?}")));
    }
    Ok(imsi.to_string())
}

/// Parse the reply to [`cmd_signal_quality`].
pub fn parse_signal_quality(resp: &Response) -> Result<SignalQuality> {
    let row = first_row(resp, "+CSQ")?;
    let rssi: u8 = number(row, "rssi")?;
    let ber: u8 = number(row, "ber")?;
    Ok(SignalQuality {
        rssi: (rssi <= 31).then_some(rssi),
        ber: (ber <= 7).then_some(ber),
    })
}

/// Parse the message reference from the reply to [`cmd_send_sms_pdu`].
pub fn parse_message_reference(resp: &Response) -> Result<u8> {
    let row = first_row(resp, "+CMGS")?;
    number(row, "mr")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use modemlib_at_io::{DeviceDescriptor, Engine};
    use modemlib_core::events::Notification;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    use super::*;

    fn descriptor() -> Arc<DeviceDescriptor> {
        Arc::new(
            standard_commands(DeviceDescriptor::builder("test"))
                .build()
                .unwrap(),
        )
    }

    /// Run `cmd` through an engine fed with `reply` and return the result.
    fn run(cmd: Command, reply: &[u8]) -> Result<Response> {
        let mut engine = Engine::new(descriptor());
        let (tx, mut rx) = oneshot::channel();
        engine.dispatch(cmd, tx, Instant::now());
        engine.feed(reply);
        rx.try_recv().unwrap()
    }

    // ---------------------------------------------------------------
    // Builders
    // ---------------------------------------------------------------

    #[test]
    fn builder_wire_text() {
        assert_eq!(cmd_set_charset(Charset::Ira).wire(), "AT+CSCS=\"IRA\"");
        assert_eq!(cmd_set_charset(Charset::Ucs2).wire(), "AT+CSCS=\"UCS2\"");
        assert_eq!(cmd_read_reg_status().wire(), "AT+CREG?");
        assert_eq!(cmd_enable_reg_notifications().wire(), "AT+CREG=1");
        assert_eq!(cmd_read_network_info().wire(), "AT+COPS=3,2;+COPS?");
        assert_eq!(cmd_read_roaming_list().wire(), "AT+CPOL?");
        assert_eq!(cmd_read_imsi().wire(), "AT+CIMI");
    }

    #[test]
    fn reg_status_query_claims_creg_lines() {
        assert_eq!(cmd_read_reg_status().solicits(), Some(Builtin::RegStatus));
        assert_eq!(cmd_enable_reg_notifications().solicits(), None);
    }

    #[test]
    fn list_operators_has_long_timeout() {
        assert_eq!(cmd_list_operators().timeout(), Some(LIST_OPERATORS_TIMEOUT));
        assert_eq!(descriptor().timeout_for(LIST_OPERATORS), LIST_OPERATORS_TIMEOUT);
    }

    #[test]
    fn register_with_validates_id() {
        assert_eq!(
            cmd_register_with("21407").unwrap().wire(),
            "AT+COPS=1,2,\"21407\""
        );
        assert_eq!(
            cmd_register_with("310260").unwrap().wire(),
            "AT+COPS=1,2,\"310260\""
        );
        assert!(cmd_register_with("2140").is_err());
        assert!(cmd_register_with("21A07").is_err());
    }

    #[test]
    fn send_sms_pdu_is_split() {
        let cmd = cmd_send_sms_pdu(18, "0011000B916407281553F80000AA0AE8329BFD4697D9EC37").unwrap();
        assert_eq!(cmd.wire(), "AT+CMGS=18");
        assert!(cmd.payload().unwrap().starts_with(b"0011000B"));
        assert!(cmd_send_sms_pdu(18, "").is_err());
        assert!(cmd_send_sms_pdu(18, "not hex").is_err());
    }

    // ---------------------------------------------------------------
    // Parsers
    // ---------------------------------------------------------------

    #[test]
    fn reg_status_variants() {
        let cases: &[(&[u8], RegStatus)] = &[
            (b"\r\n+CREG: 0,1\r\n\r\nOK\r\n", RegStatus::Home),
            (b"\r\n+CREG: 0,2\r\n\r\nOK\r\n", RegStatus::Searching),
            (
                b"\r\n+CREG: 2,5,\"00C3\",\"1A2B\"\r\n\r\nOK\r\n",
                RegStatus::Roaming,
            ),
            (b"\r\n+CREG: 1,4\r\n\r\nOK\r\n", RegStatus::Unknown),
        ];
        for (reply, expected) in cases {
            let resp = run(cmd_read_reg_status(), reply).unwrap();
            assert_eq!(parse_reg_status(&resp).unwrap(), *expected);
        }
    }

    #[test]
    fn stale_reg_report_is_published_not_parsed() {
        let mut engine = Engine::new(descriptor());
        let (tx, mut rx) = oneshot::channel();
        engine.dispatch(cmd_read_reg_status(), tx, Instant::now());
        let out = engine.feed(b"\r\n+CREG: 2\r\n\r\n+CREG: 1,1\r\n\r\nOK\r\n");
        assert_eq!(
            out.notifications,
            vec![Notification::NetworkRegStatus {
                status: RegStatus::Searching,
                operator_code: None,
                operator_name: None,
            }]
        );
        let resp = rx.try_recv().unwrap().unwrap();
        assert_eq!(parse_reg_status(&resp).unwrap(), RegStatus::Home);
    }

    #[test]
    fn reg_status_missing_line() {
        let resp = run(cmd_read_reg_status(), b"\r\nOK\r\n").unwrap();
        assert!(matches!(
            parse_reg_status(&resp),
            Err(Error::ParseMismatch(_))
        ));
    }

    #[test]
    fn network_info_numeric() {
        let resp = run(
            cmd_read_network_info(),
            b"\r\n+COPS: 0,2,\"21401\",2\r\n\r\nOK\r\n",
        )
        .unwrap();
        let info = parse_network_info(&resp).unwrap();
        assert_eq!(info.operator, OperatorRef::Numeric("21401".into()));
        assert_eq!(info.connection, ConnectionClass::Umts);
    }

    #[test]
    fn network_info_alphanumeric_quirk() {
        let resp = run(
            cmd_read_network_info(),
            b"\r\n+COPS: 0,0,\"vodafone ES\"\r\n\r\nOK\r\n",
        )
        .unwrap();
        let info = parse_network_info(&resp).unwrap();
        assert_eq!(info.operator, OperatorRef::Alphanumeric("vodafone ES".into()));
        assert_eq!(info.connection, ConnectionClass::Unknown);
    }

    #[test]
    fn network_info_not_attached() {
        let resp = run(cmd_read_network_info(), b"\r\n+COPS: 0\r\n\r\nOK\r\n").unwrap();
        assert!(matches!(
            parse_network_info(&resp),
            Err(Error::NetworkTemporarilyUnavailable)
        ));
    }

    #[test]
    fn operator_list_rows() {
        let reply = b"\r\n+COPS: (2,\"movistar\",\"movistar\",\"21407\",2),\
(1,\"vodafone ES\",\"vodafone\",\"21401\",0),(3,\"Orange\",\"Orange\",\"21403\"),,(0-4),(0-2)\r\n\r\nOK\r\n";
        let resp = run(cmd_list_operators(), reply).unwrap();
        let ops = parse_operator_list(&resp).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].id, "21407");
        assert_eq!(ops[0].status, OperatorStatus::Current);
        assert_eq!(ops[0].connection, ConnectionClass::Umts);
        assert_eq!(ops[1].short_name, "vodafone");
        assert_eq!(ops[1].connection, ConnectionClass::Gprs);
        assert_eq!(ops[2].status, OperatorStatus::Forbidden);
        assert_eq!(ops[2].connection, ConnectionClass::Unknown);
    }

    #[test]
    fn operator_list_empty_scan() {
        let resp = run(cmd_list_operators(), b"\r\n+COPS: ,,(0-4),(0-2)\r\n\r\nOK\r\n").unwrap();
        assert!(parse_operator_list(&resp).unwrap().is_empty());
    }

    #[test]
    fn roaming_list_in_index_order() {
        let reply = b"\r\n+CPOL: 3,2,\"26202\"\r\n+CPOL: 1,2,\"20810\"\r\n\
+CPOL: 2,0,\"Orange F\"\r\n\r\nOK\r\n";
        let resp = run(cmd_read_roaming_list(), reply).unwrap();
        assert_eq!(parse_roaming_list(&resp).unwrap(), vec!["20810", "26202"]);
    }

    #[test]
    fn imsi_bare_and_prefixed() {
        let resp = run(cmd_read_imsi(), b"\r\n214011234567890\r\n\r\nOK\r\n").unwrap();
        assert_eq!(parse_imsi(&resp).unwrap(), "214011234567890");

        let resp = run(cmd_read_imsi(), b"\r\n+CIMI: 310260000000001\r\n\r\nOK\r\n").unwrap();
        assert_eq!(parse_imsi(&resp).unwrap(), "310260000000001");

        let resp = run(cmd_read_imsi(), b"\r\nSIM busy?\r\n\r\nOK\r\n").unwrap();
        assert!(parse_imsi(&resp).is_err());
    }

    #[test]
    fn signal_quality_and_unknown() {
        let resp = run(cmd_signal_quality(), b"\r\n+CSQ: 17,99\r\n\r\nOK\r\n").unwrap();
        let q = parse_signal_quality(&resp).unwrap();
        assert_eq!(q.rssi, Some(17));
        assert_eq!(q.ber, None);
        assert_eq!(q.dbm(), Some(-79));

        let resp = run(cmd_signal_quality(), b"\r\n+CSQ: 99,99\r\n\r\nOK\r\n").unwrap();
        assert_eq!(parse_signal_quality(&resp).unwrap().dbm(), None);
    }

    #[test]
    fn charset_reply() {
        let resp = run(cmd_read_charset(), b"\r\n+CSCS: \"UCS2\"\r\n\r\nOK\r\n").unwrap();
        assert_eq!(parse_charset(&resp).unwrap(), Charset::Ucs2);
    }

    #[test]
    fn sms_message_reference() {
        let mut engine = Engine::new(descriptor());
        let (tx, mut rx) = oneshot::channel();
        engine.dispatch(cmd_send_sms_pdu(5, "0011AA").unwrap(), tx, Instant::now());
        let out = engine.feed(b"\r\n> ");
        assert_eq!(out.writes, vec![b"0011AA\x1a".to_vec()]);
        engine.feed(b"\r\n+CMGS: 42\r\n\r\nOK\r\n");
        let resp = rx.try_recv().unwrap().unwrap();
        assert_eq!(parse_message_reference(&resp).unwrap(), 42);
    }
}
