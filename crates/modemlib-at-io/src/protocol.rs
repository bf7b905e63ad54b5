//! Wire-level constants and device error classification for AT commands.
//!
//! Every AT exchange is ASCII: the host writes `AT...` terminated by the
//! device's line ending (`\r` by default) and the device answers with
//! `\r\n`-framed lines ending in a final result code (`OK`, `ERROR`,
//! `+CME ERROR: <err>`, `+CMS ERROR: <err>`). Split commands such as
//! `AT+CMGS` pause on a `> ` prompt until the payload, terminated by
//! Ctrl-Z, has been written.

use modemlib_core::error::{DeviceError, DeviceErrorKind, ErrorFamily};

/// Carriage return.
pub const CR: u8 = b'\r';

/// Line feed.
pub const LF: u8 = b'\n';

/// Ctrl-Z, terminates the second phase of a split command.
pub const CTRL_Z: u8 = 0x1A;

/// Default command terminator.
pub const DEFAULT_LINE_ENDING: &[u8] = b"\r";

/// Default end-of-response pattern: a bare `OK` final result code.
pub const DEFAULT_END_PATTERN: &str = r"\r\n(OK)\r\n";

/// Default device error pattern.
///
/// Named groups: `family` (`CME`/`CMS`) with `detail`, or `bare` for a
/// result code without a family.
pub const DEFAULT_ERROR_PATTERN: &str = r"\r\n(?:\+(?P<family>CM[ES]) ERROR:\s*(?P<detail>[^\r\n]*)|(?P<bare>ERROR|COMMAND NOT SUPPORT))\r\n";

/// Default split-command prompt.
pub const DEFAULT_PROMPT_PATTERN: &str = r"\r\n> ";

/// Built-in new-SMS notification (`+CMTI: "SM",3`).
pub const NEW_SMS_PATTERN: &str = r#"\r\n\+CMTI:\s*"(?P<folder>[^"]*)",\s*(?P<index>\d+)\r\n"#;

/// Built-in debug noise some firmwares print on the control port.
pub const DEBUG_PATTERN: &str = r"\r\n(?:DEBUG|\+DEBUG|\^DEBUG):[^\r\n]*\r\n";

/// Built-in registration status change (`+CREG: <stat>[,<lac>,<ci>[,<AcT>]]`).
///
/// Also accepts the `<n>,<stat>` form some devices use for unsolicited
/// reports. Only complete lines match.
pub const REG_STATUS_PATTERN: &str = r#"\r\n\+CREG:\s*(?:(?P<n>\d),)?(?P<status>\d)(?:,\s*"?(?P<lac>[0-9A-Fa-f]+)"?,\s*"?(?P<ci>[0-9A-Fa-f]+)"?(?:,\s*(?P<act>\d+))?)?\r\n"#;

/// Built-in incoming call (`RING`, `+CRING: VOICE`).
pub const INCOMING_CALL_PATTERN: &str = r"\r\n(?:RING|\+CRING:[^\r\n]*)\r\n";

/// Convert wire bytes to a `String`, replacing invalid UTF-8.
pub fn to_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Trim surrounding CR, LF and spaces from a response body.
pub fn trim_response(bytes: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| matches!(*b, CR | LF | b' ');
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Classify a device error result code.
///
/// `family` is `Some("CME")`/`Some("CMS")` for `+CMx ERROR:` codes and
/// `None` for bare `ERROR`. `detail` is the text after the colon: either a
/// numeric code (`10`) or the verbose form (`SIM not inserted`) depending
/// on the device's `+CMEE` setting.
///
/// # Examples
///
/// ```
/// use modemlib_at_io::protocol::classify_device_error;
/// use modemlib_core::{DeviceErrorKind, ErrorFamily};
///
/// let e = classify_device_error(Some("CME"), "10");
/// assert_eq!(e.family, ErrorFamily::Cme);
/// assert_eq!(e.code, Some(10));
/// assert_eq!(e.kind, DeviceErrorKind::SimNotInserted);
///
/// let e = classify_device_error(Some("CME"), "SIM busy");
/// assert_eq!(e.kind, DeviceErrorKind::SimBusy);
/// ```
pub fn classify_device_error(family: Option<&str>, detail: &str) -> DeviceError {
    let detail = detail.trim();
    let family = match family {
        Some(f) if f.eq_ignore_ascii_case("CME") => ErrorFamily::Cme,
        Some(f) if f.eq_ignore_ascii_case("CMS") => ErrorFamily::Cms,
        _ => ErrorFamily::Generic,
    };

    let code = detail.parse::<u16>().ok();
    let kind = match (family, code) {
        (ErrorFamily::Cme, Some(code)) => cme_kind(code),
        (ErrorFamily::Cms, Some(code)) => cms_kind(code),
        (ErrorFamily::Generic, _) => DeviceErrorKind::Unknown,
        (_, None) => text_kind(detail),
    };

    DeviceError {
        family,
        code,
        kind,
        message: detail.to_string(),
    }
}

/// 3GPP TS 27.007 section 9.2 mobile equipment error codes.
fn cme_kind(code: u16) -> DeviceErrorKind {
    match code {
        0 => DeviceErrorKind::PhoneFailure,
        3 => DeviceErrorKind::OperationNotAllowed,
        4 => DeviceErrorKind::OperationNotSupported,
        10 => DeviceErrorKind::SimNotInserted,
        11 => DeviceErrorKind::SimPinRequired,
        12 => DeviceErrorKind::SimPukRequired,
        13 => DeviceErrorKind::SimFailure,
        14 => DeviceErrorKind::SimBusy,
        15 => DeviceErrorKind::SimWrong,
        16 => DeviceErrorKind::IncorrectPassword,
        17 => DeviceErrorKind::SimPin2Required,
        18 => DeviceErrorKind::SimPuk2Required,
        20 => DeviceErrorKind::MemoryFull,
        21 => DeviceErrorKind::InvalidIndex,
        22 => DeviceErrorKind::NotFound,
        23 => DeviceErrorKind::MemoryFailure,
        30 => DeviceErrorKind::NoNetworkService,
        31 => DeviceErrorKind::NetworkTimeout,
        32 => DeviceErrorKind::NetworkNotAllowed,
        _ => DeviceErrorKind::Unknown,
    }
}

/// 3GPP TS 27.005 message service errors that share a meaning with a CME kind.
fn cms_kind(code: u16) -> DeviceErrorKind {
    match code {
        302 => DeviceErrorKind::OperationNotAllowed,
        303 => DeviceErrorKind::OperationNotSupported,
        310 => DeviceErrorKind::SimNotInserted,
        311 => DeviceErrorKind::SimPinRequired,
        313 => DeviceErrorKind::SimFailure,
        314 => DeviceErrorKind::SimBusy,
        315 => DeviceErrorKind::SimWrong,
        316 => DeviceErrorKind::SimPukRequired,
        317 => DeviceErrorKind::SimPin2Required,
        318 => DeviceErrorKind::SimPuk2Required,
        321 => DeviceErrorKind::InvalidIndex,
        322 => DeviceErrorKind::MemoryFull,
        331 => DeviceErrorKind::NoNetworkService,
        332 => DeviceErrorKind::NetworkTimeout,
        _ => DeviceErrorKind::Unknown,
    }
}

/// Verbose (`AT+CMEE=2`) error texts. Longest phrases are checked first so
/// "SIM PIN2 required" is not mistaken for "SIM PIN required".
fn text_kind(detail: &str) -> DeviceErrorKind {
    const TABLE: &[(&str, DeviceErrorKind)] = &[
        ("sim pin2 required", DeviceErrorKind::SimPin2Required),
        ("sim puk2 required", DeviceErrorKind::SimPuk2Required),
        ("sim pin required", DeviceErrorKind::SimPinRequired),
        ("sim puk required", DeviceErrorKind::SimPukRequired),
        ("sim not inserted", DeviceErrorKind::SimNotInserted),
        ("sim not started", DeviceErrorKind::SimNotStarted),
        ("sim failure", DeviceErrorKind::SimFailure),
        ("sim busy", DeviceErrorKind::SimBusy),
        ("sim wrong", DeviceErrorKind::SimWrong),
        ("incorrect password", DeviceErrorKind::IncorrectPassword),
        ("operation not allowed", DeviceErrorKind::OperationNotAllowed),
        ("operation not supported", DeviceErrorKind::OperationNotSupported),
        ("phone failure", DeviceErrorKind::PhoneFailure),
        ("memory full", DeviceErrorKind::MemoryFull),
        ("invalid index", DeviceErrorKind::InvalidIndex),
        ("not found", DeviceErrorKind::NotFound),
        ("memory failure", DeviceErrorKind::MemoryFailure),
        ("no network service", DeviceErrorKind::NoNetworkService),
        ("network timeout", DeviceErrorKind::NetworkTimeout),
        ("network not allowed", DeviceErrorKind::NetworkNotAllowed),
    ];

    let lower = detail.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map_or(DeviceErrorKind::Unknown, |(_, kind)| *kind)
}
