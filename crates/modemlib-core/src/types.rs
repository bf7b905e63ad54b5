//! Core types used throughout modemlib.
//!
//! These types model the 3GPP TS 27.007 registration data (status codes,
//! character sets, operator listings, access technologies) independently
//! of any particular device's wire quirks.

use std::fmt;
use std::str::FromStr;

/// Network registration status as reported by `+CREG`.
///
/// The code set is fixed: 1 and 5 are always terminal success, 3 is always
/// terminal failure, and 0/2/4 mean "keep waiting".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegStatus {
    /// 0: not registered, not searching.
    Idle,
    /// 1: registered on the home network.
    Home,
    /// 2: not registered, searching.
    Searching,
    /// 3: registration denied.
    Denied,
    /// 4: unknown. Some devices report this while still searching.
    Unknown,
    /// 5: registered, roaming.
    Roaming,
}

impl RegStatus {
    /// Map a `<stat>` code to a status. Codes outside 0-5 are rejected.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RegStatus::Idle),
            1 => Some(RegStatus::Home),
            2 => Some(RegStatus::Searching),
            3 => Some(RegStatus::Denied),
            4 => Some(RegStatus::Unknown),
            5 => Some(RegStatus::Roaming),
            _ => None,
        }
    }

    /// The `<stat>` code for this status.
    pub fn code(&self) -> u8 {
        match self {
            RegStatus::Idle => 0,
            RegStatus::Home => 1,
            RegStatus::Searching => 2,
            RegStatus::Denied => 3,
            RegStatus::Unknown => 4,
            RegStatus::Roaming => 5,
        }
    }

    /// `true` for home (1) and roaming (5).
    pub fn is_registered(&self) -> bool {
        matches!(self, RegStatus::Home | RegStatus::Roaming)
    }
}

impl fmt::Display for RegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegStatus::Idle => "idle",
            RegStatus::Home => "home",
            RegStatus::Searching => "searching",
            RegStatus::Denied => "denied",
            RegStatus::Unknown => "unknown",
            RegStatus::Roaming => "roaming",
        };
        write!(f, "{s}")
    }
}

/// Character set selected with `AT+CSCS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    /// International Reference Alphabet (plain ASCII).
    Ira,
    /// GSM default alphabet.
    Gsm,
    /// 16-bit UCS-2, hex encoded on the wire.
    Ucs2,
    /// Hex-encoded octets.
    Hex,
}

impl Charset {
    /// The name used on the wire (`AT+CSCS="UCS2"`).
    pub fn as_at_str(&self) -> &'static str {
        match self {
            Charset::Ira => "IRA",
            Charset::Gsm => "GSM",
            Charset::Ucs2 => "UCS2",
            Charset::Hex => "HEX",
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_at_str())
    }
}

/// Error returned when a string cannot be parsed into a [`Charset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCharsetError(String);

impl fmt::Display for ParseCharsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown charset: {}", self.0)
    }
}

impl std::error::Error for ParseCharsetError {}

impl FromStr for Charset {
    type Err = ParseCharsetError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_matches('"').to_uppercase().as_str() {
            "IRA" => Ok(Charset::Ira),
            "GSM" => Ok(Charset::Gsm),
            "UCS2" => Ok(Charset::Ucs2),
            "HEX" => Ok(Charset::Hex),
            _ => Err(ParseCharsetError(s.to_string())),
        }
    }
}

/// Radio access technology class of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionClass {
    Gprs,
    Edge,
    Umts,
    Hsdpa,
    Hsupa,
    Hspa,
    Lte,
    Unknown,
}

impl ConnectionClass {
    /// Map a 27.007 `<AcT>` code to a connection class.
    pub fn from_act(act: u8) -> Self {
        match act {
            0 | 1 => ConnectionClass::Gprs,
            2 => ConnectionClass::Umts,
            3 => ConnectionClass::Edge,
            4 => ConnectionClass::Hsdpa,
            5 => ConnectionClass::Hsupa,
            6 => ConnectionClass::Hspa,
            7 => ConnectionClass::Lte,
            _ => ConnectionClass::Unknown,
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionClass::Gprs => "GPRS",
            ConnectionClass::Edge => "EDGE",
            ConnectionClass::Umts => "UMTS",
            ConnectionClass::Hsdpa => "HSDPA",
            ConnectionClass::Hsupa => "HSUPA",
            ConnectionClass::Hspa => "HSPA",
            ConnectionClass::Lte => "LTE",
            ConnectionClass::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// How the current operator was reported by `+COPS?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorRef {
    /// Numeric MCC+MNC (e.g. `"21401"`).
    Numeric(String),
    /// Alphanumeric name. Some devices answer with a name even when the
    /// numeric format was requested.
    Alphanumeric(String),
}

/// Current network information (`+COPS?`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub operator: OperatorRef,
    pub connection: ConnectionClass,
}

/// Availability of an operator in a `+COPS=?` scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorStatus {
    Unknown,
    Available,
    Current,
    Forbidden,
}

impl OperatorStatus {
    /// Map a `<stat>` code from `+COPS=?`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => OperatorStatus::Available,
            2 => OperatorStatus::Current,
            3 => OperatorStatus::Forbidden,
            _ => OperatorStatus::Unknown,
        }
    }
}

/// One visible operator from a `+COPS=?` scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub status: OperatorStatus,
    pub long_name: String,
    pub short_name: String,
    /// Numeric MCC+MNC.
    pub id: String,
    pub connection: ConnectionClass,
}

/// Result of a successful registration workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    /// Human-readable operator name.
    pub operator_name: String,
    /// Numeric MCC+MNC, when the device reported one.
    pub operator_id: Option<String>,
    /// Access technology class of the connection.
    pub connection: ConnectionClass,
    /// `true` when registered on a network other than the SIM's home network.
    pub roaming: bool,
}
