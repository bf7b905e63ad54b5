//! Operator name lookup and IMSI sources.
//!
//! Registration works in numeric MCC+MNC ids; these seams turn ids into
//! display names and supply the SIM's IMSI.

use async_trait::async_trait;

use modemlib_at_io::ModemIo;
use modemlib_core::error::{Error, Result};

use crate::commands;

/// Maps numeric operator ids to display names.
pub trait OperatorDirectory: Send + Sync {
    /// Name for `id` (e.g. `"21401"`), if known.
    fn name_for(&self, id: &str) -> Option<String>;
}

/// A small built-in table of well-known networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownOperators;

/// (MCC+MNC, display name)
const KNOWN_OPERATORS: &[(&str, &str)] = &[
    ("20201", "Cosmote"),
    ("20205", "Vodafone GR"),
    ("20404", "Vodafone NL"),
    ("20408", "KPN"),
    ("20416", "Odido"),
    ("20601", "Proximus"),
    ("20610", "Orange Belgium"),
    ("20801", "Orange F"),
    ("20810", "SFR"),
    ("20820", "Bouygues Telecom"),
    ("21401", "Vodafone ES"),
    ("21403", "Orange ES"),
    ("21404", "Yoigo"),
    ("21407", "Movistar"),
    ("22201", "TIM"),
    ("22210", "Vodafone IT"),
    ("22288", "WindTre"),
    ("22801", "Swisscom"),
    ("23201", "A1 Telekom Austria"),
    ("23410", "O2 UK"),
    ("23415", "Vodafone UK"),
    ("23430", "EE"),
    ("23420", "Three UK"),
    ("24008", "Telenor SE"),
    ("24201", "Telenor NO"),
    ("24405", "Elisa"),
    ("26201", "Telekom.de"),
    ("26202", "Vodafone.de"),
    ("26203", "O2 - de"),
    ("26801", "Vodafone PT"),
    ("26806", "MEO"),
    ("27201", "Vodafone IE"),
    ("310260", "T-Mobile US"),
    ("310410", "AT&T"),
    ("311480", "Verizon"),
    ("50501", "Telstra"),
    ("53001", "One NZ"),
];

impl OperatorDirectory for KnownOperators {
    fn name_for(&self, id: &str) -> Option<String> {
        KNOWN_OPERATORS
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, name)| (*name).to_string())
    }
}

/// Supplies the SIM's IMSI to the network-info registration path.
#[async_trait]
pub trait ImsiProvider: Send + Sync {
    async fn imsi(&self) -> Result<String>;
}

/// Reads the IMSI from the modem with `AT+CIMI`.
#[async_trait]
impl ImsiProvider for ModemIo {
    async fn imsi(&self) -> Result<String> {
        let resp = self.submit(commands::cmd_read_imsi()).await?;
        commands::parse_imsi(&resp)
    }
}

/// An IMSI known up front (configuration, or read elsewhere).
#[derive(Debug, Clone)]
pub struct FixedImsi(String);

impl FixedImsi {
    pub fn new(imsi: &str) -> Result<Self> {
        let imsi = imsi.trim();
        if imsi.len() < 6 || !imsi.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidParameter(format!("invalid IMSI: {imsi:?}")));
        }
        Ok(FixedImsi(imsi.to_string()))
    }
}

#[async_trait]
impl ImsiProvider for FixedImsi {
    async fn imsi(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
