//! Unsolicited notification types.
//!
//! Notifications are produced by the notification demultiplexer in
//! `modemlib-at-io` and published through a [`tokio::sync::broadcast`]
//! channel in stream-arrival order. Duplicates are delivered as received.

use std::fmt;

use crate::types::RegStatus;

/// A notification pushed by the modem without being asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A new SMS was stored (`+CMTI: "SM",3`).
    NewSmsArrived {
        /// Storage index of the message.
        index: u32,
        /// Storage folder / memory the message landed in (e.g. `"SM"`, `"ME"`).
        folder: String,
    },

    /// Network registration status changed (`+CREG: <stat>[,<lac>,<ci>]`).
    NetworkRegStatus {
        /// New registration status.
        status: RegStatus,
        /// Location area code, when reported.
        operator_code: Option<String>,
        /// Cell identifier, when reported.
        operator_name: Option<String>,
    },

    /// The modem signalled an incoming call (`RING`, `+CRING`).
    IncomingCall,

    /// A vendor-specific unsolicited signal mapped through the device
    /// descriptor's signal table.
    VendorSignal {
        /// Logical signal name from the descriptor table.
        name: String,
        /// Transformed value (raw text if the transform failed).
        value: SignalValue,
    },
}

impl Notification {
    /// The kind of this notification, used for filtered subscriptions.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::NewSmsArrived { .. } => NotificationKind::NewSmsArrived,
            Notification::NetworkRegStatus { .. } => NotificationKind::NetworkRegStatus,
            Notification::IncomingCall => NotificationKind::IncomingCall,
            Notification::VendorSignal { .. } => NotificationKind::VendorSignal,
        }
    }
}

/// Discriminant of [`Notification`] without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    NewSmsArrived,
    NetworkRegStatus,
    IncomingCall,
    VendorSignal,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::NewSmsArrived => "NewSMSArrived",
            NotificationKind::NetworkRegStatus => "NetworkRegStatus",
            NotificationKind::IncomingCall => "IncomingCall",
            NotificationKind::VendorSignal => "VendorSignal",
        };
        f.write_str(s)
    }
}

/// Value carried by a [`Notification::VendorSignal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalValue {
    /// Untransformed text.
    Text(String),
    /// A single integer (signal strength, mode code, ...).
    Number(i64),
    /// A comma-separated list of integers.
    List(Vec<i64>),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Text(s) => f.write_str(s),
            SignalValue::Number(n) => write!(f, "{n}"),
            SignalValue::List(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}
