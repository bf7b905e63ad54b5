//! modemlib-core: Core types, traits, and error definitions for modemlib.
//!
//! This crate defines the device-agnostic abstractions shared by the
//! protocol engine, the 3GPP command set, and the registration workflow.
//! Applications that only consume notifications or errors can depend on
//! these types without pulling in the IO machinery.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Notification`] -- unsolicited notifications pushed by the modem
//! - [`RegStatus`], [`NetworkInfo`], [`Operator`] -- registration data model
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use modemlib_core::*`.
pub use error::{DeviceError, DeviceErrorKind, Error, ErrorFamily, Result};
pub use events::{Notification, NotificationKind, SignalValue};
pub use helpers::{decode_ucs2_hex, imsi_prefix, looks_like_ucs2_hex};
pub use transport::Transport;
pub use types::*;
