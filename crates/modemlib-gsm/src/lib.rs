//! 3GPP TS 27.007 modem control for modemlib.
//!
//! This crate sits on top of the AT protocol engine in `modemlib-at-io` and
//! provides:
//!
//! - **Command builders** ([`commands`]) -- `+CREG`, `+COPS`, `+CPOL`,
//!   `+CSCS`, `+CIMI`, `+CSQ` and `+CMGS` commands plus typed parsers for
//!   their responses.
//! - **Model definitions** ([`models`]) -- device descriptors for generic
//!   modems and the vendor families with their own unsolicited reports
//!   (Huawei, Option, Novatel, Sierra).
//! - **Operator lookup** ([`operators`]) -- the known-operators table and
//!   the IMSI provider seam.
//! - **Registration** ([`registration`]) -- the pure registration state
//!   machine, with `+CREG` and network-info entry points.
//! - **Session** ([`session`]) -- [`ModemSession`], which runs registration
//!   and the everyday queries against a live modem.
//! - **Builder** ([`builder`]) -- fluent [`ModemBuilder`] with defaults.
//!
//! # Registration paths
//!
//! - `register()` trusts `+CREG`: status 1 or 5 is success, 3 is failure,
//!   anything else waits for an unsolicited report (polling as a fallback)
//!   until the deadline.
//! - `register_via_network_info()` compares the current operator id with
//!   the SIM's home network (IMSI prefix), searching visible operators and
//!   then the SIM's preferred roaming list when they differ.
//!
//! # Example
//!
//! ```
//! use modemlib_gsm::commands::{cmd_read_reg_status, cmd_register_with};
//!
//! let cmd = cmd_read_reg_status();
//! assert_eq!(cmd.wire(), "AT+CREG?");
//!
//! let cmd = cmd_register_with("21407").unwrap();
//! assert_eq!(cmd.wire(), "AT+COPS=1,2,\"21407\"");
//! ```

pub mod builder;
pub mod commands;
pub mod models;
pub mod operators;
pub mod registration;
pub mod session;

pub use builder::ModemBuilder;
pub use models::ModemModel;
pub use operators::{FixedImsi, ImsiProvider, KnownOperators, OperatorDirectory};
pub use registration::{RegState, RegistrationConfig, RegistrationMachine};
pub use session::ModemSession;
