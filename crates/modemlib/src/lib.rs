//! # modemlib -- AT-command control for mobile broadband modems
//!
//! `modemlib` is an asynchronous Rust library for driving 3G/4G USB sticks
//! and embedded cellular modules over their AT command port: framing
//! command responses out of a noisy serial stream, surfacing unsolicited
//! notifications, and bringing the modem from power-on to network
//! registration.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modemlib::gsm::{ModemBuilder, models::huawei};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let modem = ModemBuilder::new(huawei())
//!         .serial_port("/dev/ttyUSB2")
//!         .build()
//!         .await?;
//!
//!     modem.initialize().await?;
//!     let outcome = modem.register().await?;
//!     println!("{} ({})", outcome.operator_name, outcome.connection);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                             |
//! |-------------------------|-----------------------------------------------------|
//! | `modemlib-core`         | Errors, the `Transport` trait, notifications, types |
//! | `modemlib-transport`    | Serial transport                                    |
//! | `modemlib-at-io`        | Device descriptors, protocol engine, IO task        |
//! | `modemlib-gsm`          | TS 27.007 commands, models, registration, session   |
//! | **`modemlib`**          | This facade crate -- re-exports everything          |
//!
//! ## Notifications
//!
//! Unsolicited output (`+CREG`, `+CMTI`, `RING`, vendor reports such as
//! Huawei's `^RSSI`) is classified by the device descriptor and published
//! on a broadcast channel:
//!
//! ```no_run
//! use modemlib::{Notification, NotificationKind};
//! # async fn example(modem: &modemlib::gsm::ModemSession) {
//! let mut sms = modem.subscribe(NotificationKind::NewSmsArrived);
//! while let Some(Notification::NewSmsArrived { index, folder }) = sms.recv().await {
//!     println!("new message {index} in {folder}");
//! }
//! # }
//! ```

pub use modemlib_core::*;

/// The AT protocol layer: device descriptors, commands and responses, the
/// protocol engine and the IO task that serializes commands.
pub mod at {
    pub use modemlib_at_io::*;
}

/// 3GPP TS 27.007 commands, built-in device models, registration and the
/// [`ModemSession`](gsm::ModemSession) API.
pub mod gsm {
    pub use modemlib_gsm::*;
}

/// Serial transport.
pub mod transport {
    pub use modemlib_transport::*;
}

/// Every built-in device model.
///
/// # Example
///
/// ```
/// for model in modemlib::supported_models() {
///     println!("{:<8} {} @ {} baud", model.name, model.vendor, model.default_baud_rate);
/// }
/// ```
pub fn supported_models() -> Vec<gsm::ModemModel> {
    gsm::models::all_models()
}
