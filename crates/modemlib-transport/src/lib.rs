//! Transport implementations for modemlib.
//!
//! This crate provides [`SerialTransport`], the concrete
//! [`Transport`](modemlib_core::Transport) for a modem's AT control port:
//! USB CDC-ACM / option-driver ttys (`/dev/ttyUSB2`, `/dev/ttyACM0`) and
//! physical RS-232 lines.
//!
//! # Example
//!
//! ```no_run
//! use modemlib_transport::SerialTransport;
//! use modemlib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> modemlib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB2", 115_200).await?;
//!
//! transport.send(b"AT\r").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
