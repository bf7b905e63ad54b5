//! modemlib-test-harness: Test utilities and mock transports for modemlib.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! AT protocol engine, the IO task, and the registration session without a
//! real modem attached.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
