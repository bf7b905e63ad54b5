//! ModemBuilder -- fluent builder for [`ModemSession`] instances.
//!
//! Separates configuration from construction so that callers can pick a
//! device model, serial parameters, registration timing and IO tuning
//! before the transport is opened.
//!
//! # Example
//!
//! ```no_run
//! use modemlib_gsm::builder::ModemBuilder;
//! use modemlib_gsm::models::huawei;
//! use std::time::Duration;
//!
//! # async fn example() -> modemlib_core::Result<()> {
//! let modem = ModemBuilder::new(huawei())
//!     .serial_port("/dev/ttyUSB2")
//!     .registration_deadline(Duration::from_secs(90))
//!     .build()
//!     .await?;
//! let outcome = modem.register().await?;
//! println!("registered on {}", outcome.operator_name);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use modemlib_at_io::{IoConfig, spawn_io_task};
use modemlib_core::error::{Error, Result};
use modemlib_core::transport::Transport;
use modemlib_core::types::Charset;
use modemlib_transport::{SerialConfig, SerialTransport};

use crate::models::ModemModel;
use crate::operators::{ImsiProvider, OperatorDirectory};
use crate::registration::RegistrationConfig;
use crate::session::ModemSession;

/// Fluent builder for [`ModemSession`].
///
/// Every setting has a default, so the simplest usage is:
///
/// ```ignore
/// let modem = ModemBuilder::new(generic())
///     .serial_port("/dev/ttyUSB0")
///     .build()
///     .await?;
/// ```
pub struct ModemBuilder {
    model: ModemModel,
    serial_port: Option<String>,
    baud_rate: Option<u32>,
    io_config: IoConfig,
    registration: RegistrationConfig,
    directory: Option<Arc<dyn OperatorDirectory>>,
    imsi_provider: Option<Arc<dyn ImsiProvider>>,
}

impl ModemBuilder {
    /// Create a new builder for the given modem model.
    pub fn new(model: ModemModel) -> Self {
        ModemBuilder {
            model,
            serial_port: None,
            baud_rate: None,
            io_config: IoConfig::default(),
            registration: RegistrationConfig::default(),
            directory: None,
            imsi_provider: None,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the model's default baud rate.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = Some(baud);
        self
    }

    /// Replace the IO task tuning.
    pub fn io_config(mut self, config: IoConfig) -> Self {
        self.io_config = config;
        self
    }

    /// Replace all registration settings at once.
    pub fn registration_config(mut self, config: RegistrationConfig) -> Self {
        self.registration = config;
        self
    }

    /// Interval of the fallback `+CREG?` poll (default: 5s).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.registration.poll_interval = interval;
        self
    }

    /// How long to wait for the network before giving up (default: 60s).
    pub fn registration_deadline(mut self, deadline: Duration) -> Self {
        self.registration.deadline = deadline;
        self
    }

    /// Charset restored once registration ends (default: UCS2).
    pub fn restore_charset(mut self, charset: Charset) -> Self {
        self.registration.restore_charset = charset;
        self
    }

    /// Resolve operator names through `directory` instead of the built-in
    /// table.
    pub fn operator_directory(mut self, directory: Arc<dyn OperatorDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Take the IMSI from `provider` instead of asking the modem.
    pub fn imsi_provider(mut self, provider: Arc<dyn ImsiProvider>) -> Self {
        self.imsi_provider = Some(provider);
        self
    }

    /// Build a [`ModemSession`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `modemlib-test-harness`) and for callers that manage the transport
    /// themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<ModemSession> {
        if self.registration.netinfo_attempts == 0 {
            return Err(Error::InvalidParameter(
                "netinfo_attempts must be at least 1".into(),
            ));
        }
        if self.registration.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll_interval must be non-zero".into(),
            ));
        }

        let descriptor = Arc::new(self.model.descriptor()?);
        let mut registration = self.registration;
        registration.alphanumeric_operator = descriptor.reports_alphanumeric_operator();
        let io = spawn_io_task(transport, descriptor, self.io_config);

        let mut session = ModemSession::new(io, registration);
        if let Some(directory) = self.directory {
            session = session.with_directory(directory);
        }
        if let Some(provider) = self.imsi_provider {
            session = session.with_imsi_provider(provider);
        }
        Ok(session)
    }

    /// Build a [`ModemSession`] over a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    /// The baud rate defaults to the model's default if not overridden.
    pub async fn build(self) -> Result<ModemSession> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;
        let baud = self.baud_rate.unwrap_or(self.model.default_baud_rate);

        let config = SerialConfig {
            baud_rate: baud,
            ..SerialConfig::default()
        };
        let transport = SerialTransport::open_with_config(port, config).await?;
        info!(port = %port, baud, model = self.model.name, "modem port open");
        self.build_with_transport(Box::new(transport)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{generic, huawei, novatel};
    use crate::operators::FixedImsi;
    use modemlib_test_harness::MockTransport;

    #[tokio::test]
    async fn builder_defaults() {
        let mock = MockTransport::new();
        let modem = ModemBuilder::new(generic())
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        assert_eq!(modem.io().descriptor().name(), "generic");
        assert_eq!(
            modem.registration_config().poll_interval,
            Duration::from_secs(5)
        );
        assert_eq!(modem.registration_config().deadline, Duration::from_secs(60));
        assert_eq!(modem.registration_config().restore_charset, Charset::Ucs2);
    }

    #[tokio::test]
    async fn builder_custom_settings() {
        let mock = MockTransport::new();
        let modem = ModemBuilder::new(huawei())
            .serial_port("/dev/ttyUSB2")
            .baud_rate(460_800)
            .poll_interval(Duration::from_secs(2))
            .registration_deadline(Duration::from_secs(120))
            .restore_charset(Charset::Gsm)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        assert_eq!(modem.io().descriptor().name(), "huawei");
        assert_eq!(
            modem.registration_config().poll_interval,
            Duration::from_secs(2)
        );
        assert_eq!(modem.registration_config().restore_charset, Charset::Gsm);
    }

    #[tokio::test]
    async fn builder_takes_operator_name_quirk_from_descriptor() {
        let modem = ModemBuilder::new(novatel())
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert!(modem.registration_config().alphanumeric_operator);

        let modem = ModemBuilder::new(generic())
            .registration_config(RegistrationConfig {
                alphanumeric_operator: true,
                ..RegistrationConfig::default()
            })
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert!(!modem.registration_config().alphanumeric_operator);
    }

    #[tokio::test]
    async fn builder_rejects_zero_poll_interval() {
        let result = ModemBuilder::new(generic())
            .poll_interval(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builder_serial_port_required_for_build() {
        let result = ModemBuilder::new(generic()).build().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builder_imsi_provider_is_used() {
        let modem = ModemBuilder::new(generic())
            .imsi_provider(Arc::new(FixedImsi::new("262021234567890").unwrap()))
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert_eq!(modem.imsi().await.unwrap(), "262021234567890");
    }
}
