//! Register a modem on the network.
//!
//! Opens the modem's AT port, turns echo off, and waits for network
//! registration, printing the operator and access technology.
//!
//! # Requirements
//!
//! - A modem whose AT command port is available as a serial device
//! - Serial port path and model adjusted for your system
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=debug cargo run -p modemlib --example register -- /dev/ttyUSB2 huawei
//! ```

use std::time::Duration;

use anyhow::Context;
use modemlib::gsm::{ModemBuilder, models};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let model_name = args.next().unwrap_or_else(|| "generic".to_string());
    let model = models::by_name(&model_name)
        .with_context(|| format!("unknown model {model_name:?}"))?;

    println!("Opening {} ({}) on {}...", model.name, model.vendor, port);

    let modem = ModemBuilder::new(model)
        .serial_port(&port)
        .registration_deadline(Duration::from_secs(90))
        .build()
        .await
        .with_context(|| format!("opening {port}"))?;

    modem.initialize().await.context("initializing modem")?;
    println!("IMSI: {}", modem.imsi().await.context("reading IMSI")?);

    let outcome = modem.register().await.context("registering")?;
    println!(
        "Registered on {} ({}){}",
        outcome.operator_name,
        outcome.connection,
        if outcome.roaming { ", roaming" } else { "" }
    );

    let quality = modem.signal_quality().await?;
    match quality.dbm() {
        Some(dbm) => println!("Signal: {dbm} dBm"),
        None => println!("Signal: unknown"),
    }

    modem.shutdown().await?;
    Ok(())
}
