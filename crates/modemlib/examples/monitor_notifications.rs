//! Print unsolicited modem notifications as they arrive.
//!
//! Enables `+CREG` reports and then listens for a minute. Registration
//! changes, incoming calls, new SMS indications and vendor signal reports
//! (e.g. Huawei `^RSSI`) are all printed with a timestamp.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p modemlib --example monitor_notifications -- /dev/ttyUSB2 huawei
//! ```

use std::time::Duration;

use anyhow::Context;
use modemlib::gsm::{ModemBuilder, commands, models};
use modemlib::{Notification, SignalValue};
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

    let modem = ModemBuilder::new(model)
        .serial_port(&port)
        .build()
        .await
        .with_context(|| format!("opening {port}"))?;

    let mut notifications = modem.io().subscribe_all();
    modem
        .submit(commands::cmd_enable_reg_notifications())
        .await
        .context("enabling +CREG reports")?;

    println!("Monitoring {port} for 60 seconds...\n");
    let start = tokio::time::Instant::now();
    let deadline = start + Duration::from_secs(60);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        let notification = match tokio::time::timeout(remaining, notifications.recv()).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                println!("modem IO task stopped");
                break;
            }
            Err(_) => break,
        };

        let elapsed = start.elapsed();
        let timestamp = format!("{:>4}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis());
        match notification {
            Notification::NetworkRegStatus {
                status,
                operator_code,
                operator_name,
            } => println!(
                "{timestamp} registration {status} (lac {}, cell {})",
                operator_code.as_deref().unwrap_or("-"),
                operator_name.as_deref().unwrap_or("-")
            ),
            Notification::NewSmsArrived { index, folder } => {
                println!("{timestamp} new SMS #{index} in {folder}")
            }
            Notification::IncomingCall => println!("{timestamp} incoming call"),
            Notification::VendorSignal { name, value } => match value {
                SignalValue::Number(n) => println!("{timestamp} {name} = {n}"),
                SignalValue::List(values) => println!("{timestamp} {name} = {values:?}"),
                SignalValue::Text(text) => println!("{timestamp} {name} = {text}"),
            },
        }
    }

    modem.shutdown().await?;
    Ok(())
}
