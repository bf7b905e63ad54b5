// modemlib test application -- CLI tool for exercising the registration
// workflows and everyday queries against a real modem or a scripted mock.
//
// Usage:
//   modemlib-test-app --device huawei --port /dev/ttyUSB2 register
//   modemlib-test-app --device huawei --port /dev/ttyUSB2 register --via-netinfo
//   modemlib-test-app --port /dev/ttyUSB0 status
//   modemlib-test-app --port /dev/ttyUSB0 at 'AT+CGMI'
//   modemlib-test-app --mock monitor --duration 5
//   modemlib-test-app list

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use modemlib::at::Command as AtCommand;
use modemlib::gsm::{ModemBuilder, ModemModel, ModemSession, commands, models};
use modemlib::{Notification, SignalValue};
use modemlib_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// modemlib test application -- drives a modem from the command line.
#[derive(Parser)]
#[command(name = "modemlib-test-app", version, about)]
struct Cli {
    /// Serial port of the modem's AT interface (e.g. /dev/ttyUSB2, COM3).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Override the model's default baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Device model (generic, huawei, option, novatel, sierra).
    #[arg(long, default_value = "generic")]
    device: String,

    /// Registration deadline in seconds.
    #[arg(long, default_value_t = 60)]
    deadline: u64,

    /// Use a scripted mock modem instead of a real serial port.
    /// The mock answers as a SIM at home on Vodafone ES.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register on the network and print the operator.
    Register {
        /// Compare the serving network with the SIM's home network instead
        /// of trusting +CREG.
        #[arg(long)]
        via_netinfo: bool,
    },

    /// Print registration status, serving network, signal and charset.
    Status,

    /// Scan for visible operators (can take minutes).
    Operators,

    /// Print the SIM's IMSI and preferred roaming list.
    Imsi,

    /// Send a raw AT command and print the response text.
    At {
        /// The command line, e.g. 'AT+CGMI'.
        raw: String,
    },

    /// Print unsolicited notifications.
    Monitor {
        /// Seconds to monitor (0 = until the modem goes away).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// List built-in device models.
    List,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lookup_model(name: &str) -> Result<ModemModel> {
    match models::by_name(name) {
        Some(model) => Ok(model),
        None => {
            let known: Vec<&str> = models::all_models().iter().map(|m| m.name).collect();
            bail!("unknown device '{}'. Supported: {}", name, known.join(", "))
        }
    }
}

fn format_signal(value: &SignalValue) -> String {
    match value {
        SignalValue::Number(n) => n.to_string(),
        SignalValue::List(values) => format!("{values:?}"),
        SignalValue::Text(text) => format!("{text:?}"),
    }
}

// ---------------------------------------------------------------------------
// Mock scripts
// ---------------------------------------------------------------------------

const OK: &[u8] = b"\r\nOK\r\n";
const HOME_NETWORK: &[u8] = b"\r\n+COPS: 0,2,\"21401\",2\r\n\r\nOK\r\n";

/// A mock modem that answers the exchanges `command` will make.
fn scripted_mock(command: &Command) -> MockTransport {
    let mut mock = MockTransport::new();
    match command {
        Command::Register { via_netinfo: false } => {
            mock.expect(b"AT+CSCS=\"IRA\"\r", OK);
            mock.expect(b"AT+CREG?\r", b"\r\n+CREG: 0,2\r\n\r\nOK\r\n");
            mock.expect(b"AT+CREG=1\r", b"\r\nOK\r\n\r\n+CREG: 1\r\n");
            mock.expect(b"AT+CSCS=\"UCS2\"\r", OK);
            mock.expect(b"AT+COPS=3,2;+COPS?\r", HOME_NETWORK);
        }
        Command::Register { via_netinfo: true } => {
            mock.expect(b"AT+CIMI\r", b"\r\n214011234567890\r\n\r\nOK\r\n");
            mock.expect(b"AT+CSCS=\"IRA\"\r", OK);
            mock.expect(b"AT+COPS=3,2;+COPS?\r", HOME_NETWORK);
            mock.expect(b"AT+CSCS=\"UCS2\"\r", OK);
            mock.expect(b"AT+COPS=3,2;+COPS?\r", HOME_NETWORK);
        }
        Command::Status => {
            mock.expect(b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n");
            mock.expect(b"AT+COPS=3,2;+COPS?\r", HOME_NETWORK);
            mock.expect(b"AT+CSQ\r", b"\r\n+CSQ: 17,99\r\n\r\nOK\r\n");
            mock.expect(b"AT+CSCS?\r", b"\r\n+CSCS: \"IRA\"\r\n\r\nOK\r\n");
        }
        Command::Operators => {
            mock.expect(
                b"AT+COPS=?\r",
                b"\r\n+COPS: (2,\"vodafone ES\",\"voda ES\",\"21401\",2),\
                  (1,\"Movistar\",\"Movistar\",\"21407\",2),\
                  (3,\"Orange\",\"Orange\",\"21403\",0),,(0-4),(0-2)\r\n\r\nOK\r\n",
            );
        }
        Command::Imsi => {
            mock.expect(b"AT+CIMI\r", b"\r\n214011234567890\r\n\r\nOK\r\n");
            mock.expect(
                b"AT+CPOL?\r",
                b"\r\n+CPOL: 1,2,\"26202\"\r\n+CPOL: 2,2,\"20810\"\r\n\r\nOK\r\n",
            );
        }
        Command::At { raw } => {
            let mut request = raw.clone().into_bytes();
            request.push(b'\r');
            mock.expect(&request, OK);
        }
        Command::Monitor { .. } => {
            mock.expect(
                b"AT+CREG=1\r",
                b"\r\nOK\r\n\r\n+CREG: 2\r\n\r\n+CREG: 1,\"2B67\",\"0A1F\"\r\n\r\nRING\r\n\r\n+CMTI: \"SM\",3\r\n",
            );
        }
        Command::List => {}
    }
    mock
}

// ---------------------------------------------------------------------------
// Modem construction
// ---------------------------------------------------------------------------

async fn create_session(cli: &Cli) -> Result<ModemSession> {
    let model = lookup_model(&cli.device)?;
    let name = model.name;
    let mut builder =
        ModemBuilder::new(model).registration_deadline(Duration::from_secs(cli.deadline));
    if let Some(baud) = cli.baud {
        builder = builder.baud_rate(baud);
    }

    if cli.mock {
        let session = builder
            .build_with_transport(Box::new(scripted_mock(&cli.command)))
            .await
            .context("failed to build session with mock transport")?;
        println!("Connected (mock transport) -- {name}");
        Ok(session)
    } else {
        let port = cli
            .port
            .as_deref()
            .context("--port is required when not using --mock")?;
        let session = builder
            .serial_port(port)
            .build()
            .await
            .with_context(|| format!("failed to open {port}"))?;
        println!("Connected -- {name} on {port}");
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    let entries = models::all_models();
    let name_width = entries.iter().map(|m| m.name.len()).max().unwrap_or(8).max(8);
    let vendor_width = entries.iter().map(|m| m.vendor.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<name_width$}  {:<vendor_width$}  {:>7}  Operator names",
        "Model", "Vendor", "Baud",
    );
    println!(
        "{:<name_width$}  {:<vendor_width$}  {:>7}  --------------",
        "-".repeat(name_width),
        "-".repeat(vendor_width),
        "-------",
    );
    for model in &entries {
        println!(
            "{:<name_width$}  {:<vendor_width$}  {:>7}  {}",
            model.name,
            model.vendor,
            model.default_baud_rate,
            if model.reports_operator_names { "yes" } else { "no" },
        );
    }
    println!();
    println!("{} models total.", entries.len());
    Ok(())
}

async fn cmd_register(modem: &ModemSession, via_netinfo: bool) -> Result<()> {
    let start = Instant::now();
    let outcome = if via_netinfo {
        modem.register_via_network_info().await
    } else {
        modem.register().await
    }
    .context("registration failed")?;

    println!(
        "Registered in {:.1}s",
        start.elapsed().as_secs_f64()
    );
    println!("  Operator:   {}", outcome.operator_name);
    if let Some(id) = &outcome.operator_id {
        println!("  MCC+MNC:    {id}");
    }
    println!("  Connection: {}", outcome.connection);
    println!("  Roaming:    {}", if outcome.roaming { "yes" } else { "no" });
    Ok(())
}

async fn cmd_status(modem: &ModemSession) -> Result<()> {
    let status = modem.reg_status().await.context("reading +CREG")?;
    println!("Registration: {status}");

    match modem.network_info().await {
        Ok(info) => println!("Network:      {:?} ({})", info.operator, info.connection),
        Err(e) => println!("Network:      unavailable ({e})"),
    }

    let quality = modem.signal_quality().await.context("reading +CSQ")?;
    match quality.dbm() {
        Some(dbm) => println!("Signal:       {dbm} dBm"),
        None => println!("Signal:       unknown"),
    }

    let charset = modem.charset().await.context("reading +CSCS")?;
    println!("Charset:      {charset}");
    Ok(())
}

async fn cmd_operators(modem: &ModemSession) -> Result<()> {
    println!("Scanning for operators...");
    let operators = modem.operators().await.context("operator scan failed")?;
    if operators.is_empty() {
        println!("No operators visible.");
        return Ok(());
    }
    println!("{:<8}  {:<10}  {:<6}  Name", "MCC+MNC", "Status", "Tech");
    for op in &operators {
        println!(
            "{:<8}  {:<10}  {:<6}  {}",
            op.id,
            format!("{:?}", op.status),
            op.connection.to_string(),
            op.long_name
        );
    }
    Ok(())
}

async fn cmd_imsi(modem: &ModemSession) -> Result<()> {
    let imsi = modem.imsi().await.context("reading IMSI")?;
    println!("IMSI: {imsi}");
    let preferred = modem.roaming_list().await.context("reading +CPOL")?;
    if preferred.is_empty() {
        println!("No preferred roaming operators on the SIM.");
    } else {
        println!("Preferred roaming operators: {}", preferred.join(", "));
    }
    Ok(())
}

async fn cmd_at(modem: &ModemSession, raw: &str) -> Result<()> {
    let response = modem
        .submit(AtCommand::new("raw", raw))
        .await
        .with_context(|| format!("{raw} failed"))?;
    match response.text() {
        Some(text) if !text.is_empty() => println!("{text}"),
        _ => println!("OK"),
    }
    Ok(())
}

async fn cmd_monitor(modem: &ModemSession, duration_secs: u64) -> Result<()> {
    let mut notifications = modem.io().subscribe_all();
    modem
        .submit(commands::cmd_enable_reg_notifications())
        .await
        .context("enabling +CREG reports")?;

    println!("Monitoring notifications (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, notifications.recv()).await {
            Ok(Some(Notification::VendorSignal { name, value })) => {
                println!("[{name}] {}", format_signal(&value));
            }
            Ok(Some(Notification::NetworkRegStatus {
                status,
                operator_code,
                operator_name,
            })) => match (operator_code, operator_name) {
                (Some(lac), Some(cell)) => println!("[creg] {status} lac={lac} cell={cell}"),
                _ => println!("[creg] {status}"),
            },
            Ok(Some(notification)) => println!("[{}] {notification:?}", notification.kind()),
            Ok(None) => {
                println!("Modem IO task stopped.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.mock && cli.port.is_some() {
        bail!("--port and --mock are mutually exclusive");
    }

    // The `list` command does not require a modem.
    if matches!(&cli.command, Command::List) {
        return cmd_list();
    }

    let modem = create_session(&cli).await?;

    let result = match &cli.command {
        Command::Register { via_netinfo } => cmd_register(&modem, *via_netinfo).await,
        Command::Status => cmd_status(&modem).await,
        Command::Operators => cmd_operators(&modem).await,
        Command::Imsi => cmd_imsi(&modem).await,
        Command::At { raw } => cmd_at(&modem, raw).await,
        Command::Monitor { duration } => cmd_monitor(&modem, *duration).await,
        Command::List => unreachable!("list handled above"),
    };

    modem.shutdown().await.ok();
    result
}
