//! Binary entrypoint for the BerryBridge CLI.
//!
//! Commands:
//! - `start` - run the bridge against the configured device link
//! - `init` - create a starter `config.toml`
//! - `probe --port <path>` - serial smoke test printing live vitals
//!
//! See the library crate docs for module-level details: `berrybridge::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

use berrybridge::config::{Config, ConnectionKind};
use berrybridge::monitor::PatientMonitor;
use berrybridge::protocol::interpreter::EventPayload;
use berrybridge::protocol::PacketType;
use berrybridge::vitals::VitalSigns;

#[derive(Parser)]
#[command(name = "berrybridge")]
#[command(about = "Vital-signs bridge for BerryMed PM-series patient monitors")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Start {
        /// Serial device port (e.g., /dev/ttyUSB0), overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Device link: "serial" or "ble", overrides the config
        #[arg(long)]
        connection: Option<String>,
    },
    /// Initialize a new bridge configuration
    Init,
    /// Run a serial smoke test: print live vitals as they decode
    Probe {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115_200)]
        baud: u32,
        /// Seconds to run before exiting (0 = until Ctrl-C)
        #[arg(short, long, default_value_t = 0)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port, connection } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => {
                    warn!(
                        "No config file at {}, using defaults (run `berrybridge init` to create one)",
                        cli.config
                    );
                    Config::default()
                }
            };
            if let Some(port) = port {
                config.device.port = port;
            }
            if let Some(connection) = connection {
                config.device.connection = parse_connection(&connection)?;
            }
            config.validate()?;
            run_bridge(config).await
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Created starter configuration at {}", cli.config);
            println!("Edit the [device] section, then run: berrybridge start");
            Ok(())
        }
        Commands::Probe {
            port,
            baud,
            seconds,
        } => run_probe(port, baud, seconds).await,
    }
}

fn parse_connection(value: &str) -> Result<ConnectionKind> {
    match value.to_ascii_lowercase().as_str() {
        "serial" => Ok(ConnectionKind::Serial),
        "ble" | "bluetooth" => Ok(ConnectionKind::Ble),
        other => Err(anyhow::anyhow!(
            "unknown connection '{}', expected 'serial' or 'ble'",
            other
        )),
    }
}

/// Run the bridge until Ctrl-C, logging fresh snapshots for the forwarding
/// layer to pick up.
async fn run_bridge(config: Config) -> Result<()> {
    let mut monitor = PatientMonitor::new(config);

    monitor.register_callback(
        PacketType::NibpParams,
        Box::new(|payload| {
            if let EventPayload::Nibp {
                systolic,
                mean,
                diastolic,
                ..
            } = payload
            {
                if *systolic != 0 || *diastolic != 0 {
                    info!(
                        "NIBP reading: {}/{} mmHg (MAP {})",
                        systolic, diastolic, mean
                    );
                }
            }
        }),
    );

    monitor.connect().await?;
    info!("Bridge running; press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = monitor.snapshot();
                if has_data(&snapshot.vital_signs)
                    || !snapshot.ecg.is_empty()
                    || !snapshot.spo2.is_empty()
                    || !snapshot.resp.is_empty()
                {
                    debug!("vitals: {}", serde_json::to_string(&snapshot)?);
                }
            }
        }
    }

    monitor.disconnect().await;
    Ok(())
}

fn has_data(signs: &VitalSigns) -> bool {
    *signs != VitalSigns::default()
}

/// Serial smoke test: decode live traffic and print one line per parameter
/// packet, roughly matching the device's own service console output.
async fn run_probe(port: String, baud: u32, seconds: u64) -> Result<()> {
    let mut config = Config::default();
    config.device.connection = ConnectionKind::Serial;
    config.device.port = port.clone();
    config.device.baud_rate = baud;

    let mut monitor = PatientMonitor::new(config);
    monitor.register_callback(PacketType::EcgParams, Box::new(print_packet));
    monitor.register_callback(PacketType::Spo2Params, Box::new(print_packet));
    monitor.register_callback(PacketType::TempParams, Box::new(print_packet));
    monitor.register_callback(PacketType::NibpParams, Box::new(print_packet));

    monitor.connect().await?;
    println!("Connected to {} ({} baud). Ctrl-C to exit.", port, baud);

    let deadline = async {
        if seconds == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = deadline => {}
    }

    monitor.disconnect().await;
    println!("Probe finished.");
    Ok(())
}

fn print_packet(payload: &EventPayload) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    match payload {
        EventPayload::Ecg {
            heart_rate,
            resp_rate,
            ..
        } => println!("{}  [ECG ]  HR:{:>3} bpm  RR:{:>3} bpm", ts, heart_rate, resp_rate),
        EventPayload::Spo2 { spo2, pulse, .. } => {
            println!("{}  [SPO2]  {:>3} %  Pulse {:>3} bpm", ts, spo2, pulse)
        }
        EventPayload::Temp { celsius, .. } => {
            println!("{}  [TEMP]  {:>4.1} C", ts, celsius)
        }
        EventPayload::Nibp {
            cuff_pressure,
            systolic,
            mean,
            diastolic,
            states,
        } => println!(
            "{}  [NIBP]  SYS:{}  DIA:{}  MAP:{}  Cuff:{} mmHg  Status:0x{:02X}",
            ts, systolic, diastolic, mean, cuff_pressure, states
        ),
        _ => {}
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // If stdout is a terminal, tee log lines to both file and console.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            eprintln!(
                "Warning: could not open log file {}, logging to console",
                file
            );
            default_format(&mut builder);
        }
    } else {
        default_format(&mut builder);
    }

    let _ = builder.try_init();
}

fn default_format(builder: &mut env_logger::Builder) {
    use std::io::Write;
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
}
