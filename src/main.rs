///
/// main.rs
///
/// slcandebug: connect to one SLCAN adapter and drive it from the keyboard.
///
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use clap::error::ErrorKind;

use slcandebug::config::{Cli, SlcanConfig};
use slcandebug::device::setup_result;
use slcandebug::keys::{RawModeGuard, TerminalKeys};
use slcandebug::render::LogPipe;
use slcandebug::session::{HELP, Session};
use slcandebug::{CanDevice, Console, SlcanDevice, inbound};

const EXIT_USAGE: u8 = 255;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            print_usage(&Console::new(io::stderr(), true));
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let console = Arc::new(Console::new(io::stdout(), !cli.no_color));
    init_logger(console.clone());
    let config = SlcanConfig::from(&cli);
    let port = config.port.clone();

    let (sink, inbound) = inbound::channel();
    let mut device = SlcanDevice::new(config);
    device.attach(sink);

    if let Err(e) = setup_result(device.open().await, &port) {
        let _ = console.error(&e.to_string());
        close(&mut device).await;
        return ExitCode::from(e.exit_code());
    }

    let _ = announce(&console, &port);
    let result = run_session(device, inbound, console.clone()).await;
    let _ = console.ok(&format!("Disconnected from SLCAN device ({}).", port));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = console.error(&format!("Terminal error: {}", e));
            ExitCode::FAILURE
        }
    }
}

/// Log records share the console lock and end in `\r\n` so they stay readable in raw mode.
fn init_logger(console: Arc<Console<io::Stdout>>) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("off"))
        .format(|buf, record| {
            write!(
                buf,
                "{} {:<5} {}: {}\r\n",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(LogPipe::new(console))))
        .init();
}

fn print_usage<W: Write>(console: &Console<W>) {
    let _ = console.error("Usage: slcandebug <serial-port>");
    let ports: Vec<String> = serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default();
    if ports.is_empty() {
        let _ = console.error("No ports available.");
    } else {
        let _ = console.error("Available ports:");
        for name in ports {
            let _ = console.error(&format!("  {}", name));
        }
    }
}

fn announce<W: Write>(console: &Console<W>, port: &str) -> io::Result<()> {
    for line in HELP {
        console.info(line)?;
    }
    console.ok(&format!("Connected to SLCAN device ({}).", port))
}

/// Runs the interactive loop; the device is closed afterwards whatever the outcome.
async fn run_session<W: Write>(
    device: SlcanDevice,
    inbound: inbound::InboundReceiver,
    console: Arc<Console<W>>,
) -> io::Result<()> {
    let mut session = Session::new(device, TerminalKeys, inbound, console);
    let result = match RawModeGuard::enable() {
        Ok(_raw) => session.run().await,
        Err(e) => Err(e),
    };
    close(session.device_mut()).await;
    result
}

async fn close(device: &mut SlcanDevice) {
    if let Err(e) = device.close().await {
        log::warn!("closing {} failed: {}", device.config().port, e);
    }
}
