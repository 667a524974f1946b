///
/// config.rs
///
/// Command line and device configuration.
///
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_BITRATE: u32 = 125_000;
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Parser)]
#[command(name = "slcandebug", version, about = "Interactive tester for SLCAN CAN adapters")]
pub struct Cli {
    /// Serial port the adapter is attached to (e.g. /dev/ttyACM0, COM3)
    pub port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// CAN bus bitrate in bits/second
    #[arg(long, default_value_t = DEFAULT_BITRATE)]
    pub bitrate: u32,

    /// How long to wait for the adapter to answer a command
    #[arg(long, default_value_t = DEFAULT_REPLY_TIMEOUT_MS)]
    pub reply_timeout_ms: u64,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// SLCAN adapter configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlcanConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// CAN bus bitrate in bits/second
    pub bitrate: u32,
    /// Reply timeout for adapter commands, in milliseconds
    pub reply_timeout_ms: u64,
}

impl SlcanConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            bitrate: DEFAULT_BITRATE,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl From<&Cli> for SlcanConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            port: cli.port.clone(),
            baud_rate: cli.baud,
            bitrate: cli.bitrate,
            reply_timeout_ms: cli.reply_timeout_ms,
        }
    }
}
