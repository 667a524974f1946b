///
/// slcan.rs
///
/// SLCAN (Lawicel serial line CAN) adapter driven over a serial port.
///
/// Frame formats:
///   Standard: t<ID:3hex><DLC:1hex><DATA:2hex*DLC>\r
///   Extended: T<ID:8hex><DLC:1hex><DATA:2hex*DLC>\r
///   RTR:      r<ID:3hex><DLC:1hex>\r / R<ID:8hex><DLC:1hex>\r
///
/// Commands are acknowledged with `\r` (optionally preceded by a payload such as
/// `z` or `V1013`) and rejected with BEL (0x07). Power and termination control use
/// the Medo64 `*` extensions.
///
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::can::{CanFrame, MAX_DATA_LEN};
use crate::config::SlcanConfig;
use crate::device::{CanDevice, ExtendedStatus, VersionInfo};
use crate::error::{DeviceError, DeviceResult};
use crate::inbound::InboundSender;

const BEL: u8 = 0x07;
const READ_TIMEOUT: Duration = Duration::from_millis(50);
/// Longest line kept while waiting for `\r`; an extended frame with 8 bytes is 26.
const MAX_LINE_LEN: usize = 64;

/// slcan bitrate commands (S0-S8)
const SLCAN_BITRATES: [(u32, &str); 9] = [
    (10_000, "S0"),
    (20_000, "S1"),
    (50_000, "S2"),
    (100_000, "S3"),
    (125_000, "S4"),
    (250_000, "S5"),
    (500_000, "S6"),
    (800_000, "S7"),
    (1_000_000, "S8"),
];

/// Find the slcan bitrate command for a given bitrate
pub fn find_bitrate_command(bitrate: u32) -> DeviceResult<&'static str> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, cmd)| *cmd)
        .ok_or_else(|| {
            let valid: Vec<String> = SLCAN_BITRATES.iter().map(|(r, _)| r.to_string()).collect();
            DeviceError::SetupFailed(format!(
                "Invalid CAN bitrate {}. Valid bitrates: {}",
                bitrate,
                valid.join(", ")
            ))
        })
}

/// Answer to a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Accepted; carries whatever text preceded the `\r`.
    Ack(String),
    /// Rejected with BEL.
    Nack,
}

impl Reply {
    /// Plain acknowledgement: `\r` with nothing before it.
    pub fn is_ack(&self) -> bool {
        matches!(self, Reply::Ack(text) if text.is_empty())
    }

    /// Acknowledgement of a transmit command: `z`, `Z` or a plain `\r`.
    pub fn is_transmit_ack(&self) -> bool {
        matches!(self, Reply::Ack(text) if matches!(text.as_str(), "" | "z" | "Z"))
    }
}

/// One message read from the adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    Frame(CanFrame),
    Reply(Reply),
}

/// Decode a received frame line (without the trailing `\r`).
///
/// Examples:
///   `t1234AABBCCDD` -> Standard frame, ID=0x123, DLC=4, data=AA BB CC DD
///   `T123456782AABB` -> Extended frame, ID=0x12345678, DLC=2
///   `r1230` -> Standard RTR, ID=0x123, DLC=0
pub fn decode_frame(line: &str) -> Option<CanFrame> {
    let bytes = line.as_bytes();
    let (is_extended, is_rtr) = match bytes.first()? {
        b't' => (false, false),
        b'T' => (true, false),
        b'r' => (false, true),
        b'R' => (true, true),
        _ => return None,
    };

    let id_len = if is_extended { 8 } else { 3 };
    let data_start = 1 + id_len + 1;
    if bytes.len() < data_start {
        return None;
    }

    let id_str = std::str::from_utf8(&bytes[1..1 + id_len]).ok()?;
    if !id_str.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let id = u32::from_str_radix(id_str, 16).ok()?;

    let dlc = (bytes[1 + id_len] as char).to_digit(16)? as usize;
    if dlc > MAX_DATA_LEN {
        return None;
    }

    if is_rtr {
        return CanFrame::new_remote(id, dlc, is_extended).ok();
    }

    if bytes.len() < data_start + dlc * 2 {
        return None;
    }
    let mut data = Vec::with_capacity(dlc);
    for pair in bytes[data_start..data_start + dlc * 2].chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        data.push(((hi << 4) | lo) as u8);
    }

    if is_extended {
        CanFrame::new_eff(id, &data).ok()
    } else {
        CanFrame::new_std(id, &data).ok()
    }
}

/// Encode a frame as an slcan transmit command, including the trailing `\r`.
pub fn encode_frame(frame: &CanFrame) -> String {
    let mut cmd = String::with_capacity(32);

    let prefix = match (frame.is_extended(), frame.is_rtr()) {
        (false, false) => 't',
        (true, false) => 'T',
        (false, true) => 'r',
        (true, true) => 'R',
    };
    cmd.push(prefix);
    if frame.is_extended() {
        cmd.push_str(&format!("{:08X}", frame.id()));
    } else {
        cmd.push_str(&format!("{:03X}", frame.id()));
    }
    cmd.push_str(&format!("{:X}", frame.len()));
    for byte in frame.data() {
        cmd.push_str(&format!("{:02X}", byte));
    }

    cmd.push('\r');
    cmd
}

/// Splits the adapter's byte stream into frames and replies.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Incoming> {
        let mut out = Vec::new();
        for &b in bytes {
            match b {
                BEL => {
                    self.buf.clear();
                    out.push(Incoming::Reply(Reply::Nack));
                }
                b'\r' => {
                    let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                    self.buf.clear();
                    if let Some(incoming) = Self::classify(line) {
                        out.push(incoming);
                    }
                }
                b'\n' => {}
                _ if self.buf.len() >= MAX_LINE_LEN => {
                    log::warn!("discarding {} bytes without line end", self.buf.len());
                    self.buf.clear();
                }
                _ => self.buf.push(b),
            }
        }
        out
    }

    fn classify(line: String) -> Option<Incoming> {
        let prefix = line.as_bytes().first().copied();
        match prefix {
            Some(b't' | b'T' | b'r' | b'R') => match decode_frame(&line) {
                Some(frame) => Some(Incoming::Frame(frame)),
                None => {
                    log::warn!("undecodable frame from adapter: {:?}", line);
                    None
                }
            },
            _ => Some(Incoming::Reply(Reply::Ack(line))),
        }
    }
}

/// Parse the `*Fxx` extended status reply; bit 0 is power, bit 1 termination.
pub fn parse_extended_status(reply: &Reply) -> ExtendedStatus {
    let Reply::Ack(text) = reply else {
        return ExtendedStatus::default();
    };
    let flags = text
        .strip_prefix("*F")
        .filter(|hex| hex.len() == 2 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|hex| u8::from_str_radix(hex, 16).ok());
    match flags {
        Some(flags) => ExtendedStatus {
            is_valid: true,
            power_enabled: flags & 0x01 != 0,
            termination_enabled: flags & 0x02 != 0,
        },
        _ => ExtendedStatus::default(),
    }
}

/// Parse the `Vhhss` version reply into dotted hardware and software versions.
pub fn parse_version(reply: &Reply) -> Option<VersionInfo> {
    let Reply::Ack(text) = reply else {
        return None;
    };
    let digits = text.strip_prefix('V')?;
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let dotted = |s: &str| format!("{}.{}", &s[..1], &s[1..]);
    Some(VersionInfo {
        hardware_version: dotted(&digits[..2]),
        software_version: dotted(&digits[2..]),
    })
}

/// SLCAN adapter on a serial port. Frames are read on a background thread and pushed
/// into the attached inbound sink; command replies are awaited by the caller.
pub struct SlcanDevice {
    config: SlcanConfig,
    sink: Option<InboundSender>,
    port: Option<Box<dyn SerialPort>>,
    replies: Option<UnboundedReceiver<Reply>>,
    stop_flag: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl SlcanDevice {
    pub fn new(config: SlcanConfig) -> Self {
        Self {
            config,
            sink: None,
            port: None,
            replies: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    pub fn config(&self) -> &SlcanConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Send a command (without `\r`) and wait for its reply.
    async fn command(&mut self, cmd: &str) -> DeviceResult<Reply> {
        let port = self.port.as_mut().ok_or(DeviceError::Disconnected)?;
        let replies = self.replies.as_mut().ok_or(DeviceError::Disconnected)?;

        // Anything queued now answers an earlier, abandoned command.
        while let Ok(stale) = replies.try_recv() {
            log::debug!("discarding stale reply {:?}", stale);
        }

        log::debug!("-> {}", cmd);
        port.write_all(cmd.as_bytes())?;
        port.write_all(b"\r")?;
        port.flush()?;

        match tokio::time::timeout(self.config.reply_timeout(), replies.recv()).await {
            Ok(Some(reply)) => {
                log::debug!("<- {:?}", reply);
                Ok(reply)
            }
            Ok(None) => Err(DeviceError::Disconnected),
            Err(_) => Err(DeviceError::Timeout(self.config.reply_timeout_ms)),
        }
    }

    /// Runs a switch command; only a plain ack means the adapter applied it.
    async fn switch(&mut self, cmd: &str) -> DeviceResult<bool> {
        let reply = self.command(cmd).await?;
        if !reply.is_ack() {
            log::info!("{} answered {:?} with {:?}", self.config.port, cmd, reply);
        }
        Ok(reply.is_ack())
    }

    fn stop_reader(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                log::error!("slcan reader thread panicked");
            }
        }
    }
}

#[async_trait]
impl CanDevice for SlcanDevice {
    fn attach(&mut self, sink: InboundSender) {
        self.sink = Some(sink);
    }

    async fn open(&mut self) -> DeviceResult<bool> {
        if self.is_open() {
            return Ok(true);
        }
        let bitrate_cmd = find_bitrate_command(self.config.bitrate)?;

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| DeviceError::SetupFailed(e.to_string()))?;
        port.clear(ClearBuffer::All)?;
        let reader_port = port.try_clone()?;

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        self.stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag = self.stop_flag.clone();
        let sink = self.sink.clone();
        self.reader = Some(
            thread::Builder::new()
                .name("slcan-reader".into())
                .spawn(move || read_loop(reader_port, sink, reply_tx, stop_flag))?,
        );
        self.port = Some(port);
        self.replies = Some(reply_rx);

        // The channel may already be open from an earlier session; a BEL here is fine.
        match self.command("C").await {
            Ok(_) | Err(DeviceError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }

        for cmd in [bitrate_cmd, "O"] {
            match self.command(cmd).await {
                Ok(reply) if reply.is_ack() => {}
                Ok(reply) => {
                    log::info!("{} answered {:?} with {:?}", self.config.port, cmd, reply);
                    return Ok(false);
                }
                Err(DeviceError::Timeout(_)) => {
                    log::info!("{} did not answer {:?}", self.config.port, cmd);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        log::info!("opened {} at {} bit/s", self.config.port, self.config.bitrate);
        Ok(true)
    }

    async fn close(&mut self) -> DeviceResult<()> {
        if self.port.is_some() {
            if let Err(e) = self.command("C").await {
                log::warn!("close command on {} failed: {}", self.config.port, e);
            }
        }
        self.stop_reader();
        self.port = None;
        self.replies = None;
        Ok(())
    }

    async fn send_frame(&mut self, frame: &CanFrame) -> DeviceResult<()> {
        let cmd = encode_frame(frame);
        let reply = self.command(cmd.trim_end_matches('\r')).await?;
        if reply.is_transmit_ack() {
            Ok(())
        } else {
            Err(DeviceError::CommandFailed(format!(
                "adapter rejected frame {:X} ({:?})",
                frame.id(),
                reply
            )))
        }
    }

    async fn set_power(&mut self, on: bool) -> DeviceResult<bool> {
        self.switch(if on { "*P1" } else { "*P0" }).await
    }

    async fn set_termination(&mut self, on: bool) -> DeviceResult<bool> {
        self.switch(if on { "*T1" } else { "*T0" }).await
    }

    async fn extended_status(&mut self) -> DeviceResult<ExtendedStatus> {
        let reply = self.command("*F").await?;
        Ok(parse_extended_status(&reply))
    }

    async fn version(&mut self) -> DeviceResult<VersionInfo> {
        let reply = self.command("V").await?;
        parse_version(&reply).ok_or_else(|| {
            DeviceError::CommandFailed(format!("unexpected version reply {:?}", reply))
        })
    }
}

impl Drop for SlcanDevice {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    sink: Option<InboundSender>,
    replies: UnboundedSender<Reply>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 256];

    while !stop_flag.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for incoming in splitter.push(&buf[..n]) {
                    match incoming {
                        Incoming::Frame(frame) => {
                            if let Some(sink) = &sink {
                                sink.push(frame);
                            }
                        }
                        Incoming::Reply(reply) => {
                            if replies.send(reply).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("serial read error: {}", e);
                break;
            }
        }
    }
}
