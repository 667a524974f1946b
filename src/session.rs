///
/// session.rs
///
/// The keystroke-driven session: dispatches single-key commands to the device,
/// runs the frame composer in edit mode and prints received frames.
///
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::style::Color;

use crate::can::CanFrame;
use crate::compose::{EditAction, HexComposer};
use crate::device::{CanDevice, ExtendedStatus};
use crate::inbound::InboundReceiver;
use crate::keys::{Key, KeySource};
use crate::render::Console;

/// Command summary shown when the session starts.
pub const HELP: [&str; 6] = [
    "<E>dit mode",
    "<P>ower status (<Ins><P>ower on, <Del><P>ower off)",
    "<T>ermination status (<Ins><T>ermination on, <Del><T>ermination off)",
    "<S>tatus (only valid for Medo64 CAN devices)",
    "<V>ersion",
    "<Q>uit",
];

const EDIT_BANNER: &str = "Entering edit mode; <Escape> to exit; <Enter> to apply, # splits data";
const DEFAULT_IDLE: Duration = Duration::from_millis(5);

/// One-shot prefix armed by Insert or Delete for the next command key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Modifier {
    #[default]
    None,
    Insert,
    Delete,
}

impl Modifier {
    /// The on/off state a switch command should force, if any.
    fn forced_state(self) -> Option<bool> {
        match self {
            Modifier::None => None,
            Modifier::Insert => Some(true),
            Modifier::Delete => Some(false),
        }
    }

    fn after(key: Key) -> Self {
        match key {
            Key::Insert => Modifier::Insert,
            Key::Delete => Modifier::Delete,
            _ => Modifier::None,
        }
    }
}

#[derive(Debug)]
pub enum Mode {
    Normal,
    Edit(HexComposer),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Quit,
}

/// Adapter switches controlled with the same query/force pattern.
#[derive(Clone, Copy, Debug)]
enum Switch {
    Power,
    Termination,
}

impl Switch {
    fn label(self) -> &'static str {
        match self {
            Switch::Power => "Power",
            Switch::Termination => "Termination",
        }
    }

    fn read(self, status: &ExtendedStatus) -> bool {
        match self {
            Switch::Power => status.power_enabled,
            Switch::Termination => status.termination_enabled,
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

pub struct Session<D, K, W: Write> {
    device: D,
    keys: K,
    inbound: InboundReceiver,
    console: Arc<Console<W>>,
    mode: Mode,
    modifier: Modifier,
    idle: Duration,
}

impl<D, K, W> Session<D, K, W>
where
    D: CanDevice,
    K: KeySource,
    W: Write,
{
    pub fn new(device: D, keys: K, inbound: InboundReceiver, console: Arc<Console<W>>) -> Self {
        Self {
            device,
            keys,
            inbound,
            console,
            mode: Mode::Normal,
            modifier: Modifier::None,
            idle: DEFAULT_IDLE,
        }
    }

    /// Sleep used when an iteration found neither a key nor a frame.
    pub fn with_idle_interval(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Runs until the operator quits. Device failures are reported and never end the
    /// loop; only a broken terminal does.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            let mut busy = false;

            if let Some(key) = self.keys.poll_key()? {
                busy = true;
                if self.handle_key(key).await? == Step::Quit {
                    return Ok(());
                }
            }

            if self.drain_one()? {
                busy = true;
            }

            if !busy {
                tokio::time::sleep(self.idle).await;
            }
        }
    }

    /// Prints at most one received frame. Frames wait in the queue while the operator
    /// is composing, so they do not break the edit line.
    pub fn drain_one(&mut self) -> io::Result<bool> {
        if matches!(self.mode, Mode::Edit(_)) {
            return Ok(false);
        }
        match self.inbound.try_pop() {
            Some(entry) => {
                self.console.frame(&entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn handle_key(&mut self, key: Key) -> io::Result<Step> {
        if let Mode::Edit(composer) = &mut self.mode {
            let action = composer.handle_key(key);
            self.edit_action(action).await?;
            return Ok(Step::Continue);
        }

        let step = self.command_key(key).await?;
        self.modifier = Modifier::after(key);
        Ok(step)
    }

    async fn command_key(&mut self, key: Key) -> io::Result<Step> {
        match key {
            Key::Interrupt => return Ok(Step::Quit),
            Key::Enter => self.console.blank_line()?,
            Key::Char(c) => match c.to_ascii_uppercase() {
                'Q' => return Ok(Step::Quit),
                'T' => self.switch(Switch::Termination).await?,
                'P' => self.switch(Switch::Power).await?,
                'S' => self.status_ping().await?,
                'E' => {
                    self.console.banner(Color::Blue, EDIT_BANNER)?;
                    self.mode = Mode::Edit(HexComposer::new());
                }
                'V' => self.version().await?,
                _ => {}
            },
            _ => {}
        }
        Ok(Step::Continue)
    }

    async fn switch(&mut self, switch: Switch) -> io::Result<()> {
        let label = switch.label();
        let Some(on) = self.modifier.forced_state() else {
            return match self.device.extended_status().await {
                Ok(status) if status.is_valid => self
                    .console
                    .ok(&format!("{} is {}", label, on_off(switch.read(&status)))),
                Ok(_) => self
                    .console
                    .error(&format!("Cannot return {} status.", label.to_lowercase())),
                Err(e) => self.console.error(&format!(
                    "Cannot return {} status: {}",
                    label.to_lowercase(),
                    e
                )),
            };
        };

        let result = match switch {
            Switch::Power => self.device.set_power(on).await,
            Switch::Termination => self.device.set_termination(on).await,
        };
        let target = label.to_lowercase();
        match result {
            Ok(true) => self
                .console
                .ok(&format!("{} turned {}", label, on_off(on))),
            Ok(false) => self
                .console
                .error(&format!("Cannot turn {} {}", target, on_off(on))),
            Err(e) => self
                .console
                .error(&format!("Cannot turn {} {}: {}", target, on_off(on), e)),
        }
    }

    async fn status_ping(&mut self) -> io::Result<()> {
        match CanFrame::new(0, &[]) {
            Ok(frame) => self.send(&frame).await,
            Err(e) => self.console.error(&e.to_string()),
        }
    }

    async fn version(&mut self) -> io::Result<()> {
        match self.device.version().await {
            Ok(version) => {
                self.console
                    .info(&format!("Hardware {}", version.hardware_version))?;
                self.console
                    .info(&format!("Software {}", version.software_version))
            }
            Err(e) => self.console.error(&format!("Cannot read version: {}", e)),
        }
    }

    async fn send(&mut self, frame: &CanFrame) -> io::Result<()> {
        if let Err(e) = self.device.send_frame(frame).await {
            self.console.error(&format!("Cannot send message: {}", e))?;
        }
        Ok(())
    }

    async fn edit_action(&mut self, action: EditAction) -> io::Result<()> {
        match action {
            EditAction::Echo(c) => self.console.echo(c),
            EditAction::Erase => self.console.erase_last(),
            EditAction::Ignored => Ok(()),
            EditAction::Cancel => {
                self.mode = Mode::Normal;
                self.console.blank_line()
            }
            EditAction::Submit(result) => {
                self.mode = Mode::Normal;
                self.console.blank_line()?;
                match result {
                    Ok(Some(frame)) => self.send(&frame).await,
                    Ok(None) => Ok(()),
                    Err(e) => self.console.error(&e.to_string()),
                }
            }
        }
    }
}
