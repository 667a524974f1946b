//! Session loop tests against a scripted keyboard and a recording device.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use slcandebug::error::DeviceResult;
use slcandebug::inbound::{self, InboundSender};
use slcandebug::keys::{Key, KeySource};
use slcandebug::session::{Mode, Modifier, Session, Step};
use slcandebug::{CanDevice, CanFrame, Console, DeviceError, ExtendedStatus, VersionInfo};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Send(CanFrame),
    SetPower(bool),
    SetTermination(bool),
    ExtendedStatus,
    Version,
}

#[derive(Default)]
struct MockDevice {
    calls: Vec<Call>,
    status: ExtendedStatus,
    refuse_switch: bool,
    fail_commands: bool,
}

impl MockDevice {
    fn failure(&self) -> DeviceResult<()> {
        if self.fail_commands {
            Err(DeviceError::Timeout(500))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CanDevice for MockDevice {
    fn attach(&mut self, _sink: InboundSender) {}

    async fn open(&mut self) -> DeviceResult<bool> {
        Ok(true)
    }

    async fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    async fn send_frame(&mut self, frame: &CanFrame) -> DeviceResult<()> {
        self.calls.push(Call::Send(frame.clone()));
        self.failure()
    }

    async fn set_power(&mut self, on: bool) -> DeviceResult<bool> {
        self.calls.push(Call::SetPower(on));
        self.failure().map(|_| !self.refuse_switch)
    }

    async fn set_termination(&mut self, on: bool) -> DeviceResult<bool> {
        self.calls.push(Call::SetTermination(on));
        self.failure().map(|_| !self.refuse_switch)
    }

    async fn extended_status(&mut self) -> DeviceResult<ExtendedStatus> {
        self.calls.push(Call::ExtendedStatus);
        self.failure().map(|_| self.status)
    }

    async fn version(&mut self) -> DeviceResult<VersionInfo> {
        self.calls.push(Call::Version);
        self.failure().map(|_| VersionInfo {
            hardware_version: "1.0".into(),
            software_version: "2.3".into(),
        })
    }
}

struct ScriptedKeys(VecDeque<Key>);

impl ScriptedKeys {
    fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        Self(keys.into_iter().collect())
    }
}

impl KeySource for ScriptedKeys {
    fn poll_key(&mut self) -> io::Result<Option<Key>> {
        Ok(self.0.pop_front())
    }
}

type TestSession = Session<MockDevice, ScriptedKeys, Vec<u8>>;

struct Harness {
    session: TestSession,
    console: Arc<Console<Vec<u8>>>,
    sink: InboundSender,
}

fn harness(device: MockDevice, keys: impl IntoIterator<Item = Key>) -> Harness {
    let console = Arc::new(Console::new(Vec::new(), false));
    let (sink, inbound) = inbound::channel();
    let session = Session::new(device, ScriptedKeys::new(keys), inbound, console.clone())
        .with_idle_interval(Duration::ZERO);
    Harness {
        session,
        console,
        sink,
    }
}

impl Harness {
    /// Output lines with the `HH:MM:SS.mmm ` prefix removed where present.
    fn lines(&self) -> Vec<String> {
        let text = self
            .console
            .with_writer(|w| String::from_utf8(w.clone()).unwrap());
        text.split("\r\n")
            .filter(|l| !l.is_empty())
            .map(|l| match l.as_bytes().get(12) {
                Some(b' ') if l.as_bytes()[2] == b':' => l[13..].to_string(),
                _ => l.to_string(),
            })
            .collect()
    }

    fn calls(&self) -> &[Call] {
        &self.session.device().calls
    }

    async fn press(&mut self, keys: &[Key]) {
        for &key in keys {
            self.session.handle_key(key).await.unwrap();
        }
    }
}

fn typed(text: &str) -> Vec<Key> {
    text.chars().map(Key::Char).collect()
}

#[tokio::test]
async fn test_quit_ends_loop() {
    let mut h = harness(MockDevice::default(), [Key::Char('q')]);
    h.session.run().await.unwrap();
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_interrupt_ends_loop() {
    let mut h = harness(MockDevice::default(), [Key::Other, Key::Interrupt]);
    h.session.run().await.unwrap();
}

#[tokio::test]
async fn test_insert_then_t_forces_termination_on() {
    let mut h = harness(
        MockDevice::default(),
        [Key::Insert, Key::Char('t'), Key::Char('Q')],
    );
    h.session.run().await.unwrap();
    assert_eq!(h.calls(), &[Call::SetTermination(true)]);
    assert_eq!(h.lines(), vec!["Termination turned on"]);
}

#[tokio::test]
async fn test_delete_then_p_forces_power_off() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Delete, Key::Char('P')]).await;
    assert_eq!(h.calls(), &[Call::SetPower(false)]);
    assert_eq!(h.lines(), vec!["Power turned off"]);
}

#[tokio::test]
async fn test_plain_t_queries_status() {
    let device = MockDevice {
        status: ExtendedStatus {
            is_valid: true,
            power_enabled: false,
            termination_enabled: true,
        },
        ..Default::default()
    };
    let mut h = harness(device, []);
    h.press(&[Key::Char('t'), Key::Char('p')]).await;
    assert_eq!(h.calls(), &[Call::ExtendedStatus, Call::ExtendedStatus]);
    assert_eq!(h.lines(), vec!["Termination is on", "Power is off"]);
}

#[tokio::test]
async fn test_invalid_status_is_reported() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('t')]).await;
    assert_eq!(h.lines(), vec!["Cannot return termination status."]);
}

#[tokio::test]
async fn test_other_key_clears_modifier() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Insert]).await;
    assert_eq!(h.session.modifier(), Modifier::Insert);
    h.press(&[Key::Char('x')]).await;
    assert_eq!(h.session.modifier(), Modifier::None);
    h.press(&[Key::Char('t')]).await;
    assert_eq!(h.calls(), &[Call::ExtendedStatus]);
}

#[tokio::test]
async fn test_modifier_applies_to_one_command_only() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Insert, Key::Char('p'), Key::Char('p')]).await;
    assert_eq!(h.calls(), &[Call::SetPower(true), Call::ExtendedStatus]);
}

#[tokio::test]
async fn test_last_modifier_wins() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Insert, Key::Delete]).await;
    assert_eq!(h.session.modifier(), Modifier::Delete);
    h.press(&[Key::Char('t')]).await;
    assert_eq!(h.calls(), &[Call::SetTermination(false)]);
}

#[tokio::test]
async fn test_refused_switch_is_reported() {
    let device = MockDevice {
        refuse_switch: true,
        ..Default::default()
    };
    let mut h = harness(device, []);
    h.press(&[Key::Insert, Key::Char('p')]).await;
    assert_eq!(h.lines(), vec!["Cannot turn power on"]);
}

#[tokio::test]
async fn test_device_errors_do_not_stop_the_loop() {
    let device = MockDevice {
        fail_commands: true,
        ..Default::default()
    };
    let mut h = harness(
        device,
        [
            Key::Delete,
            Key::Char('t'),
            Key::Char('v'),
            Key::Char('s'),
            Key::Char('q'),
        ],
    );
    h.session.run().await.unwrap();
    assert_eq!(
        h.calls(),
        &[
            Call::SetTermination(false),
            Call::Version,
            Call::Send(CanFrame::new(0, &[]).unwrap()),
        ]
    );
    let lines = h.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Cannot turn termination off: "));
    assert!(lines[1].starts_with("Cannot read version: "));
    assert!(lines[2].starts_with("Cannot send message: "));
}

#[tokio::test]
async fn test_status_key_sends_empty_frame() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('S')]).await;
    assert_eq!(h.calls(), &[Call::Send(CanFrame::new(0, &[]).unwrap())]);
}

#[tokio::test]
async fn test_version_lines() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('v')]).await;
    assert_eq!(h.lines(), vec!["Hardware 1.0", "Software 2.3"]);
}

#[tokio::test]
async fn test_enter_prints_blank_line() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Enter]).await;
    let raw = h.console.with_writer(|w| w.clone());
    assert_eq!(raw, b"\r\n");
}

#[tokio::test]
async fn test_edit_mode_sends_composed_frame() {
    let mut keys = vec![Key::Char('e')];
    keys.extend(typed("1A2#0B"));
    keys.push(Key::Enter);
    keys.push(Key::Char('q'));
    let mut h = harness(MockDevice::default(), keys);
    h.session.run().await.unwrap();

    assert_eq!(
        h.calls(),
        &[Call::Send(CanFrame::new(0x1A2, &[0x0B]).unwrap())]
    );
    let lines = h.lines();
    assert_eq!(lines[0], "Entering edit mode; <Escape> to exit; <Enter> to apply, # splits data");
    assert_eq!(lines[1], "1A2#0B");
}

#[tokio::test]
async fn test_edit_mode_quit_key_is_not_a_command() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('e')]).await;
    let step = h.session.handle_key(Key::Char('q')).await.unwrap();
    assert_eq!(step, Step::Continue);
    assert!(matches!(h.session.mode(), Mode::Edit(_)));
}

#[tokio::test]
async fn test_edit_mode_backspace_and_escape() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('e')]).await;
    h.press(&typed("12")).await;
    h.press(&[Key::Backspace, Key::Escape]).await;
    assert!(matches!(h.session.mode(), Mode::Normal));
    assert!(h.calls().is_empty());
    let raw = h
        .console
        .with_writer(|w| String::from_utf8(w.clone()).unwrap());
    assert!(raw.ends_with("12\x08 \x08\r\n"));
}

#[tokio::test]
async fn test_ctrl_c_leaves_edit_mode_without_quitting() {
    let mut keys = vec![Key::Char('e')];
    keys.extend(typed("123"));
    keys.extend([Key::Interrupt, Key::Char('S'), Key::Interrupt]);
    let mut h = harness(MockDevice::default(), keys);
    h.session.run().await.unwrap();
    assert!(matches!(h.session.mode(), Mode::Normal));
    assert_eq!(h.calls(), &[Call::Send(CanFrame::new(0, &[]).unwrap())]);
}

#[tokio::test]
async fn test_edit_mode_parse_error_sends_nothing() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('e')]).await;
    h.press(&typed("1#0")).await;
    h.press(&[Key::Enter]).await;
    assert!(matches!(h.session.mode(), Mode::Normal));
    assert!(h.calls().is_empty());
    assert_eq!(h.lines().last().unwrap(), "Odd number of hexadecimal digits.");
}

#[tokio::test]
async fn test_edit_mode_empty_buffer_is_silent() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('e'), Key::Enter]).await;
    assert!(matches!(h.session.mode(), Mode::Normal));
    assert!(h.calls().is_empty());
    assert_eq!(h.lines().len(), 1);
}

#[tokio::test]
async fn test_edit_mode_returns_to_normal_after_failed_send() {
    let device = MockDevice {
        fail_commands: true,
        ..Default::default()
    };
    let mut h = harness(device, []);
    h.press(&[Key::Char('e')]).await;
    h.press(&typed("7FF")).await;
    h.press(&[Key::Enter]).await;
    assert!(matches!(h.session.mode(), Mode::Normal));
    assert_eq!(h.calls(), &[Call::Send(CanFrame::new(0x7FF, &[]).unwrap())]);
}

#[tokio::test]
async fn test_received_frames_render_in_order() {
    let mut h = harness(MockDevice::default(), []);
    h.sink.push(CanFrame::new(0x100, &[0x01]).unwrap());
    h.sink.push(CanFrame::new(0x12345678, &[]).unwrap());

    assert!(h.session.drain_one().unwrap());
    assert!(h.session.drain_one().unwrap());
    assert!(!h.session.drain_one().unwrap());

    let lines = h.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(" 100 1 01"));
    assert!(lines[1].ends_with(" 12345678 0"));
}

#[tokio::test]
async fn test_frames_wait_while_editing() {
    let mut h = harness(MockDevice::default(), []);
    h.press(&[Key::Char('e')]).await;
    h.sink.push(CanFrame::new(0x100, &[]).unwrap());
    assert!(!h.session.drain_one().unwrap());
    h.press(&[Key::Escape]).await;
    assert!(h.session.drain_one().unwrap());
}

#[tokio::test]
async fn test_run_drains_frames_between_keys() {
    let keys = [Key::Other, Key::Other, Key::Char('q')];
    let mut h = harness(MockDevice::default(), keys);
    for id in 1..=2 {
        h.sink.push(CanFrame::new(id, &[]).unwrap());
    }
    h.session.run().await.unwrap();
    let lines = h.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(" 001 0"));
    assert!(lines[1].ends_with(" 002 0"));
}
