///
/// keys.rs
///
/// Keystroke model and the non-blocking terminal key source.
///
use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Backspace,
    Insert,
    Delete,
    /// Ctrl+C; raw mode swallows the signal so it arrives as a key.
    Interrupt,
    Other,
}

impl From<KeyEvent> for Key {
    fn from(ev: KeyEvent) -> Self {
        match ev.code {
            KeyCode::Char('c') if ev.modifiers.contains(KeyModifiers::CONTROL) => Key::Interrupt,
            KeyCode::Char(c) => Key::Char(c),
            KeyCode::Enter => Key::Enter,
            KeyCode::Esc => Key::Escape,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Insert => Key::Insert,
            KeyCode::Delete => Key::Delete,
            _ => Key::Other,
        }
    }
}

/// Source of operator keystrokes. `poll_key` must return immediately.
pub trait KeySource {
    fn poll_key(&mut self) -> io::Result<Option<Key>>;
}

/// Reads keys from the controlling terminal through crossterm.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn poll_key(&mut self) -> io::Result<Option<Key>> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind == KeyEventKind::Press {
                    return Ok(Some(Key::from(ev)));
                }
            }
        }
        Ok(None)
    }
}

/// Keeps the terminal in raw mode until dropped.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            log::warn!("failed to restore terminal mode: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_event_mapping() {
        let key = |code, modifiers| Key::from(KeyEvent::new(code, modifiers));
        assert_eq!(key(KeyCode::Char('t'), KeyModifiers::NONE), Key::Char('t'));
        assert_eq!(key(KeyCode::Char('T'), KeyModifiers::SHIFT), Key::Char('T'));
        assert_eq!(key(KeyCode::Char('c'), KeyModifiers::CONTROL), Key::Interrupt);
        assert_eq!(key(KeyCode::Insert, KeyModifiers::NONE), Key::Insert);
        assert_eq!(key(KeyCode::Delete, KeyModifiers::NONE), Key::Delete);
        assert_eq!(key(KeyCode::Esc, KeyModifiers::NONE), Key::Escape);
        assert_eq!(key(KeyCode::F(1), KeyModifiers::NONE), Key::Other);
    }
}
