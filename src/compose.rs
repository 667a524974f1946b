///
/// compose.rs
///
/// Edit-mode composer: collects hex keystrokes and turns them into a frame.
///
/// Input format is `<hexId>[#<hexBytes>]`, spaces ignored, e.g. `1A2#0B` or `7FF`.
///
use crate::can::{CanFrame, MAX_DATA_LEN, MAX_EXTENDED_ID};
use crate::error::ComposeError;
use crate::keys::Key;

/// What the session should do after the composer saw a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditAction {
    /// Character accepted; echo it.
    Echo(char),
    /// Last character removed; erase it on screen.
    Erase,
    /// Key had no effect.
    Ignored,
    /// Composition abandoned.
    Cancel,
    /// Composition finished. `Ok(None)` means the buffer was empty.
    Submit(Result<Option<CanFrame>, ComposeError>),
}

#[derive(Debug, Default)]
pub struct HexComposer {
    buffer: String,
}

impl HexComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn handle_key(&mut self, key: Key) -> EditAction {
        match key {
            Key::Escape | Key::Interrupt => {
                self.buffer.clear();
                EditAction::Cancel
            }
            Key::Enter => {
                let result = parse_frame(&self.buffer);
                self.buffer.clear();
                EditAction::Submit(result)
            }
            Key::Backspace => {
                if self.buffer.pop().is_some() {
                    EditAction::Erase
                } else {
                    EditAction::Ignored
                }
            }
            Key::Char(c) if c.is_ascii_hexdigit() || c == '#' => {
                self.buffer.push(c);
                EditAction::Echo(c)
            }
            _ => EditAction::Ignored,
        }
    }
}

/// Parses composer text into a frame. Blank text yields `Ok(None)`.
pub fn parse_frame(text: &str) -> Result<Option<CanFrame>, ComposeError> {
    let text: String = text.chars().filter(|&c| c != ' ').collect();
    if text.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = text.split('#').collect();
    if parts.len() > 2 {
        return Err(ComposeError::TooManySegments);
    }
    let id_text = parts[0];
    let data_text = parts.get(1).copied().unwrap_or("");

    let id = parse_id(id_text)?;
    let data = parse_data(data_text)?;

    CanFrame::new(id, &data)
        .map(Some)
        .map_err(|_| ComposeError::IdOutOfRange)
}

fn parse_id(text: &str) -> Result<u32, ComposeError> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ComposeError::IdOutOfRange);
    }
    match u32::from_str_radix(text, 16) {
        Ok(id) if id <= MAX_EXTENDED_ID => Ok(id),
        _ => Err(ComposeError::IdOutOfRange),
    }
}

fn parse_data(text: &str) -> Result<Vec<u8>, ComposeError> {
    let digits: Vec<char> = text.chars().collect();
    if digits.len() % 2 != 0 {
        return Err(ComposeError::OddDigitCount);
    }

    let mut data = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        let (hi, lo) = match (pair[0].to_digit(16), pair[1].to_digit(16)) {
            (Some(hi), Some(lo)) => (hi, lo),
            _ => return Err(ComposeError::InvalidHexDigit),
        };
        data.push(((hi << 4) | lo) as u8);
    }

    if data.len() > MAX_DATA_LEN {
        return Err(ComposeError::PayloadTooLong);
    }
    Ok(data)
}
