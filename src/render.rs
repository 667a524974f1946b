///
/// render.rs
///
/// Turns frames and status messages into colored text lines and writes them to the
/// operator's terminal. Every line goes through one lock so concurrent writers never
/// interleave mid-line.
///
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use crate::can::CanFrame;
use crate::inbound::TimestampedFrame;

const TIMESTAMP_COLOR: Color = Color::DarkGrey;
const ID_COLOR: Color = Color::Cyan;
const LENGTH_COLOR: Color = Color::Blue;
const DATA_COLOR: Color = Color::White;
const REMOTE_COLOR: Color = Color::Magenta;

/// Kind of a plain (non-frame) message line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Ok,
    Error,
}

impl LineKind {
    fn color(self) -> Color {
        match self {
            LineKind::Info => Color::Yellow,
            LineKind::Ok => Color::Green,
            LineKind::Error => Color::Red,
        }
    }
}

/// A run of text drawn in one color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub color: Option<Color>,
    pub text: String,
}

impl Segment {
    fn colored(color: Color, text: impl Into<String>) -> Self {
        Self {
            color: Some(color),
            text: text.into(),
        }
    }
}

/// One rendered output line, without the line terminator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Line {
    segments: Vec<Segment>,
}

impl Line {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The line with all color information dropped.
    pub fn plain_text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    fn push(&mut self, color: Color, text: impl Into<String>) {
        self.segments.push(Segment::colored(color, text));
    }
}

pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format("%H:%M:%S%.3f").to_string()
}

/// Renders a frame as
/// `HH:MM:SS.mmm <raw mirror> <id> <len>[ <byte>...][ R]`.
pub fn render_frame(frame: &CanFrame, ts: &DateTime<Local>) -> Line {
    let mut line = Line::default();
    line.push(
        TIMESTAMP_COLOR,
        format!("{} {}", format_timestamp(ts), frame),
    );

    let id = if frame.is_extended() {
        format!(" {:08X}", frame.id())
    } else {
        format!(" {:03X}", frame.id())
    };
    line.push(ID_COLOR, id);
    line.push(LENGTH_COLOR, format!(" {}", frame.len()));

    if !frame.data().is_empty() {
        let bytes: String = frame.data().iter().map(|b| format!(" {:02X}", b)).collect();
        line.push(DATA_COLOR, bytes);
    }
    if frame.is_rtr() {
        line.push(REMOTE_COLOR, " R");
    }
    line
}

pub fn render_message(kind: LineKind, text: &str, ts: &DateTime<Local>) -> Line {
    let mut line = Line::default();
    line.push(TIMESTAMP_COLOR, format!("{} ", format_timestamp(ts)));
    line.push(kind.color(), text);
    line
}

/// Serialized writer for everything the operator sees.
pub struct Console<W: Write> {
    out: Mutex<W>,
    color: bool,
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out: Mutex::new(out),
            color,
        }
    }

    /// Runs `f` with exclusive access to the underlying writer.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *out)
    }

    pub fn write_line(&self, line: &Line) -> io::Result<()> {
        let color = self.color;
        self.with_writer(|out| {
            for segment in line.segments() {
                match segment.color {
                    Some(c) if color => {
                        queue!(out, SetForegroundColor(c), Print(&segment.text))?
                    }
                    _ => queue!(out, Print(&segment.text))?,
                }
            }
            if color {
                queue!(out, ResetColor)?;
            }
            out.write_all(b"\r\n")?;
            out.flush()
        })
    }

    pub fn blank_line(&self) -> io::Result<()> {
        self.with_writer(|out| {
            out.write_all(b"\r\n")?;
            out.flush()
        })
    }

    /// Writes `text` on its own line in `color`, without a timestamp.
    pub fn banner(&self, color: Color, text: &str) -> io::Result<()> {
        let mut line = Line::default();
        line.push(color, text);
        self.write_line(&line)
    }

    pub fn message(&self, kind: LineKind, text: &str) -> io::Result<()> {
        self.write_line(&render_message(kind, text, &Local::now()))
    }

    pub fn info(&self, text: &str) -> io::Result<()> {
        self.message(LineKind::Info, text)
    }

    pub fn ok(&self, text: &str) -> io::Result<()> {
        self.message(LineKind::Ok, text)
    }

    pub fn error(&self, text: &str) -> io::Result<()> {
        self.message(LineKind::Error, text)
    }

    pub fn frame(&self, entry: &TimestampedFrame) -> io::Result<()> {
        self.write_line(&render_frame(&entry.frame, &entry.received_at))
    }

    /// Echoes one typed character without ending the line.
    pub fn echo(&self, c: char) -> io::Result<()> {
        self.with_writer(|out| {
            queue!(out, Print(c))?;
            out.flush()
        })
    }

    /// Visually removes the last echoed character.
    pub fn erase_last(&self) -> io::Result<()> {
        self.with_writer(|out| {
            out.write_all(b"\x08 \x08")?;
            out.flush()
        })
    }
}

/// `io::Write` end for the logger: each record is written under the console lock, so
/// log output never splits a frame line.
pub struct LogPipe<W: Write> {
    console: Arc<Console<W>>,
}

impl<W: Write> LogPipe<W> {
    pub fn new(console: Arc<Console<W>>) -> Self {
        Self { console }
    }
}

impl<W: Write> Write for LogPipe<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.with_writer(|out| out.write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.with_writer(|out| out.flush())
    }
}
