///
/// inbound.rs
///
/// Hand-off of frames received by the device reader thread to the session loop.
///
/// Any number of producers may push from any thread; a single consumer drains the
/// queue in the order the pushes completed. The queue is unbounded, so pushing never
/// blocks the device reader.
///
use chrono::{DateTime, Local};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::can::CanFrame;

/// A received frame paired with the moment the device reported it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampedFrame {
    pub frame: CanFrame,
    pub received_at: DateTime<Local>,
}

/// Creates a connected producer/consumer pair.
pub fn channel() -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboundSender { tx }, InboundReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct InboundSender {
    tx: UnboundedSender<TimestampedFrame>,
}

impl InboundSender {
    /// Queues `frame`, stamped with the current local time.
    pub fn push(&self, frame: CanFrame) {
        self.push_at(frame, Local::now());
    }

    pub fn push_at(&self, frame: CanFrame, received_at: DateTime<Local>) {
        // Only fails once the session has gone away; nobody is left to show the frame.
        if self
            .tx
            .send(TimestampedFrame { frame, received_at })
            .is_err()
        {
            log::debug!("inbound frame dropped, session closed");
        }
    }
}

#[derive(Debug)]
pub struct InboundReceiver {
    rx: UnboundedReceiver<TimestampedFrame>,
}

impl InboundReceiver {
    /// Oldest queued frame, or `None` when the queue is currently empty.
    pub fn try_pop(&mut self) -> Option<TimestampedFrame> {
        match self.rx.try_recv() {
            Ok(entry) => Some(entry),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
