pub mod can;
pub mod compose;
pub mod config;
pub mod device;
pub mod error;
pub mod inbound;
pub mod keys;
pub mod render;
pub mod session;
pub mod slcan;

pub use can::CanFrame;
pub use device::{CanDevice, ExtendedStatus, VersionInfo};
pub use error::{ComposeError, DeviceError, FrameError};
pub use inbound::{InboundReceiver, InboundSender, TimestampedFrame};
pub use render::Console;
pub use session::Session;
pub use slcan::SlcanDevice;
