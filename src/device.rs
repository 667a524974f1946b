///
/// device.rs
///
/// The device facade the session drives, plus the snapshots it returns.
///
use async_trait::async_trait;

use crate::can::CanFrame;
use crate::error::{DeviceError, DeviceResult};
use crate::inbound::InboundSender;

/// Adapter state read with the extended status query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtendedStatus {
    /// False when the adapter did not understand the query.
    pub is_valid: bool,
    pub power_enabled: bool,
    pub termination_enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub hardware_version: String,
    pub software_version: String,
}

#[async_trait]
pub trait CanDevice: Send {
    /// Routes every frame the adapter reports into `sink`. Call before `open`.
    fn attach(&mut self, sink: InboundSender);

    /// Opens the adapter. `Ok(false)` means something answered but it is not an SLCAN device.
    async fn open(&mut self) -> DeviceResult<bool>;

    /// Closes the adapter and releases the transport. Safe to call more than once.
    async fn close(&mut self) -> DeviceResult<()>;

    /// Write a single CAN frame to the bus
    async fn send_frame(&mut self, frame: &CanFrame) -> DeviceResult<()>;

    /// Switches bus power. `Ok(false)` means the adapter refused.
    async fn set_power(&mut self, on: bool) -> DeviceResult<bool>;

    /// Switches the bus terminator. `Ok(false)` means the adapter refused.
    async fn set_termination(&mut self, on: bool) -> DeviceResult<bool>;

    async fn extended_status(&mut self) -> DeviceResult<ExtendedStatus>;

    async fn version(&mut self) -> DeviceResult<VersionInfo>;
}

/// Maps the outcome of `CanDevice::open` on `port` to the error that ends the program,
/// if any.
pub fn setup_result(outcome: DeviceResult<bool>, port: &str) -> DeviceResult<()> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(DeviceError::NotSlcanDevice(port.to_string())),
        Err(e @ DeviceError::SetupFailed(_)) => Err(e),
        Err(e) => Err(DeviceError::SetupFailed(e.to_string())),
    }
}
