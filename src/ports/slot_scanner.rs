use crate::error::DeviceError;

/// Capability to re-enumerate token slots
///
/// Some providers only notice a reinserted token after the slot list has
/// been refreshed, so recovery always rescans before rediscovery.
pub trait SlotScanner {
    fn rescan_slots(&self) -> Result<(), DeviceError>;
}
