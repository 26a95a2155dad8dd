#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;
pub mod sysfs;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::{MockGpioBackend, MockLine, MockSlotStore, MockTransport};
pub use sysfs::{DeviceFileTransport, SysfsSlotStore};
