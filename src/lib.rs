pub mod backend;
pub mod board;
pub mod config;
pub mod error;
pub mod events;
pub mod gpio;
pub mod pin;
pub mod uart;

pub use board::Board;
pub use config::{BoardConfig, Edge, PinConfig, PinMode, UartConfig};
pub use error::HalError;
pub use events::EventBroadcaster;
pub use gpio::{
    DebounceFilter, DigitalInput, DigitalOutput, EdgeSink, GpioBackend, InputLine, InputSettings,
    InterruptEvent, InterruptListener, OutputLine, Signal,
};
pub use pin::{Feature, FeatureKind, Pin};
pub use uart::{SetupState, SlotStore, Transport, UartPinFeature, UartPort, UartSignal};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{
    DeviceFileTransport, MockGpioBackend, MockSlotStore, MockTransport, SysfsSlotStore,
};
