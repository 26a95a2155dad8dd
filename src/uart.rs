use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::HalError;
use crate::pin::{Feature, FeatureKind, Pin};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum UartSignal {
    Rx,
    Tx,
}

impl UartSignal {
    pub fn feature_kind(self) -> FeatureKind {
        match self {
            UartSignal::Rx => FeatureKind::UartRx,
            UartSignal::Tx => FeatureKind::UartTx,
        }
    }
}

/// Marks a pin as carrying one signal of a UART port.
#[derive(Debug)]
pub struct UartPinFeature {
    port: String,
    pin: String,
    signal: UartSignal,
}

impl UartPinFeature {
    pub fn new(port: impl Into<String>, pin: impl Into<String>, signal: UartSignal) -> Self {
        Self {
            port: port.into(),
            pin: pin.into(),
            signal,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port
    }

    pub fn pin_name(&self) -> &str {
        &self.pin
    }

    pub fn signal(&self) -> UartSignal {
        self.signal
    }
}

/// Byte transport under a UART port, usually the device node.
pub trait Transport: Send {
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
    fn is_open(&self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Device-tree overlay slots. Both operations must be idempotent; a created
/// slot persists until removed outside this process.
pub trait SlotStore: Send + Sync {
    fn slot_number(&self, name: &str) -> Result<Option<u32>, HalError>;
    fn create_slot_if_not_exists(&self, name: &str) -> Result<(), HalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupState {
    Uninitialized,
    SettingUp,
    Ready,
}

impl SetupState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SetupState::SettingUp,
            2 => SetupState::Ready,
            _ => SetupState::Uninitialized,
        }
    }
}

pub struct UartPort {
    name: String,
    slot_name: String,
    rx: Option<Arc<Pin>>,
    tx: Option<Arc<Pin>>,
    slots: Arc<dyn SlotStore>,
    transport: Mutex<Box<dyn Transport>>,
    setup_state: AtomicU8,
    setup_done: (Mutex<()>, Condvar),
}

impl UartPort {
    /// Builds the port and registers its RX/TX features on the given pins.
    pub fn new(
        name: impl Into<String>,
        slot_name: impl Into<String>,
        rx: Option<Arc<Pin>>,
        tx: Option<Arc<Pin>>,
        slots: Arc<dyn SlotStore>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let port = Self {
            name: name.into(),
            slot_name: slot_name.into(),
            rx,
            tx,
            slots,
            transport: Mutex::new(transport),
            setup_state: AtomicU8::new(SetupState::Uninitialized as u8),
            setup_done: (Mutex::new(()), Condvar::new()),
        };
        port.add_pin_feature(port.rx.as_deref(), UartSignal::Rx);
        port.add_pin_feature(port.tx.as_deref(), UartSignal::Tx);
        port
    }

    fn add_pin_feature(&self, pin: Option<&Pin>, signal: UartSignal) {
        let Some(pin) = pin else {
            return;
        };
        pin.add_feature(Feature::Uart(Arc::new(UartPinFeature::new(
            self.name.clone(),
            pin.name(),
            signal,
        ))));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_name(&self) -> &str {
        &self.slot_name
    }

    pub fn rx(&self) -> Option<&Arc<Pin>> {
        self.rx.as_ref()
    }

    pub fn tx(&self) -> Option<&Arc<Pin>> {
        self.tx.as_ref()
    }

    pub fn setup_state(&self) -> SetupState {
        SetupState::from_u8(self.setup_state.load(Ordering::Acquire))
    }

    pub fn is_slot_loaded(&self) -> bool {
        match self.slots.slot_number(&self.slot_name) {
            Ok(slot) => slot.is_some(),
            Err(e) => {
                debug!("slot lookup for {} failed: {e}", self.slot_name);
                false
            }
        }
    }

    fn try_begin_setup(&self) -> Option<SetupState> {
        let mut current = self.setup_state.load(Ordering::Acquire);
        loop {
            if current == SetupState::SettingUp as u8 {
                return None;
            }
            match self.setup_state.compare_exchange_weak(
                current,
                SetupState::SettingUp as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(SetupState::from_u8(current)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Loads the slot and switches the RX/TX pins to their UART roles.
    /// Returns immediately if a setup of this port is already running.
    /// Never fails; a slot that did not load shows up on [`UartPort::open`].
    pub fn setup(&self) {
        let Some(previous) = self.try_begin_setup() else {
            debug!("setup of UART {} already in progress", self.name);
            return;
        };

        let next = match self.load_slot_and_pins() {
            Ok(()) => SetupState::Ready,
            Err(e) => {
                warn!("setup of UART {} failed: {e}", self.name);
                previous
            }
        };
        self.setup_state.store(next as u8, Ordering::Release);

        let (lock, cvar) = &self.setup_done;
        let _guard = lock.lock();
        cvar.notify_all();
    }

    /// Blocks while another caller is inside [`UartPort::setup`].
    fn wait_for_setup(&self) {
        let (lock, cvar) = &self.setup_done;
        let mut guard = lock.lock();
        while self.setup_state() == SetupState::SettingUp {
            cvar.wait(&mut guard);
        }
    }

    fn load_slot_and_pins(&self) -> Result<(), HalError> {
        self.slots.create_slot_if_not_exists(&self.slot_name)?;
        if let Some(rx) = &self.rx {
            rx.activate_feature(FeatureKind::UartRx)?;
        }
        if let Some(tx) = &self.tx {
            tx.activate_feature(FeatureKind::UartTx)?;
        }
        Ok(())
    }

    fn pins_attached(&self) -> bool {
        let rx_ok = self
            .rx
            .as_ref()
            .is_none_or(|p| p.is_feature_active(FeatureKind::UartRx));
        let tx_ok = self
            .tx
            .as_ref()
            .is_none_or(|p| p.is_feature_active(FeatureKind::UartTx));
        rx_ok && tx_ok
    }

    pub fn open(&self) -> Result<(), HalError> {
        self.setup();
        self.wait_for_setup();

        if !self.is_slot_loaded() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("slot {} for UART {} is not loaded", self.slot_name, self.name),
            )
            .into());
        }
        if !self.pins_attached() {
            return Err(HalError::InvalidState(format!(
                "UART {} pins are not muxed to the port",
                self.name
            )));
        }

        self.transport.lock().open()?;
        info!("opened UART {}", self.name);
        Ok(())
    }

    pub fn close(&self) -> Result<(), HalError> {
        self.transport.lock().close()?;
        self.teardown();
        Ok(())
    }

    /// Leaves the slot loaded: removing an overlay from the cape manager
    /// wedges the board, so there is nothing to undo here.
    pub fn teardown(&self) {
        warn!(
            "cannot remove UART '{}' (slot {}) from the device tree; it stays loaded",
            self.name, self.slot_name
        );
    }

    pub fn is_open(&self) -> bool {
        self.transport.lock().is_open()
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, HalError> {
        Ok(self.transport.lock().read(buf)?)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, HalError> {
        Ok(self.transport.lock().write(buf)?)
    }
}
