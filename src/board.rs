use std::sync::Arc;

use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::backend::DeviceFileTransport;
use crate::config::{BoardConfig, PinConfig, PinMode, UartConfig};
use crate::error::HalError;
use crate::gpio::{DigitalInput, DigitalOutput, GpioBackend, InputSettings};
use crate::pin::{Feature, FeatureKind, Pin};
use crate::uart::{SlotStore, Transport, UartPort};

/// Every pin and UART port of one board profile. The board owns the pins;
/// ports hold shared references to the pins they mux.
pub struct Board {
    pins: FxHashMap<String, Arc<Pin>>,
    uarts: FxHashMap<String, Arc<UartPort>>,
}

impl Board {
    pub fn new(
        config: &BoardConfig,
        backend: &dyn GpioBackend,
        slots: Arc<dyn SlotStore>,
    ) -> Result<Self, HalError> {
        Self::with_transports(
            config,
            backend,
            slots,
            |_: &str, uart: &UartConfig| -> Box<dyn Transport> {
                Box::new(DeviceFileTransport::new(&uart.device))
            },
        )
    }

    pub fn with_transports<F>(
        config: &BoardConfig,
        backend: &dyn GpioBackend,
        slots: Arc<dyn SlotStore>,
        make_transport: F,
    ) -> Result<Self, HalError>
    where
        F: Fn(&str, &UartConfig) -> Box<dyn Transport>,
    {
        config.validate()?;

        let mut pins = FxHashMap::default();
        for (name, pin_cfg) in &config.pins {
            let pin = Arc::new(Pin::new(name.clone()));
            attach_gpio_feature(&pin, pin_cfg, backend)?;
            pins.insert(name.clone(), pin);
        }

        let lookup = |name: &Option<String>| -> Result<Option<Arc<Pin>>, HalError> {
            match name {
                None => Ok(None),
                Some(n) => pins
                    .get(n)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| HalError::InvalidState(format!("unknown pin {n}"))),
            }
        };

        let mut uarts = FxHashMap::default();
        for (name, uart_cfg) in &config.uarts {
            let port = UartPort::new(
                name.clone(),
                uart_cfg.slot.clone(),
                lookup(&uart_cfg.rx)?,
                lookup(&uart_cfg.tx)?,
                slots.clone(),
                make_transport(name, uart_cfg),
            );
            debug!("registered UART {name} on slot {}", uart_cfg.slot);
            uarts.insert(name.clone(), Arc::new(port));
        }

        info!("board ready: {} pins, {} UART ports", pins.len(), uarts.len());
        Ok(Self { pins, uarts })
    }

    pub fn pin(&self, name: &str) -> Option<&Arc<Pin>> {
        self.pins.get(name)
    }

    pub fn uart(&self, name: &str) -> Option<&Arc<UartPort>> {
        self.uarts.get(name)
    }

    pub fn pins(&self) -> impl Iterator<Item = &Arc<Pin>> {
        self.pins.values()
    }

    pub fn uarts(&self) -> impl Iterator<Item = &Arc<UartPort>> {
        self.uarts.values()
    }

    pub fn digital_inputs(&self) -> Vec<Arc<DigitalInput>> {
        self.pins.values().filter_map(|p| p.digital_input()).collect()
    }
}

fn attach_gpio_feature(
    pin: &Pin,
    cfg: &PinConfig,
    backend: &dyn GpioBackend,
) -> Result<(), HalError> {
    match cfg.mode {
        PinMode::None => {}
        PinMode::Input => {
            let line = backend.input_line(pin.name(), cfg)?;
            let input = DigitalInput::new(pin.name(), line, InputSettings::from(cfg));
            pin.add_feature(Feature::DigitalInput(input.clone()));
            pin.activate_feature(FeatureKind::DigitalInput)?;
            if cfg.interrupts {
                input.enable_interrupts()?;
            } else {
                input.disable_interrupts()?;
            }
        }
        PinMode::Output => {
            let line = backend.output_line(pin.name(), cfg)?;
            pin.add_feature(Feature::DigitalOutput(DigitalOutput::new(pin.name(), line)));
            pin.activate_feature(FeatureKind::DigitalOutput)?;
        }
    }
    Ok(())
}
