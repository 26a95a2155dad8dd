use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::HalError;

const DEFAULT_SLOTS_PATH: &str = "/sys/devices/bone_capemgr.9/slots";

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Default for Edge {
    fn default() -> Self {
        Edge::Both
    }
}

impl Edge {
    /// Whether an observed transition passes this trigger selector.
    pub fn matches(self, observed: Edge) -> bool {
        match self {
            Edge::Rising => observed == Edge::Rising,
            Edge::Falling => observed == Edge::Falling,
            Edge::Both => matches!(observed, Edge::Rising | Edge::Falling),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PinMode {
    #[default]
    None,
    Input,
    Output,
}

fn default_interrupts() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PinConfig {
    pub chip: String,
    pub line: u32,
    #[serde(default)]
    pub mode: PinMode,
    #[serde(default)]
    pub trigger: Edge,
    #[serde(default)]
    pub debounce_ms: u64,
    #[serde(default = "default_interrupts")]
    pub interrupts: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UartConfig {
    pub device: String,
    pub slot: String,
    pub rx: Option<String>,
    pub tx: Option<String>,
}

fn default_slots_path() -> String {
    DEFAULT_SLOTS_PATH.to_string()
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_event_history_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BoardConfig {
    #[serde(default = "default_slots_path")]
    pub slots_path: String,
    #[serde(default)]
    pub pins: FxHashMap<String, PinConfig>,
    #[serde(default)]
    pub uarts: FxHashMap<String, UartConfig>,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,
}

impl BoardConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, HalError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| HalError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| HalError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HalError> {
        for (name, uart) in &self.uarts {
            if uart.rx.is_none() && uart.tx.is_none() {
                return Err(HalError::Config(format!(
                    "UART {name} needs at least one of rx or tx"
                )));
            }
            for pin in uart.rx.iter().chain(uart.tx.iter()) {
                if !self.pins.contains_key(pin) {
                    return Err(HalError::Config(format!(
                        "UART {name} references unknown pin {pin}"
                    )));
                }
            }
        }
        Ok(())
    }
}
