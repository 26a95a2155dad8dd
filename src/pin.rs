use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::HalError;
use crate::gpio::{DigitalInput, DigitalOutput};
use crate::uart::UartPinFeature;

/// Roles a physical pin can be muxed into.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureKind {
    DigitalInput,
    DigitalOutput,
    UartRx,
    UartTx,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureKind::DigitalInput => "digital-input",
            FeatureKind::DigitalOutput => "digital-output",
            FeatureKind::UartRx => "uart-rx",
            FeatureKind::UartTx => "uart-tx",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub enum Feature {
    DigitalInput(Arc<DigitalInput>),
    DigitalOutput(Arc<DigitalOutput>),
    Uart(Arc<UartPinFeature>),
}

impl Feature {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::DigitalInput(_) => FeatureKind::DigitalInput,
            Feature::DigitalOutput(_) => FeatureKind::DigitalOutput,
            Feature::Uart(f) => f.signal().feature_kind(),
        }
    }

    /// Name of the pin this instance was built for.
    pub fn pin_name(&self) -> &str {
        match self {
            Feature::DigitalInput(f) => f.pin_name(),
            Feature::DigitalOutput(f) => f.pin_name(),
            Feature::Uart(f) => f.pin_name(),
        }
    }

    /// Same instance, not merely the same kind.
    pub fn ptr_eq(&self, other: &Feature) -> bool {
        match (self, other) {
            (Feature::DigitalInput(a), Feature::DigitalInput(b)) => Arc::ptr_eq(a, b),
            (Feature::DigitalOutput(a), Feature::DigitalOutput(b)) => Arc::ptr_eq(a, b),
            (Feature::Uart(a), Feature::Uart(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn deactivate(&self) {
        if let Feature::DigitalInput(input) = self {
            input.clear_interrupt_listeners();
            if let Err(e) = input.release_interrupts() {
                warn!("failed to release interrupts on {}: {e}", input.pin_name());
            }
        }
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("kind", &self.kind())
            .field("pin", &self.pin_name())
            .finish()
    }
}

#[derive(Default)]
struct PinFeatures {
    registered: FxHashMap<FeatureKind, Feature>,
    active: Option<FeatureKind>,
}

/// A physical pin and the features it can be switched between. Only one
/// feature is active at a time.
pub struct Pin {
    name: String,
    features: RwLock<PinFeatures>,
}

impl Pin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: RwLock::new(PinFeatures::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `feature` under its kind. A different instance of the same
    /// kind that was registered before is deactivated and dropped, listeners
    /// included. Re-adding the installed instance changes nothing.
    pub fn add_feature(&self, feature: Feature) {
        let kind = feature.kind();
        if feature.pin_name() != self.name {
            warn!(
                "feature {kind} built for pin {} added to pin {}",
                feature.pin_name(),
                self.name
            );
        }

        let replaced = {
            let mut features = self.features.write();
            if features
                .registered
                .get(&kind)
                .is_some_and(|current| current.ptr_eq(&feature))
            {
                return;
            }
            let replaced = features.registered.insert(kind, feature);
            if replaced.is_some() && features.active == Some(kind) {
                features.active = None;
            }
            replaced
        };

        if let Some(old) = replaced {
            debug!("replacing {kind} feature on pin {}", self.name);
            old.deactivate();
        }
    }

    /// Makes the registered feature of `kind` the active one on this pin.
    pub fn activate_feature(&self, kind: FeatureKind) -> Result<Feature, HalError> {
        let mut features = self.features.write();
        let feature = features
            .registered
            .get(&kind)
            .cloned()
            .ok_or_else(|| HalError::FeatureNotFound {
                pin: self.name.clone(),
                kind,
            })?;

        match features.active.replace(kind) {
            Some(prev) if prev == kind => {}
            Some(prev) => debug!("pin {} switched from {prev} to {kind}", self.name),
            None => debug!("pin {} activated {kind}", self.name),
        }
        Ok(feature)
    }

    pub fn get_feature(&self, kind: FeatureKind) -> Option<Feature> {
        self.features.read().registered.get(&kind).cloned()
    }

    pub fn has_feature(&self, kind: FeatureKind) -> bool {
        self.features.read().registered.contains_key(&kind)
    }

    pub fn active_kind(&self) -> Option<FeatureKind> {
        self.features.read().active
    }

    pub fn active_feature(&self) -> Option<Feature> {
        let features = self.features.read();
        features
            .active
            .and_then(|kind| features.registered.get(&kind).cloned())
    }

    pub fn is_feature_active(&self, kind: FeatureKind) -> bool {
        self.active_kind() == Some(kind)
    }

    pub fn digital_input(&self) -> Option<Arc<DigitalInput>> {
        match self.get_feature(FeatureKind::DigitalInput) {
            Some(Feature::DigitalInput(input)) => Some(input),
            _ => None,
        }
    }

    pub fn digital_output(&self) -> Option<Arc<DigitalOutput>> {
        match self.get_feature(FeatureKind::DigitalOutput) {
            Some(Feature::DigitalOutput(output)) => Some(output),
            _ => None,
        }
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let features = self.features.read();
        f.debug_struct("Pin")
            .field("name", &self.name)
            .field("registered", &features.registered.keys().collect::<Vec<_>>())
            .field("active", &features.active)
            .finish()
    }
}
