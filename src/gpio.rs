use std::ops::Not;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{Edge, PinConfig};
use crate::error::HalError;

/// Net disagreeing samples needed before [`DebounceFilter`] commits.
pub const DEBOUNCE_THRESHOLD: u32 = 10;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    Low,
    High,
}

impl From<bool> for Signal {
    fn from(high: bool) -> Self {
        if high { Signal::High } else { Signal::Low }
    }
}

impl Not for Signal {
    type Output = Signal;

    fn not(self) -> Signal {
        match self {
            Signal::Low => Signal::High,
            Signal::High => Signal::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InterruptEvent {
    pub pin: String,
    pub edge: Edge,
    pub timestamp_ms: u64,
}

impl InterruptEvent {
    pub fn new(pin: impl Into<String>, edge: Edge) -> Self {
        Self {
            pin: pin.into(),
            edge,
            timestamp_ms: epoch_millis(),
        }
    }
}

/// Receives interrupt events from a [`DigitalInput`].
///
/// Hardware edges are delivered on the line's watcher thread. A listener must
/// not enable or disable interrupts on the input it is registered with.
pub trait InterruptListener: Send + Sync {
    fn interrupt_request(&self, event: &InterruptEvent) -> Result<(), HalError>;
}

impl<F> InterruptListener for F
where
    F: Fn(&InterruptEvent) -> Result<(), HalError> + Send + Sync,
{
    fn interrupt_request(&self, event: &InterruptEvent) -> Result<(), HalError> {
        self(event)
    }
}

/// Callback a line uses to hand raw edges back to its input.
pub type EdgeSink = Arc<dyn Fn(Edge) + Send + Sync>;

/// Raw signal source plus the OS-level edge wakeup hooks of one line.
pub trait InputLine: Send + Sync {
    fn read(&self) -> Result<Signal, HalError>;
    fn enable_edges(&self, sink: EdgeSink) -> Result<(), HalError>;
    fn disable_edges(&self) -> Result<(), HalError>;
}

pub trait OutputLine: Send + Sync {
    fn write(&self, signal: Signal) -> Result<(), HalError>;
}

pub trait GpioBackend: Send + Sync {
    fn input_line(&self, name: &str, pin: &PinConfig) -> Result<Arc<dyn InputLine>, HalError>;
    fn output_line(&self, name: &str, pin: &PinConfig) -> Result<Arc<dyn OutputLine>, HalError>;
}

/// Majority-vote debounce counter. Agreeing samples pull the counter towards
/// zero, disagreeing samples push it up; reaching [`DEBOUNCE_THRESHOLD`]
/// commits the new level.
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    stable: Signal,
    counter: u32,
}

impl DebounceFilter {
    pub fn new(initial: Signal) -> Self {
        Self {
            stable: initial,
            counter: 0,
        }
    }

    pub fn stable(&self) -> Signal {
        self.stable
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Feeds one raw sample. Returns the new level when a transition commits.
    pub fn sample(&mut self, reading: Signal) -> Option<Signal> {
        if reading == self.stable {
            self.counter = self.counter.saturating_sub(1);
        } else {
            self.counter += 1;
        }

        if self.counter >= DEBOUNCE_THRESHOLD {
            self.counter = 0;
            self.stable = reading;
            return Some(reading);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputSettings {
    pub trigger: Edge,
    pub debounce_ms: u64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            trigger: Edge::Both,
            debounce_ms: 0,
        }
    }
}

impl From<&PinConfig> for InputSettings {
    fn from(cfg: &PinConfig) -> Self {
        Self {
            trigger: cfg.trigger,
            debounce_ms: cfg.debounce_ms,
        }
    }
}

/// Digital input feature with interrupt dispatch and debounced reads.
///
/// Listeners are notified in registration order. Dispatch iterates over a
/// snapshot taken under the listener lock, so listeners may add or remove
/// listeners (including themselves) while being notified; such changes apply
/// from the next event on.
pub struct DigitalInput {
    pin: String,
    line: Arc<dyn InputLine>,
    settings: RwLock<InputSettings>,
    interrupts_enabled: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn InterruptListener>>>,
    last_edge: Mutex<Option<Instant>>,
    weak_self: Weak<DigitalInput>,
}

impl DigitalInput {
    pub fn new(
        pin: impl Into<String>,
        line: Arc<dyn InputLine>,
        settings: InputSettings,
    ) -> Arc<Self> {
        let pin = pin.into();
        Arc::new_cyclic(|weak_self| Self {
            pin,
            line,
            settings: RwLock::new(settings),
            interrupts_enabled: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            last_edge: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> String {
        format!("Digital Input on Pin {}", self.pin)
    }

    pub fn pin_name(&self) -> &str {
        &self.pin
    }

    pub fn read(&self) -> Result<Signal, HalError> {
        self.line.read()
    }

    /// Samples the line until a transition commits or `timeout` elapses, in
    /// which case the level read at the start is returned.
    pub fn read_debounced(&self, timeout: Duration) -> Result<Signal, HalError> {
        let start = Instant::now();
        let mut filter = DebounceFilter::new(self.line.read()?);

        while start.elapsed() < timeout {
            if let Some(committed) = filter.sample(self.line.read()?) {
                return Ok(committed);
            }
        }
        Ok(filter.stable())
    }

    pub fn set_interrupt_trigger(&self, edge: Edge) {
        self.settings.write().trigger = edge;
    }

    pub fn interrupt_trigger(&self) -> Edge {
        self.settings.read().trigger
    }

    pub fn set_interrupt_debounce_ms(&self, debounce_ms: u64) {
        self.settings.write().debounce_ms = debounce_ms;
    }

    pub fn interrupt_debounce_ms(&self) -> u64 {
        self.settings.read().debounce_ms
    }

    pub fn settings(&self) -> InputSettings {
        *self.settings.read()
    }

    pub fn add_interrupt_listener(&self, listener: Arc<dyn InterruptListener>) {
        self.listeners.lock().push(listener);
    }

    /// Removes the first registration of `listener`.
    pub fn remove_interrupt_listener(&self, listener: &Arc<dyn InterruptListener>) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(idx) => {
                listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear_interrupt_listeners(&self) {
        self.listeners.lock().clear();
    }

    pub fn interrupt_listeners(&self) -> Vec<Arc<dyn InterruptListener>> {
        self.listeners.lock().clone()
    }

    pub fn are_interrupts_enabled(&self) -> bool {
        self.interrupts_enabled.load(Ordering::Acquire)
    }

    pub fn enable_interrupts(&self) -> Result<(), HalError> {
        let weak = self.weak_self.clone();
        let sink: EdgeSink = Arc::new(move |edge| {
            if let Some(input) = weak.upgrade() {
                input.signal_edge(edge);
            }
        });
        self.line.enable_edges(sink)?;
        self.set_interrupts_flag(true);
        debug!("interrupts enabled on pin {}", self.pin);
        Ok(())
    }

    pub fn disable_interrupts(&self) -> Result<(), HalError> {
        self.line.disable_edges()?;
        self.set_interrupts_flag(false);
        debug!("interrupts disabled on pin {}", self.pin);
        Ok(())
    }

    pub(crate) fn release_interrupts(&self) -> Result<(), HalError> {
        self.set_interrupts_flag(false);
        self.line.disable_edges()
    }

    // flipped under the listener lock: no dispatch starts once a disable returns
    fn set_interrupts_flag(&self, enabled: bool) {
        let _listeners = self.listeners.lock();
        self.interrupts_enabled.store(enabled, Ordering::Release);
    }

    /// Entry point for raw edges reported by the line. Edges that do not match
    /// the trigger, or that fall inside the debounce window of the last
    /// delivered edge, are dropped.
    pub fn signal_edge(&self, edge: Edge) {
        let settings = self.settings();
        if !settings.trigger.matches(edge) {
            return;
        }

        if settings.debounce_ms > 0 {
            let now = Instant::now();
            let mut last = self.last_edge.lock();
            if let Some(prev) = *last
                && now.duration_since(prev) < Duration::from_millis(settings.debounce_ms)
            {
                return;
            }
            *last = Some(now);
        }

        self.fire_interrupt_event(&InterruptEvent::new(self.pin.clone(), edge));
    }

    /// Notifies every listener unless interrupts are disabled, in which case
    /// the event is dropped. A failing listener is logged and skipped.
    pub fn fire_interrupt_event(&self, event: &InterruptEvent) {
        let listeners = {
            let listeners = self.listeners.lock();
            if !self.are_interrupts_enabled() {
                return;
            }
            listeners.clone()
        };
        for listener in &listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.interrupt_request(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "interrupt listener on pin {} failed for {:?} edge: {e}",
                    event.pin, event.edge
                ),
                Err(_) => warn!(
                    "interrupt listener on pin {} panicked for {:?} edge",
                    event.pin, event.edge
                ),
            }
        }
    }
}

pub struct DigitalOutput {
    pin: String,
    line: Arc<dyn OutputLine>,
    level: Mutex<Signal>,
}

impl DigitalOutput {
    pub fn new(pin: impl Into<String>, line: Arc<dyn OutputLine>) -> Arc<Self> {
        Arc::new(Self {
            pin: pin.into(),
            line,
            level: Mutex::new(Signal::Low),
        })
    }

    pub fn name(&self) -> String {
        format!("Digital Output on Pin {}", self.pin)
    }

    pub fn pin_name(&self) -> &str {
        &self.pin
    }

    pub fn write(&self, signal: Signal) -> Result<(), HalError> {
        let mut level = self.level.lock();
        self.line.write(signal)?;
        *level = signal;
        Ok(())
    }

    pub fn high(&self) -> Result<(), HalError> {
        self.write(Signal::High)
    }

    pub fn low(&self) -> Result<(), HalError> {
        self.write(Signal::Low)
    }

    pub fn toggle(&self) -> Result<Signal, HalError> {
        let mut level = self.level.lock();
        let next = !*level;
        self.line.write(next)?;
        *level = next;
        Ok(next)
    }

    pub fn level(&self) -> Signal {
        *self.level.lock()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
