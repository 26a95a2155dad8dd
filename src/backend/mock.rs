use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::config::{Edge, PinConfig};
use crate::error::HalError;
use crate::gpio::{EdgeSink, GpioBackend, InputLine, OutputLine, Signal};
use crate::uart::{SlotStore, Transport};

#[derive(Default)]
pub struct MockGpioBackend {
    lines: RwLock<FxHashMap<String, Arc<MockLine>>>, // keyed by pin name
}

impl MockGpioBackend {
    pub fn line(&self, name: &str) -> Option<Arc<MockLine>> {
        self.lines.read().get(name).cloned()
    }

    fn line_or_insert(&self, name: &str) -> Arc<MockLine> {
        self.lines
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MockLine::default()))
            .clone()
    }
}

impl GpioBackend for MockGpioBackend {
    fn input_line(&self, name: &str, _pin: &PinConfig) -> Result<Arc<dyn InputLine>, HalError> {
        Ok(self.line_or_insert(name))
    }

    fn output_line(&self, name: &str, _pin: &PinConfig) -> Result<Arc<dyn OutputLine>, HalError> {
        Ok(self.line_or_insert(name))
    }
}

struct MockLineState {
    level: Signal,
    samples: VecDeque<Signal>,
    sink: Option<EdgeSink>,
    fail_hooks: bool,
    reads: usize,
    writes: Vec<Signal>,
}

/// In-memory line. Reads drain the scripted samples first, then keep
/// returning the last level.
pub struct MockLine {
    state: Mutex<MockLineState>,
}

impl Default for MockLine {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockLineState {
                level: Signal::Low,
                samples: VecDeque::new(),
                sink: None,
                fail_hooks: false,
                reads: 0,
                writes: Vec::new(),
            }),
        }
    }
}

impl MockLine {
    pub fn push_samples<I: IntoIterator<Item = Signal>>(&self, samples: I) {
        self.state.lock().samples.extend(samples);
    }

    /// Drives the line and reports the resulting edge if edges are enabled.
    pub fn set_level(&self, level: Signal) {
        let sink = {
            let mut state = self.state.lock();
            let old = state.level;
            state.level = level;
            if old == level {
                return;
            }
            state.sink.clone()
        };

        if let Some(sink) = sink {
            sink(match level {
                Signal::High => Edge::Rising,
                Signal::Low => Edge::Falling,
            });
        }
    }

    /// Reports an edge without touching the level, as a bouncing contact would.
    pub fn emit_edge(&self, edge: Edge) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink(edge);
        }
    }

    pub fn fail_interrupt_hooks(&self, fail: bool) {
        self.state.lock().fail_hooks = fail;
    }

    pub fn edges_enabled(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    pub fn level(&self) -> Signal {
        self.state.lock().level
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn writes(&self) -> Vec<Signal> {
        self.state.lock().writes.clone()
    }
}

impl InputLine for MockLine {
    fn read(&self) -> Result<Signal, HalError> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(sample) = state.samples.pop_front() {
            state.level = sample;
        }
        Ok(state.level)
    }

    fn enable_edges(&self, sink: EdgeSink) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_hooks {
            return Err(HalError::Gpio("mock edge enable failed".into()));
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn disable_edges(&self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_hooks {
            return Err(HalError::Gpio("mock edge disable failed".into()));
        }
        state.sink = None;
        Ok(())
    }
}

impl OutputLine for MockLine {
    fn write(&self, signal: Signal) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.level = signal;
        state.writes.push(signal);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSlotStore {
    loaded: Mutex<Vec<String>>,
    load_attempts: AtomicUsize,
    fail: AtomicBool,
}

impl MockSlotStore {
    pub fn with_loaded<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store.loaded.lock().extend(names.into_iter().map(Into::into));
        store
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::Relaxed)
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }
}

impl SlotStore for MockSlotStore {
    fn slot_number(&self, name: &str) -> Result<Option<u32>, HalError> {
        Ok(self
            .loaded
            .lock()
            .iter()
            .position(|s| s == name)
            .map(|idx| idx as u32))
    }

    fn create_slot_if_not_exists(&self, name: &str) -> Result<(), HalError> {
        self.load_attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot load slot {name}"),
            )
            .into());
        }

        let mut loaded = self.loaded.lock();
        if !loaded.iter().any(|s| s == name) {
            loaded.push(name.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockTransportState {
    open: bool,
    device_missing: bool,
    opens: usize,
    closes: usize,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

/// In-memory transport. Clones share state, so a test can keep
/// one clone while the port owns the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_missing(&self, missing: bool) {
        self.state.lock().device_missing = missing;
    }

    pub fn push_rx(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().tx.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is not open")
}

impl Transport for MockTransport {
    fn open(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.device_missing {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        if state.open {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already open",
            ));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(not_open());
        }
        let n = buf.len().min(state.rx.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(not_open());
        }
        state.tx.extend_from_slice(buf);
        Ok(buf.len())
    }
}
