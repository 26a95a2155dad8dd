use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{FairMutex, Mutex};

use crate::config::{Edge, PinConfig};
use crate::error::HalError;
use crate::gpio::{EdgeSink, GpioBackend, InputLine, OutputLine, Signal};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

#[derive(Default)]
pub struct LibgpiodBackend;

impl LibgpiodBackend {
    pub fn new() -> Result<Self, HalError> {
        Ok(Self)
    }
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, HalError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, HalError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| HalError::Gpio(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, HalError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| HalError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| HalError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| HalError::Gpio(format!("request lines: {e}")))
    }
}

fn input_settings(edges: bool) -> Result<line::Settings, HalError> {
    let mut ls =
        line::Settings::new().map_err(|e| HalError::Gpio(format!("libgpiod settings: {e}")))?;
    ls.set_direction(line::Direction::Input)
        .map_err(|e| HalError::Gpio(format!("set direction: {e}")))?;

    // The kernel always reports both edges; trigger and debounce filtering
    // happen in the digital input so they can change without a reconfigure.
    if edges {
        ls.set_edge_detection(Some(line::Edge::Both))
            .map_err(|e| HalError::Gpio(format!("set edge detection: {e}")))?;
        ls.set_event_clock(EventClock::Realtime)
            .map_err(|e| HalError::Gpio(format!("set event clock: {e}")))?;
    } else {
        ls.set_edge_detection(None)
            .map_err(|e| HalError::Gpio(format!("set edge detection: {e}")))?;
    }
    Ok(ls)
}

fn output_settings() -> Result<line::Settings, HalError> {
    let mut ls =
        line::Settings::new().map_err(|e| HalError::Gpio(format!("libgpiod settings: {e}")))?;
    ls.set_direction(line::Direction::Output)
        .map_err(|e| HalError::Gpio(format!("set direction: {e}")))?;
    ls.set_drive(line::Drive::PushPull)
        .map_err(|e| HalError::Gpio(format!("set drive: {e}")))?;
    Ok(ls)
}

fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, HalError> {
    let mut cfg = line::Config::new().map_err(|e| HalError::Gpio(format!("line config: {e}")))?;
    cfg.add_line_settings(&[offset], settings)
        .map_err(|e| HalError::Gpio(format!("line config add settings: {e}")))?;
    Ok(cfg)
}

fn read_line(handle: &FairMutex<GpiodHandle>, offset: u32) -> Result<Signal, HalError> {
    let value = handle
        .lock()
        .request
        .value(offset)
        .map_err(|e| HalError::Gpio(format!("get value: {e}")))?;
    Ok(match value {
        line::Value::InActive => Signal::Low,
        line::Value::Active => Signal::High,
    })
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        pin: String,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        sink: EdgeSink,
    ) -> Result<Self, HalError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| HalError::Gpio(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let mut edges = Vec::new();
                {
                    let hdl = gpiod_handle.lock();
                    let req = &hdl.request;

                    let has_event =
                        match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("wait edge events error for pin {pin}: {e}");
                                yield_now();
                                continue;
                            }
                        };
                    if !has_event {
                        continue;
                    }

                    let events = match req.read_edge_events(&mut buffer) {
                        Ok(evts) => evts,
                        Err(e) => {
                            warn!("read edge events error for pin {pin}: {e}");
                            yield_now();
                            continue;
                        }
                    };
                    for evt in events {
                        let evt = match evt {
                            Ok(e) => e,
                            Err(_) => continue,
                        };
                        match evt.event_type() {
                            Ok(line::EdgeKind::Rising) => edges.push(Edge::Rising),
                            Ok(line::EdgeKind::Falling) => edges.push(Edge::Falling),
                            Err(_) => continue,
                        }
                    }
                }

                // listeners may read the line, so the request lock is released first
                for edge in edges {
                    sink(edge);
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct LibgpiodInputLine {
    pin: String,
    offset: u32,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
    listener: Mutex<Option<EdgeListener>>, // drop before reconfiguring
}

impl LibgpiodInputLine {
    fn new(pin: &str, cfg: &PinConfig) -> Result<Self, HalError> {
        let line_cfg = make_line_config(cfg.line, input_settings(false)?)?;
        let gpiod_handle = Arc::new(FairMutex::new(GpiodHandle::new(&cfg.chip, &line_cfg)?));
        Ok(Self {
            pin: pin.to_string(),
            offset: cfg.line,
            gpiod_handle,
            listener: Mutex::new(None),
        })
    }

    fn reconfigure(&self, edges: bool) -> Result<(), HalError> {
        let line_cfg = make_line_config(self.offset, input_settings(edges)?)?;
        self.gpiod_handle
            .lock()
            .request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| HalError::Gpio(format!("reconfigure lines: {e}")))?;
        Ok(())
    }
}

impl InputLine for LibgpiodInputLine {
    fn read(&self) -> Result<Signal, HalError> {
        read_line(&self.gpiod_handle, self.offset)
    }

    fn enable_edges(&self, sink: EdgeSink) -> Result<(), HalError> {
        // joining the old watcher must happen outside the listener lock
        let old = self.listener.lock().take();
        drop(old);

        let mut listener = self.listener.lock();
        self.reconfigure(true)?;
        *listener = Some(EdgeListener::new(
            self.pin.clone(),
            self.gpiod_handle.clone(),
            sink,
        )?);
        debug!("edge watcher started for pin {}", self.pin);
        Ok(())
    }

    fn disable_edges(&self) -> Result<(), HalError> {
        let old = self.listener.lock().take();
        let had_listener = old.is_some();
        drop(old);
        self.reconfigure(false)?;
        if had_listener {
            debug!("edge watcher stopped for pin {}", self.pin);
        }
        Ok(())
    }
}

pub struct LibgpiodOutputLine {
    offset: u32,
    gpiod_handle: FairMutex<GpiodHandle>,
}

impl OutputLine for LibgpiodOutputLine {
    fn write(&self, signal: Signal) -> Result<(), HalError> {
        self.gpiod_handle
            .lock()
            .request
            .set_value(
                self.offset,
                match signal {
                    Signal::Low => line::Value::InActive,
                    Signal::High => line::Value::Active,
                },
            )
            .map_err(|e| HalError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }
}

impl GpioBackend for LibgpiodBackend {
    fn input_line(&self, name: &str, pin: &PinConfig) -> Result<Arc<dyn InputLine>, HalError> {
        Ok(Arc::new(LibgpiodInputLine::new(name, pin)?))
    }

    fn output_line(&self, _name: &str, pin: &PinConfig) -> Result<Arc<dyn OutputLine>, HalError> {
        let line_cfg = make_line_config(pin.line, output_settings()?)?;
        Ok(Arc::new(LibgpiodOutputLine {
            offset: pin.line,
            gpiod_handle: FairMutex::new(GpiodHandle::new(&pin.chip, &line_cfg)?),
        }))
    }
}
