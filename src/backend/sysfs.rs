use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::info;
use parking_lot::Mutex;

use crate::error::HalError;
use crate::uart::{SlotStore, Transport};

/// Cape manager `slots` file. Each loaded overlay shows up as a line like
/// ` 7: ff:P-O-L Override Board Name,00A0,Override Manuf,BB-UART1`.
pub struct SysfsSlotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SysfsSlotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_slot_line(line: &str, name: &str) -> Option<u32> {
    let (number, rest) = line.trim_start().split_once(':')?;
    let part = rest.rsplit(',').next()?.trim();
    if part != name {
        return None;
    }
    number.trim().parse().ok()
}

impl SlotStore for SysfsSlotStore {
    fn slot_number(&self, name: &str) -> Result<Option<u32>, HalError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(contents
            .lines()
            .find_map(|line| parse_slot_line(line, name)))
    }

    fn create_slot_if_not_exists(&self, name: &str) -> Result<(), HalError> {
        let _guard = self.write_lock.lock();
        if self.slot_number(name)?.is_some() {
            return Ok(());
        }

        info!("loading slot {name} via {}", self.path.display());
        let mut slots = OpenOptions::new().append(true).open(&self.path)?;
        slots.write_all(name.as_bytes())?;
        Ok(())
    }
}

/// Serial device node opened read/write. Line settings are left as the
/// kernel configured them.
pub struct DeviceFileTransport {
    path: PathBuf,
    device: Option<File>,
}

impl DeviceFileTransport {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            device: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn device(&mut self) -> io::Result<&mut File> {
        self.device.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not open", self.path.display()),
            )
        })
    }
}

impl Transport for DeviceFileTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.device.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is already open", self.path.display()),
            ));
        }
        let device = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut device) = self.device.take() {
            device.flush()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.device()?.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.device()?.write(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}
