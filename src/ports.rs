//! Port buses the machine reads and writes.
//!
//! The machine only issues reads and writes. Whether a port resets after it
//! is read is up to the device behind the bus.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::isa::PORT_COUNT;

/// Device side of the ports. Called once per port instruction.
pub trait PortBus {
    /// Number of ports bound on this bus. Ports at or above it fault.
    fn port_count(&self) -> u8 {
        PORT_COUNT
    }

    fn read(&mut self, port: u8) -> io::Result<u8>;

    fn write(&mut self, port: u8, value: u8) -> io::Result<()>;
}

impl<T: PortBus + ?Sized> PortBus for Box<T> {
    fn port_count(&self) -> u8 {
        (**self).port_count()
    }

    fn read(&mut self, port: u8) -> io::Result<u8> {
        (**self).read(port)
    }

    fn write(&mut self, port: u8, value: u8) -> io::Result<()> {
        (**self).write(port, value)
    }
}

impl<T: PortBus + ?Sized> PortBus for &mut T {
    fn port_count(&self) -> u8 {
        (**self).port_count()
    }

    fn read(&mut self, port: u8) -> io::Result<u8> {
        (**self).read(port)
    }

    fn write(&mut self, port: u8, value: u8) -> io::Result<()> {
        (**self).write(port, value)
    }
}

/// A store the program issued, in the order it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWrite {
    pub port: u8,
    pub value: u8,
}

/// In-memory registers, one byte per port.
#[derive(Debug, Clone)]
pub struct RegisterPorts {
    values: Vec<u8>,
    clear_on_read: Vec<bool>,
    writes: Vec<PortWrite>,
}

impl Default for RegisterPorts {
    fn default() -> Self {
        Self::new(PORT_COUNT)
    }
}

impl RegisterPorts {
    /// A bus with `count` ports, all holding zero.
    pub fn new(count: u8) -> Self {
        let count = usize::from(count.min(PORT_COUNT));
        RegisterPorts {
            values: vec![0; count],
            clear_on_read: vec![false; count],
            writes: Vec::new(),
        }
    }

    /// Make `port` reset to zero after every read, like a latched key register.
    /// Returns false for unbound ports.
    pub fn set_clear_on_read(&mut self, port: u8) -> bool {
        match self.clear_on_read.get_mut(usize::from(port)) {
            Some(flag) => {
                *flag = true;
                true
            }
            None => false,
        }
    }

    /// Set a register from the device side. Returns false for unbound ports.
    pub fn set(&mut self, port: u8, value: u8) -> bool {
        match self.values.get_mut(usize::from(port)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, port: u8) -> Option<u8> {
        self.values.get(usize::from(port)).copied()
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Every store issued since the last [`RegisterPorts::take_writes`].
    ///
    /// The log is unbounded. Hosts running many passes should drain it with
    /// `take_writes` after each one.
    pub fn writes(&self) -> &[PortWrite] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<PortWrite> {
        std::mem::take(&mut self.writes)
    }

    fn unbound(port: u8) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("port {port} is not bound"))
    }
}

impl PortBus for RegisterPorts {
    fn port_count(&self) -> u8 {
        self.values.len() as u8
    }

    fn read(&mut self, port: u8) -> io::Result<u8> {
        let index = usize::from(port);
        let value = *self.values.get(index).ok_or_else(|| Self::unbound(port))?;
        if self.clear_on_read[index] {
            self.values[index] = 0;
        }
        Ok(value)
    }

    fn write(&mut self, port: u8, value: u8) -> io::Result<()> {
        let slot = self
            .values
            .get_mut(usize::from(port))
            .ok_or_else(|| Self::unbound(port))?;
        *slot = value;
        self.writes.push(PortWrite { port, value });
        Ok(())
    }
}

/// Ports backed by a directory with one file per port. Each file holds the
/// port value as eight `0`/`1` characters, so an outside process can drive
/// the inputs and watch the outputs.
#[derive(Debug, Clone)]
pub struct FilePorts {
    dir: PathBuf,
}

impl FilePorts {
    /// Open `dir`, creating it and any missing port files (as zero).
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let ports = FilePorts { dir };
        for port in 0..PORT_COUNT {
            if !ports.path(port).exists() {
                ports.store(port, 0)?;
            }
        }
        Ok(ports)
    }

    /// Zero every port.
    pub fn clear(&self) -> io::Result<()> {
        (0..PORT_COUNT).try_for_each(|port| self.store(port, 0))
    }

    pub fn path(&self, port: u8) -> PathBuf {
        self.dir.join(port.to_string())
    }

    fn store(&self, port: u8, value: u8) -> io::Result<()> {
        fs::write(self.path(port), format!("{value:08b}"))
    }
}

impl PortBus for FilePorts {
    fn read(&mut self, port: u8) -> io::Result<u8> {
        let contents = fs::read_to_string(self.path(port))?;
        let bits = contents.trim();
        if bits.len() != 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("port {port} holds '{bits}', expected 8 bits"),
            ));
        }
        u8::from_str_radix(bits, 2).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("port {port} holds '{bits}': {err}"),
            )
        })
    }

    fn write(&mut self, port: u8, value: u8) -> io::Result<()> {
        self.store(port, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_log_writes() {
        let mut ports = RegisterPorts::default();
        ports.write(3, 9).unwrap();
        ports.write(0, 1).unwrap();
        assert_eq!(ports.get(3), Some(9));
        assert_eq!(ports.writes(), &[
            PortWrite { port: 3, value: 9 },
            PortWrite { port: 0, value: 1 },
        ]);
        assert_eq!(ports.take_writes().len(), 2);
        assert!(ports.writes().is_empty());
    }

    #[test]
    fn clear_on_read_is_device_defined() {
        let mut ports = RegisterPorts::default();
        assert!(ports.set_clear_on_read(7));
        ports.set(7, 0b0101_1110);
        ports.set(5, 125);
        assert_eq!(ports.read(7).unwrap(), 0b0101_1110);
        assert_eq!(ports.read(7).unwrap(), 0);
        assert_eq!(ports.read(5).unwrap(), 125);
        assert_eq!(ports.read(5).unwrap(), 125);
    }

    #[test]
    fn narrow_bus() {
        let mut ports = RegisterPorts::new(5);
        assert_eq!(ports.port_count(), 5);
        assert!(!ports.set(6, 1));
        assert!(!ports.set_clear_on_read(5));
        assert!(ports.read(6).is_err());
        assert!(ports.write(5, 1).is_err());
    }

    #[test]
    fn file_ports_use_bit_strings() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut ports = FilePorts::open(dir.path()).unwrap();

        assert_eq!(fs::read_to_string(ports.path(4)).unwrap(), "00000000");
        ports.write(4, 255).unwrap();
        assert_eq!(fs::read_to_string(ports.path(4)).unwrap(), "11111111");

        fs::write(ports.path(7), "01011110\n").unwrap();
        assert_eq!(ports.read(7).unwrap(), 0b0101_1110);

        fs::write(ports.path(6), "12").unwrap();
        assert_eq!(
            ports.read(6).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );

        ports.clear().unwrap();
        assert_eq!(ports.read(4).unwrap(), 0);
    }

    #[test]
    fn open_keeps_existing_values() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        fs::write(dir.path().join("5"), "01111101").unwrap();
        let mut ports = FilePorts::open(dir.path()).unwrap();
        assert_eq!(ports.read(5).unwrap(), 125);
    }
}
