use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_serial::SerialPort;
use tracing::{debug, error, info};

use crate::link::{SharedDeviceLink, TransmitFn};
use crate::state::{SharedLinkStatus, StopToken};

/// Raw byte pipe to the HLP.
pub trait ByteTransport: Send + Sync {
    /// Blocking read. `Ok(0)` on timeout with nothing received.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Close the port. Unblocks a pending `read` at its next timeout at the
    /// latest; afterwards every call fails.
    fn close(&self);

    fn is_open(&self) -> bool;

    fn describe(&self) -> String;
}

/// Serial port transport. Reader and writer use separate handles of the same
/// port so a blocking read never holds up the engine's writes.
pub struct SerialTransport {
    dev: String,
    baud: u32,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    open: AtomicBool,
}

impl SerialTransport {
    pub fn open(dev: &str, baud: u32, read_timeout: Duration) -> io::Result<Self> {
        let port = tokio_serial::new(dev, baud).timeout(read_timeout).open()?;
        let writer = port.try_clone()?;
        info!("serial: opened {} @ {}", dev, baud);
        Ok(Self {
            dev: dev.to_string(),
            baud,
            reader: Mutex::new(Some(port)),
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
        })
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

impl ByteTransport for SerialTransport {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self.reader.lock();
        let port = reader.as_mut().ok_or_else(closed)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        let port = writer.as_mut().ok_or_else(closed)?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            // writer first: the reader lock may be held by a blocked read
            self.writer.lock().take();
            self.reader.lock().take();
            info!("serial: closed {}", self.dev);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.dev, self.baud)
    }
}

fn record_fault(status: &SharedLinkStatus, what: String) {
    let mut st = status.lock();
    st.connected = false;
    if st.fault.is_none() {
        st.fault = Some(what);
    }
}

/// Outbound path handed to the device link. A write error closes the port and
/// marks the link faulted so the engine stops ticking.
pub fn transmitter(transport: Arc<dyn ByteTransport>, status: SharedLinkStatus) -> TransmitFn {
    Box::new(move |bytes: &[u8]| {
        transport.write_all(bytes).map_err(|e| {
            error!("transport: write failed on {}: {}", transport.describe(), e);
            transport.close();
            record_fault(&status, format!("write: {}", e));
            e
        })
    })
}

/// Inbound pump: feeds every received byte to the device link until the
/// transport closes, the stop token fires or a read fails.
pub fn spawn_reader(
    transport: Arc<dyn ByteTransport>,
    link: SharedDeviceLink,
    status: SharedLinkStatus,
    stop: StopToken,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("hlp-rx".into()).spawn(move || {
        let mut buf = [0u8; 256];
        while !stop.is_stopped() && transport.is_open() {
            match transport.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    link.lock().receive(&buf[..n]);
                    status.lock().last_rx = Some(Instant::now());
                }
                Err(e) => {
                    if transport.is_open() && !stop.is_stopped() {
                        error!("transport: read failed on {}: {}", transport.describe(), e);
                        transport.close();
                        record_fault(&status, format!("read: {}", e));
                    }
                    break;
                }
            }
        }
        debug!("transport: reader exiting");
    })
}
