//! Signal Effect - pulse a pin on a serial-attached Firmata board.
//!
//! Runs once per poll cycle with at least one accepted alert. The board is
//! found by scanning serial ports for a known USB controller, opened at
//! 57600 baud, and the configured pin is switched to PWM and pulsed three
//! times (1 s high, 1 s low). The pulse blocks the cycle for its duration;
//! serial I/O runs on the blocking thread pool.
//!
//! ```rust,ignore
//! use siren::effects::SignalEffect;
//!
//! let effect = SignalEffect::new(9);
//! ```

use super::firmata::{self, PinMode};
use super::{Cadence, Effect, EffectError, EffectResult};
use crate::event::AlertEvent;
use async_trait::async_trait;
use serde_json::json;
use serialport::SerialPortType;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Substrings of a port description that identify a supported controller
pub const KNOWN_CONTROLLERS: &[&str] = &["Arduino", "CH340", "FTDI"];

/// USB vendor ids of the same controllers (Arduino, WCH, FTDI)
pub const KNOWN_VENDOR_IDS: &[u16] = &[0x2341, 0x1A86, 0x0403];

pub const BAUD_RATE: u32 = 57600;
pub const PULSE_COUNT: usize = 3;

/// PWM duty written while the pin is active
pub const ACTIVE_LEVEL: u16 = 255;
pub const INACTIVE_LEVEL: u16 = 0;

/// Serial read/write timeout
const PORT_TIMEOUT: Duration = Duration::from_secs(2);

/// Hold time and post-open wait of a pulse sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    /// How long each level is held
    pub hold: Duration,
    /// Wait after opening the port; boards reset when the port opens
    pub boot_wait: Duration,
}

impl Default for PulseTiming {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(1),
            boot_wait: Duration::from_secs(5),
        }
    }
}

/// A serial port seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub description: String,
    pub vendor_id: Option<u16>,
}

impl PortCandidate {
    fn is_known_controller(&self) -> bool {
        KNOWN_CONTROLLERS
            .iter()
            .any(|id| self.description.contains(id))
            || self
                .vendor_id
                .is_some_and(|vid| KNOWN_VENDOR_IDS.contains(&vid))
    }
}

/// Pick the controller port among `candidates`.
///
/// Matches are ordered by port name; with several, the first wins and a
/// warning is logged.
pub fn select_port(candidates: &[PortCandidate]) -> Result<String, EffectError> {
    let mut matches: Vec<&PortCandidate> = candidates
        .iter()
        .filter(|c| c.is_known_controller())
        .collect();
    matches.sort_by(|a, b| a.name.cmp(&b.name));

    let first = matches.first().ok_or(EffectError::DeviceNotFound)?;
    if matches.len() > 1 {
        warn!(
            count = matches.len(),
            selected = %first.name,
            "Multiple signal devices found, using the first one"
        );
    }
    Ok(first.name.clone())
}

/// Access to the ports a signal device may sit on.
pub trait SignalPorts: Send + Sync {
    /// List every port currently present
    fn candidates(&self) -> Result<Vec<PortCandidate>, EffectError>;

    /// Open a port for writing
    fn open(&self, port: &str) -> Result<Box<dyn Write + Send>, EffectError>;
}

/// Real serial ports via the `serialport` crate.
#[derive(Debug, Clone, Default)]
pub struct SerialPorts;

struct SerialLink(Box<dyn serialport::SerialPort>);

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SignalPorts for SerialPorts {
    fn candidates(&self) -> Result<Vec<PortCandidate>, EffectError> {
        let ports = serialport::available_ports()?;

        Ok(ports
            .into_iter()
            .map(|info| {
                let (description, vendor_id) = match &info.port_type {
                    SerialPortType::UsbPort(usb) => {
                        let parts: Vec<&str> = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                            .into_iter()
                            .flatten()
                            .collect();
                        (parts.join(" "), Some(usb.vid))
                    }
                    _ => (String::new(), None),
                };

                PortCandidate {
                    description: format!("{} ({})", description, info.port_name),
                    name: info.port_name,
                    vendor_id,
                }
            })
            .collect())
    }

    fn open(&self, port: &str) -> Result<Box<dyn Write + Send>, EffectError> {
        let link = serialport::new(port, BAUD_RATE)
            .timeout(PORT_TIMEOUT)
            .open()?;
        Ok(Box::new(SerialLink(link)))
    }
}

/// An effect that pulses one pin of a Firmata board.
#[derive(Clone)]
pub struct SignalEffect {
    pin: u8,
    ports: Arc<dyn SignalPorts>,
    timing: PulseTiming,
}

impl SignalEffect {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            ports: Arc::new(SerialPorts),
            timing: PulseTiming::default(),
        }
    }

    pub fn with_ports(mut self, ports: Arc<dyn SignalPorts>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_timing(mut self, timing: PulseTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Locate the board and emit one pulse sequence. Blocking.
fn pulse(ports: &dyn SignalPorts, pin: u8, timing: PulseTiming) -> Result<String, EffectError> {
    let port = select_port(&ports.candidates()?)?;
    info!(port = %port, pin = pin, "Signal device connected");

    let mut link = ports.open(&port)?;
    std::thread::sleep(timing.boot_wait);

    link.write_all(&firmata::set_pin_mode(pin, PinMode::Pwm))?;
    for i in 0..PULSE_COUNT {
        debug!(pin = pin, pulse = i + 1, "Signal pulse");
        link.write_all(&firmata::analog_write(pin, ACTIVE_LEVEL))?;
        link.flush()?;
        std::thread::sleep(timing.hold);

        link.write_all(&firmata::analog_write(pin, INACTIVE_LEVEL))?;
        link.flush()?;
        std::thread::sleep(timing.hold);
    }

    Ok(port)
}

#[async_trait]
impl Effect for SignalEffect {
    fn name(&self) -> &str {
        "signal"
    }

    fn cadence(&self) -> Cadence {
        Cadence::PerCycle
    }

    async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
        let ports = Arc::clone(&self.ports);
        let pin = self.pin;
        let timing = self.timing;

        let port = tokio::task::spawn_blocking(move || pulse(ports.as_ref(), pin, timing))
            .await
            .map_err(|e| EffectError::Failed(format!("signal task panicked: {}", e)))??;

        Ok(EffectResult::with_metadata(
            self.name(),
            format!("Pulsed pin {} on {} for {} alert(s)", pin, port, events.len()),
            json!({ "port": port, "pin": pin, "pulses": PULSE_COUNT }),
        ))
    }
}
