use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rppal::gpio::{Gpio, OutputPin};
use strum_macros::{Display, EnumIter};
use thiserror::Error;
use tokio::time::Instant;

use crate::GpioError;

const FAN_LOW_PIN: u8 = 17;
const FAN_MEDIUM_PIN: u8 = 27;
const FAN_HIGH_PIN: u8 = 22;
const COMPRESSOR_PIN: u8 = 26;
const INDICATOR_PIN: u8 = 23;

/// The five physical outputs of the appliance.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Line {
    FanLow,
    FanMedium,
    FanHigh,
    Compressor,
    Indicator,
}

impl Line {
    pub const FANS: [Line; 3] = [Line::FanLow, Line::FanMedium, Line::FanHigh];

    pub fn is_fan(&self) -> bool {
        Line::FANS.contains(self)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Something that can drive the output lines to a level.
///
/// Writes are assumed to always succeed once the lines have been acquired.
pub trait OutputLines: Send + 'static {
    fn set(&mut self, line: Line, asserted: bool);
}

impl<L: OutputLines + ?Sized> OutputLines for Box<L> {
    fn set(&mut self, line: Line, asserted: bool) {
        (**self).set(line, asserted)
    }
}

#[derive(Error, Debug)]
pub enum LinesError {
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

pub type Result<T> = std::result::Result<T, LinesError>;

/// BCM pin number for every line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PinMap {
    pub fan_low: u8,
    pub fan_medium: u8,
    pub fan_high: u8,
    pub compressor: u8,
    pub indicator: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        PinMap {
            fan_low: FAN_LOW_PIN,
            fan_medium: FAN_MEDIUM_PIN,
            fan_high: FAN_HIGH_PIN,
            compressor: COMPRESSOR_PIN,
            indicator: INDICATOR_PIN,
        }
    }
}

impl PinMap {
    pub fn pin(&self, line: Line) -> u8 {
        match line {
            Line::FanLow => self.fan_low,
            Line::FanMedium => self.fan_medium,
            Line::FanHigh => self.fan_high,
            Line::Compressor => self.compressor,
            Line::Indicator => self.indicator,
        }
    }
}

/// Output lines backed by Raspberry Pi GPIO pins.
///
/// Every pin starts deasserted. Pins are reset when dropped.
#[derive(Debug)]
pub struct GpioLines {
    pins: PinMap,
    outputs: [OutputPin; 5],
}

impl GpioLines {
    pub fn new(pins: PinMap) -> Result<GpioLines> {
        let gpio = Gpio::new().map_err(|_| GpioError::Initialization)?;
        let output = |line: Line| -> Result<OutputPin> {
            let pin = pins.pin(line);
            let output = gpio
                .get(pin)
                .map_err(|_| GpioError::Pin(pin))?
                .into_output_low();
            debug!("acquired gpio pin {} for {}", pin, line);
            Ok(output)
        };
        Ok(GpioLines {
            pins,
            outputs: [
                output(Line::FanLow)?,
                output(Line::FanMedium)?,
                output(Line::FanHigh)?,
                output(Line::Compressor)?,
                output(Line::Indicator)?,
            ],
        })
    }

    pub fn default_pins() -> Result<Self> {
        Self::new(PinMap::default())
    }
}

impl OutputLines for GpioLines {
    fn set(&mut self, line: Line, asserted: bool) {
        trace!(
            "gpio pin {} ({}) -> {}",
            self.pins.pin(line),
            line,
            if asserted { "high" } else { "low" }
        );
        let output = &mut self.outputs[line.index()];
        if asserted {
            output.set_high();
        } else {
            output.set_low();
        }
    }
}

/// A single recorded line write.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LineWrite {
    pub at: Instant,
    pub line: Line,
    pub asserted: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    levels: [bool; 5],
    history: Vec<LineWrite>,
}

/// In-memory output lines that keep every write.
///
/// Clones share the same levels and history, so a clone can be kept to
/// inspect lines that were handed over to a driver.
#[derive(Debug, Clone, Default)]
pub struct MemoryLines {
    recorded: Arc<Mutex<Recorded>>,
}

impl MemoryLines {
    pub fn new() -> MemoryLines {
        MemoryLines::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        // the recorder holds plain data, so a poisoned lock is still usable
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_asserted(&self, line: Line) -> bool {
        self.recorded().levels[line.index()]
    }

    pub fn asserted_fans(&self) -> Vec<Line> {
        let recorded = self.recorded();
        Line::FANS
            .iter()
            .copied()
            .filter(|fan| recorded.levels[fan.index()])
            .collect()
    }

    pub fn all_deasserted(&self) -> bool {
        self.recorded().levels.iter().all(|level| !level)
    }

    pub fn history(&self) -> Vec<LineWrite> {
        self.recorded().history.clone()
    }

    pub fn write_count(&self) -> usize {
        self.recorded().history.len()
    }

    pub fn clear_history(&self) {
        self.recorded().history.clear();
    }
}

impl OutputLines for MemoryLines {
    fn set(&mut self, line: Line, asserted: bool) {
        trace!("memory line {} -> {}", line, asserted);
        let mut recorded = self.recorded();
        recorded.levels[line.index()] = asserted;
        recorded.history.push(LineWrite {
            at: Instant::now(),
            line,
            asserted,
        });
    }
}
