use std::time::Duration;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tokio::time::sleep;

use crate::lines::{Line, OutputLines};

const ENGAGE_DELAY: Duration = Duration::from_secs(3);
const DISENGAGE_DELAY: Duration = Duration::from_secs(3);
const INDICATOR_PULSE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FanSpeed {
    Low,
    Medium,
    High,
}

impl Default for FanSpeed {
    fn default() -> Self {
        FanSpeed::Low
    }
}

impl FanSpeed {
    pub fn line(self) -> Line {
        match self {
            FanSpeed::Low => Line::FanLow,
            FanSpeed::Medium => Line::FanMedium,
            FanSpeed::High => Line::FanHigh,
        }
    }
}

/// Fixed safety intervals enforced around compressor transitions.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DriverTimings {
    /// Airflow settle time between a fan being asserted and the compressor
    /// being engaged.
    pub engage_delay: Duration,
    /// Pressure settle time after the compressor is released.
    pub disengage_delay: Duration,
    pub indicator_pulse: Duration,
}

impl Default for DriverTimings {
    fn default() -> Self {
        DriverTimings {
            engage_delay: ENGAGE_DELAY,
            disengage_delay: DISENGAGE_DELAY,
            indicator_pulse: INDICATOR_PULSE,
        }
    }
}

/// Sequences the appliance outputs.
///
/// After every operation at most one fan line is asserted, and the compressor
/// is only asserted while a fan is.
#[derive(Debug)]
pub struct OutputDriver<L: OutputLines> {
    lines: L,
    fan: Option<FanSpeed>,
    compressor: bool,
    timings: DriverTimings,
}

impl<L: OutputLines> OutputDriver<L> {
    /// Takes over `lines`, deasserting all of them.
    pub fn new(lines: L, timings: DriverTimings) -> OutputDriver<L> {
        let mut driver = OutputDriver {
            lines,
            fan: None,
            compressor: false,
            timings,
        };
        driver.lines.set(Line::Compressor, false);
        driver.deassert_fans();
        driver.lines.set(Line::Indicator, false);
        driver
    }

    pub fn fan(&self) -> Option<FanSpeed> {
        self.fan
    }

    pub fn is_compressor_engaged(&self) -> bool {
        self.compressor
    }

    pub fn timings(&self) -> DriverTimings {
        self.timings
    }

    fn deassert_fans(&mut self) {
        for speed in FanSpeed::iter() {
            self.lines.set(speed.line(), false);
        }
    }

    pub async fn select_fan(&mut self, speed: FanSpeed) {
        if self.compressor {
            // every fan line drops below, which the compressor must never see
            warn!(
                "fan change to {} requested with compressor engaged, disengaging first",
                speed
            );
            self.disengage_compressor().await;
        }
        debug!("selecting {} fan", speed);
        self.deassert_fans();
        self.lines.set(speed.line(), true);
        self.fan = Some(speed);
        self.pulse_indicator().await;
    }

    /// Returns whether the compressor is engaged afterwards. Refused when no
    /// fan is running.
    pub async fn engage_compressor(&mut self) -> bool {
        let fan = match self.fan {
            Some(fan) => fan,
            None => {
                warn!("refusing to engage compressor with no fan running");
                return false;
            }
        };
        if self.compressor {
            trace!("compressor already engaged");
            return true;
        }
        debug!(
            "waiting {:?} for {} fan airflow before engaging compressor",
            self.timings.engage_delay, fan
        );
        sleep(self.timings.engage_delay).await;
        self.lines.set(Line::Compressor, true);
        self.compressor = true;
        info!("compressor engaged");
        self.pulse_indicator().await;
        true
    }

    pub async fn disengage_compressor(&mut self) {
        if !self.compressor {
            trace!("compressor already disengaged");
            return;
        }
        self.lines.set(Line::Compressor, false);
        self.compressor = false;
        info!("compressor disengaged");
        self.pulse_indicator().await;
        debug!(
            "waiting {:?} for compressor to settle",
            self.timings.disengage_delay
        );
        sleep(self.timings.disengage_delay).await;
    }

    pub async fn all_off(&mut self) {
        self.disengage_compressor().await;
        self.deassert_fans();
        self.fan = None;
        info!("all outputs off");
        self.pulse_indicator().await;
    }

    /// Drives every line low regardless of the tracked state, keeping the
    /// compressor-first order. Used when an owner of the driver failed midway
    /// and the tracked state can no longer be trusted.
    pub async fn release(&mut self) {
        warn!("force releasing all outputs");
        self.lines.set(Line::Compressor, false);
        self.compressor = false;
        sleep(self.timings.disengage_delay).await;
        self.deassert_fans();
        self.fan = None;
        self.lines.set(Line::Indicator, false);
    }

    pub async fn pulse_indicator(&mut self) {
        self.lines.set(Line::Indicator, true);
        sleep(self.timings.indicator_pulse).await;
        self.lines.set(Line::Indicator, false);
    }
}
