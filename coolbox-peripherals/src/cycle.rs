use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::lines::OutputLines;
pub use crate::outputs::FanSpeed;
use crate::outputs::{DriverTimings, OutputDriver};

const COMPRESSOR_ON_HOLD: Duration = Duration::from_secs(30 * 60);
const COMPRESSOR_OFF_HOLD: Duration = Duration::from_secs(15 * 60);
const CANCEL_POLL: Duration = Duration::from_secs(1);

/// The last requested intent for the appliance.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OperatingMode {
    Off,
    FanOnly(FanSpeed),
    WithCompressor(FanSpeed),
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Off
    }
}

impl OperatingMode {
    pub fn name(&self) -> &'static str {
        match self {
            OperatingMode::Off => "off",
            OperatingMode::FanOnly(_) => "fan_only",
            OperatingMode::WithCompressor(_) => "with_compressor",
        }
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        match self {
            OperatingMode::Off => None,
            OperatingMode::FanOnly(speed) | OperatingMode::WithCompressor(speed) => Some(*speed),
        }
    }

    pub fn is_on(&self) -> bool {
        !matches!(self, OperatingMode::Off)
    }
}

impl Display for OperatingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.fan_speed() {
            Some(speed) => write!(f, "{} ({} fan)", self.name(), speed),
            None => write!(f, "{}", self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Status {
    pub mode: OperatingMode,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CycleTimings {
    pub compressor_on: Duration,
    pub compressor_off: Duration,
    /// Upper bound on how long a hold goes without checking for cancellation.
    pub cancel_poll: Duration,
    pub driver: DriverTimings,
}

impl Default for CycleTimings {
    fn default() -> Self {
        CycleTimings {
            compressor_on: COMPRESSOR_ON_HOLD,
            compressor_off: COMPRESSOR_OFF_HOLD,
            cancel_poll: CANCEL_POLL,
            driver: DriverTimings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Hold {
    Elapsed,
    Cancelled,
}

#[derive(Debug)]
struct CycleRun {
    speed: FanSpeed,
    cancel_sender: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the operating mode and the duty-cycle task.
///
/// [`CycleController::apply`] is the only mutator. Calls to it are serialized,
/// and each one retires the running duty cycle (signal, then wait for the task
/// to exit) before touching any output.
#[derive(Debug)]
pub struct CycleController<L: OutputLines> {
    driver: Arc<Mutex<OutputDriver<L>>>,
    run: Mutex<Option<CycleRun>>,
    mode_sender: Arc<watch::Sender<OperatingMode>>,
    timings: CycleTimings,
}

impl<L: OutputLines> CycleController<L> {
    pub fn new(lines: L) -> CycleController<L> {
        Self::with_timings(lines, CycleTimings::default())
    }

    pub fn with_timings(lines: L, timings: CycleTimings) -> CycleController<L> {
        let (mode_sender, _) = watch::channel(OperatingMode::Off);
        CycleController {
            driver: Arc::new(Mutex::new(OutputDriver::new(lines, timings.driver))),
            run: Mutex::new(None),
            mode_sender: Arc::new(mode_sender),
            timings,
        }
    }

    pub fn status(&self) -> Status {
        let mode = *self.mode_sender.borrow();
        Status {
            mode,
            on: mode.is_on(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OperatingMode> {
        self.mode_sender.subscribe()
    }

    pub async fn is_cycling(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .map_or(false, |run| !run.handle.is_finished())
    }

    pub async fn apply(&self, mode: OperatingMode) {
        let mut run = self.run.lock().await;
        if mode == OperatingMode::Off && !self.status().on && run.is_none() {
            debug!("already off, nothing to apply");
            return;
        }

        self.retire(run.take()).await;

        match mode {
            OperatingMode::Off => self.driver.lock().await.all_off().await,
            OperatingMode::FanOnly(speed) => self.driver.lock().await.select_fan(speed).await,
            OperatingMode::WithCompressor(_) => {}
        }

        // published before a run starts, so a failing run can override it with off
        self.mode_sender.send_replace(mode);
        info!("operating mode is now {}", mode);

        if let OperatingMode::WithCompressor(speed) = mode {
            *run = Some(self.start_run(speed));
        }
    }

    /// Switches everything off, then drops the lines.
    pub async fn shutdown(self) {
        info!("shutting down appliance");
        self.apply(OperatingMode::Off).await;
        let driver = self.driver.lock().await;
        if driver.fan().is_some() || driver.is_compressor_engaged() {
            error!("outputs still asserted at shutdown");
        }
    }

    fn start_run(&self, speed: FanSpeed) -> CycleRun {
        // a fresh channel per run, so no run starts out cancelled
        let (cancel_sender, cancel_receiver) = watch::channel(false);
        let driver = self.driver.clone();
        let mode_sender = self.mode_sender.clone();
        let cycle = tokio::spawn(duty_cycle(
            driver.clone(),
            speed,
            self.timings,
            cancel_receiver,
        ));
        let handle = tokio::spawn(async move {
            if let Err(e) = cycle.await {
                error!(
                    "compressor cycle at {} fan failed: {}, switching all outputs off",
                    speed, e
                );
                driver.lock().await.release().await;
                mode_sender.send_replace(OperatingMode::Off);
            }
        });
        debug!("started compressor cycle at {} fan", speed);
        CycleRun {
            speed,
            cancel_sender,
            handle,
        }
    }

    async fn retire(&self, run: Option<CycleRun>) {
        let CycleRun {
            speed,
            cancel_sender,
            handle,
        } = match run {
            Some(run) => run,
            None => return,
        };

        debug!("cancelling compressor cycle at {} fan", speed);
        if cancel_sender.send(true).is_err() {
            trace!("compressor cycle at {} fan had already exited", speed);
        }

        match handle.await {
            Ok(()) => {
                debug!("compressor cycle at {} fan stopped", speed);
                // a cancelled run may leave the compressor engaged
                self.driver.lock().await.disengage_compressor().await;
            }
            Err(e) => {
                error!("compressor cycle at {} fan failed: {}", speed, e);
                self.driver.lock().await.release().await;
            }
        }
    }
}

async fn duty_cycle<L: OutputLines>(
    driver: Arc<Mutex<OutputDriver<L>>>,
    speed: FanSpeed,
    timings: CycleTimings,
    cancel: watch::Receiver<bool>,
) {
    let mut cycle: u64 = 0;
    while !is_cancelled(&cancel) {
        cycle += 1;
        info!("starting compressor cycle {} at {} fan", cycle, speed);
        {
            let mut driver = driver.lock().await;
            driver.select_fan(speed).await;
            if !driver.engage_compressor().await {
                error!("compressor did not engage in cycle {}", cycle);
            }
        }

        if hold(&cancel, timings.compressor_on, timings.cancel_poll).await == Hold::Cancelled {
            break;
        }

        driver.lock().await.disengage_compressor().await;

        if hold(&cancel, timings.compressor_off, timings.cancel_poll).await == Hold::Cancelled {
            break;
        }
    }
    debug!("compressor cycle at {} fan exiting after {} cycles", speed, cycle);
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    // a dropped sender means the controller is gone
    *cancel.borrow() || cancel.has_changed().is_err()
}

/// Waits out `duration`, checking for cancellation at least every `poll`. A
/// duration past the clock's range only ends on cancellation.
async fn hold(cancel: &watch::Receiver<bool>, duration: Duration, poll: Duration) -> Hold {
    let deadline = Instant::now().checked_add(duration);
    trace!("holding for {:?}", duration);
    loop {
        if is_cancelled(cancel) {
            trace!("hold cancelled");
            return Hold::Cancelled;
        }
        let now = Instant::now();
        let remaining = match deadline {
            Some(deadline) if now >= deadline => return Hold::Elapsed,
            Some(deadline) => poll.min(deadline - now),
            None => poll,
        };
        sleep(remaining).await;
    }
}
