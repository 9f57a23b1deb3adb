use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use coolbox_peripherals::cycle::OperatingMode;
use serde::Serialize;
use thiserror::Error;
use tokio::select;
use tokio::sync::{broadcast, watch};

use crate::command::{CommandError, ControlRequest};
use crate::Controller;

pub const SCHEDULE_TICK: Duration = Duration::from_secs(60);

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ScheduleError {
    #[error("Invalid time {0}, expected HH:MM")]
    Time(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// A daily start and stop time for one mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Schedule {
    pub start: NaiveTime,
    pub stop: NaiveTime,
    pub mode: OperatingMode,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Trigger {
    Start(OperatingMode),
    Stop,
}

impl Trigger {
    pub fn mode(self) -> OperatingMode {
        match self {
            Trigger::Start(mode) => mode,
            Trigger::Stop => OperatingMode::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub start_time: String,
    pub end_time: String,
    pub mode: &'static str,
    pub fan_speed: Option<String>,
}

fn parse_time(s: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ScheduleError::Time(s.to_string()))
}

/// Seconds from `from` forward to `to`, wrapping at midnight.
fn seconds_after(from: NaiveTime, to: NaiveTime) -> u32 {
    let from = from.num_seconds_from_midnight();
    let to = to.num_seconds_from_midnight();
    (to + SECONDS_PER_DAY - from) % SECONDS_PER_DAY
}

impl Schedule {
    pub fn parse(
        start_time: &str,
        end_time: &str,
        request: ControlRequest,
    ) -> Result<Schedule, ScheduleError> {
        Ok(Schedule {
            start: parse_time(start_time)?,
            stop: parse_time(end_time)?,
            mode: request.into_mode()?,
        })
    }

    /// Triggers whose time of day falls in `(previous, now]`, in firing order.
    /// An empty window means no time has passed.
    pub fn due(&self, previous: NaiveTime, now: NaiveTime) -> Vec<Trigger> {
        let window = seconds_after(previous, now);
        let mut due: Vec<(u32, Trigger)> = [
            (self.start, Trigger::Start(self.mode)),
            (self.stop, Trigger::Stop),
        ]
        .iter()
        .map(|(at, trigger)| (seconds_after(previous, *at), *trigger))
        .filter(|(offset, _)| *offset > 0 && *offset <= window)
        .collect();
        due.sort_by_key(|(offset, _)| *offset);
        due.into_iter().map(|(_, trigger)| trigger).collect()
    }

    pub fn view(&self) -> ScheduleView {
        ScheduleView {
            start_time: self.start.format("%H:%M").to_string(),
            end_time: self.stop.format("%H:%M").to_string(),
            mode: self.mode.name(),
            fan_speed: self.mode.fan_speed().map(|speed| speed.to_string()),
        }
    }
}

/// Holds the active schedule. Setting a schedule replaces all previous
/// triggers.
#[derive(Debug, Clone)]
pub struct Scheduler {
    sender: Arc<watch::Sender<Option<Schedule>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Scheduler {
            sender: Arc::new(sender),
        }
    }
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    pub fn set(&self, schedule: Option<Schedule>) {
        match &schedule {
            Some(s) => info!(
                "schedule set: {} from {} to {}",
                s.mode,
                s.start.format("%H:%M"),
                s.stop.format("%H:%M")
            ),
            None => info!("schedule cleared"),
        }
        self.sender.send_replace(schedule);
    }

    pub fn current(&self) -> Option<Schedule> {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Schedule>> {
        self.sender.subscribe()
    }
}

pub fn local_time() -> NaiveTime {
    Local::now().time()
}

/// Fires schedule triggers against the controller until shutdown.
pub async fn run_schedule<C>(
    controller: Arc<Controller>,
    mut schedules: watch::Receiver<Option<Schedule>>,
    mut shutdown_rx: broadcast::Receiver<()>,
    tick: Duration,
    clock: C,
) where
    C: Fn() -> NaiveTime + Send + 'static,
{
    let mut interval = tokio::time::interval(tick);
    let mut previous = clock();
    loop {
        select! {
            _ = shutdown_rx.recv() => {
                info!("schedule evaluator received shutdown");
                break;
            },
            changed = schedules.changed() => {
                if changed.is_err() {
                    info!("schedule sender closed");
                    break;
                }
                // new triggers only apply from now on
                previous = clock();
            },
            _ = interval.tick() => {
                let now = clock();
                let schedule = *schedules.borrow_and_update();
                if let Some(schedule) = schedule {
                    for trigger in schedule.due(previous, now) {
                        info!("schedule firing {:?} at {}", trigger, now.format("%H:%M:%S"));
                        controller.apply(trigger.mode()).await;
                    }
                }
                previous = now;
            }
        }
    }
}
