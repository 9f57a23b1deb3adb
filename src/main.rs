mod command;
mod discovery;
mod schedule;
mod server;

extern crate pretty_env_logger;
#[macro_use]
extern crate log;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use coolbox_peripherals::cycle::{CycleController, CycleTimings, OperatingMode};
use coolbox_peripherals::lines::{GpioLines, MemoryLines, OutputLines, PinMap};
use structopt::StructOpt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::command::ControlRequest;
use crate::discovery::Descriptor;
use crate::schedule::{Scheduler, SCHEDULE_TICK};
use crate::server::AppState;

pub type Controller = CycleController<Box<dyn OutputLines>>;

#[derive(StructOpt, Debug)]
struct PinOpt {
    #[structopt(long, default_value = "17")]
    fan_low_pin: u8,
    #[structopt(long, default_value = "27")]
    fan_medium_pin: u8,
    #[structopt(long, default_value = "22")]
    fan_high_pin: u8,
    #[structopt(long, default_value = "26")]
    compressor_pin: u8,
    #[structopt(long, default_value = "23")]
    indicator_pin: u8,

    /// Drive in-memory lines instead of gpio
    #[structopt(long)]
    dry_run: bool,
}

impl PinOpt {
    fn pin_map(&self) -> PinMap {
        PinMap {
            fan_low: self.fan_low_pin,
            fan_medium: self.fan_medium_pin,
            fan_high: self.fan_high_pin,
            compressor: self.compressor_pin,
            indicator: self.indicator_pin,
        }
    }

    fn lines(&self) -> Result<Box<dyn OutputLines>> {
        if self.dry_run {
            info!("dry run, outputs are kept in memory");
            return Ok(Box::new(MemoryLines::new()));
        }
        let pins = self.pin_map();
        let lines = GpioLines::new(pins)
            .wrap_err_with(|| format!("Could not acquire output lines {:?}", pins))?;
        Ok(Box::new(lines))
    }
}

#[derive(StructOpt, Debug)]
enum Opt {
    Serve {
        /// Address for server
        #[structopt(short, long, default_value = "0.0.0.0:5000")]
        addr: SocketAddr,

        #[structopt(flatten)]
        pins: PinOpt,
    },
    Discovery {
        /// Accessory name shown by the bridge
        #[structopt(short, long, default_value = "Coolbox")]
        name: String,

        /// Host the server is reachable at
        #[structopt(long)]
        host: String,

        #[structopt(short, long, default_value = "5000")]
        port: u16,

        /// File to write, stdout if absent
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
    Cycle {
        /// off, fan_only or with_compressor
        #[structopt(short, long)]
        mode: String,

        #[structopt(short, long)]
        fan_speed: Option<String>,

        /// Compressor on time in minutes, at most a day
        #[structopt(long = "on-minutes", default_value = "30", parse(try_from_str = parse_minutes))]
        compressor_on: Duration,

        /// Compressor off time in minutes, at most a day
        #[structopt(long = "off-minutes", default_value = "15", parse(try_from_str = parse_minutes))]
        compressor_off: Duration,

        #[structopt(flatten)]
        pins: PinOpt,
    },
}

const MAX_HOLD_MINUTES: u64 = 24 * 60;

fn parse_minutes(src: &str) -> std::result::Result<Duration, String> {
    let minutes: u64 = src
        .parse()
        .map_err(|e| format!("{} is not a number of minutes: {}", src, e))?;
    if !(1..=MAX_HOLD_MINUTES).contains(&minutes) {
        return Err(format!(
            "{} minutes is outside 1 to {}",
            minutes, MAX_HOLD_MINUTES
        ));
    }
    Ok(Duration::from_secs(minutes * 60))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("could not listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("could not listen for sigterm: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("received shutdown signal");
}

async fn serve(addr: SocketAddr, pins: PinOpt) -> Result<()> {
    let controller: Arc<Controller> = Arc::new(CycleController::new(pins.lines()?));
    let scheduler = Scheduler::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let schedule_task = tokio::spawn(schedule::run_schedule(
        controller.clone(),
        scheduler.subscribe(),
        shutdown_rx,
        SCHEDULE_TICK,
        schedule::local_time,
    ));

    let app = server::router(AppState::new(controller.clone(), scheduler));
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Could not bind {}", addr))?;

    info!("Starting server at {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if shutdown_tx.send(()).is_err() {
        debug!("schedule evaluator already stopped");
    }
    if let Err(e) = schedule_task.await {
        error!("schedule evaluator failed: {}", e);
    }

    match Arc::try_unwrap(controller) {
        Ok(controller) => controller.shutdown().await,
        Err(controller) => {
            warn!("controller still shared at shutdown, switching off in place");
            controller.apply(OperatingMode::Off).await;
        }
    }

    served.wrap_err("Server failed")
}

async fn cycle(mode: OperatingMode, timings: CycleTimings, pins: PinOpt) -> Result<()> {
    let controller = CycleController::with_timings(pins.lines()?, timings);
    println!("Running {}, ctrl-c to stop", mode);
    controller.apply(mode).await;
    shutdown_signal().await;
    controller.shutdown().await;
    println!("All outputs off");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    color_eyre::install()?;

    let opts = Opt::from_args();

    debug!("opts: {:?}", opts);

    match opts {
        Opt::Serve { addr, pins } => serve(addr, pins).await?,
        Opt::Discovery {
            name,
            host,
            port,
            output,
        } => Descriptor::new(&name, &host, port).write(output.as_deref())?,
        Opt::Cycle {
            mode,
            fan_speed,
            compressor_on,
            compressor_off,
            pins,
        } => {
            let mode = ControlRequest::new(&mode, fan_speed.as_deref())
                .into_mode()
                .wrap_err("Invalid cycle command")?;
            let timings = CycleTimings {
                compressor_on,
                compressor_off,
                ..CycleTimings::default()
            };
            cycle(mode, timings, pins).await?
        }
    }

    Ok(())
}
