// Pulse-width capture daemon
//
// Samples one GPIO line, records the time between transitions and prints the
// recorded widths to stdout when sampling ends.

use clap::Parser;
use pulsein_rs::calibration::calibrated_clock;
use pulsein_rs::signals;
use pulsein_rs::{
    dump_samples, CaptureConfig, CaptureState, ControlHandler, Endpoint, EngineSettings,
    ExitReason, GpioLine, GpiodChip, LockMode, PulseClock, PulseEngine, TimingMode, UnixQueue,
    WallClock, CONSUMER,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Parser)]
#[command(name = "pulsein")]
#[command(version)]
#[command(about = "Capture pulse widths on a GPIO input line")]
#[command(long_about = "Poll a GPIO line, record the time between level transitions in a ring buffer and print the widths in microseconds as one comma-separated line on exit. A controller can pause, resume, clear, inspect and trigger over a keyed control channel.")]
struct Args {
    /// GPIO chip (gpiochipN, N or /dev/gpiochipN)
    chip: String,

    /// Line offset on the chip
    offset: u32,

    #[arg(short = 'l', long, help = "Line idles high instead of low")]
    active_low: bool,

    #[arg(short, long, default_value_t = pulsein_rs::config::DEFAULT_BUFFER_SIZE, help = "Ring buffer capacity in samples")]
    buffer_size: usize,

    #[arg(short, long, value_name = "US", help = "Exit after this many microseconds without a transition")]
    timeout: Option<u64>,

    #[arg(short = 'd', long, value_name = "US", help = "Emit a trigger pulse of this length before sampling")]
    trigger: Option<u32>,

    #[arg(short, long, value_name = "N", help = "Exit after recording this many samples")]
    pulses: Option<usize>,

    #[arg(short, long, help = "Count loop iterations against a calibrated tick instead of reading the clock")]
    calibrate: bool,

    #[arg(short, long, value_name = "KEY", help = "Serve the control protocol on this channel key")]
    queue_key: Option<u32>,

    #[arg(long, value_name = "DIR", help = "Directory holding the control channel sockets [default: system temp dir]")]
    queue_dir: Option<PathBuf>,

    #[arg(long, default_value = "spin", help = "How the sampler waits for shared state (spin or block)")]
    lock_mode: LockMode,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> CaptureConfig {
        let mut config = CaptureConfig::new(self.chip, self.offset);
        config.active_low = self.active_low;
        config.buffer_size = self.buffer_size;
        config.idle_timeout_us = self.timeout;
        config.trigger_us = self.trigger;
        config.max_pulses = self.pulses;
        config.timing = if self.calibrate {
            TimingMode::TickCounting
        } else {
            TimingMode::Precise
        };
        config.queue_key = self.queue_key;
        if let Some(dir) = self.queue_dir {
            config.queue_dir = dir;
        }
        config.lock_mode = self.lock_mode;
        config
    }
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    #[cfg(feature = "cpu-profiling")]
    let _tracy = tracy_client::Client::start();

    let config = args.into_config();
    let shared = match capture(&config) {
        Ok(shared) => shared,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = dump_samples(&shared, std::io::stdout().lock()) {
        log::error!("Unable to write samples: {e}");
        std::process::exit(1);
    }
}

/// Set up the line and run the sampler until it exits. Returns the shared
/// state so the caller can dump the buffer.
fn capture(config: &CaptureConfig) -> Result<Arc<CaptureState>, Box<dyn std::error::Error>> {
    config.validate()?;

    let chip = GpiodChip::open(&config.chip)?;
    let mut line = chip.get_line(config.offset)?;
    log::info!(
        "Using line {} on {} ({} lines)",
        config.offset,
        chip.name(),
        chip.lines()
    );

    let tick_clock = match config.timing {
        TimingMode::TickCounting => Some(calibrated_clock(&mut line)?),
        TimingMode::Precise => None,
    };

    line.request_input(CONSUMER)?;
    if let Some(pulse) = config.startup_trigger() {
        pulse.emit(&mut line)?;
    }

    let shared = Arc::new(CaptureState::new(
        Box::new(line),
        config.buffer_size,
        config.lock_mode,
    ));

    if let Err(e) = signals::spawn_watcher(shared.clone()) {
        log::warn!("Signal handling unavailable: {e}");
    }

    let control = match config.queue_key {
        Some(key) => Some(spawn_control(config, key, shared.clone())?),
        None => None,
    };

    let settings = config.engine_settings();
    let reason = match tick_clock {
        Some(clock) => sample(&shared, clock, settings)?,
        None => sample(&shared, WallClock::new(), settings)?,
    };
    log::info!("Exiting: {reason:?}");

    shared.request_shutdown();
    if let Some(control) = control {
        if control.join().is_err() {
            log::warn!("Control handler panicked");
        }
    }
    Ok(shared)
}

fn sample<C: PulseClock>(
    shared: &Arc<CaptureState>,
    clock: C,
    settings: EngineSettings,
) -> pulsein_rs::Result<ExitReason> {
    PulseEngine::new(shared.clone(), clock, settings).run()
}

fn spawn_control(
    config: &CaptureConfig,
    key: u32,
    shared: Arc<CaptureState>,
) -> Result<JoinHandle<()>, Box<dyn std::error::Error>> {
    let queue = UnixQueue::open(&config.queue_dir, key, Endpoint::Daemon)?;
    log::info!("Control channel bound at {}", queue.local_path().display());

    let mut handler = ControlHandler::new(queue, shared, config.idle_level());
    let handle = std::thread::Builder::new()
        .name("pulsein-control".to_string())
        .spawn(move || {
            if let Err(e) = handler.serve() {
                log::error!("{e}");
                std::process::exit(1);
            }
        })?;
    Ok(handle)
}
