// Control client for a running pulsein daemon

use clap::{Parser, Subcommand};
use pulsein_rs::{Endpoint, PulseClient, UnixQueue};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pulsein-ctl")]
#[command(version)]
#[command(about = "Send control commands to a running pulsein daemon")]
struct Args {
    /// Control channel key the daemon was started with
    key: u32,

    #[arg(long, value_name = "DIR", help = "Directory holding the control channel sockets [default: system temp dir]")]
    queue_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1000, value_name = "MS", help = "How long to wait for a reply")]
    reply_timeout: u64,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Wait for the daemon's readiness announcement and print its pid
    WaitReady,
    /// Pause sampling
    Pause,
    /// Resume sampling
    Resume,
    /// Discard all recorded samples
    Clear,
    /// Print the number of recorded samples
    Len,
    /// Remove and print the oldest sample
    Pop,
    /// Print a sample without removing it; negative indices count from the newest
    Peek {
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },
    /// Emit a trigger pulse of the given length in microseconds
    Trigger { micros: u32 },
    /// Pop and print every recorded sample as one comma-separated line
    Drain,
}

fn print_sample(sample: Option<u32>) {
    match sample {
        Some(width) => println!("{width}"),
        None => println!("-1"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let dir = args.queue_dir.unwrap_or_else(std::env::temp_dir);
    let queue = UnixQueue::open(&dir, args.key, Endpoint::Controller)?;
    let mut client = PulseClient::new(queue, Duration::from_millis(args.reply_timeout));

    match args.command {
        Action::WaitReady => println!("{}", client.wait_ready()?),
        Action::Pause => client.pause()?,
        Action::Resume => client.resume()?,
        Action::Clear => client.clear()?,
        Action::Len => println!("{}", client.len()?),
        Action::Pop => print_sample(client.pop()?),
        Action::Peek { index } => print_sample(client.peek(index)?),
        Action::Trigger { micros } => client.trigger(micros)?,
        Action::Drain => {
            let mut samples = Vec::new();
            while let Some(sample) = client.pop()? {
                samples.push(sample.to_string());
            }
            println!("{}", samples.join(","));
        }
    }
    Ok(())
}
