use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use trios_rs::command::CommandSession;
use trios_rs::logging;
use trios_rs::{AcquisitionConfig, IntegrationTime, PortSettings, RampPolicy, Ramses};

#[derive(Parser, Debug)]
#[command(
    name = "trios-demo",
    about = "Identify a TriOS sensor and take spectra"
)]
struct Args {
    /// Serial device of the sensor (e.g., /dev/ttyO1)
    port: String,
    /// Baud rate
    #[arg(long, default_value_t = 9600)]
    baud: u32,
    /// Integration time code: -1 host ramp, 0 sensor automatic, 1-12 fixed
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    int_time: i32,
    /// Highest code tried by the host ramp
    #[arg(long, default_value_t = 12, allow_negative_numbers = true)]
    int_max: i32,
    /// Make the ramp stop at the first unsaturated code
    #[arg(long)]
    first_unsaturated: bool,
    /// IPS box channel (0 when wired directly)
    #[arg(long, default_value_t = 0)]
    ips_channel: u8,
    /// Number of spectra
    #[arg(long, default_value_t = 1)]
    repeat: u32,
    /// Accept frames whose checkbyte is not 1
    #[arg(long)]
    no_checkbyte: bool,
    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,
    /// Time budget per command in seconds
    #[arg(long, default_value_t = 16.0)]
    max_time: f64,
    /// Keep raw buffers and packets in the output
    #[arg(long)]
    raw: bool,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    logging::init_rust_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut integration = IntegrationTime::from_code(args.int_time, args.int_max)?;
    if let IntegrationTime::Ramp { policy, .. } = &mut integration {
        if args.first_unsaturated {
            *policy = RampPolicy::FirstUnsaturated;
        }
    }
    let max_time = Duration::try_from_secs_f64(args.max_time)
        .with_context(|| format!("Invalid max time {}", args.max_time))?;

    let mut settings = PortSettings::new(&args.port);
    settings.baud_rate = args.baud;
    let config = AcquisitionConfig {
        integration,
        ips_channel: args.ips_channel,
        repeat: args.repeat,
        retain_raw: args.raw,
        session: CommandSession {
            poll_interval: Duration::from_millis(args.poll_ms),
            max_time,
            require_checkbyte: !args.no_checkbyte,
        },
    };

    println!("--- TriOS acquisition on {} ---", args.port);
    let result = Ramses::serial(settings, config).acquire();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for (i, m) in result.measurements.iter().enumerate() {
            let status = if m.is_valid() { "ok" } else { m.error() };
            let samples = m.spectrum.as_slice();
            println!(
                "[{}] {} code={} {} | first: {:?} | max: {}",
                i + 1,
                m.device_id,
                m.integration_code,
                status,
                &samples[..8],
                samples.iter().max().copied().unwrap_or(0)
            );
        }
    }

    if let Some(e) = result.error {
        anyhow::bail!(e);
    }
    println!("Done.");
    Ok(())
}
