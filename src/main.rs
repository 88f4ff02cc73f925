//! Console front end for an HP 5313x counter.
//!
//! Connects to the configured port, prints every reading as
//! `<seconds since start>  <value>` (or one JSON record per line with
//! `--json`) and runs until the sample limit is reached or `q` is entered.
//!
//! ```bash
//! hp_counter --port /dev/ttyUSB0 --samples 100
//! HPCOUNTER_SERIAL__PORT=COM3 hp_counter --estimate-gate --json
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use hp_counter::config::Settings;
use hp_counter::instrument::{CounterEvent, CounterNotification, HpCounter, UNLIMITED};
use hp_counter::measurement::MeasurementMode;
use log::info;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "hp_counter", version, about = "Read an HP 5313x counter over RS-232")]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Stop after this many valid samples
    #[arg(short = 'n', long)]
    samples: Option<u64>,

    /// Gate time in seconds, skips estimation
    #[arg(short, long)]
    gate_time: Option<f64>,

    /// Estimate the gate time before polling
    #[arg(long)]
    estimate_gate: bool,

    /// Treat bare numbers as totalize counts
    #[arg(long)]
    totalize: bool,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

enum Signal {
    Ready,
    Quit,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(port) = cli.port {
        settings.serial.port = port;
    }
    if let Some(samples) = cli.samples {
        settings.acquisition.sample_limit = Some(samples);
    }
    if let Some(gate) = cli.gate_time {
        settings.acquisition.gate_time = Some(gate);
    }
    settings.acquisition.force_totalize |= cli.totalize;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.application.log_level.as_str()),
    )
    .init();

    let counter = HpCounter::from_settings(&settings);
    if !counter.connect() {
        bail!("Could not open {}", settings.serial.port);
    }
    println!("{}", counter.instrument_id());

    if cli.estimate_gate && settings.acquisition.gate_time.is_none() {
        let gate = counter.estimate_gate_time(settings.acquisition.gate_estimate_samples);
        println!(
            "Gate time: {:?} ({} s)",
            gate,
            counter.gate_time_seconds()
        );
    }

    let (tx, rx) = mpsc::channel();
    let json = cli.json;
    let observed = counter.clone();
    let ready_tx = tx.clone();
    counter.subscribe(move |n: &CounterNotification| match n.event {
        CounterEvent::Updated => print_update(&observed, n, json),
        CounterEvent::Timeout => println!("Timeout"),
        CounterEvent::Ready => {
            let _ = ready_tx.send(Signal::Ready);
        }
    });

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    let _ = tx.send(Signal::Quit);
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });

    let limit = settings.acquisition.sample_limit.unwrap_or(UNLIMITED);
    if !counter.run_background(limit) {
        bail!("Measurement loop did not start");
    }
    println!("Enter 'q' to stop. (May take up to one gate time)");

    if let Ok(Signal::Quit) = rx.recv() {
        info!("Stop requested from console");
        counter.request_stop();
    }
    counter.join().context("Measurement loop failed")?;
    counter.clear_observers();
    counter.disconnect();
    Ok(())
}

fn print_update(counter: &HpCounter, n: &CounterNotification, json: bool) {
    if json {
        match serde_json::to_string(&*n.record) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("Cannot serialize record: {}", e),
        }
        return;
    }

    let value = if counter.measurement_mode() == MeasurementMode::Totalize {
        counter.convert_totalize_to_frequency()
    } else {
        n.record.value
    };
    println!("{:.3}  {}", n.seconds_since_init(), value);
}
