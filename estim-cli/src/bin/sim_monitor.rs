use clap::Parser;
use estim_lib::config::{ControllerConfig, SimConfig};
use estim_lib::param::StimulationParam;
use estim_lib::session::{SessionEvent, SessionSnapshot};
use estim_lib::transport::SimTransport;
use estim_lib::SessionController;
use std::error::Error;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a session against the simulated stimulator and print telemetry")]
struct Args {
    /// How long to watch telemetry, in seconds
    #[arg(short, long, default_value = "5")]
    watch: u64,

    /// Start a session of this many seconds right away
    #[arg(short, long)]
    start: Option<u32>,

    /// Stimulation frequency in Hz
    #[arg(short, long, default_value = "100")]
    frequency: u16,

    /// Positive and negative amplitude in mA
    #[arg(short, long, default_value = "5.0")]
    amplitude: f32,

    /// Pulse width in us for both phases
    #[arg(long, default_value = "200")]
    width: u16,

    /// Fixed RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Print every waveform batch instead of one line per second
    #[arg(long)]
    all_batches: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn print_batch(samples: &[f32]) {
    let min = samples.iter().copied().fold(f32::INFINITY, f32::min);
    let max = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    println!(
        "  〰️  {} samples  min {:>7.3}  max {:>7.3}  mean {:>7.3} mA",
        samples.len(),
        min,
        max,
        mean
    );
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("\n{}", "=".repeat(50));
    println!("📋 Final session state");
    println!("{}", "=".repeat(50));
    println!("  State:      {}", snapshot.state);
    println!("  Remaining:  {} s", snapshot.remaining_secs);
    println!("  Parameters: {}", snapshot.parameters);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    let sim = SimTransport::new(SimConfig {
        seed: args.seed,
        ..Default::default()
    });
    let (controller, mut events) = SessionController::new(sim, ControllerConfig::default());
    let handle = controller.handle();
    let task = controller.spawn();

    handle.update_parameters(StimulationParam {
        frequency_hz: args.frequency,
        positive_width_us: args.width,
        negative_width_us: args.width,
        dead_time_us: 50,
        positive_amp_ma: args.amplitude,
        negative_amp_ma: args.amplitude,
    })?;
    if let Some(secs) = args.start {
        handle.start(secs)?;
    }

    info!("Watching simulated telemetry for {} s", args.watch);
    let deadline = tokio::time::sleep(Duration::from_secs(args.watch));
    tokio::pin!(deadline);
    let mut batches = 0u64;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(SessionEvent::StateChanged(state)) => println!("🔄 State: {}", state),
                Some(SessionEvent::TimeUpdated(secs)) => println!("⏱️  Remaining: {} s", secs),
                Some(SessionEvent::Monitoring(data)) => {
                    if args.all_batches || batches % 20 == 0 {
                        println!(
                            "📊 Battery {:>3}%  measured {:>5}  error: {}",
                            data.battery_pct, data.real_freq, data.error
                        );
                    }
                }
                Some(SessionEvent::Waveform(samples)) => {
                    batches += 1;
                    if args.all_batches || batches % 20 == 1 {
                        print_batch(&samples);
                    }
                }
                Some(SessionEvent::StartRequested) => println!("🔘 Start button pressed"),
                None => break,
            },
        }
    }

    let snapshot = handle.snapshot().await?;
    handle.shutdown()?;
    task.await?;

    print_snapshot(&snapshot);
    println!("  Batches:    {}", batches);
    println!("\n✅ Done!");
    Ok(())
}
