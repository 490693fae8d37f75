use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use audiometer_core::calibration::{AggregationOptions, Aggregator};
use audiometer_core::config::StorageConfig;
use audiometer_core::screening::{ScreeningEvent, StaircaseRunner};
use audiometer_core::{AppConfig, AudiometerContext, Ear};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "audiometer_cli",
    about = "Calibrated tone output, threshold screening and headphone calibration"
)]
struct Cli {
    /// Configuration file (defaults to assets/audiometer_config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the calibration data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ToneArgs {
    #[arg(long, default_value_t = 1000)]
    freq: u32,
    /// Level in dB HL
    #[arg(long, default_value_t = 40.0)]
    level: f64,
    /// L/R or any alias (OS/OD, LEFT/RIGHT, ...)
    #[arg(long, default_value = "R", value_parser = parse_ear)]
    ear: Ear,
    #[arg(long, default_value_t = 1.5)]
    seconds: f64,
    /// Reference profile JSON (switches to the reference dBFS strategy)
    #[arg(long)]
    profile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List playable output devices
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Play one calibrated tone on an output device
    Tone {
        #[command(flatten)]
        tone: ToneArgs,
        #[arg(long)]
        device: Option<String>,
    },
    /// Render one calibrated tone to a WAV file without audio hardware
    Render {
        #[command(flatten)]
        tone: ToneArgs,
        #[arg(long)]
        output: PathBuf,
    },
    /// List stored calibration sessions of a headphone
    Sessions {
        #[arg(long)]
        headphone: String,
    },
    /// Recompute a headphone bias from its stored sessions
    Recompute {
        #[arg(long)]
        headphone: String,
        #[arg(long, default_value = "median")]
        aggregator: Aggregator,
        #[arg(long)]
        no_smoothing: bool,
        #[arg(long, default_value_t = 25.0)]
        outlier: f64,
    },
    /// Run the automated staircase; press Enter whenever a tone is heard
    Screen {
        #[arg(long, default_value = "R", value_parser = parse_ear)]
        ear: Ear,
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        profile: Option<PathBuf>,
    },
}

fn parse_ear(s: &str) -> Result<Ear, String> {
    Ear::from_alias(s).ok_or_else(|| format!("unknown ear '{}'", s))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    if let Some(dir) = cli.data_dir {
        config.storage = StorageConfig::with_data_dir(dir);
    }

    match cli.command {
        Commands::Devices { json } => run_devices(config, json),
        Commands::Tone { tone, device } => run_tone(config, &tone, device.as_deref()),
        Commands::Render { tone, output } => run_render(config, &tone, &output),
        Commands::Sessions { headphone } => run_sessions(config, &headphone),
        Commands::Recompute {
            headphone,
            aggregator,
            no_smoothing,
            outlier,
        } => run_recompute(
            config,
            &headphone,
            AggregationOptions {
                outlier_abs_db: outlier,
                smoothing: !no_smoothing,
                aggregator,
            },
        ),
        Commands::Screen {
            ear,
            device,
            profile,
        } => run_screen(config, ear, device.as_deref(), profile.as_deref()),
    }
}

fn run_devices(config: AppConfig, json: bool) -> Result<ExitCode> {
    let ctx = AudiometerContext::with_default_output(config);
    let devices = ctx
        .list_output_devices()
        .context("failed to enumerate output devices")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(ExitCode::SUCCESS);
    }
    for device in &devices {
        println!(
            "{} {:<40} {} ch  {}  [{}]",
            if device.is_default { "*" } else { " " },
            device.name,
            device.channels,
            device
                .default_sample_rate
                .map(|sr| format!("{} Hz", sr))
                .unwrap_or_else(|| "? Hz".to_string()),
            device.stable_id
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn install_profile(ctx: &AudiometerContext, profile: Option<&Path>) -> Result<()> {
    if let Some(path) = profile {
        ctx.load_reference_profile(path)
            .with_context(|| format!("failed to load reference profile {}", path.display()))?;
        ctx.engine()
            .set_strategy(audiometer_core::AmplitudeStrategy::ReferenceDbfs)?;
    }
    Ok(())
}

fn run_tone(config: AppConfig, tone: &ToneArgs, device: Option<&str>) -> Result<ExitCode> {
    let ctx = AudiometerContext::with_default_output(config);
    if let Some(query) = device {
        let selection = ctx.select_output_device(query)?;
        println!("Output: {} ({})", selection.name, selection.stable_id);
    }
    install_profile(&ctx, tone.profile.as_deref())?;

    ctx.play_tone(tone.freq, tone.level, tone.ear)?;
    println!(
        "Playing {} Hz at {} dB HL on the {} ear",
        tone.freq,
        tone.level,
        tone.ear.display_name()
    );
    std::thread::sleep(Duration::from_secs_f64(tone.seconds.max(0.0)));
    ctx.stop_tone(false)?;
    // let the fade-out reach the device before the stream closes
    std::thread::sleep(Duration::from_millis(100));
    ctx.engine().shutdown_stream()?;
    Ok(ExitCode::SUCCESS)
}

fn run_render(config: AppConfig, tone: &ToneArgs, output: &Path) -> Result<ExitCode> {
    let block = config.audio.block_size.max(1) as usize;
    let (ctx, backend) = AudiometerContext::headless(config);
    install_profile(&ctx, tone.profile.as_deref())?;
    ctx.play_tone(tone.freq, tone.level, tone.ear)?;

    let tap = backend.tap();
    let channels = tap
        .channels()
        .ok_or_else(|| anyhow!("render stream did not open"))?;
    let sample_rate = tap.sample_rate().unwrap_or(48_000);
    let total_frames = (tone.seconds.max(0.0) * sample_rate as f64).round() as usize;

    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let mut written = 0;
    while written < total_frames {
        let frames = block.min(total_frames - written);
        let buffer = tap
            .pull(frames)
            .ok_or_else(|| anyhow!("render stream closed early"))?;
        for sample in buffer {
            writer.write_sample(sample)?;
        }
        written += frames;
    }
    writer.finalize()?;

    println!(
        "Wrote {} frames ({} ch, {} Hz) to {}",
        total_frames,
        channels,
        sample_rate,
        output.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_sessions(config: AppConfig, headphone: &str) -> Result<ExitCode> {
    let (ctx, _) = AudiometerContext::headless(config);
    let sessions = ctx.calibration_manager().list_sessions(headphone)?;
    if sessions.is_empty() {
        println!("No calibration sessions for '{}'", headphone);
    }
    for session in sessions {
        println!(
            "{}  subject={}  normal_hearing={}  reference={}",
            session.name,
            if session.subject_id.is_empty() {
                "-"
            } else {
                session.subject_id.as_str()
            },
            session.is_normoacusic,
            session.has_ref
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_recompute(config: AppConfig, headphone: &str, options: AggregationOptions) -> Result<ExitCode> {
    let (ctx, _) = AudiometerContext::headless(config);
    let report = ctx
        .calibration_manager()
        .recompute_with(headphone, &options)?;

    println!(
        "{} session(s) used, {} outlier(s) dropped",
        report.sessions_used,
        report.outliers.len()
    );
    for outlier in &report.outliers {
        println!(
            "  outlier: session #{} ({}) {} {} Hz {:+.1} dB",
            outlier.session_index,
            outlier.subject_id,
            outlier.ear.clinical_code(),
            outlier.frequency_hz,
            outlier.delta_db
        );
    }
    println!("{}", serde_json::to_string_pretty(&report.bias.to_value())?);
    Ok(ExitCode::SUCCESS)
}

fn run_screen(config: AppConfig, ear: Ear, device: Option<&str>, profile: Option<&Path>) -> Result<ExitCode> {
    let ctx = AudiometerContext::with_default_output(config);
    if let Some(query) = device {
        ctx.select_output_device(query)?;
    }
    install_profile(&ctx, profile)?;

    let mut events = ctx
        .broadcasts()
        .subscribe_screening()
        .ok_or_else(|| anyhow!("screening channel not initialized"))?;
    let runner = StaircaseRunner::new(ctx.staircase());
    let response = ctx.response().clone();

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() {
                break;
            }
            response.signal();
        }
    });

    println!("Press Enter whenever you hear a tone.");
    runner.start(ear)?;
    loop {
        match events.blocking_recv() {
            Ok(ScreeningEvent::LevelChanged {
                frequency_hz,
                level_db_hl,
                ..
            }) => println!("  {} Hz  {} dB HL", frequency_hz, level_db_hl),
            Ok(ScreeningEvent::ThresholdCaptured {
                frequency_hz,
                level_db_hl,
                ..
            }) => println!("Threshold {} Hz: {} dB HL", frequency_hz, level_db_hl),
            Ok(ScreeningEvent::TestFinished { .. }) => break,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let outcome = runner
        .join()
        .ok_or_else(|| anyhow!("screening worker did not finish"))??;
    if outcome.cancelled {
        bail!("screening cancelled");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&ctx.results().to_map_by_ear().to_value())?
    );
    Ok(ExitCode::SUCCESS)
}
