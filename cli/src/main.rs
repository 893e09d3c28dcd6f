use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shoebot_core::{
    chat::{ChatClient, ChatHistory, TelemetrySnapshot},
    config::AppConfig,
    pipeline::Pipeline,
    rendering::{composite, HudRenderer, Overlay},
    robot::{Command, Direction, Robot, RobotState},
    runtime::{CancelFlag, CountedScheduler, LoopDriver, LoopStats, RefreshScheduler},
    session::{BoxedSource, CameraSession, SessionStatus},
    tracking::TrackingSummary,
    video::{FrameSource, RgbaFrame, SyntheticSource},
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "shoebot",
    version,
    about = "Control dashboard core for the shoe-organizing robot",
    long_about = None
)]
struct Cli {
    /// TOML config file (tracker and chat sections)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// TTF/OTF font for HUD labels; labels are skipped without one
    #[arg(long, global = true)]
    font: Option<PathBuf>,

    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the motion tracker over a synthetic camera feed.
    Demo {
        /// Number of frames the synthetic camera delivers
        #[arg(long, default_value_t = 300)]
        cycles: u64,

        #[arg(long, default_value_t = 640)]
        width: u32,

        #[arg(long, default_value_t = 480)]
        height: u32,

        #[command(flatten)]
        output: LoopOutput,
    },

    /// Run the motion tracker over a video file.
    #[cfg(feature = "ffmpeg")]
    Track {
        /// Input video path
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        output: LoopOutput,
    },

    /// Simulate the telemetry feed.
    Telemetry {
        #[arg(long, default_value_t = 10)]
        ticks: u32,

        /// Robot state during the simulation
        #[arg(long, value_enum, default_value_t = StateArg::Working)]
        state: StateArg,

        /// Milliseconds between ticks
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Seed for reproducible readings
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Ask the assistant a question about the robot.
    Chat {
        /// Question text
        #[arg(required = true)]
        text: Vec<String>,

        /// Generative-language API key (falls back to GEMINI_API_KEY)
        #[arg(long, env = "API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Send movement commands and print the command log.
    Drive {
        #[arg(value_enum, required = true)]
        commands: Vec<DriveArg>,
    },
}

/// Tracker overrides; each one wins over the config file.
#[derive(Args)]
struct Tuning {
    /// Downscale factor applied before differencing (0–1]
    #[arg(long, global = true)]
    downscale: Option<f32>,

    /// Per-channel noise threshold
    #[arg(long, global = true)]
    noise_threshold: Option<u32>,

    /// Changed-pixel count needed to hold lock
    #[arg(long, global = true)]
    detect_threshold: Option<u32>,

    /// Box smoothing weight (0–1]
    #[arg(long, global = true)]
    blend: Option<f32>,
}

impl Tuning {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        let t = &mut config.tracker;
        if let Some(v) = self.downscale {
            t.downscale = v;
        }
        if let Some(v) = self.noise_threshold {
            t.noise_threshold = v;
        }
        if let Some(v) = self.detect_threshold {
            t.detect_threshold = v;
        }
        if let Some(v) = self.blend {
            t.blend = v;
        }
        t.validate()
    }
}

#[derive(Args)]
struct LoopOutput {
    /// Target refresh rate; 0 runs as fast as frames arrive
    #[arg(long, default_value_t = 60.0)]
    hz: f64,

    /// Write composited PNG snapshots into this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Snapshot every n-th processed frame
    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Idle,
    Working,
    Returning,
    Charging,
    Error,
}

impl From<StateArg> for RobotState {
    fn from(s: StateArg) -> Self {
        match s {
            StateArg::Idle => RobotState::Idle,
            StateArg::Working => RobotState::Working,
            StateArg::Returning => RobotState::Returning,
            StateArg::Charging => RobotState::Charging,
            StateArg::Error => RobotState::Error,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DriveArg {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Recharge,
}

impl From<DriveArg> for Command {
    fn from(d: DriveArg) -> Self {
        match d {
            DriveArg::Forward => Command::Move(Direction::Forward),
            DriveArg::Backward => Command::Move(Direction::Backward),
            DriveArg::Left => Command::Move(Direction::Left),
            DriveArg::Right => Command::Move(Direction::Right),
            DriveArg::Stop => Command::EmergencyStop,
            DriveArg::Recharge => Command::AutoRecharge,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.tuning.apply(&mut config)?;

    match cli.command {
        Commands::Demo {
            cycles,
            width,
            height,
            output,
        } => cmd_demo(&config, cli.font.as_deref(), cycles, width, height, &output),
        #[cfg(feature = "ffmpeg")]
        Commands::Track { input, output } => {
            cmd_track(&config, cli.font.as_deref(), &input, &output)
        }
        Commands::Telemetry {
            ticks,
            state,
            interval_ms,
            seed,
        } => cmd_telemetry(ticks, state.into(), interval_ms, seed),
        Commands::Chat { text, api_key } => cmd_chat(&config, text.join(" "), api_key),
        Commands::Drive { commands } => cmd_drive(&commands),
    }
}

// ── Perception loop ───────────────────────────────────────────────────────────

fn cmd_demo(
    config: &AppConfig,
    font: Option<&Path>,
    cycles: u64,
    width: u32,
    height: u32,
    output: &LoopOutput,
) -> Result<()> {
    info!("Synthetic camera demo");
    info!("  frames : {cycles}");
    info!("  size   : {width}x{height}");

    let mut session = CameraSession::start(move || {
        Ok(Box::new(
            SyntheticSource::new(width, height)
                .with_warmup(3)
                .with_limit(cycles),
        ) as BoxedSource)
    })?;

    match session.wait_acquired() {
        SessionStatus::Active => {}
        SessionStatus::Failed(e) => bail!("camera unavailable: {e}"),
        other => bail!("camera session ended early: {other:?}"),
    }
    let source = session
        .take_source()
        .context("camera session did not hand over a stream")?;

    let stats = run_loop(source, session.cancel_flag(), config, font, output)?;
    session.close();
    report(&stats);
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn cmd_track(
    config: &AppConfig,
    font: Option<&Path>,
    input: &Path,
    output: &LoopOutput,
) -> Result<()> {
    use shoebot_core::session::AcquisitionError;
    use shoebot_core::video::FileSource;

    info!("Tracking video file");
    info!("  input : {}", input.display());

    let source = match FileSource::open(input) {
        Ok(source) => source,
        Err(e) => bail!("{}", AcquisitionError::from_anyhow(&e)),
    };
    let stats = run_loop(source, CancelFlag::new(), config, font, output)?;
    report(&stats);
    Ok(())
}

fn run_loop<S: FrameSource>(
    source: S,
    cancel: CancelFlag,
    config: &AppConfig,
    font: Option<&Path>,
    output: &LoopOutput,
) -> Result<LoopStats> {
    let font = font.map(HudRenderer::load_font).transpose()?;
    let pipeline = Pipeline::new(&config.tracker, font)?;

    let pb = spinner("Tracking…");
    let pb2 = pb.clone();
    let mut driver = LoopDriver::new(source, pipeline, cancel).on_summary(move |s| {
        pb2.set_message(describe(s));
    });

    if let Some(dir) = output.snapshot_dir.clone() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir: {}", dir.display()))?;
        let every = output.snapshot_every.max(1);
        let mut processed = 0u64;
        driver = driver.on_frame(move |frame, overlay, _| {
            processed += 1;
            if processed % every != 0 {
                return;
            }
            let path = dir.join(format!("frame_{processed:06}.png"));
            if let Err(e) = save_snapshot(frame, overlay, &path) {
                warn!("snapshot failed: {e:#}");
            }
        });
    }

    let stats = if output.hz > 0.0 {
        driver.run(&mut RefreshScheduler::new(output.hz))
    } else {
        driver.run(&mut CountedScheduler::new(u64::MAX))
    };

    match driver.latest_summary() {
        Some(s) => pb.finish_with_message(describe(&s)),
        None => pb.finish_with_message("No frames processed."),
    }
    Ok(stats)
}

fn save_snapshot(frame: &RgbaFrame, overlay: &Overlay, path: &Path) -> Result<()> {
    let mut composed = frame.clone();
    composite(&mut composed, overlay)?;
    let img = image::RgbaImage::from_raw(composed.width, composed.height, composed.data)
        .context("frame buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn describe(s: &TrackingSummary) -> String {
    if s.locked {
        format!("TARGET LOCKED at ({}, {})", s.centroid_x, s.centroid_y)
    } else {
        "SEARCHING...".to_string()
    }
}

fn report(stats: &LoopStats) {
    info!(
        cycles = stats.cycles,
        processed = stats.processed,
        skipped = stats.skipped,
        faults = stats.faults,
        "session finished"
    );
}

// ── Robot simulation ──────────────────────────────────────────────────────────

fn cmd_telemetry(ticks: u32, state: RobotState, interval_ms: u64, seed: Option<u64>) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut robot = Robot::new();
    robot.set_state(state);

    for tick in 1..=ticks {
        if interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
        robot.tick(&mut rng);
        let s = &robot.stats;
        println!(
            "tick {tick:>4}  state {:<9}  battery {:>6.2}%  temp {:>5.1}°C  link {:>3}%  storage {:>3}%",
            robot.state.to_string(),
            s.battery_level,
            s.temperature,
            s.connection_strength,
            s.storage_capacity,
        );
    }
    Ok(())
}

fn cmd_chat(config: &AppConfig, text: String, api_key: Option<String>) -> Result<()> {
    let api_key = api_key.or_else(|| std::env::var("GEMINI_API_KEY").ok());
    let client = ChatClient::new(&config.chat, api_key);
    let robot = Robot::new();
    let snapshot = TelemetrySnapshot::from_robot(&robot);

    let mut history = ChatHistory::new();
    let pb = spinner("Contacting AI core…");
    let sent = history.send(&client, &text, &snapshot).is_some();
    pb.finish_and_clear();
    if !sent {
        bail!("nothing to send");
    }

    for message in history.messages() {
        println!("[{:?}] {}", message.role, message.text);
    }
    Ok(())
}

fn cmd_drive(commands: &[DriveArg]) -> Result<()> {
    let mut robot = Robot::new();
    for &command in commands {
        robot.execute(command.into());
    }

    println!("state: {}", robot.state);
    for line in robot.log.entries() {
        println!("  {line}");
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
